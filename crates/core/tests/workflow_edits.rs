//! Integration tests for workflow load, splice, removal and save.
//!
//! Exercises the public API end to end on a two-pass sampler workflow
//! laid out the way the node-graph tool saves it.

use comfyctl_core::edit::TypeMatcher;
use comfyctl_core::graph::node_modes;
use comfyctl_core::integrity;
use comfyctl_core::presets;
use comfyctl_core::splice::NodeSpec;
use comfyctl_core::{CoreError, JsonStyle, WorkflowDocument};

const TWO_PASS: &str = r#"{
  "id": "5d1c0f3e-6c1c-4e6e-9a4b-0b1f3f8f6a11",
  "last_node_id": 118,
  "last_link_id": 226,
  "nodes": [
    {"id": 95, "type": "UNETLoader", "pos": [-400, 0], "size": [300, 82], "flags": {}, "order": 0, "mode": 0,
     "inputs": [],
     "outputs": [{"name": "MODEL", "type": "MODEL", "links": [180], "slot_index": 0}],
     "properties": {"Node name for S&R": "UNETLoader"},
     "widgets_values": ["wan2.2_i2v_high_noise_14B_fp8_scaled.safetensors", "default"]},
    {"id": 96, "type": "UNETLoader", "pos": [-400, 200], "size": [300, 82], "flags": {}, "order": 1, "mode": 0,
     "inputs": [],
     "outputs": [{"name": "MODEL", "type": "MODEL", "links": [181], "slot_index": 0}],
     "properties": {"Node name for S&R": "UNETLoader"},
     "widgets_values": ["wan2.2_i2v_low_noise_14B_fp8_scaled.safetensors", "default"]},
    {"id": 117, "type": "PathchSageAttentionKJ", "pos": [-100, 0], "order": 2, "mode": 0,
     "inputs": [{"name": "model", "type": "MODEL", "link": 180}],
     "outputs": [{"name": "MODEL", "type": "MODEL", "links": [182], "slot_index": 0}],
     "widgets_values": ["auto"]},
    {"id": 86, "type": "KSamplerAdvanced", "pos": [200, 0], "size": [300, 334], "flags": {}, "order": 3, "mode": 0,
     "inputs": [
        {"name": "model", "type": "MODEL", "link": 182},
        {"name": "positive", "type": "CONDITIONING", "link": null},
        {"name": "negative", "type": "CONDITIONING", "link": null},
        {"name": "latent_image", "type": "LATENT", "link": null}
     ],
     "outputs": [{"name": "LATENT", "type": "LATENT", "links": [170], "slot_index": 0}],
     "properties": {"Node name for S&R": "KSamplerAdvanced"},
     "widgets_values": ["enable", 123456, "randomize", 4, 1, "euler", "simple", 0, 2, "enable"]},
    {"id": 85, "type": "KSamplerAdvanced", "pos": [600, 0], "size": [300, 334], "flags": {}, "order": 4, "mode": 0,
     "inputs": [
        {"name": "model", "type": "MODEL", "link": 181},
        {"name": "positive", "type": "CONDITIONING", "link": null},
        {"name": "negative", "type": "CONDITIONING", "link": null},
        {"name": "latent_image", "type": "LATENT", "link": 170}
     ],
     "outputs": [{"name": "LATENT", "type": "LATENT", "links": [], "slot_index": 0}],
     "properties": {"Node name for S&R": "KSamplerAdvanced"},
     "widgets_values": ["disable", 0, "fixed", 4, 1, "euler", "simple", 2, 4, "disable"]}
  ],
  "links": [
    [170, 86, 0, 85, 3, "LATENT"],
    [180, 95, 0, 117, 0, "MODEL"],
    [181, 96, 0, 85, 0, "MODEL"],
    [182, 117, 0, 86, 0, "MODEL"]
  ],
  "groups": [],
  "config": {},
  "extra": {"ds": {"scale": 0.8, "offset": [0, 0]}, "frontendVersion": "1.25.11"},
  "version": 0.4
}"#;

fn load() -> WorkflowDocument {
    WorkflowDocument::from_json_str(TWO_PASS).expect("fixture should parse")
}

// ---------------------------------------------------------------------------
// Test: splice between the two sampler passes
// ---------------------------------------------------------------------------

/// Splicing node 119 into link 170 retargets the link and allocates 227.
#[test]
fn splice_node_119_into_link_170() {
    let mut doc = load();
    let report = doc
        .splice_node(170, &presets::clean_gpu("Unload High Noise Model").with_id(119))
        .expect("splice should succeed");

    assert_eq!(report.node_id, 119);
    assert_eq!(report.upstream_link, 170);
    assert_eq!(report.downstream_link, 227);

    let text = doc.to_json_string(JsonStyle::Compact).unwrap();
    let raw: serde_json::Value = serde_json::from_str(&text).unwrap();
    let links = raw["links"].as_array().unwrap();
    assert!(links.contains(&serde_json::json!([170, 86, 0, 119, 0, "LATENT"])));
    assert!(links.contains(&serde_json::json!([227, 119, 0, 85, 3, "LATENT"])));

    let sampler = doc.node(85).unwrap();
    let slot = sampler.input_slot("latent_image").unwrap();
    assert_eq!(sampler.inputs[slot].link, Some(227));

    assert_eq!(doc.last_link_id, 227);
    assert_eq!(doc.last_node_id, 119);
    assert!(integrity::validate(&doc).is_empty());
}

/// Every link ID referenced by any slot exists after a chain splice.
#[test]
fn chain_splice_keeps_every_reference_resolvable() {
    let mut doc = load();
    doc.splice_chain(170, &presets::unload_pair()).unwrap();

    for node in doc.nodes.iter() {
        for input in &node.inputs {
            if let Some(link) = input.link {
                assert!(doc.link(link).is_some(), "node {} input -> {link}", node.id);
            }
        }
        for output in &node.outputs {
            for link in output.link_ids() {
                assert!(doc.link(*link).is_some(), "node {} output -> {link}", node.id);
            }
        }
    }
    assert!(doc.last_node_id >= doc.max_node_id());
    assert!(doc.last_link_id >= doc.max_link_id());
}

/// The delete-model preset feeds its model input from the named loader.
#[test]
fn delete_model_preset_wires_model_input() {
    let mut doc = load();
    let report = doc
        .splice_node(170, &presets::delete_model(Some((117, 0))))
        .unwrap();

    assert_eq!(report.aux_links.len(), 1);
    let aux = doc.link(report.aux_links[0]).unwrap();
    assert_eq!((aux.src_node, aux.dst_node, aux.dst_slot), (117, report.node_id, 1));
    assert_eq!(doc.node(117).unwrap().outputs[0].link_ids(), &[182, aux.id]);
    assert!(integrity::validate(&doc).is_empty());
}

// ---------------------------------------------------------------------------
// Test: rejected edits leave the document unchanged
// ---------------------------------------------------------------------------

#[test]
fn rejected_splice_leaves_document_unchanged() {
    let mut doc = load();
    let before = doc.clone();

    let err = doc
        .splice_node(170, &NodeSpec::new("X").with_aux_input("model", "MODEL", Some((404, 0))))
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound { entity: "node", id: 404 }));
    assert_eq!(doc, before);
}

// ---------------------------------------------------------------------------
// Test: removal restores the original topology
// ---------------------------------------------------------------------------

#[test]
fn removing_unload_nodes_restores_direct_link() {
    let mut doc = load();
    doc.splice_chain(170, &presets::unload_pair()).unwrap();

    let removed = doc
        .remove_passthrough_where(&TypeMatcher::Contains("easy ".into()))
        .unwrap();
    assert_eq!(removed.len(), 2);

    let direct = doc.find_link(86, 85, Some(3)).unwrap();
    assert_eq!(direct.id, 170);
    assert_eq!(doc.nodes.len(), 5);
    assert_eq!(doc.links.len(), 4);
    assert!(integrity::validate(&doc).is_empty());
}

// ---------------------------------------------------------------------------
// Test: save and reload
// ---------------------------------------------------------------------------

#[test]
fn edited_document_survives_save_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("edited.json");

    let mut doc = load();
    doc.set_mode(&TypeMatcher::Contains("Sage".into()), node_modes::BYPASS)
        .unwrap();
    doc.splice_node(170, &presets::clean_gpu("Unload")).unwrap();
    doc.save(&path, JsonStyle::Pretty).unwrap();

    let reloaded = WorkflowDocument::load(&path).unwrap();
    assert_eq!(reloaded, doc);
    assert_eq!(reloaded.node(117).unwrap().mode, node_modes::BYPASS);
    assert_eq!(reloaded.extra["extra"]["frontendVersion"], "1.25.11");
}

#[test]
fn unmodified_round_trip_preserves_link_tuples() {
    let doc = load();
    let again = WorkflowDocument::from_json_str(&doc.to_json_string(JsonStyle::Compact).unwrap()).unwrap();
    assert_eq!(again.nodes.len(), doc.nodes.len());
    assert_eq!(again.links, doc.links);
}
