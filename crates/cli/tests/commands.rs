//! Integration tests for the offline subcommands.
//!
//! Each test parses a real argument vector and dispatches it through
//! `commands::run` against workflow files in a temporary directory.

use std::path::Path;

use clap::Parser;
use comfyctl_cli::cli::Cli;
use comfyctl_cli::commands::{self, Context};
use comfyctl_cli::config::CliConfig;
use comfyctl_core::graph::node_modes;
use comfyctl_core::{integrity, WorkflowDocument};
use tokio_util::sync::CancellationToken;

const TWO_PASS: &str = r#"{
  "last_node_id": 118,
  "last_link_id": 226,
  "nodes": [
    {"id": 117, "type": "PathchSageAttentionKJ", "pos": [-100, 0], "mode": 0,
     "inputs": [], "outputs": [{"name": "MODEL", "type": "MODEL", "links": [182]}],
     "widgets_values": ["auto"]},
    {"id": 86, "type": "KSamplerAdvanced", "pos": [200, 0], "mode": 0,
     "inputs": [
        {"name": "model", "type": "MODEL", "link": 182},
        {"name": "positive", "type": "CONDITIONING", "link": null},
        {"name": "negative", "type": "CONDITIONING", "link": null},
        {"name": "latent_image", "type": "LATENT", "link": null}
     ],
     "outputs": [{"name": "LATENT", "type": "LATENT", "links": [170]}],
     "widgets_values": ["enable", 123456, "randomize", 4, 1, "euler", "simple", 0, 2, "enable"]},
    {"id": 85, "type": "KSamplerAdvanced", "pos": [600, 0], "mode": 0,
     "inputs": [
        {"name": "model", "type": "MODEL", "link": null},
        {"name": "positive", "type": "CONDITIONING", "link": null},
        {"name": "negative", "type": "CONDITIONING", "link": null},
        {"name": "latent_image", "type": "LATENT", "link": 170}
     ],
     "outputs": [{"name": "LATENT", "type": "LATENT", "links": []}],
     "widgets_values": ["disable", 0, "fixed", 4, 1, "euler", "simple", 2, 4, "disable"]}
  ],
  "links": [
    [170, 86, 0, 85, 3, "LATENT"],
    [182, 117, 0, 86, 0, "MODEL"]
  ],
  "version": 0.4
}"#;

fn context() -> Context {
    Context {
        config: CliConfig::from_lookup(|_| None).unwrap(),
        cancel: CancellationToken::new(),
    }
}

async fn run(args: &[&str]) -> anyhow::Result<()> {
    let cli = Cli::try_parse_from(std::iter::once("comfyctl").chain(args.iter().copied()))?;
    commands::run(cli.command, &context()).await
}

fn fixture(dir: &Path) -> String {
    let path = dir.join("wf.json");
    std::fs::write(&path, TWO_PASS).unwrap();
    path.to_string_lossy().into_owned()
}

// ---------------------------------------------------------------------------
// splice / insert-unload
// ---------------------------------------------------------------------------

#[tokio::test]
async fn splice_custom_node_between_samplers() {
    let dir = tempfile::tempdir().unwrap();
    let input = fixture(dir.path());
    let output = dir.path().join("out.json");

    run(&[
        "splice", &input, "-o", output.to_str().unwrap(),
        "--between", "86", "85",
        "--node-type", "easy cleanGpuUsed", "--id", "119",
    ])
    .await
    .unwrap();

    let doc = WorkflowDocument::load(&output).unwrap();
    let upstream = doc.require_link(170).unwrap();
    assert_eq!((upstream.src_node, upstream.dst_node, upstream.dst_slot), (86, 119, 0));
    let downstream = doc.require_link(227).unwrap();
    assert_eq!(
        (downstream.src_node, downstream.src_slot, downstream.dst_node, downstream.dst_slot),
        (119, 0, 85, 3)
    );
    assert_eq!(downstream.link_type, "LATENT");
    assert_eq!(doc.node(85).unwrap().inputs[3].link, Some(227));
    assert!(doc.last_node_id >= 119 && doc.last_link_id >= 227);
    assert!(integrity::validate(&doc).is_empty());

    // The input file is untouched when -o is given.
    assert_eq!(std::fs::read_to_string(&input).unwrap(), TWO_PASS);
}

#[tokio::test]
async fn insert_unload_detects_the_handoff_link() {
    let dir = tempfile::tempdir().unwrap();
    let input = fixture(dir.path());

    run(&["insert-unload", &input]).await.unwrap();

    let doc = WorkflowDocument::load(Path::new(&input)).unwrap();
    assert!(doc.links_between(86, 85).is_empty());
    let types: Vec<&str> = [119, 120]
        .iter()
        .map(|id| doc.node(*id).unwrap().node_type.as_str())
        .collect();
    assert_eq!(types, vec!["easy cleanGpuUsed", "easy clearCacheAll"]);
    assert_eq!(doc.links_between(120, 85).len(), 1);
}

#[tokio::test]
async fn splice_type_mismatch_leaves_file_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let input = fixture(dir.path());

    let err = run(&["splice", &input, "--link", "170", "--preset", "taylorseer"]).await.unwrap_err();
    assert!(format!("{err:#}").contains("LATENT"));
    assert_eq!(std::fs::read_to_string(&input).unwrap(), TWO_PASS);
}

// ---------------------------------------------------------------------------
// remove-node / set-mode / set-widget
// ---------------------------------------------------------------------------

#[tokio::test]
async fn remove_restores_direct_link() {
    let dir = tempfile::tempdir().unwrap();
    let input = fixture(dir.path());

    run(&["insert-unload", &input]).await.unwrap();
    run(&["remove-node", &input, "--type-contains", "easy "]).await.unwrap();

    let doc = WorkflowDocument::load(Path::new(&input)).unwrap();
    assert_eq!(doc.nodes.len(), 3);
    let direct = doc.links_between(86, 85);
    assert_eq!(direct.len(), 1);
    assert_eq!(direct[0].dst_slot, 3);
    assert!(integrity::validate(&doc).is_empty());
}

#[tokio::test]
async fn set_mode_and_widget() {
    let dir = tempfile::tempdir().unwrap();
    let input = fixture(dir.path());

    run(&["set-mode", &input, "--type-contains", "SageAttention", "--mode", "bypass"])
        .await
        .unwrap();
    run(&["set-widget", &input, "--type", "KSamplerAdvanced", "--index", "3", "--value", "6"])
        .await
        .unwrap();

    let doc = WorkflowDocument::load(Path::new(&input)).unwrap();
    assert_eq!(doc.node(117).unwrap().mode, node_modes::BYPASS);
    for id in [85, 86] {
        assert_eq!(doc.node(id).unwrap().widgets_values.as_ref().unwrap()[3], 6);
    }
}

#[tokio::test]
async fn dry_run_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let input = fixture(dir.path());

    run(&["set-mode", &input, "--type", "KSamplerAdvanced", "--mode", "muted", "--dry-run"])
        .await
        .unwrap();
    assert_eq!(std::fs::read_to_string(&input).unwrap(), TWO_PASS);
}

// ---------------------------------------------------------------------------
// validate / extract-html
// ---------------------------------------------------------------------------

#[tokio::test]
async fn validate_reports_broken_files() {
    let dir = tempfile::tempdir().unwrap();
    let good = fixture(dir.path());
    let bad = dir.path().join("bad.json");
    std::fs::write(&bad, TWO_PASS.replace("[170, 86, 0, 85, 3, \"LATENT\"]", "[170, 86, 0, 99, 3, \"LATENT\"]"))
        .unwrap();
    let api = dir.path().join("api.json");
    std::fs::write(&api, r#"{"3": {"class_type": "KSampler", "inputs": {"model": ["4", 0]}}}"#).unwrap();

    run(&["validate", &good]).await.unwrap();
    assert!(run(&["validate", &good, bad.to_str().unwrap()]).await.is_err());
    assert!(run(&["validate", api.to_str().unwrap()]).await.is_err());
}

#[tokio::test]
async fn extract_html_writes_json_beside_page() {
    let dir = tempfile::tempdir().unwrap();
    let page = dir.path().join("shared.html");
    std::fs::write(
        &page,
        format!("<html><script>window.app = {{\"workflow\": {TWO_PASS}}};</script></html>"),
    )
    .unwrap();

    run(&["extract-html", page.to_str().unwrap()]).await.unwrap();

    let doc = WorkflowDocument::load(&dir.path().join("shared.json")).unwrap();
    assert_eq!(doc.nodes.len(), 3);
    assert_eq!(doc.links.len(), 2);
}
