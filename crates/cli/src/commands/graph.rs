//! Offline workflow editing and inspection.

use anyhow::{bail, Context as _};
use comfyctl_core::api_prompt::{self, ApiPrompt};
use comfyctl_core::edit::{self, TypeMatcher};
use comfyctl_core::graph::{node_modes, JsonStyle, WorkflowDocument};
use comfyctl_core::inspect::{self, NodeBrief};
use comfyctl_core::splice::{AuxInput, NodeSpec, SlotSpec};
use comfyctl_core::types::LinkId;
use comfyctl_core::{html, integrity, presets};
use serde_json::Value;

use super::{load_json, load_workflow, write_workflow};
use crate::cli::{
    CompareArgs, ExtractHtmlArgs, InsertUnloadArgs, InspectArgs, LinkTarget, RemoveNodeArgs, SetModeArgs,
    SetWidgetArgs, SpliceArgs, ValidateArgs,
};

/// Resolve `--link` or `--between` to a link ID.
fn resolve_link(doc: &WorkflowDocument, target: &LinkTarget) -> anyhow::Result<Option<LinkId>> {
    if let Some(id) = target.link {
        return Ok(Some(doc.require_link(id)?.id));
    }
    match target.between.as_deref() {
        Some([src, dst]) => Ok(Some(doc.find_link(*src, *dst, target.slot)?.id)),
        Some(_) => bail!("--between takes exactly two node IDs"),
        None => Ok(None),
    }
}

fn parse_slot_spec(text: &str) -> anyhow::Result<(&str, &str)> {
    text.split_once(':')
        .filter(|(name, ty)| !name.is_empty() && !ty.is_empty())
        .with_context(|| format!("Expected NAME:TYPE, got '{text}'"))
}

fn build_specs(args: &SpliceArgs) -> anyhow::Result<Vec<NodeSpec>> {
    let mut specs = match (&args.preset, &args.node_type) {
        (Some(name), _) => presets::by_name(name).with_context(|| format!("Unknown preset '{name}'"))?,
        (None, Some(node_type)) => {
            let (in_name, in_type) = parse_slot_spec(&args.input_slot)?;
            let (out_name, out_type) = parse_slot_spec(&args.output_slot)?;
            vec![NodeSpec::new(node_type.clone())
                .with_input(in_name, in_type)
                .with_output(out_name, out_type)]
        }
        (None, None) => bail!("Specify --preset or --node-type"),
    };

    // Overrides apply to the first node of a chain.
    let Some(first) = specs.first_mut() else {
        bail!("Preset produced no nodes");
    };
    if let Some(title) = &args.title {
        first.title = Some(title.clone());
    }
    if let Some(id) = args.id {
        first.id = Some(id);
    }
    if let Some(text) = &args.widgets {
        let values: Value = serde_json::from_str(text).context("--widgets must be a JSON array")?;
        if !values.is_array() {
            bail!("--widgets must be a JSON array");
        }
        first.widgets_values = Some(values);
    }
    for aux in &args.aux {
        if let Some(existing) = first.aux_inputs.iter_mut().find(|a| a.slot.name == aux.name) {
            existing.source = Some(aux.source);
            continue;
        }
        first.aux_inputs.push(AuxInput {
            slot: SlotSpec::new(aux.name.clone(), aux.slot_type.clone()),
            source: Some(aux.source),
        });
    }
    Ok(specs)
}

pub fn splice(args: SpliceArgs) -> anyhow::Result<()> {
    let mut doc = load_workflow(&args.io.input)?;
    let link = resolve_link(&doc, &args.target)?.context("Specify --link or --between")?;
    let specs = build_specs(&args)?;

    let reports = doc.splice_chain(link, &specs)?;
    for (report, spec) in reports.iter().zip(&specs) {
        println!(
            "Inserted node {} ({}) on link {}, new link {}",
            report.node_id, spec.node_type, report.upstream_link, report.downstream_link
        );
    }
    write_workflow(&args.io, &mut doc)
}

/// The single `LATENT` link running from one sampler into another.
pub(crate) fn sampler_handoff(doc: &WorkflowDocument) -> anyhow::Result<LinkId> {
    let is_sampler = |id| doc.node(id).is_some_and(|n| inspect::is_sampler(&n.node_type));
    let candidates: Vec<LinkId> = doc
        .links
        .iter()
        .filter(|l| l.link_type == "LATENT" && is_sampler(l.src_node) && is_sampler(l.dst_node))
        .map(|l| l.id)
        .collect();

    match candidates.as_slice() {
        [] => bail!("No sampler-to-sampler LATENT link found; use --link or --between"),
        [only] => Ok(*only),
        many => bail!(
            "Several sampler-to-sampler links ({}); use --link or --between",
            many.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
        ),
    }
}

pub fn insert_unload(args: InsertUnloadArgs) -> anyhow::Result<()> {
    let mut doc = load_workflow(&args.io.input)?;
    let link = match resolve_link(&doc, &args.target)? {
        Some(link) => link,
        None => sampler_handoff(&doc)?,
    };
    let original = doc.require_link(link)?.clone();

    let specs = match args.delete_model {
        Some(source) => vec![presets::delete_model(Some(source))],
        None => presets::unload_pair(),
    };
    let reports = doc.splice_chain(link, &specs)?;

    let chain: Vec<String> = reports.iter().map(|r| r.node_id.to_string()).collect();
    println!(
        "Flow: node {} -> {} -> node {}",
        original.src_node,
        chain.join(" -> "),
        original.dst_node
    );
    write_workflow(&args.io, &mut doc)
}

pub fn remove_node(args: RemoveNodeArgs) -> anyhow::Result<()> {
    let mut doc = load_workflow(&args.io.input)?;
    let matcher = match (&args.exact, &args.type_contains) {
        (Some(t), _) => Some(TypeMatcher::Exact(t.clone())),
        (None, Some(s)) => Some(TypeMatcher::Contains(s.clone())),
        (None, None) => None,
    };
    if args.ids.is_empty() && matcher.is_none() {
        bail!("Specify --id, --type or --type-contains");
    }

    let mut reports = Vec::new();
    for &id in &args.ids {
        reports.push(doc.remove_passthrough(id)?);
    }
    if let Some(matcher) = &matcher {
        let removed = doc.remove_passthrough_where(matcher)?;
        if removed.is_empty() && args.ids.is_empty() {
            bail!("No node with {matcher}");
        }
        reports.extend(removed);
    }

    for report in &reports {
        match report.reconnected_link {
            Some(link) => println!("Removed node {}, reconnected through link {link}", report.node_id),
            None => println!("Removed node {}", report.node_id),
        }
    }
    write_workflow(&args.io, &mut doc)
}

pub fn set_mode(args: SetModeArgs) -> anyhow::Result<()> {
    let mut doc = load_workflow(&args.io.input)?;
    let mode = edit::parse_mode(&args.mode)?;
    let matcher = args.matcher.matcher();

    let changed = doc.set_mode(&matcher, mode)?;
    println!(
        "Set {} node(s) with {matcher} to {}: {:?}",
        changed.len(),
        node_modes::label(mode),
        changed
    );
    write_workflow(&args.io, &mut doc)
}

/// JSON when it parses, otherwise the raw text as a string.
pub(crate) fn parse_widget_value(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

pub fn set_widget(args: SetWidgetArgs) -> anyhow::Result<()> {
    let mut doc = load_workflow(&args.io.input)?;
    let matcher = args.matcher.matcher();
    let value = parse_widget_value(&args.value);

    let changed = doc.set_widget_value(&matcher, args.index, value.clone())?;
    if changed.is_empty() {
        bail!("No node with {matcher} has a widget at index {}", args.index);
    }
    println!("Set widget {} = {value} on node(s) {:?}", args.index, changed);
    write_workflow(&args.io, &mut doc)
}

pub fn validate(args: ValidateArgs) -> anyhow::Result<()> {
    let mut failed = 0usize;
    for path in &args.files {
        let problems = match check_file(path) {
            Ok(problems) => problems,
            Err(e) => vec![format!("{e:#}")],
        };
        if problems.is_empty() {
            println!("OK    {}", path.display());
        } else {
            failed += 1;
            println!("FAIL  {} ({} problem(s))", path.display(), problems.len());
            for problem in problems {
                println!("      - {problem}");
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} file(s) failed validation", args.files.len());
    }
    Ok(())
}

/// Problems in one workflow or API prompt file; empty when it is sound.
fn check_file(path: &std::path::Path) -> anyhow::Result<Vec<String>> {
    let value = load_json(path)?;
    if api_prompt::looks_like_api_prompt(&value) {
        let prompt = ApiPrompt::from_value(value)?;
        return Ok(prompt
            .dangling_references()
            .into_iter()
            .map(|(node, input, source)| format!("node {node} input '{input}' references missing node {source}"))
            .collect());
    }
    let doc = WorkflowDocument::from_value(value)?;
    Ok(integrity::validate(&doc).iter().map(ToString::to_string).collect())
}

fn print_briefs(heading: &str, briefs: &[NodeBrief]) {
    if briefs.is_empty() {
        return;
    }
    println!("{heading}:");
    for b in briefs {
        println!(
            "  [{}] {} {}{} -> {:?}",
            b.id,
            b.node_type,
            b.status,
            b.primary_widget.as_deref().map(|w| format!(" ({w})")).unwrap_or_default(),
            b.downstream
        );
    }
}

pub fn inspect(args: InspectArgs) -> anyhow::Result<()> {
    let doc = load_workflow(&args.input)?;
    let summary = inspect::summarize(&doc);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("{}", args.input.display());
    println!(
        "  {} nodes (max id {}, last_node_id {}), {} links (max id {}, last_link_id {})",
        summary.node_count,
        summary.max_node_id,
        summary.last_node_id,
        summary.link_count,
        summary.max_link_id,
        summary.last_link_id
    );
    println!("Node types:");
    for (node_type, count) in &summary.type_counts {
        println!("  {count:>3}  {node_type}");
    }
    print_briefs("Model loaders", &summary.loaders);
    print_briefs("Samplers", &summary.samplers);
    if !summary.disabled.is_empty() {
        println!("Disabled nodes: {:?}", summary.disabled);
    }
    if !summary.violations.is_empty() {
        println!("Integrity problems:");
        for v in &summary.violations {
            println!("  - {v}");
        }
    }
    Ok(())
}

pub fn compare(args: CompareArgs) -> anyhow::Result<()> {
    let left = load_workflow(&args.left)?;
    let right = load_workflow(&args.right)?;
    let diff = inspect::compare(&left, &right);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&diff)?);
        return Ok(());
    }

    if diff.is_structurally_equal() {
        println!("Same node types and counts");
    }
    for t in &diff.only_in_left {
        println!("- {t} (only in {})", args.left.display());
    }
    for t in &diff.only_in_right {
        println!("+ {t} (only in {})", args.right.display());
    }
    for (t, l, r) in &diff.count_changes {
        println!("~ {t}: {l} -> {r}");
    }
    print_briefs(&format!("Loaders in {}", args.left.display()), &diff.left_loaders);
    print_briefs(&format!("Loaders in {}", args.right.display()), &diff.right_loaders);
    print_briefs(&format!("Samplers in {}", args.left.display()), &diff.left_samplers);
    print_briefs(&format!("Samplers in {}", args.right.display()), &diff.right_samplers);
    Ok(())
}

pub fn extract_html(args: ExtractHtmlArgs) -> anyhow::Result<()> {
    let page = std::fs::read_to_string(&args.input)
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let value = html::extract_workflow(&page)?;
    let output = args.output.clone().unwrap_or_else(|| args.input.with_extension("json"));

    let doc = WorkflowDocument::from_value(value)?;
    let violations = integrity::validate(&doc);
    for v in &violations {
        tracing::warn!(violation = %v, "Extracted workflow has an integrity problem");
    }
    doc.save(&output, JsonStyle::Pretty)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!(
        "Extracted {} nodes and {} links to {}",
        doc.nodes.len(),
        doc.links.len(),
        output.display()
    );
    Ok(())
}
