//! Commands that talk to the server's queue.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use anyhow::{bail, Context as _};
use comfyctl_comfyui::messages::HistoryEntry;
use comfyctl_comfyui::status::{observe, JobState};
use comfyctl_comfyui::{outputs, wait_for_completion, PollConfig};
use comfyctl_core::api_prompt::{self, ApiPrompt};
use comfyctl_core::graph::WorkflowDocument;
use comfyctl_core::{inspect, naming};
use comfyctl_pipeline::PipelineError;
use serde_json::Value;

use super::{load_json, Context};
use crate::cli::{CheckNodesArgs, StatusArgs, SubmitArgs};

/// Node types used by `value` (either format) that the server lacks,
/// with the IDs of the nodes that use them.
pub(crate) fn missing_types(value: Value, available: &HashSet<String>) -> anyhow::Result<BTreeMap<String, Vec<String>>> {
    if api_prompt::looks_like_api_prompt(&value) {
        let prompt = ApiPrompt::from_value(value)?;
        let mut missing: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (id, node) in &prompt.nodes {
            if !available.contains(&node.class_type) {
                missing.entry(node.class_type.clone()).or_default().push(id.clone());
            }
        }
        return Ok(missing);
    }
    let doc = WorkflowDocument::from_value(value)?;
    Ok(inspect::missing_node_types(&doc, available)
        .into_iter()
        .map(|(t, ids)| (t, ids.iter().map(ToString::to_string).collect()))
        .collect())
}

pub async fn check_nodes(args: CheckNodesArgs, ctx: &Context) -> anyhow::Result<()> {
    let value = load_json(&args.input)?;
    let api = ctx.api();
    let available = api
        .object_info()
        .await
        .with_context(|| format!("Failed to list node types from {}", api.base_url()))?;
    tracing::info!(available = available.len(), "Fetched installed node types");

    let missing = missing_types(value, &available)?;
    if missing.is_empty() {
        println!("All node types used by {} are installed", args.input.display());
        return Ok(());
    }
    println!("Missing node types:");
    for (node_type, ids) in &missing {
        println!("  {node_type}  (nodes {})", ids.join(", "));
    }
    bail!("{} node type(s) not installed on {}", missing.len(), api.base_url())
}

fn print_outputs(history: &HistoryEntry, ctx: &Context) {
    if let Some(file) = outputs::history_video(history) {
        println!("Output: {}", outputs::file_path(&ctx.config.output_dir, &file).display());
    }
}

pub async fn submit(args: SubmitArgs, ctx: &Context) -> anyhow::Result<()> {
    let value = load_json(&args.input)?;
    if !api_prompt::looks_like_api_prompt(&value) {
        bail!(
            "{} is not an API-format prompt; export it from the editor with \"Save (API)\"",
            args.input.display()
        );
    }
    let prompt = ApiPrompt::from_value(value)?;
    let runner = ctx.runner();
    let response = runner.submit(&prompt).await?;
    println!("Queued {} (queue number {})", response.prompt_id, response.number);

    if !args.wait {
        return Ok(());
    }

    let config = PollConfig::default()
        .with_interval(ctx.config.poll_interval)
        .with_timeout(Duration::from_secs(args.timeout));
    let completion = match wait_for_completion(runner.api(), &response.prompt_id, &config, &ctx.cancel).await {
        Ok(completion) => completion,
        Err(e) => {
            let e = PipelineError::from(e);
            if e.is_cancelled() {
                runner.abort(&response.prompt_id).await;
            }
            return Err(e.into());
        }
    };
    println!(
        "Completed {} in {}",
        completion.prompt_id,
        naming::format_time(completion.elapsed.as_secs_f64())
    );
    let video = outputs::resolve_output(Some(&completion.history), &ctx.config.output_dir, None);
    match video {
        Some(path) => println!("Output: {}", path.display()),
        None => print_outputs(&completion.history, ctx),
    }
    Ok(())
}

pub async fn status(args: StatusArgs, ctx: &Context) -> anyhow::Result<()> {
    let api = ctx.api();

    if let Some(prompt_id) = &args.prompt_id {
        let observation = observe(&api, prompt_id).await?;
        println!("{prompt_id}: {}", observation.state);
        if let Some(history) = &observation.history {
            if let Some(error) = history.execution_error() {
                println!("  {error}");
            }
            print_outputs(history, ctx);
        }
        if let JobState::Failed { message } = observation.state {
            bail!("Prompt {prompt_id} failed: {message}");
        }
        return Ok(());
    }

    let queue = api.get_queue().await?;
    let running = queue.running_ids();
    let pending = queue.pending_ids();
    println!("Server:  {}", api.base_url());
    println!("Running: {}", if running.is_empty() { "-".to_string() } else { running.join(", ") });
    println!("Pending: {}", pending.len());
    for (i, id) in pending.iter().enumerate() {
        println!("  {:>3}. {id}", i + 1);
    }

    match api.system_stats().await {
        Ok(stats) => {
            if let Some(version) = &stats.system.comfyui_version {
                println!("Version: {version}");
            }
            if let Some(vram) = stats.vram() {
                println!(
                    "VRAM:    {:.0} / {:.0} MB ({:.1}%)",
                    vram.used_mb, vram.total_mb, vram.percent
                );
            }
        }
        Err(e) => tracing::warn!(error = %e, "Could not read system stats"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn available(types: &[&str]) -> HashSet<String> {
        types.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn missing_types_in_api_prompt() {
        let prompt = json!({
            "3": {"class_type": "KSampler", "inputs": {}},
            "7": {"class_type": "WanVideoSampler", "inputs": {}},
            "9": {"class_type": "WanVideoSampler", "inputs": {}}
        });
        let missing = missing_types(prompt, &available(&["KSampler"])).unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing["WanVideoSampler"], vec!["7", "9"]);
    }

    #[test]
    fn missing_types_in_workflow_skip_editor_nodes() {
        let wf = json!({
            "last_node_id": 2, "last_link_id": 0,
            "nodes": [
                {"id": 1, "type": "Note", "mode": 0},
                {"id": 2, "type": "easy cleanGpuUsed", "mode": 0}
            ],
            "links": []
        });
        let missing = missing_types(wf, &available(&[])).unwrap();
        assert_eq!(missing.keys().collect::<Vec<_>>(), vec!["easy cleanGpuUsed"]);
        assert_eq!(missing["easy cleanGpuUsed"], vec!["2"]);
    }
}
