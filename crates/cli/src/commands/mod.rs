//! Subcommand handlers.

mod generate;
mod graph;
mod media;
mod queue;

use std::path::Path;

use anyhow::Context as _;
use comfyctl_comfyui::ComfyUIApi;
use comfyctl_core::graph::{JsonStyle, WorkflowDocument};
use comfyctl_pipeline::JobRunner;
use tokio_util::sync::CancellationToken;

use crate::cli::{Commands, EditIo};
use crate::config::CliConfig;

/// Shared state handed to every handler.
pub struct Context {
    pub config: CliConfig,
    pub cancel: CancellationToken,
}

impl Context {
    pub fn api(&self) -> ComfyUIApi {
        ComfyUIApi::new(self.config.comfyui_url.clone())
    }

    pub fn runner(&self) -> JobRunner {
        JobRunner::new(self.api(), self.config.output_dir.clone(), self.config.poll_interval)
    }
}

pub async fn run(command: Commands, ctx: &Context) -> anyhow::Result<()> {
    match command {
        Commands::Splice(args) => graph::splice(args),
        Commands::InsertUnload(args) => graph::insert_unload(args),
        Commands::RemoveNode(args) => graph::remove_node(args),
        Commands::SetMode(args) => graph::set_mode(args),
        Commands::SetWidget(args) => graph::set_widget(args),
        Commands::Validate(args) => graph::validate(args),
        Commands::Inspect(args) => graph::inspect(args),
        Commands::Compare(args) => graph::compare(args),
        Commands::ExtractHtml(args) => graph::extract_html(args),
        Commands::CheckNodes(args) => queue::check_nodes(args, ctx).await,
        Commands::Submit(args) => queue::submit(args, ctx).await,
        Commands::Status(args) => queue::status(args, ctx).await,
        Commands::Generate(args) => generate::generate(args, ctx).await,
        Commands::SoundVideo(args) => generate::sound_video(args, ctx).await,
        Commands::Benchmark(args) => generate::benchmark(args, ctx).await,
        Commands::Interpolate(args) => media::interpolate(args, ctx).await,
        Commands::Reencode(args) => media::reencode(args, ctx).await,
    }
}

// ---------------------------------------------------------------------------
// Helpers shared by the workflow-editing handlers
// ---------------------------------------------------------------------------

pub(crate) fn load_workflow(path: &Path) -> anyhow::Result<WorkflowDocument> {
    WorkflowDocument::load(path).with_context(|| format!("Failed to load workflow {}", path.display()))
}

pub(crate) fn load_json(path: &Path) -> anyhow::Result<serde_json::Value> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", path.display()))
}

/// Write an edited document according to the shared output flags.
pub(crate) fn write_workflow(io: &EditIo, doc: &mut WorkflowDocument) -> anyhow::Result<()> {
    if io.dry_run {
        tracing::info!(input = %io.input.display(), "Dry run, nothing written");
        return Ok(());
    }
    if io.new_id {
        let id = doc.reassign_id();
        tracing::info!(%id, "Assigned new workflow id");
    }
    let style = if io.pretty { JsonStyle::Pretty } else { JsonStyle::Compact };
    let target = io.output.as_deref().unwrap_or(&io.input);
    doc.save(target, style)
        .with_context(|| format!("Failed to write workflow {}", target.display()))?;
    println!("Wrote {}", target.display());
    Ok(())
}
