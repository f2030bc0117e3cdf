use std::process::ExitCode;

use clap::Parser;
use comfyctl_pipeline::PipelineError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use comfyctl_cli::cli::Cli;
use comfyctl_cli::commands::{self, Context};
use comfyctl_cli::config::CliConfig;

/// Conventional exit status after SIGINT.
const EXIT_INTERRUPTED: u8 = 130;

fn init_tracing(json: bool) {
    // Target prefixes also match the comfyctl_* library crates.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "comfyctl=info".into());

    let (plain, json) = if json {
        (
            None,
            Some(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)),
        )
    } else {
        (
            Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
            None,
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .init();
}

/// First Ctrl-C cancels the token so running jobs can stop cleanly; a
/// second one exits immediately.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::warn!("Interrupted, stopping (press Ctrl-C again to force)");
        cancel.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(i32::from(EXIT_INTERRUPTED));
        }
    });
}

fn is_cancellation(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|e| e.downcast_ref::<PipelineError>().is_some_and(PipelineError::is_cancelled))
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.global.log_json);

    let config = match CliConfig::from_env() {
        Ok(config) => config.with_overrides(&cli.global),
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    tracing::debug!(url = %config.comfyui_url, output_dir = %config.output_dir.display(), "Loaded configuration");

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());
    let ctx = Context { config, cancel };

    match commands::run(cli.command, &ctx).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if ctx.cancel.is_cancelled() || is_cancellation(&e) => {
            tracing::warn!(error = %e, "Cancelled");
            ExitCode::from(EXIT_INTERRUPTED)
        }
        Err(e) => {
            tracing::debug!(error = ?e, "Command failed");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
