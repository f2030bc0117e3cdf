use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use comfyctl_pipeline::interpolate::InterpolatorCommand;

use crate::cli::GlobalArgs;

/// Client configuration loaded from environment variables.
///
/// Every field has a default suitable for a server on the local machine.
/// Global command-line flags take precedence over the environment.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Server base URL (default: `http://localhost:8188`).
    pub comfyui_url: String,
    /// Server output directory, used to locate finished videos (default: `output`).
    pub output_dir: PathBuf,
    /// Status poll interval (default: 2 seconds).
    pub poll_interval: Duration,
    /// External frame interpolator.
    pub interpolator: InterpolatorCommand,
}

impl CliConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                | Default                  |
    /// |------------------------|--------------------------|
    /// | `COMFYUI_URL`          | `http://localhost:8188`  |
    /// | `COMFYUI_OUTPUT_DIR`   | `output`                 |
    /// | `POLL_INTERVAL_SECS`   | `2`                      |
    /// | `INTERPOLATOR_PROGRAM` | `python`                 |
    /// | `INTERPOLATOR_ARGS`    | built-in template        |
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let comfyui_url = lookup("COMFYUI_URL").unwrap_or_else(|| "http://localhost:8188".into());

        let output_dir = PathBuf::from(lookup("COMFYUI_OUTPUT_DIR").unwrap_or_else(|| "output".into()));

        let poll_interval_secs: u64 = lookup("POLL_INTERVAL_SECS")
            .unwrap_or_else(|| "2".into())
            .parse()
            .context("POLL_INTERVAL_SECS must be a whole number of seconds")?;
        if poll_interval_secs == 0 {
            anyhow::bail!("POLL_INTERVAL_SECS must be at least 1");
        }

        let program = lookup("INTERPOLATOR_PROGRAM").unwrap_or_else(|| "python".into());
        let args = lookup("INTERPOLATOR_ARGS").filter(|a| !a.trim().is_empty());
        let interpolator = InterpolatorCommand::new(program, args.as_deref());

        Ok(Self {
            comfyui_url,
            output_dir,
            poll_interval: Duration::from_secs(poll_interval_secs),
            interpolator,
        })
    }

    /// Apply global command-line overrides.
    pub fn with_overrides(mut self, global: &GlobalArgs) -> Self {
        if let Some(url) = &global.url {
            self.comfyui_url = url.clone();
        }
        if let Some(dir) = &global.output_dir {
            self.output_dir = dir.clone();
        }
        self
    }
}
