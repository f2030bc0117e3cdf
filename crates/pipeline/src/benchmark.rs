//! Image-to-video benchmark across frame counts.
//!
//! Runs one generation per frame count, sampling device VRAM from
//! `/system_stats` before and after each run, and collects the results
//! into a JSON report.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use comfyctl_comfyui::messages::VramUsage;
use comfyctl_core::api_prompt::ApiPrompt;
use comfyctl_core::generation::{apply_i2v, I2vParams};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::generation::JobRunner;

/// Default per-run timeout.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(600);

/// Frame counts tested when none are given.
pub const DEFAULT_FRAME_COUNTS: &[u32] = &[25, 49, 81];

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkRun {
    pub frames: u32,
    pub width: u32,
    pub height: u32,
    pub settings: String,
    pub success: bool,
    pub duration_secs: f64,
    pub secs_per_frame: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    pub vram_before: Option<VramUsage>,
    pub vram_after: Option<VramUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub fastest_secs_per_frame: Option<f64>,
    pub peak_vram_percent: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    pub started_at: DateTime<Utc>,
    pub image: PathBuf,
    pub server: String,
    /// Set when the run was cut short by cancellation.
    pub interrupted: bool,
    pub runs: Vec<BenchmarkRun>,
}

impl BenchmarkReport {
    pub fn summary(&self) -> BenchmarkSummary {
        let ok: Vec<&BenchmarkRun> = self.runs.iter().filter(|r| r.success).collect();
        BenchmarkSummary {
            total: self.runs.len(),
            succeeded: ok.len(),
            failed: self.runs.len() - ok.len(),
            fastest_secs_per_frame: ok
                .iter()
                .filter_map(|r| r.secs_per_frame)
                .min_by(f64::total_cmp),
            peak_vram_percent: self
                .runs
                .iter()
                .filter_map(|r| r.vram_after.map(|v| v.percent))
                .max_by(f64::total_cmp),
        }
    }
}

/// `{dir}/benchmark_{YYYYmmdd_HHMMSS}.json`.
pub fn default_report_path(dir: &Path, now: DateTime<Utc>) -> PathBuf {
    dir.join(format!("benchmark_{}.json", now.format("%Y%m%d_%H%M%S")))
}

/// Parse a comma-separated frame list such as `25,49,81`.
pub fn parse_frame_counts(text: &str) -> Result<Vec<u32>, PipelineError> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| match s.parse::<u32>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(PipelineError::Invalid(format!("Invalid frame count '{s}'"))),
        })
        .collect()
}

async fn sample_vram(runner: &JobRunner) -> Option<VramUsage> {
    match runner.api().system_stats().await {
        Ok(stats) => stats.vram(),
        Err(e) => {
            tracing::warn!(error = %e, "Could not read system stats");
            None
        }
    }
}

/// Run the benchmark. Individual failures are recorded in the report;
/// cancellation stops the loop and marks the report interrupted.
pub async fn run_benchmark(
    runner: &JobRunner,
    template: &ApiPrompt,
    base: &I2vParams,
    frame_counts: &[u32],
    timeout: Duration,
    cancel: &CancellationToken,
) -> BenchmarkReport {
    let mut report = BenchmarkReport {
        started_at: Utc::now(),
        image: base.image.clone(),
        server: runner.api().base_url().to_string(),
        interrupted: false,
        runs: Vec::with_capacity(frame_counts.len()),
    };

    for (i, &frames) in frame_counts.iter().enumerate() {
        if cancel.is_cancelled() {
            report.interrupted = true;
            break;
        }
        tracing::info!(frames, run = i + 1, total = frame_counts.len(), "Benchmark run starting");

        let params = I2vParams {
            frames,
            ..base.clone()
        };
        let vram_before = sample_vram(runner).await;
        let timestamp = Utc::now();
        let started = Instant::now();

        let result = match apply_i2v(template.clone(), &params) {
            Ok(bound) => runner
                .run(&bound, timeout, cancel)
                .await
                .map(|outcome| (outcome, bound.seed)),
            Err(e) => Err(e.into()),
        };
        let duration_secs = started.elapsed().as_secs_f64();

        if matches!(&result, Err(e) if e.is_cancelled()) {
            report.interrupted = true;
            break;
        }

        let vram_after = sample_vram(runner).await;
        let mut run = BenchmarkRun {
            frames,
            width: params.width,
            height: params.height,
            settings: params.settings.clone(),
            success: false,
            duration_secs,
            secs_per_frame: None,
            prompt_id: None,
            seed: None,
            output: None,
            vram_before,
            vram_after,
            error: None,
            timestamp,
        };
        match result {
            Ok((outcome, seed)) => {
                run.success = true;
                run.secs_per_frame = Some(duration_secs / frames as f64);
                run.prompt_id = Some(outcome.prompt_id);
                run.seed = Some(seed);
                run.output = Some(outcome.video);
                tracing::info!(frames, duration_secs, "Benchmark run complete");
            }
            Err(e) => {
                tracing::warn!(frames, error = %e, "Benchmark run failed");
                run.error = Some(e.to_string());
            }
        }
        report.runs.push(run);
    }

    report
}

/// Write the report as pretty JSON, creating parent directories.
pub async fn write_report(report: &BenchmarkReport, path: &Path) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PipelineError::io(parent, e))?;
    }
    let body = serde_json::json!({
        "summary": report.summary(),
        "report": report,
    });
    let text = serde_json::to_string_pretty(&body).map_err(comfyctl_core::CoreError::from)?;
    tokio::fs::write(path, text)
        .await
        .map_err(|e| PipelineError::io(path, e))?;
    tracing::info!(path = %path.display(), runs = report.runs.len(), "Benchmark report written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn run(frames: u32, success: bool, secs: f64, vram: Option<f64>) -> BenchmarkRun {
        BenchmarkRun {
            frames,
            width: 832,
            height: 1216,
            settings: "4step_nosage".into(),
            success,
            duration_secs: secs,
            secs_per_frame: success.then(|| secs / frames as f64),
            prompt_id: None,
            seed: None,
            output: None,
            vram_before: None,
            vram_after: vram.map(|percent| VramUsage {
                used_mb: percent,
                total_mb: 100.0,
                percent,
            }),
            error: (!success).then(|| "boom".to_string()),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn parses_frame_lists() {
        assert_eq!(parse_frame_counts("25, 49,81").unwrap(), vec![25, 49, 81]);
        assert!(parse_frame_counts("25,x").is_err());
        assert!(parse_frame_counts("0").is_err());
    }

    #[test]
    fn report_path_uses_timestamp() {
        let now = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(
            default_report_path(Path::new("benchmarks"), now),
            PathBuf::from("benchmarks/benchmark_20250304_050607.json")
        );
    }

    #[test]
    fn summary_counts_and_extremes() {
        let report = BenchmarkReport {
            started_at: Utc::now(),
            image: "img.png".into(),
            server: "http://localhost:8188".into(),
            interrupted: false,
            runs: vec![
                run(25, true, 50.0, Some(60.0)),
                run(81, true, 153.0, Some(92.5)),
                run(161, false, 600.0, None),
            ],
        };
        let summary = report.summary();
        assert_eq!((summary.total, summary.succeeded, summary.failed), (3, 2, 1));
        assert!((summary.fastest_secs_per_frame.unwrap() - 153.0 / 81.0).abs() < 1e-9);
        assert_eq!(summary.peak_vram_percent, Some(92.5));
    }

    #[tokio::test]
    async fn report_written_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/report.json");
        let report = BenchmarkReport {
            started_at: Utc::now(),
            image: "img.png".into(),
            server: "http://localhost:8188".into(),
            interrupted: true,
            runs: vec![run(25, true, 50.0, None)],
        };

        write_report(&report, &path).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["summary"]["succeeded"], 1);
        assert_eq!(value["report"]["interrupted"], true);
        assert_eq!(value["report"]["runs"][0]["frames"], 25);
    }
}
