//! Local video post-processing.

use std::time::Duration;

use anyhow::bail;
use comfyctl_core::ffmpeg::EncodeSettings;
use comfyctl_core::naming;
use comfyctl_pipeline::interpolate::{self, InterpolationRequest};
use comfyctl_pipeline::reencode::{self, ReencodeJob};
use comfyctl_pipeline::{PipelineError, RetryPolicy};

use super::Context;
use crate::cli::{EncodeArgs, InterpolateArgs, ReencodeArgs};

/// Apply the encoder flags on top of `base`.
pub(crate) fn encode_settings(args: &EncodeArgs, base: EncodeSettings) -> EncodeSettings {
    EncodeSettings {
        crf: args.crf.unwrap_or(base.crf),
        preset: args.preset.clone(),
        bitrate: args.bitrate.clone(),
    }
}

fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

pub async fn interpolate(args: InterpolateArgs, ctx: &Context) -> anyhow::Result<()> {
    if !args.input.is_file() {
        bail!("Video not found: {}", args.input.display());
    }
    let request = InterpolationRequest {
        output: args.output.clone(),
        method: args.method,
        multiplier: args.multiplier,
        encode: encode_settings(&args.encode, EncodeSettings::default()),
        keep_frames: args.keep_frames,
        keep_audio: !args.no_audio,
        timeout: args.timeout.map(Duration::from_secs),
        ..InterpolationRequest::new(&args.input)
    };
    let policy = RetryPolicy {
        max_attempts: args.attempts.max(1),
        ..RetryPolicy::default()
    };

    let result =
        interpolate::interpolate_with_retry(&ctx.config.interpolator, &request, &policy, &ctx.cancel).await?;

    println!("Output:  {}", result.output.display());
    println!(
        "Frames:  {} -> {} ({} fps -> {} fps)",
        result.input_frames, result.output_frames, result.input_fps, result.output_fps
    );
    println!("Time:    {}", naming::format_time(result.elapsed.as_secs_f64()));
    if let Some(dir) = &result.work_dir {
        println!("Frames kept in {}", dir.display());
    }
    Ok(())
}

pub async fn reencode(args: ReencodeArgs, ctx: &Context) -> anyhow::Result<()> {
    let settings = encode_settings(&args.encode, EncodeSettings::reencode());

    if let Some(output) = &args.output {
        let [input] = args.inputs.as_slice() else {
            bail!("--output can only be used with a single input");
        };
        let job = ReencodeJob {
            output: Some(output.clone()),
            settings,
            ..ReencodeJob::new(input)
        };
        let outcome = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(PipelineError::Cancelled.into()),
            outcome = reencode::reencode_file(&job) => outcome?,
        };
        println!(
            "{} -> {} ({:.1} MB -> {:.1} MB)",
            outcome.input.display(),
            outcome.output.display(),
            megabytes(outcome.input_bytes),
            megabytes(outcome.output_bytes)
        );
        return Ok(());
    }

    let summary = reencode::reencode_batch(&args.inputs, &settings, args.in_place, &ctx.cancel).await;
    for outcome in &summary.succeeded {
        println!(
            "OK    {} -> {} ({:.0}% of original)",
            outcome.input.display(),
            outcome.output.display(),
            outcome.size_ratio() * 100.0
        );
    }
    for (path, e) in &summary.failed {
        println!("FAIL  {}: {e}", path.display());
    }
    for path in &summary.skipped {
        println!("SKIP  {}", path.display());
    }

    if !summary.skipped.is_empty() {
        return Err(PipelineError::Cancelled.into());
    }
    if !summary.failed.is_empty() {
        bail!("{} of {} file(s) failed to re-encode", summary.failed.len(), args.inputs.len());
    }
    Ok(())
}
