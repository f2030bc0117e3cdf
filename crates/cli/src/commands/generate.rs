//! Template-driven generation and benchmarking.

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{bail, Context as _};
use comfyctl_core::api_prompt::ApiPrompt;
use comfyctl_core::ffmpeg::EncodeSettings;
use comfyctl_core::generation::{self, BoundPrompt, I2vParams, S2vParams};
use comfyctl_core::naming;
use comfyctl_pipeline::benchmark::{self, BenchmarkReport};
use comfyctl_pipeline::interpolate::{self, InterpolationRequest};
use comfyctl_pipeline::{GenerationOutcome, PipelineError, RetryPolicy};

use super::media::encode_settings;
use super::Context;
use crate::cli::{BenchmarkArgs, GenerateArgs, RenderArgs, SoundVideoArgs};

fn load_template(path: &Path) -> anyhow::Result<ApiPrompt> {
    ApiPrompt::load(path).with_context(|| format!("Failed to load template {}", path.display()))
}

fn require_file(path: &Path, what: &str) -> anyhow::Result<()> {
    if !path.is_file() {
        bail!("{what} not found: {}", path.display());
    }
    Ok(())
}

/// Save the bound prompt instead of running it when `--dump-prompt` is set.
fn dump_if_requested(bound: &BoundPrompt, render: &RenderArgs) -> anyhow::Result<bool> {
    let Some(path) = &render.dump_prompt else {
        return Ok(false);
    };
    bound
        .prompt
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote bound prompt to {} (seed {})", path.display(), bound.seed);
    Ok(true)
}

fn print_outcome(outcome: &GenerationOutcome) {
    println!("Prompt:  {}", outcome.prompt_id);
    println!("Seed:    {}", outcome.seed);
    println!("Video:   {}", outcome.video.display());
    println!("Timings:");
    println!("{}", outcome.timings);
}

pub async fn generate(args: GenerateArgs, ctx: &Context) -> anyhow::Result<()> {
    require_file(&args.image, "Image")?;
    let params = I2vParams {
        width: args.render.width,
        height: args.render.height,
        frames: args.frames,
        positive: args.render.positive.clone(),
        negative: args.render.negative.clone(),
        settings: args.settings.clone(),
        seed: args.render.seed,
        ..I2vParams::new(&args.image)
    };
    let bound = generation::apply_i2v(load_template(&args.template)?, &params)?;
    if dump_if_requested(&bound, &args.render)? {
        return Ok(());
    }

    let timeout = Duration::from_secs(args.render.timeout.unwrap_or_else(|| params.default_timeout_secs()));
    tracing::info!(
        image = %args.image.display(),
        frames = params.frames,
        width = params.width,
        height = params.height,
        seed = bound.seed,
        timeout_secs = timeout.as_secs(),
        "Starting image-to-video generation",
    );
    let mut outcome = ctx.runner().run(&bound, timeout, &ctx.cancel).await?;

    if args.interpolate {
        let request = InterpolationRequest {
            method: args.method,
            encode: encode_settings(&args.encode, EncodeSettings::default()),
            ..InterpolationRequest::new(&outcome.video)
        };
        let started = Instant::now();
        let result = interpolate::interpolate_with_retry(
            &ctx.config.interpolator,
            &request,
            &RetryPolicy::default(),
            &ctx.cancel,
        )
        .await;
        outcome.timings.record("interpolation", started.elapsed());

        match result {
            Ok(result) => println!("Interpolated: {} ({} fps)", result.output.display(), result.output_fps),
            Err(e) if e.is_cancelled() => return Err(e.into()),
            Err(e) => {
                tracing::error!(error = %e, video = %outcome.video.display(), "Interpolation failed, keeping original video");
                println!(
                    "Interpolation failed; retry with: comfyctl interpolate \"{}\" --method {}",
                    outcome.video.display(),
                    args.method
                );
            }
        }
    }

    print_outcome(&outcome);
    Ok(())
}

pub async fn sound_video(args: SoundVideoArgs, ctx: &Context) -> anyhow::Result<()> {
    require_file(&args.audio, "Audio file")?;
    if !generation::is_supported_audio(&args.audio) {
        bail!(
            "Unsupported audio format {}; expected one of {}",
            args.audio.display(),
            generation::SUPPORTED_AUDIO_EXTENSIONS.join(", ")
        );
    }
    if let Some(image) = &args.ref_image {
        require_file(image, "Reference image")?;
    }
    if args.audio_start < 0.0 || args.audio_duration.is_some_and(|d| d <= 0.0) {
        bail!("Audio start must be non-negative and duration positive");
    }

    let params = S2vParams {
        ref_image: args.ref_image.clone(),
        width: args.render.width,
        height: args.render.height,
        frames: args.frames,
        positive: args.render.positive.clone(),
        negative: args.render.negative.clone(),
        settings: args.settings.clone(),
        seed: args.render.seed,
        audio_start: args.audio_start,
        audio_duration: args.audio_duration,
        ..S2vParams::new(&args.audio)
    };
    let bound = generation::apply_s2v(load_template(&args.template)?, &params)?;
    if dump_if_requested(&bound, &args.render)? {
        return Ok(());
    }

    let timeout = Duration::from_secs(args.render.timeout.unwrap_or_else(|| params.default_timeout_secs()));
    tracing::info!(
        audio = %args.audio.display(),
        frames = params.frames,
        audio_start = params.audio_start,
        audio_duration = params.effective_audio_duration(),
        seed = bound.seed,
        "Starting sound-to-video generation",
    );
    let outcome = ctx.runner().run(&bound, timeout, &ctx.cancel).await?;
    print_outcome(&outcome);
    Ok(())
}

fn print_report(report: &BenchmarkReport) {
    println!("{:>7}  {:>10}  {:>9}  {:>7}  result", "frames", "time", "s/frame", "vram");
    for run in &report.runs {
        let vram = run
            .vram_after
            .map(|v| format!("{:.0}%", v.percent))
            .unwrap_or_else(|| "-".to_string());
        let per_frame = run
            .secs_per_frame
            .map(|s| format!("{s:.2}"))
            .unwrap_or_else(|| "-".to_string());
        let result = match (&run.error, &run.output) {
            (Some(e), _) => format!("FAILED: {e}"),
            (None, Some(path)) => path.display().to_string(),
            (None, None) => "ok".to_string(),
        };
        println!(
            "{:>7}  {:>10}  {:>9}  {:>7}  {result}",
            run.frames,
            naming::format_time(run.duration_secs),
            per_frame,
            vram
        );
    }
    let summary = report.summary();
    println!("{} of {} runs succeeded", summary.succeeded, summary.total);
}

pub async fn benchmark(args: BenchmarkArgs, ctx: &Context) -> anyhow::Result<()> {
    require_file(&args.image, "Image")?;
    let frames = benchmark::parse_frame_counts(&args.frames)?;
    if frames.is_empty() {
        bail!("No frame counts given");
    }
    let template = load_template(&args.template)?;
    let base = I2vParams {
        width: args.width,
        height: args.height,
        settings: args.settings.clone(),
        ..I2vParams::new(&args.image)
    };

    let report = benchmark::run_benchmark(
        &ctx.runner(),
        &template,
        &base,
        &frames,
        Duration::from_secs(args.timeout),
        &ctx.cancel,
    )
    .await;

    let path = args
        .output
        .clone()
        .unwrap_or_else(|| benchmark::default_report_path(Path::new("benchmarks"), report.started_at));
    benchmark::write_report(&report, &path).await?;
    print_report(&report);
    println!("Report: {}", path.display());

    if report.interrupted {
        return Err(PipelineError::Cancelled.into());
    }
    if report.summary().succeeded == 0 {
        bail!("Every benchmark run failed");
    }
    Ok(())
}
