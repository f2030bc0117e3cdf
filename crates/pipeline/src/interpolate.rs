//! Frame interpolation: extract frames, run the external interpolator,
//! re-encode at the multiplied frame rate.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};

use comfyctl_core::ffmpeg::{self, EncodeSettings};
use comfyctl_core::naming;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::retry::RetryPolicy;
use crate::subprocess;

/// Pattern the interpolated frames are renamed to before encoding.
pub const INTERP_PATTERN: &str = "interp_%05d.png";

/// Interpolation model run by the external process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Film,
    Rife,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Film => "film",
            Self::Rife => "rife",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "film" => Ok(Self::Film),
            "rife" => Ok(Self::Rife),
            other => Err(format!("unknown interpolation method '{other}' (expected film or rife)")),
        }
    }
}

/// Program and argument template for the interpolator process.
///
/// Arguments may contain `{input_dir}`, `{output_dir}`, `{method}` and
/// `{multiplier}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpolatorCommand {
    pub program: String,
    pub args: Vec<String>,
}

pub const DEFAULT_INTERPOLATOR_ARGS: &str =
    "-m vfi_runner --method {method} --multiplier {multiplier} --input {input_dir} --output {output_dir}";

impl Default for InterpolatorCommand {
    fn default() -> Self {
        Self::new("python", None)
    }
}

impl InterpolatorCommand {
    /// Build from a program and a whitespace-separated argument template
    /// (the default template when `None`).
    pub fn new(program: impl Into<String>, args: Option<&str>) -> Self {
        Self {
            program: program.into(),
            args: args
                .unwrap_or(DEFAULT_INTERPOLATOR_ARGS)
                .split_whitespace()
                .map(str::to_string)
                .collect(),
        }
    }

    /// Arguments with placeholders substituted.
    pub fn render_args(&self, input_dir: &Path, output_dir: &Path, method: Method, multiplier: u32) -> Vec<String> {
        let input_dir = input_dir.to_string_lossy();
        let output_dir = output_dir.to_string_lossy();
        let multiplier = multiplier.to_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{input_dir}", &input_dir)
                    .replace("{output_dir}", &output_dir)
                    .replace("{method}", method.as_str())
                    .replace("{multiplier}", &multiplier)
            })
            .collect()
    }
}

/// One interpolation job.
#[derive(Debug, Clone)]
pub struct InterpolationRequest {
    pub input: PathBuf,
    /// Defaults to `{stem}_{method}_{fps}fps_hq.mp4` beside the input.
    pub output: Option<PathBuf>,
    pub method: Method,
    pub multiplier: u32,
    pub encode: EncodeSettings,
    /// Keep the working directory with extracted and interpolated frames.
    pub keep_frames: bool,
    /// Copy the source's audio track into the result.
    pub keep_audio: bool,
    /// Limit for the interpolator process.
    pub timeout: Option<Duration>,
}

impl InterpolationRequest {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: None,
            method: Method::default(),
            multiplier: 2,
            encode: EncodeSettings::default(),
            keep_frames: false,
            keep_audio: true,
            timeout: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InterpolationResult {
    pub output: PathBuf,
    pub input_fps: f64,
    pub output_fps: f64,
    pub input_frames: usize,
    pub output_frames: usize,
    /// Set when `keep_frames` was requested.
    pub work_dir: Option<PathBuf>,
    pub elapsed: Duration,
}

/// Run one interpolation end to end.
pub async fn interpolate(
    command: &InterpolatorCommand,
    request: &InterpolationRequest,
    cancel: &CancellationToken,
) -> Result<InterpolationResult, PipelineError> {
    if request.multiplier < 2 {
        return Err(PipelineError::Invalid(format!(
            "Multiplier must be at least 2, got {}",
            request.multiplier
        )));
    }
    let start = Instant::now();
    let version = ffmpeg::check_available().await?;
    tracing::debug!(%version, "ffmpeg available");

    let info = ffmpeg::video_info(&request.input).await?;
    let output_fps = info.fps * request.multiplier as f64;
    let output = request.output.clone().unwrap_or_else(|| {
        naming::interpolated_output(&request.input, request.method.as_str(), output_fps.round() as u32)
    });

    let work = tempfile::Builder::new()
        .prefix("comfyctl-interp-")
        .tempdir()
        .map_err(|e| PipelineError::io(std::env::temp_dir(), e))?;
    let frames_dir = work.path().join("frames");
    let raw_dir = work.path().join("interpolated");
    let seq_dir = work.path().join("sequence");
    for dir in [&raw_dir, &seq_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| PipelineError::io(dir.as_path(), e))?;
    }

    let input_frames = ffmpeg::extract_frames_png(&request.input, &frames_dir).await?;
    if input_frames < 2 {
        return Err(PipelineError::TooFewFrames(input_frames));
    }

    tracing::info!(
        input = %request.input.display(),
        method = %request.method,
        multiplier = request.multiplier,
        frames = input_frames,
        "Running interpolator",
    );
    let mut cmd = tokio::process::Command::new(&command.program);
    cmd.args(command.render_args(&frames_dir, &raw_dir, request.method, request.multiplier));
    subprocess::run_command(&command.program, &mut cmd, request.timeout, cancel).await?;

    let output_frames = normalize_frames(&raw_dir, &seq_dir).await?;
    if output_frames == 0 {
        return Err(PipelineError::NoInterpolatedFrames(raw_dir));
    }
    if output_frames < input_frames {
        tracing::warn!(input_frames, output_frames, "Interpolator produced fewer frames than it was given");
    }

    let audio_from = (request.keep_audio && info.has_audio).then_some(request.input.as_path());
    tokio::select! {
        _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
        encoded = ffmpeg::encode_frames(&seq_dir, INTERP_PATTERN, output_fps, &output, &request.encode, audio_from) => encoded?,
    }

    let work_dir = if request.keep_frames {
        let kept = work.keep();
        tracing::info!(path = %kept.display(), "Kept frame directory");
        Some(kept)
    } else {
        None
    };

    let elapsed = start.elapsed();
    tracing::info!(
        output = %output.display(),
        input_fps = info.fps,
        output_fps,
        output_frames,
        elapsed = %naming::format_time(elapsed.as_secs_f64()),
        "Interpolation complete",
    );
    Ok(InterpolationResult {
        output,
        input_fps: info.fps,
        output_fps,
        input_frames,
        output_frames,
        work_dir,
        elapsed,
    })
}

/// [`interpolate`] under a retry policy.
pub async fn interpolate_with_retry(
    command: &InterpolatorCommand,
    request: &InterpolationRequest,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<InterpolationResult, PipelineError> {
    policy
        .run("interpolation", cancel, |_| interpolate(command, request, cancel))
        .await
}

/// Move every PNG in `src` (sorted by name) into `dst` as a contiguous
/// `interp_%05d.png` sequence starting at 1. Returns the frame count.
pub async fn normalize_frames(src: &Path, dst: &Path) -> Result<usize, PipelineError> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(src)
        .await
        .map_err(|e| PipelineError::io(src, e))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| PipelineError::io(src, e))?
    {
        let path = entry.path();
        if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("png")) {
            names.push(path);
        }
    }
    names.sort();

    for (i, from) in names.iter().enumerate() {
        let to = dst.join(format!("interp_{:05}.png", i + 1));
        tokio::fs::rename(from, &to)
            .await
            .map_err(|e| PipelineError::io(from.as_path(), e))?;
    }
    Ok(names.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_parsing() {
        assert_eq!("FILM".parse::<Method>().unwrap(), Method::Film);
        assert_eq!("rife".parse::<Method>().unwrap(), Method::Rife);
        assert!("dain".parse::<Method>().is_err());
    }

    #[test]
    fn default_command_renders_placeholders() {
        let cmd = InterpolatorCommand::default();
        let args = cmd.render_args(Path::new("/w/frames"), Path::new("/w/out"), Method::Rife, 4);
        assert_eq!(cmd.program, "python");
        assert_eq!(
            args,
            vec![
                "-m", "vfi_runner", "--method", "rife", "--multiplier", "4", "--input", "/w/frames",
                "--output", "/w/out",
            ]
        );
    }

    #[test]
    fn custom_template_substitutes_inside_arguments() {
        let cmd = InterpolatorCommand::new("vfi", Some("--in={input_dir} --out={output_dir} -x{multiplier}"));
        let args = cmd.render_args(Path::new("a"), Path::new("b"), Method::Film, 2);
        assert_eq!(args, vec!["--in=a", "--out=b", "-x2"]);
    }

    #[tokio::test]
    async fn normalize_renames_sorted_frames() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("raw");
        let dst = dir.path().join("seq");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::create_dir_all(&dst).unwrap();
        for name in ["img0002.png", "img0001.png", "img0003.png", "notes.txt"] {
            std::fs::write(src.join(name), name).unwrap();
        }

        let count = normalize_frames(&src, &dst).await.unwrap();
        assert_eq!(count, 3);
        assert_eq!(std::fs::read_to_string(dst.join("interp_00001.png")).unwrap(), "img0001.png");
        assert_eq!(std::fs::read_to_string(dst.join("interp_00003.png")).unwrap(), "img0003.png");
        assert!(src.join("notes.txt").exists());
    }

    #[tokio::test]
    async fn multiplier_below_two_is_rejected() {
        let mut req = InterpolationRequest::new("clip.mp4");
        req.multiplier = 1;
        let err = interpolate(&InterpolatorCommand::default(), &req, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Invalid(_)));
    }
}
