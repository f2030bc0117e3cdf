//! FFmpeg/FFprobe command wrappers.
//!
//! Frame extraction, frame-sequence encoding, re-encoding and probing.
//! Children are spawned with `kill_on_drop`, so dropping one of these
//! futures (e.g. on cancellation) also stops the process.

use std::path::Path;

use serde::Deserialize;

/// Error type for FFmpeg/FFprobe operations.
#[derive(Debug, thiserror::Error)]
pub enum FfmpegError {
    #[error("{program} binary not found: {source}")]
    NotFound {
        program: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        program: &'static str,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse ffprobe output: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("input file not found: {0}")]
    InputNotFound(String),
}

// ---------------------------------------------------------------------------
// ffprobe JSON output structures
// ---------------------------------------------------------------------------

/// Top-level ffprobe JSON output (`-print_format json -show_format -show_streams`).
#[derive(Debug, Deserialize)]
pub struct ProbeOutput {
    #[serde(default)]
    pub streams: Vec<ProbeStream>,
    pub format: ProbeFormat,
}

/// A single stream from ffprobe output.
#[derive(Debug, Default, Deserialize)]
pub struct ProbeStream {
    pub codec_name: Option<String>,
    pub codec_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// e.g. "16/1" or "24000/1001"
    pub r_frame_rate: Option<String>,
    pub avg_frame_rate: Option<String>,
    pub duration: Option<String>,
    pub nb_frames: Option<String>,
    pub bit_rate: Option<String>,
}

/// Format-level metadata from ffprobe.
#[derive(Debug, Default, Deserialize)]
pub struct ProbeFormat {
    pub duration: Option<String>,
    pub size: Option<String>,
    pub bit_rate: Option<String>,
}

/// The facts about a video the pipelines need.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct VideoInfo {
    pub fps: f64,
    pub duration_secs: f64,
    pub frame_count: u64,
    pub width: u32,
    pub height: u32,
    pub codec: String,
    /// Video stream bit rate, falling back to the container's.
    pub bit_rate: Option<u64>,
    pub has_audio: bool,
}

impl VideoInfo {
    pub fn from_probe(probe: &ProbeOutput) -> Self {
        let video = first_video_stream(probe);
        Self {
            fps: parse_framerate(probe),
            duration_secs: parse_duration(probe),
            frame_count: parse_total_frames(probe),
            width: video.and_then(|s| s.width).unwrap_or(0),
            height: video.and_then(|s| s.height).unwrap_or(0),
            codec: video.and_then(|s| s.codec_name.clone()).unwrap_or_default(),
            bit_rate: video
                .and_then(|s| s.bit_rate.as_deref())
                .or(probe.format.bit_rate.as_deref())
                .and_then(|b| b.parse().ok()),
            has_audio: probe
                .streams
                .iter()
                .any(|s| s.codec_type.as_deref() == Some("audio")),
        }
    }
}

/// H.264 output settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSettings {
    /// Constant rate factor; ignored when `bitrate` is set.
    pub crf: u8,
    pub preset: String,
    /// Target bitrate such as `2M` or `1500k`.
    pub bitrate: Option<String>,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            crf: 18,
            preset: "medium".to_string(),
            bitrate: None,
        }
    }
}

impl EncodeSettings {
    /// Settings for plain re-encoding (CRF 23).
    pub fn reencode() -> Self {
        Self {
            crf: 23,
            ..Self::default()
        }
    }

    fn codec_args(&self) -> Vec<String> {
        let mut args = vec![
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            self.preset.clone(),
        ];
        match &self.bitrate {
            Some(b) => args.extend(["-b:v".to_string(), b.clone()]),
            None => args.extend(["-crf".to_string(), self.crf.to_string()]),
        }
        args.extend(
            ["-pix_fmt", "yuv420p", "-movflags", "+faststart"]
                .iter()
                .map(|s| s.to_string()),
        );
        args
    }
}

/// Encoder presets accepted by libx264.
pub const PRESETS: &[&str] = &[
    "ultrafast", "superfast", "veryfast", "faster", "fast", "medium", "slow", "slower", "veryslow",
];

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Check that `ffmpeg` is on PATH; returns its version line.
pub async fn check_available() -> Result<String, FfmpegError> {
    let output = tokio::process::Command::new("ffmpeg")
        .arg("-version")
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| FfmpegError::NotFound {
            program: "ffmpeg",
            source,
        })?;
    if !output.status.success() {
        return Err(FfmpegError::ExecutionFailed {
            program: "ffmpeg",
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.lines().next().unwrap_or_default().to_string())
}

/// Run `ffprobe` on a media file and return the parsed JSON output.
pub async fn probe(path: &Path) -> Result<ProbeOutput, FfmpegError> {
    ensure_exists(path)?;

    let output = tokio::process::Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| FfmpegError::NotFound {
            program: "ffprobe",
            source,
        })?;

    if !output.status.success() {
        return Err(FfmpegError::ExecutionFailed {
            program: "ffprobe",
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str::<ProbeOutput>(&stdout)
        .map_err(|e| FfmpegError::ParseError(format!("{e}: {stdout}")))
}

/// Probe a video and summarise it.
pub async fn video_info(path: &Path) -> Result<VideoInfo, FfmpegError> {
    let info = VideoInfo::from_probe(&probe(path).await?);
    tracing::debug!(
        path = %path.display(),
        fps = info.fps,
        frames = info.frame_count,
        duration_secs = info.duration_secs,
        "Probed video",
    );
    Ok(info)
}

/// Extract every frame of `input` losslessly as `frame_%05d.png` into
/// `out_dir`. Returns the number of frames written.
pub async fn extract_frames_png(input: &Path, out_dir: &Path) -> Result<usize, FfmpegError> {
    ensure_exists(input)?;
    tokio::fs::create_dir_all(out_dir).await?;

    let mut cmd = tokio::process::Command::new("ffmpeg");
    cmd.arg("-i")
        .arg(input)
        .args(["-f", "image2", "-c:v", "png", "-y"])
        .arg(out_dir.join("frame_%05d.png"));
    run("ffmpeg", cmd).await?;

    let count = count_files(out_dir, "frame_", "png").await?;
    tracing::info!(input = %input.display(), frames = count, "Extracted frames");
    Ok(count)
}

/// Encode an image sequence (`pattern` relative to `frames_dir`, e.g.
/// `interp_%05d.png`) to `output` at `fps`. Audio is copied from
/// `audio_from` when given and it has an audio stream.
pub async fn encode_frames(
    frames_dir: &Path,
    pattern: &str,
    fps: f64,
    output: &Path,
    settings: &EncodeSettings,
    audio_from: Option<&Path>,
) -> Result<(), FfmpegError> {
    let mut cmd = tokio::process::Command::new("ffmpeg");
    cmd.arg("-framerate")
        .arg(format_fps(fps))
        .arg("-i")
        .arg(frames_dir.join(pattern));
    if let Some(audio) = audio_from {
        cmd.arg("-i")
            .arg(audio)
            .args(["-map", "0:v", "-map", "1:a?", "-c:a", "copy", "-shortest"]);
    }
    cmd.args(settings.codec_args()).arg("-y").arg(output);
    run("ffmpeg", cmd).await?;

    tracing::info!(output = %output.display(), fps, crf = settings.crf, "Encoded frames");
    Ok(())
}

/// Re-encode `input` to `output` as H.264.
pub async fn reencode(input: &Path, output: &Path, settings: &EncodeSettings) -> Result<(), FfmpegError> {
    ensure_exists(input)?;

    let mut cmd = tokio::process::Command::new("ffmpeg");
    cmd.arg("-i")
        .arg(input)
        .args(settings.codec_args())
        .arg("-y")
        .arg(output);
    run("ffmpeg", cmd).await
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn ensure_exists(path: &Path) -> Result<(), FfmpegError> {
    if path.exists() {
        Ok(())
    } else {
        Err(FfmpegError::InputNotFound(path.to_string_lossy().to_string()))
    }
}

async fn run(program: &'static str, mut cmd: tokio::process::Command) -> Result<(), FfmpegError> {
    tracing::debug!(?cmd, "Running {program}");
    let output = cmd
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| FfmpegError::NotFound { program, source })?;

    if !output.status.success() {
        return Err(FfmpegError::ExecutionFailed {
            program,
            exit_code: output.status.code(),
            stderr: tail(&String::from_utf8_lossy(&output.stderr), 20),
        });
    }
    Ok(())
}

/// Last `n` lines of a process's stderr; ffmpeg prints its banner first.
fn tail(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

async fn count_files(dir: &Path, prefix: &str, ext: &str) -> Result<usize, FfmpegError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut count = 0;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let matches = path.extension().is_some_and(|e| e == ext)
            && path
                .file_name()
                .is_some_and(|n| n.to_string_lossy().starts_with(prefix));
        if matches {
            count += 1;
        }
    }
    Ok(count)
}

/// Render a frame rate without a trailing `.0` for whole numbers.
pub fn format_fps(fps: f64) -> String {
    if fps.fract() == 0.0 {
        format!("{}", fps as u64)
    } else {
        format!("{fps:.3}")
    }
}

/// Find the first video stream in the ffprobe output.
fn first_video_stream(probe: &ProbeOutput) -> Option<&ProbeStream> {
    probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
}

/// Video duration in seconds: container first, then the video stream.
pub fn parse_duration(probe: &ProbeOutput) -> f64 {
    probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .or_else(|| {
            first_video_stream(probe)?
                .duration
                .as_deref()?
                .parse::<f64>()
                .ok()
        })
        .unwrap_or(0.0)
}

/// Video frame rate. Prefers `r_frame_rate`, falling back to
/// `avg_frame_rate`; both are fractions like `"16/1"`.
pub fn parse_framerate(probe: &ProbeOutput) -> f64 {
    let Some(stream) = first_video_stream(probe) else {
        return 0.0;
    };
    [stream.r_frame_rate.as_deref(), stream.avg_frame_rate.as_deref()]
        .into_iter()
        .flatten()
        .map(parse_fraction)
        .find(|f| *f > 0.0)
        .unwrap_or(0.0)
}

/// Parse a fraction string like `"30/1"` into a float.
fn parse_fraction(s: &str) -> f64 {
    match s.split_once('/') {
        Some((num, den)) => {
            let num = num.parse::<f64>().unwrap_or(0.0);
            let den = den.parse::<f64>().unwrap_or(0.0);
            if den > 0.0 {
                num / den
            } else {
                0.0
            }
        }
        None => s.parse::<f64>().unwrap_or(0.0),
    }
}

/// Total frames: `nb_frames` when reported, else duration x frame rate.
pub fn parse_total_frames(probe: &ProbeOutput) -> u64 {
    if let Some(n) = first_video_stream(probe)
        .and_then(|s| s.nb_frames.as_deref())
        .and_then(|nb| nb.parse::<u64>().ok())
    {
        return n;
    }
    let duration = parse_duration(probe);
    let fps = parse_framerate(probe);
    if duration > 0.0 && fps > 0.0 {
        return (duration * fps).round() as u64;
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_stream(fps: &str) -> ProbeStream {
        ProbeStream {
            codec_name: Some("h264".into()),
            codec_type: Some("video".into()),
            width: Some(832),
            height: Some(1216),
            r_frame_rate: Some(fps.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_fraction() {
        assert!((parse_fraction("16/1") - 16.0).abs() < 0.001);
        assert!((parse_fraction("24000/1001") - 23.976).abs() < 0.01);
        assert!((parse_fraction("25") - 25.0).abs() < 0.001);
        assert_eq!(parse_fraction("30/0"), 0.0);
    }

    #[test]
    fn test_parse_duration_prefers_format() {
        let probe = ProbeOutput {
            streams: vec![ProbeStream {
                duration: Some("60.0".into()),
                ..video_stream("16/1")
            }],
            format: ProbeFormat {
                duration: Some("5.0625".into()),
                ..Default::default()
            },
        };
        assert!((parse_duration(&probe) - 5.0625).abs() < 0.001);
    }

    #[test]
    fn test_parse_duration_from_stream() {
        let probe = ProbeOutput {
            streams: vec![ProbeStream {
                duration: Some("60.0".into()),
                ..video_stream("16/1")
            }],
            format: ProbeFormat::default(),
        };
        assert!((parse_duration(&probe) - 60.0).abs() < 0.001);
    }

    #[test]
    fn test_framerate_falls_back_to_average() {
        let probe = ProbeOutput {
            streams: vec![ProbeStream {
                avg_frame_rate: Some("16/1".into()),
                ..video_stream("0/0")
            }],
            format: ProbeFormat::default(),
        };
        assert!((parse_framerate(&probe) - 16.0).abs() < 0.001);
    }

    #[test]
    fn test_total_frames_reported_or_estimated() {
        let reported = ProbeOutput {
            streams: vec![ProbeStream {
                nb_frames: Some("81".into()),
                ..video_stream("16/1")
            }],
            format: ProbeFormat::default(),
        };
        assert_eq!(parse_total_frames(&reported), 81);

        let estimated = ProbeOutput {
            streams: vec![video_stream("16/1")],
            format: ProbeFormat {
                duration: Some("5.0".into()),
                ..Default::default()
            },
        };
        assert_eq!(parse_total_frames(&estimated), 80);
    }

    #[test]
    fn test_video_info_from_probe_json() {
        let json = r#"{
            "streams": [
                {"index": 0, "codec_name": "h264", "codec_type": "video", "width": 832,
                 "height": 1216, "r_frame_rate": "16/1", "nb_frames": "25", "bit_rate": "3500000"},
                {"index": 1, "codec_name": "aac", "codec_type": "audio", "channels": 2}
            ],
            "format": {"duration": "1.5625", "size": "1000", "bit_rate": "4000000"}
        }"#;
        let probe: ProbeOutput = serde_json::from_str(json).unwrap();
        let info = VideoInfo::from_probe(&probe);
        assert_eq!(info.frame_count, 25);
        assert_eq!((info.width, info.height), (832, 1216));
        assert_eq!(info.codec, "h264");
        assert_eq!(info.bit_rate, Some(3_500_000));
        assert!(info.has_audio);
        assert!((info.fps - 16.0).abs() < 0.001);
    }

    #[test]
    fn test_codec_args_crf_or_bitrate() {
        let crf = EncodeSettings::default().codec_args();
        assert!(crf.windows(2).any(|w| w[0] == "-crf" && w[1] == "18"));
        assert!(crf.contains(&"+faststart".to_string()));

        let br = EncodeSettings {
            bitrate: Some("2M".into()),
            ..EncodeSettings::reencode()
        }
        .codec_args();
        assert!(br.windows(2).any(|w| w[0] == "-b:v" && w[1] == "2M"));
        assert!(!br.contains(&"-crf".to_string()));
    }

    #[test]
    fn test_format_fps() {
        assert_eq!(format_fps(32.0), "32");
        assert_eq!(format_fps(23.976), "23.976");
    }

    #[test]
    fn test_tail_keeps_last_lines() {
        assert_eq!(tail("a\nb\nc", 2), "b\nc");
        assert_eq!(tail("a", 5), "a");
    }

    #[tokio::test]
    async fn test_missing_input_is_reported() {
        let err = extract_frames_png(Path::new("/nonexistent/in.mp4"), Path::new("/tmp"))
            .await
            .unwrap_err();
        assert!(matches!(err, FfmpegError::InputNotFound(_)));
    }
}
