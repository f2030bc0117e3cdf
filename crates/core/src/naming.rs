//! Output naming conventions for generated and post-processed videos.

use std::path::Path;

/// Frame rate the video model renders at.
pub const MODEL_FPS: u32 = 16;

/// Prefixes and suffixes stripped from source file stems.
const STRIP_TOKENS: &[&str] = &["sogni-photobooth-", "-raw"];

/// Clean a source file's stem for use in output names.
///
/// Known prefixes/suffixes are removed; spaces and underscores become
/// hyphens.
///
/// ```
/// use comfyctl_core::naming::source_name;
///
/// assert_eq!(source_name("input/sogni-photobooth-my_pic-raw.jpg"), "my-pic");
/// assert_eq!(source_name("Some Track.mp3"), "Some-Track");
/// ```
pub fn source_name(path: impl AsRef<Path>) -> String {
    let stem = path
        .as_ref()
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut name = stem;
    for token in STRIP_TOKENS {
        name = name.replace(token, "");
    }
    name.replace([' ', '_'], "-")
}

/// Clip duration as `"{seconds:.1}s"`.
pub fn duration_label(frames: u32, fps: u32) -> String {
    format!("{:.1}s", frames as f64 / fps.max(1) as f64)
}

/// Filename prefix handed to the save node. The `%...%` tokens are
/// expanded by the server.
pub fn video_filename_prefix(source: &str, frames: u32, tags: &[&str]) -> String {
    let mut name = format!(
        "video/{source}_%width%x%height%_{frames}f_{}",
        duration_label(frames, MODEL_FPS)
    );
    for tag in tags.iter().filter(|t| !t.is_empty()) {
        name.push('_');
        name.push_str(tag);
    }
    name.push_str("_%year%%month%%day%_%hour%%minute%%second%");
    name
}

/// Human-readable elapsed time: `12.3s`, `2m 3.4s`, `1h 2m 3.4s`.
pub fn format_time(seconds: f64) -> String {
    // Round once so carries propagate (119.96 is 2m 0.0s, not 1m 60.0s).
    let tenths = (seconds.max(0.0) * 10.0).round() as u64;
    let secs = (tenths % 600) as f64 / 10.0;
    let mins = tenths / 600 % 60;
    let hours = tenths / 36_000;

    if hours > 0 {
        format!("{hours}h {mins}m {secs:.1}s")
    } else if mins > 0 {
        format!("{mins}m {secs:.1}s")
    } else {
        format!("{secs:.1}s")
    }
}

/// Output path for an interpolated video, beside the input:
/// `{stem without trailing _}_{method}_{fps}fps_hq.mp4`.
pub fn interpolated_output(input: &Path, method: &str, fps: u32) -> std::path::PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = stem.trim_end_matches('_');
    input.with_file_name(format!("{stem}_{method}_{fps}fps_hq.mp4"))
}

/// Default re-encode target: `{stem}_reencoded{ext}` beside the input.
pub fn reencoded_output(input: &Path) -> std::path::PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match input.extension() {
        Some(ext) => format!("{stem}_reencoded.{}", ext.to_string_lossy()),
        None => format!("{stem}_reencoded"),
    };
    input.with_file_name(name)
}
