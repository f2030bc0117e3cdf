//! Locate the file a finished prompt produced.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::messages::{HistoryEntry, OutputFile};

const VIDEO_EXTENSIONS: [&str; 4] = ["mp4", "webm", "mov", "mkv"];

fn has_video_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| VIDEO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// Path of an output file under the server's output root.
pub fn file_path(output_root: &Path, file: &OutputFile) -> PathBuf {
    if file.subfolder.is_empty() {
        output_root.join(&file.filename)
    } else {
        output_root.join(&file.subfolder).join(&file.filename)
    }
}

/// The first video reported in history: `videos`, then `gifs`, then
/// animated `images` entries with a video extension.
pub fn history_video(history: &HistoryEntry) -> Option<OutputFile> {
    history
        .files("videos")
        .into_iter()
        .chain(history.files("gifs"))
        .chain(
            history
                .files("images")
                .into_iter()
                .filter(|f| has_video_extension(&f.filename)),
        )
        .next()
}

/// Most recently modified `.mp4` in `dir` whose name contains `needle`
/// (any `.mp4` when `needle` is `None`).
pub fn newest_video(dir: &Path, needle: Option<&str>) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    entries
        .filter_map(Result::ok)
        .filter(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            name.to_ascii_lowercase().ends_with(".mp4") && needle.map_or(true, |n| name.contains(n))
        })
        .filter_map(|e| {
            let modified = e.metadata().ok()?.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            Some((modified, e.path()))
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path)
}

/// Resolve the generated video for a finished prompt.
///
/// Uses the history entry when its file exists locally. Otherwise falls
/// back to the newest `.mp4` under `{output_root}/video` containing
/// `source_name`, then the newest `.mp4` there at all. A history path
/// that does not exist locally is still returned when nothing else is
/// found, since the server may write to a different filesystem.
pub fn resolve_output(
    history: Option<&HistoryEntry>,
    output_root: &Path,
    source_name: Option<&str>,
) -> Option<PathBuf> {
    let reported = history.and_then(history_video).map(|f| file_path(output_root, &f));
    if let Some(path) = reported.as_ref().filter(|p| p.exists()) {
        return Some(path.clone());
    }

    let video_dir = output_root.join("video");
    let fallback = source_name
        .and_then(|name| newest_video(&video_dir, Some(name)))
        .or_else(|| newest_video(&video_dir, None));

    match (fallback, reported) {
        (Some(path), _) => {
            tracing::debug!(path = %path.display(), "Resolved output by directory scan");
            Some(path)
        }
        (None, reported) => reported,
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    fn entry(outputs: serde_json::Value) -> HistoryEntry {
        serde_json::from_value(json!({"outputs": outputs})).unwrap()
    }

    #[test]
    fn prefers_videos_over_gifs() {
        let h = entry(json!({
            "94": {"gifs": [{"filename": "a.mp4", "subfolder": "", "type": "output"}]},
            "108": {"videos": [{"filename": "b.mp4", "subfolder": "video", "type": "output"}]}
        }));
        assert_eq!(history_video(&h).unwrap().filename, "b.mp4");
    }

    #[test]
    fn animated_images_count_as_video() {
        let h = entry(json!({
            "9": {"images": [{"filename": "still.png", "subfolder": "", "type": "output"}]},
            "108": {"images": [{"filename": "clip.webm", "subfolder": "video", "type": "output"}], "animated": [true]}
        }));
        assert_eq!(history_video(&h).unwrap().filename, "clip.webm");
    }

    #[test]
    fn existing_history_file_wins() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("video")).unwrap();
        fs::write(root.path().join("video/b.mp4"), b"x").unwrap();
        fs::write(root.path().join("video/other.mp4"), b"x").unwrap();

        let h = entry(json!({"108": {"videos": [{"filename": "b.mp4", "subfolder": "video", "type": "output"}]}}));
        let path = resolve_output(Some(&h), root.path(), None).unwrap();
        assert_eq!(path, root.path().join("video/b.mp4"));
    }

    #[test]
    fn falls_back_to_newest_matching_source() {
        let root = tempfile::tempdir().unwrap();
        let video = root.path().join("video");
        fs::create_dir_all(&video).unwrap();
        fs::write(video.join("jane_2s_00001.mp4"), b"x").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        fs::write(video.join("zed_2s_00001.mp4"), b"x").unwrap();

        let path = resolve_output(None, root.path(), Some("jane")).unwrap();
        assert_eq!(path.file_name().unwrap(), "jane_2s_00001.mp4");

        let path = resolve_output(None, root.path(), Some("nobody")).unwrap();
        assert_eq!(path.file_name().unwrap(), "zed_2s_00001.mp4");
    }

    #[test]
    fn missing_everything_returns_reported_or_none() {
        let root = tempfile::tempdir().unwrap();
        assert!(resolve_output(None, root.path(), Some("x")).is_none());

        let h = entry(json!({"108": {"videos": [{"filename": "remote.mp4", "subfolder": "", "type": "output"}]}}));
        assert_eq!(
            resolve_output(Some(&h), root.path(), None).unwrap(),
            root.path().join("remote.mp4")
        );
    }
}
