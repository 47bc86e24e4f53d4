//! Audio and video recordings that accompany a motion file.

use std::path::{Path, PathBuf};

const AUDIO_EXTENSIONS: [&str; 3] = ["wav", "ogg", "mp3"];
const VIDEO_EXTENSIONS: [&str; 3] = ["avi", "mpeg", "mp4"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Companions {
    pub audio: Option<PathBuf>,
    pub video: Option<PathBuf>,
}

/// Find audio and video files whose stem starts with the motion file's stem.
///
/// Looks in the motion file's directory first, then in its parent. Neither search descends
/// into subdirectories. The first match in name order wins.
pub fn find_companions(motion_file: &Path) -> Companions {
    let mut found = Companions::default();
    let Some(stem) = motion_file.file_stem().and_then(|s| s.to_str()) else {
        return found;
    };
    let Some(dir) = motion_file.parent() else {
        return found;
    };

    for search in [Some(dir), dir.parent()].into_iter().flatten() {
        let Ok(entries) = std::fs::read_dir(search) else {
            continue;
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        files.sort();

        for path in files {
            let (Some(candidate), Some(ext)) = (
                path.file_stem().and_then(|s| s.to_str()),
                path.extension().and_then(|e| e.to_str()),
            ) else {
                continue;
            };
            if !candidate.starts_with(stem) {
                continue;
            }
            let ext = ext.to_ascii_lowercase();
            if found.audio.is_none() && AUDIO_EXTENSIONS.contains(&ext.as_str()) {
                tracing::debug!(file = %path.display(), "found audio companion");
                found.audio = Some(path);
            } else if found.video.is_none() && VIDEO_EXTENSIONS.contains(&ext.as_str()) {
                tracing::debug!(file = %path.display(), "found video companion");
                found.video = Some(path);
            }
        }
        if found.audio.is_some() && found.video.is_some() {
            break;
        }
    }
    found
}
