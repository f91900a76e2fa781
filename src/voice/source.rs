use std::fmt;
use std::path::{Component, Path, PathBuf};

use super::{VoiceError, VoiceResult};

pub const CLIP_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mkv", "mov"];

/// Where a playback item's audio comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Audio streamed out of the download tool's stdout.
    Downloaded { url: String },
    /// A file inside one of the media directories.
    StaticFile { path: PathBuf },
    /// A remote URL read as a continuous stream.
    LiveStream { url: String },
}

impl AudioSource {
    pub fn kind(&self) -> &'static str {
        match self {
            AudioSource::Downloaded { .. } => "downloaded-stream",
            AudioSource::StaticFile { .. } => "static-file",
            AudioSource::LiveStream { .. } => "live-stream",
        }
    }
}

impl fmt::Display for AudioSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioSource::Downloaded { url } => write!(f, "{}", url),
            AudioSource::StaticFile { path } => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                write!(f, "{}", name)
            }
            AudioSource::LiveStream { url } => write!(f, "{} (live)", url),
        }
    }
}

/// True when `name` is a single plain path component.
pub fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.iter().any(|x| x.eq_ignore_ascii_case(ext)))
}

/// Resolves a user-supplied media name to a file inside `dir`. The name may omit
/// its extension, in which case each of `extensions` is tried in order.
pub fn resolve_media_file(dir: &Path, name: &str, extensions: &[&str]) -> VoiceResult<PathBuf> {
    let name = name.trim();
    if !is_plain_file_name(name) {
        return Err(VoiceError::InvalidFileName(name.to_string()));
    }

    let direct = dir.join(name);
    let candidates: Vec<PathBuf> = if has_extension(&direct, extensions) {
        vec![direct]
    } else {
        extensions
            .iter()
            .map(|ext| dir.join(format!("{}.{}", name, ext)))
            .chain(std::iter::once(direct))
            .collect()
    };

    let found = candidates
        .into_iter()
        .find(|p| p.is_file())
        .ok_or_else(|| VoiceError::FileNotFound(name.to_string()))?;

    // Symlinks must not lead out of the directory either.
    let root = dir
        .canonicalize()
        .map_err(|_| VoiceError::FileNotFound(name.to_string()))?;
    let resolved = found
        .canonicalize()
        .map_err(|_| VoiceError::FileNotFound(name.to_string()))?;
    if !resolved.starts_with(&root) {
        return Err(VoiceError::InvalidFileName(name.to_string()));
    }

    Ok(resolved)
}

/// File names in `dir` with one of `extensions`, sorted.
pub fn list_media_files(dir: &Path, extensions: &[&str]) -> std::io::Result<Vec<String>> {
    let mut names: Vec<String> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && has_extension(path, extensions))
        .filter_map(|path| path.file_name().and_then(|n| n.to_str()).map(str::to_string))
        .collect();
    names.sort();
    Ok(names)
}
