//! Which files a folder job is allowed to pick up.

// Patterns to ignore
static IGNORE_NAMES: &[&str] = &[
    ".DS_Store",
    "Thumbs.db",
    "desktop.ini",
    "@eaDir",
    "#recycle",
    ".Trash",
];

// Files still being written by a browser, downloader or copy tool.
static PARTIAL_SUFFIXES: &[&str] = &[".part", ".partial", ".crdownload", ".tmp", ".!qb"];

static VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "m4v", "mov", "wmv", "flv", "f4v", "webm", "ts", "mts", "m2ts", "mpg",
    "mpeg", "mpe", "mpv", "3gp", "3g2", "ogv", "vob", "mxf", "asf",
];

/// Check if a file or directory name should be skipped outright.
pub fn should_ignore(name: &str) -> bool {
    if name.starts_with('.') {
        return true;
    }
    let lower = name.to_lowercase();
    IGNORE_NAMES.iter().any(|pat| lower == pat.to_lowercase())
        || PARTIAL_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
}

/// Check if a file has a video extension.
pub fn is_video_file(filename: &str) -> bool {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str())
        }
        _ => false,
    }
}
