use std::path::{Path, PathBuf};

use tracing::debug;

use crate::filter;

/// Entry discovered during a filesystem walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaEntry {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub mtime_ts: i64,
}

/// How to walk a source directory.
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    pub recursive: bool,
    /// Subtree never descended into, typically the job's own output directory.
    pub exclude: Option<PathBuf>,
}

/// Walk a directory and collect eligible video files, sorted by path.
///
/// An unreadable root is an error; unreadable subdirectories are skipped.
pub fn walk_media_dir(root: &Path, opts: &WalkOptions) -> std::io::Result<Vec<MediaEntry>> {
    let read_dir = std::fs::read_dir(root)?;
    let mut entries = Vec::new();
    collect(read_dir, opts, &mut entries);
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

fn walk_recursive(dir: &Path, opts: &WalkOptions, entries: &mut Vec<MediaEntry>) {
    match std::fs::read_dir(dir) {
        Ok(rd) => collect(rd, opts, entries),
        Err(e) => {
            tracing::warn!(path = %dir.display(), error = %e, "cannot read directory");
        }
    }
}

fn collect(read_dir: std::fs::ReadDir, opts: &WalkOptions, entries: &mut Vec<MediaEntry>) {
    for entry in read_dir.flatten() {
        let path = entry.path();
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();

        if filter::should_ignore(&name) {
            debug!(path = %path.display(), "skipping ignored entry");
            continue;
        }

        if path.is_dir() {
            if !opts.recursive {
                continue;
            }
            if opts.exclude.as_deref().is_some_and(|ex| path.starts_with(ex)) {
                debug!(path = %path.display(), "skipping excluded directory");
                continue;
            }
            walk_recursive(&path, opts, entries);
        } else if filter::is_video_file(&name) {
            let metadata = match std::fs::metadata(&path) {
                Ok(m) => m,
                Err(_) => continue,
            };
            let mtime = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);

            entries.push(MediaEntry {
                path,
                size_bytes: metadata.len(),
                mtime_ts: mtime,
            });
        }
    }
}
