//! Tracks which files a watch folder has already handed out.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use crate::walk::MediaEntry;

/// Remembers files across scans of one watched directory.
///
/// A file is reported once it has been seen with the same non-zero size and
/// modification time on two consecutive scans, and never again afterwards.
#[derive(Debug, Default)]
pub struct DiscoveryTracker {
    dispatched: HashSet<PathBuf>,
    /// Size and mtime from the previous scan.
    pending: HashMap<PathBuf, (u64, i64)>,
}

impl DiscoveryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one scan; returns the files that just became ready, in scan order.
    pub fn observe(&mut self, entries: &[MediaEntry]) -> Vec<PathBuf> {
        let mut ready = Vec::new();
        let mut still_pending = HashMap::new();

        for entry in entries {
            if self.dispatched.contains(&entry.path) {
                continue;
            }
            let seen = (entry.size_bytes, entry.mtime_ts);
            match self.pending.get(&entry.path) {
                Some(&previous) if previous == seen && entry.size_bytes > 0 => {
                    self.dispatched.insert(entry.path.clone());
                    ready.push(entry.path.clone());
                }
                _ => {
                    still_pending.insert(entry.path.clone(), seen);
                }
            }
        }

        // Files that vanished between scans are forgotten.
        self.pending = still_pending;
        ready
    }

    pub fn dispatched_count(&self) -> usize {
        self.dispatched.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
