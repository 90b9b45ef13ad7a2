//! Metric name ↔ storage path mapping and metric discovery.
//!
//! A metric `a.b.c` lives at `a/b/c.wsp` under the storage root.

use std::path::{Component, Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

/// Extension of archive files.
pub const WHISPER_EXT: &str = "wsp";

/// Relative archive path for a metric name, or `None` when the name does
/// not map to a file strictly inside the storage root.
///
/// Every dot-separated segment must be non-empty and free of path
/// separators, so `a..b`, `a/b.c` and `a./tmp/x` are all rejected.
pub fn metric_to_path(metric: &str) -> Option<PathBuf> {
    let valid_segment = |s: &str| !s.is_empty() && !s.contains(['/', '\\', '\0']);
    if !metric.split('.').all(valid_segment) {
        return None;
    }
    let mut path: PathBuf = metric.split('.').collect();
    path.set_extension(WHISPER_EXT);
    Some(path)
}

/// Metric name for a relative archive path, or `None` if the path is not
/// an archive file.
pub fn path_to_metric(path: &Path) -> Option<String> {
    if path.extension()? != WHISPER_EXT {
        return None;
    }
    let stem = path.with_extension("");
    let mut segments = Vec::new();
    for component in stem.components() {
        match component {
            Component::Normal(s) => segments.push(s.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if segments.is_empty() {
        return None;
    }
    Some(segments.join("."))
}

/// Walk `root` and yield every metric name found, in path order.
///
/// Unreadable entries are logged and skipped.
pub fn list_metrics(root: &Path) -> impl Iterator<Item = String> + use<> {
    let root = root.to_path_buf();
    WalkDir::new(&root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter_map(move |entry| {
            let rel = entry.path().strip_prefix(&root).ok()?;
            path_to_metric(rel)
        })
}
