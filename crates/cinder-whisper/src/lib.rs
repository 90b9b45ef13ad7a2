//! Whisper-compatible archive files.
//!
//! A file holds one metric as a fixed set of archives, each a ring buffer
//! at a single resolution. Writes land in the finest archive that still
//! retains the point and are consolidated into the coarser ones.
//!
//! Every time-dependent operation takes `now` explicitly; callers pass
//! [`now()`] in production.

mod archive;
pub mod error;
pub mod header;

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

pub use error::{WhisperError, WhisperResult};
pub use header::{AggregationMethod, ArchiveInfo, ArchiveSpec, Header, validate_archives};

/// Values fetched from one archive, one per `step` starting at `start`.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub start: u32,
    /// Exclusive.
    pub end: u32,
    pub step: u32,
    pub values: Vec<Option<f64>>,
}

impl Series {
    pub fn points(&self) -> impl Iterator<Item = (u32, Option<f64>)> + '_ {
        self.values
            .iter()
            .enumerate()
            .map(|(i, value)| (self.start + i as u32 * self.step, *value))
    }

    /// Only the points that hold a value.
    pub fn present(&self) -> impl Iterator<Item = (u32, f64)> + '_ {
        self.points()
            .filter_map(|(timestamp, value)| value.map(|v| (timestamp, v)))
    }
}

/// Current wall clock in epoch seconds.
pub fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// Create an empty archive file. Fails if `path` already exists.
pub fn create(
    path: &Path,
    archives: &[ArchiveSpec],
    x_files_factor: f32,
    aggregation_method: AggregationMethod,
) -> WhisperResult<Header> {
    let mut specs = archives.to_vec();
    specs.sort_by_key(|a| a.seconds_per_point);
    validate_archives(&specs)?;
    if !(0.0..=1.0).contains(&x_files_factor) {
        return Err(WhisperError::InvalidConfiguration(format!(
            "x_files_factor {x_files_factor} must be between 0 and 1"
        )));
    }

    let header = Header::layout(&specs, x_files_factor, aggregation_method);
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => WhisperError::AlreadyExists(path.to_path_buf()),
            _ => WhisperError::io(path, e),
        })?;
    file.write_all(&header.encode())
        .map_err(|e| WhisperError::io(path, e))?;
    file.set_len(header.file_size())
        .map_err(|e| WhisperError::io(path, e))?;

    debug!(
        path = %path.display(),
        archives = header.archives.len(),
        max_retention = header.max_retention,
        "created archive file"
    );
    Ok(header)
}

/// Read and validate the header of an archive file.
pub fn info(path: &Path) -> WhisperResult<Header> {
    let mut file = File::open(path).map_err(|e| WhisperError::io(path, e))?;
    Header::read(&mut file, path)
}

/// Fetch `(from, until]` from the finest archive that retains `from`.
///
/// Returns `None` when the whole window is in the future or older than
/// the file's maximum retention.
pub fn fetch(path: &Path, from: u32, until: u32, now: u32) -> WhisperResult<Option<Series>> {
    if from > until {
        return Err(WhisperError::InvalidTimeInterval { from, until });
    }

    let mut file = File::open(path).map_err(|e| WhisperError::io(path, e))?;
    let header = Header::read(&mut file, path)?;

    let oldest = now.saturating_sub(header.max_retention);
    if from > now || until < oldest {
        return Ok(None);
    }
    let from = from.max(oldest);
    let until = until.min(now);

    let age = now - from;
    let archive = header
        .archives
        .iter()
        .find(|a| a.retention() >= age)
        .or(header.archives.last())
        .copied()
        .ok_or_else(|| WhisperError::corrupt(path, "no archives"))?;

    archive::fetch(&mut file, path, &archive, from, until).map(Some)
}

/// Write points at their exact timestamps.
///
/// Each point goes to the finest archive whose retention still covers its
/// age; points older than every archive are dropped. Coarser archives are
/// updated by consolidation.
pub fn update_many(path: &Path, points: &[(u32, f64)], now: u32) -> WhisperResult<()> {
    if points.is_empty() {
        return Ok(());
    }

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| WhisperError::io(path, e))?;
    let header = Header::read(&mut file, path)?;

    let mut points = points.to_vec();
    points.sort_by(|a, b| b.0.cmp(&a.0));

    let mut index = 0;
    let mut pending: Vec<(u32, f64)> = Vec::new();
    let mut dropped = 0usize;
    for (n, point) in points.iter().enumerate() {
        let age = i64::from(now) - i64::from(point.0);
        while i64::from(header.archives[index].retention()) < age {
            if !pending.is_empty() {
                pending.reverse();
                archive::update(&mut file, path, &header, index, &pending)?;
                pending.clear();
            }
            index += 1;
            if index == header.archives.len() {
                dropped = points.len() - n;
                break;
            }
        }
        if index == header.archives.len() {
            break;
        }
        pending.push(*point);
    }
    if !pending.is_empty() {
        pending.reverse();
        archive::update(&mut file, path, &header, index, &pending)?;
    }

    if dropped > 0 {
        debug!(path = %path.display(), dropped, "points older than max retention dropped");
    }
    Ok(())
}

/// Change the aggregation method (and optionally the x-files factor).
/// Returns the previous method.
pub fn set_aggregation_method(
    path: &Path,
    method: AggregationMethod,
    x_files_factor: Option<f32>,
) -> WhisperResult<AggregationMethod> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| WhisperError::io(path, e))?;
    let header = Header::read(&mut file, path)?;

    let updated = Header {
        aggregation_method: method,
        x_files_factor: x_files_factor.unwrap_or(header.x_files_factor),
        ..header.clone()
    };
    if !(0.0..=1.0).contains(&updated.x_files_factor) {
        return Err(WhisperError::InvalidConfiguration(format!(
            "x_files_factor {} must be between 0 and 1",
            updated.x_files_factor
        )));
    }

    file.seek(SeekFrom::Start(0))
        .map_err(|e| WhisperError::io(path, e))?;
    file.write_all(&updated.encode())
        .map_err(|e| WhisperError::io(path, e))?;

    debug!(
        path = %path.display(),
        old = %header.aggregation_method,
        new = %method,
        "aggregation method changed"
    );
    Ok(header.aggregation_method)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const NOW: u32 = 1_600_000_000;

    fn two_tier(dir: &tempfile::TempDir, name: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        create(
            &path,
            &[ArchiveSpec::new(1, 60), ArchiveSpec::new(10, 60)],
            0.5,
            AggregationMethod::Average,
        )
        .unwrap();
        path
    }

    #[test]
    fn test_create_and_info() {
        let dir = tempfile::tempdir().unwrap();
        let path = two_tier(&dir, "m.wsp");
        let header = info(&path).unwrap();
        assert_eq!(header.archives.len(), 2);
        assert_eq!(header.max_retention, 600);
        assert_eq!(header.x_files_factor, 0.5);
        assert_eq!(fs::metadata(&path).unwrap().len(), header.file_size());
    }

    #[test]
    fn test_create_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = two_tier(&dir, "m.wsp");
        let err = create(&path, &[ArchiveSpec::new(1, 60)], 0.5, AggregationMethod::Sum).unwrap_err();
        assert!(matches!(err, WhisperError::AlreadyExists(_)));
    }

    #[test]
    fn test_info_reports_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let garbage = dir.path().join("garbage.wsp");
        fs::write(&garbage, b"this is not an archive file").unwrap();
        assert!(info(&garbage).unwrap_err().is_corrupt());

        let short = dir.path().join("short.wsp");
        fs::write(&short, [0u8; 7]).unwrap();
        assert!(info(&short).unwrap_err().is_corrupt());

        let truncated = two_tier(&dir, "truncated.wsp");
        let file = OpenOptions::new().write(true).open(&truncated).unwrap();
        file.set_len(100).unwrap();
        assert!(info(&truncated).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_info_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = info(&dir.path().join("missing.wsp")).unwrap_err();
        assert!(err.is_not_found());
        assert!(!err.is_corrupt());
    }

    #[test]
    fn test_fetch_beyond_32_bit_timestamps_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.wsp");
        create(&path, &[ArchiveSpec::new(u32::MAX, 1)], 0.5, AggregationMethod::Average).unwrap();
        assert!(fetch(&path, 0, NOW, NOW).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_fetch_empty_file_is_all_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let path = two_tier(&dir, "m.wsp");
        let series = fetch(&path, NOW - 60, NOW, NOW).unwrap().unwrap();
        assert_eq!(series.start, NOW - 59);
        assert_eq!(series.end, NOW + 1);
        assert_eq!(series.step, 1);
        assert_eq!(series.values.len(), 60);
        assert!(series.values.iter().all(Option::is_none));
    }

    #[test]
    fn test_fetch_outside_retention() {
        let dir = tempfile::tempdir().unwrap();
        let path = two_tier(&dir, "m.wsp");
        assert_eq!(fetch(&path, NOW - 5000, NOW - 4000, NOW).unwrap(), None);
        assert_eq!(fetch(&path, NOW + 10, NOW + 20, NOW).unwrap(), None);
        assert!(matches!(
            fetch(&path, NOW, NOW - 1, NOW),
            Err(WhisperError::InvalidTimeInterval { .. })
        ));
    }

    #[test]
    fn test_update_then_fetch_fine_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = two_tier(&dir, "m.wsp");
        update_many(&path, &[(NOW - 10, 1.5), (NOW - 5, 2.5), (NOW, 3.5)], NOW).unwrap();

        let series = fetch(&path, NOW - 11, NOW, NOW).unwrap().unwrap();
        let present: Vec<(u32, f64)> = series.present().collect();
        assert_eq!(present, vec![(NOW - 10, 1.5), (NOW - 5, 2.5), (NOW, 3.5)]);
        assert_eq!(series.values.len(), 11);
    }

    #[test]
    fn test_update_overwrites_same_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = two_tier(&dir, "m.wsp");
        update_many(&path, &[(NOW - 3, 1.0)], NOW).unwrap();
        update_many(&path, &[(NOW - 3, 7.0)], NOW).unwrap();
        let series = fetch(&path, NOW - 4, NOW - 3, NOW).unwrap().unwrap();
        assert_eq!(series.values, vec![Some(7.0)]);
    }

    #[test]
    fn test_ring_wraps_after_retention() {
        let dir = tempfile::tempdir().unwrap();
        let path = two_tier(&dir, "m.wsp");
        // Fill the 60-slot fine archive, then move the clock 30s and write again.
        let first: Vec<(u32, f64)> = (0..60).map(|i| (NOW - 59 + i, f64::from(i))).collect();
        update_many(&path, &first, NOW).unwrap();
        let later = NOW + 30;
        let second: Vec<(u32, f64)> = (1..=30).map(|i| (NOW + i, 100.0 + f64::from(i))).collect();
        update_many(&path, &second, later).unwrap();

        let series = fetch(&path, later - 60, later, later).unwrap().unwrap();
        assert_eq!(series.start, NOW - 29);
        let values: Vec<f64> = series.values.iter().map(|v| v.unwrap()).collect();
        let expected: Vec<f64> = (30..60)
            .map(f64::from)
            .chain((1..=30).map(|i| 100.0 + f64::from(i)))
            .collect();
        assert_eq!(values, expected);
    }

    #[test]
    fn test_propagates_to_coarse_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = two_tier(&dir, "m.wsp");
        // Ten points inside one 10s interval, all in the fine archive.
        let points: Vec<(u32, f64)> = (0..10).map(|i| (NOW - 20 + i, f64::from(i))).collect();
        update_many(&path, &points, NOW).unwrap();

        // Ask for a window old enough to be served by the coarse archive.
        let series = fetch(&path, NOW - 100, NOW, NOW).unwrap().unwrap();
        assert_eq!(series.step, 10);
        let present: Vec<(u32, f64)> = series.present().collect();
        assert_eq!(present, vec![(NOW - 20, 4.5)]);
    }

    #[test]
    fn test_x_files_factor_blocks_sparse_propagation() {
        let dir = tempfile::tempdir().unwrap();
        let path = two_tier(&dir, "m.wsp");
        // 4 of 10 known is under the 0.5 factor.
        let points: Vec<(u32, f64)> = (0..4).map(|i| (NOW - 20 + i, 1.0)).collect();
        update_many(&path, &points, NOW).unwrap();
        let series = fetch(&path, NOW - 100, NOW, NOW).unwrap().unwrap();
        assert_eq!(series.present().count(), 0);
    }

    #[test]
    fn test_old_points_go_straight_to_coarse_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = two_tier(&dir, "m.wsp");
        update_many(&path, &[(NOW - 300, 42.0), (NOW - 5000, 1.0)], NOW).unwrap();

        let fine = fetch(&path, NOW - 60, NOW, NOW).unwrap().unwrap();
        assert_eq!(fine.present().count(), 0);
        let coarse = fetch(&path, NOW - 600, NOW, NOW).unwrap().unwrap();
        assert_eq!(coarse.present().collect::<Vec<_>>(), vec![(NOW - 300, 42.0)]);
    }

    #[test]
    fn test_set_aggregation_method() {
        let dir = tempfile::tempdir().unwrap();
        let path = two_tier(&dir, "m.wsp");
        let old = set_aggregation_method(&path, AggregationMethod::Max, Some(0.1)).unwrap();
        assert_eq!(old, AggregationMethod::Average);
        let header = info(&path).unwrap();
        assert_eq!(header.aggregation_method, AggregationMethod::Max);
        assert_eq!(header.x_files_factor, 0.1);
        assert!(set_aggregation_method(&path, AggregationMethod::Sum, Some(2.0)).is_err());
    }
}
