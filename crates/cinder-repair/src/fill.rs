//! Gap filling between two archive files of the same metric.
//!
//! `fill_archives` scans the destination tier by tier, finest first, and
//! backfills every run of missing samples from the source. `fill` copies
//! one time range, taking each moment from the finest source archive that
//! still retains it.

use std::path::Path;

use cinder_whisper::{self as whisper, ArchiveInfo, Series};
use tracing::debug;

use crate::error::RepairResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillMode {
    /// Only write where the destination has no value.
    #[default]
    Gaps,
    /// Write every source value, replacing what the destination holds.
    Overwrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FillStats {
    pub gaps: usize,
    pub points: usize,
}

fn by_retention(archives: &[ArchiveInfo]) -> Vec<ArchiveInfo> {
    let mut sorted = archives.to_vec();
    sorted.sort_by_key(|a| a.retention());
    sorted
}

/// Copy source points at or after `tstart` and before `tstop` into `dst`.
/// Returns the number of points written.
///
/// Ranges the source no longer retains are silently skipped.
pub fn fill(src: &Path, dst: &Path, tstart: u32, tstop: u32, now: u32) -> RepairResult<usize> {
    if tstart >= tstop {
        return Ok(0);
    }

    let header = whisper::info(src)?;
    let oldest = now.saturating_sub(header.max_retention);
    if tstart < oldest && tstop < oldest {
        return Ok(0);
    }

    let upper = tstop;
    let mut tstop = tstop;
    let mut written = 0;
    for archive in by_retention(&header.archives) {
        let archive_oldest = now.saturating_sub(archive.retention());
        if tstop <= archive_oldest {
            continue;
        }
        let from = archive_oldest.max(tstart);
        // Fetch windows open after their start; step back to include `tstart`.
        let fetch_from = if from > archive_oldest { from - 1 } else { from };

        if let Some(series) = whisper::fetch(src, fetch_from, tstop, now)? {
            let mut points: Vec<(u32, f64)> = series
                .present()
                .filter(|&(timestamp, _)| timestamp >= tstart && timestamp < tstop)
                .collect();
            // newest first
            points.reverse();
            whisper::update_many(dst, &points, now)?;
            written += points.len();
        }

        tstop = from;
        if tstop == tstart {
            break;
        }
    }

    debug!(
        src = %src.display(),
        dst = %dst.display(),
        tstart,
        tstop = upper,
        written,
        "filled range"
    );
    Ok(written)
}

/// Runs of missing samples worth healing, as `[start, end)` pairs.
///
/// A run is kept only when it spans more than `seconds_per_point`, so a
/// single missing sample is ignored wherever it sits. A run still open at
/// the end of the series is closed at `series.end`.
pub fn find_gaps(series: &Series, seconds_per_point: u32, mode: FillMode) -> Vec<(u32, u32)> {
    let mut gaps = Vec::new();
    let mut gap_start: Option<u32> = None;

    for (timestamp, value) in series.points() {
        let missing = value.is_none() || mode == FillMode::Overwrite;
        match (missing, gap_start) {
            (true, None) => gap_start = Some(timestamp),
            (false, Some(start)) => {
                if timestamp - start > seconds_per_point {
                    gaps.push((start, timestamp));
                }
                gap_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = gap_start {
        if series.end - start > seconds_per_point {
            gaps.push((start, series.end));
        }
    }
    gaps
}

/// Heal every gap in `dst` older than `start_from` from `src`.
///
/// Each tier only covers the history the finer tiers before it do not, so
/// every moment is repaired at the best resolution `dst` keeps for it.
pub fn fill_archives(
    src: &Path,
    dst: &Path,
    start_from: u32,
    now: u32,
    mode: FillMode,
) -> RepairResult<FillStats> {
    let header = whisper::info(dst)?;
    let mut start_from = start_from;
    let mut stats = FillStats::default();

    for archive in by_retention(&header.archives) {
        let from = now.saturating_sub(archive.retention());
        if from >= start_from {
            continue;
        }

        if let Some(series) = whisper::fetch(dst, from, start_from, now)? {
            for (gap_start, gap_end) in find_gaps(&series, archive.seconds_per_point, mode) {
                stats.gaps += 1;
                stats.points += fill(src, dst, gap_start, gap_end, now)?;
            }
        }
        start_from = from;
    }

    debug!(
        src = %src.display(),
        dst = %dst.display(),
        gaps = stats.gaps,
        points = stats.points,
        "filled archives"
    );
    Ok(stats)
}
