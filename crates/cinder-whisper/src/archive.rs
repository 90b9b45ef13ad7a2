//! Point slot I/O inside one archive, and propagation to coarser ones.
//!
//! An archive is a ring buffer of `points` slots. The slot of the first
//! point ever written (the base) anchors the ring: the point for interval
//! `t` lives `(t - base) / step` slots after it, modulo `points`. A slot
//! whose stored timestamp does not match the interval being read is a gap.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{WhisperError, WhisperResult};
use crate::header::{ArchiveInfo, Header, POINT_SIZE, be_u32};
use crate::Series;

fn slot_index(archive: &ArchiveInfo, base: u32, interval: u32) -> u64 {
    let distance = (i64::from(interval) - i64::from(base)).div_euclid(i64::from(archive.seconds_per_point));
    distance.rem_euclid(i64::from(archive.points)) as u64
}

fn read_base(file: &mut File, path: &Path, archive: &ArchiveInfo) -> WhisperResult<u32> {
    let points = read_slots(file, path, archive, 0, 1)?;
    Ok(points[0].0)
}

/// Read `count` consecutive slots starting at `first`, wrapping around.
fn read_slots(
    file: &mut File,
    path: &Path,
    archive: &ArchiveInfo,
    first: u64,
    count: u64,
) -> WhisperResult<Vec<(u32, f64)>> {
    let points = u64::from(archive.points);
    let mut out = Vec::with_capacity(count as usize);
    let mut slot = first % points;
    let mut remaining = count;

    while remaining > 0 {
        let run = remaining.min(points - slot);
        file.seek(SeekFrom::Start(u64::from(archive.offset) + slot * POINT_SIZE))
            .map_err(|e| WhisperError::io(path, e))?;
        let mut buf = vec![0u8; (run * POINT_SIZE) as usize];
        file.read_exact(&mut buf)
            .map_err(|e| WhisperError::io(path, e))?;
        for chunk in buf.chunks_exact(POINT_SIZE as usize) {
            let timestamp = be_u32(&chunk[0..4]);
            let mut value = [0u8; 8];
            value.copy_from_slice(&chunk[4..12]);
            out.push((timestamp, f64::from_be_bytes(value)));
        }
        remaining -= run;
        slot = 0;
    }
    Ok(out)
}

fn write_slot(
    file: &mut File,
    path: &Path,
    archive: &ArchiveInfo,
    slot: u64,
    interval: u32,
    value: f64,
) -> WhisperResult<()> {
    let mut buf = [0u8; POINT_SIZE as usize];
    buf[0..4].copy_from_slice(&interval.to_be_bytes());
    buf[4..12].copy_from_slice(&value.to_be_bytes());
    file.seek(SeekFrom::Start(u64::from(archive.offset) + slot * POINT_SIZE))
        .map_err(|e| WhisperError::io(path, e))?;
    file.write_all(&buf).map_err(|e| WhisperError::io(path, e))
}

/// Values for the intervals after `from` up to the one containing `until`.
pub(crate) fn fetch(
    file: &mut File,
    path: &Path,
    archive: &ArchiveInfo,
    from: u32,
    until: u32,
) -> WhisperResult<Series> {
    let step = u64::from(archive.seconds_per_point);
    let (from, until) = (u64::from(from), u64::from(until));
    let from_interval = from - from % step + step;
    let mut until_interval = until - until % step + step;
    if from_interval == until_interval {
        until_interval += step;
    }
    let (Ok(start), Ok(end)) = (u32::try_from(from_interval), u32::try_from(until_interval)) else {
        return Err(WhisperError::corrupt(
            path,
            format!("{step}s intervals after {until} overflow 32-bit timestamps"),
        ));
    };
    let count = (until_interval - from_interval) / step;

    let base = read_base(file, path, archive)?;
    let values: Vec<Option<f64>> = if base == 0 {
        vec![None; count as usize]
    } else {
        let first = slot_index(archive, base, start);
        read_slots(file, path, archive, first, count)?
            .into_iter()
            .enumerate()
            .map(|(i, (timestamp, value))| {
                let expected = from_interval + i as u64 * step;
                (u64::from(timestamp) == expected && !value.is_nan()).then_some(value)
            })
            .collect()
    };

    Ok(Series {
        start,
        end,
        step: archive.seconds_per_point,
        values,
    })
}

/// Write `points` (chronological) into archive `index`, then propagate to
/// the coarser archives for as long as something changes.
pub(crate) fn update(
    file: &mut File,
    path: &Path,
    header: &Header,
    index: usize,
    points: &[(u32, f64)],
) -> WhisperResult<()> {
    let archive = header.archives[index];
    let step = archive.seconds_per_point;
    let aligned: Vec<(u32, f64)> = points
        .iter()
        .map(|&(timestamp, value)| (timestamp - timestamp % step, value))
        .collect();
    let Some(&(first, _)) = aligned.first() else {
        return Ok(());
    };

    let mut base = read_base(file, path, &archive)?;
    if base == 0 {
        base = first;
    }
    // Later duplicates of an interval overwrite earlier ones.
    for &(interval, value) in &aligned {
        let slot = slot_index(&archive, base, interval);
        write_slot(file, path, &archive, slot, interval, value)?;
    }

    let mut higher = archive;
    for lower in &header.archives[index + 1..] {
        let intervals: BTreeSet<u32> = aligned
            .iter()
            .map(|&(interval, _)| interval - interval % lower.seconds_per_point)
            .collect();
        let mut propagated = false;
        for interval in intervals {
            propagated |= propagate(file, path, header, interval, &higher, lower)?;
        }
        if !propagated {
            break;
        }
        higher = *lower;
    }
    Ok(())
}

/// Consolidate the `higher` points covering one `lower` interval.
fn propagate(
    file: &mut File,
    path: &Path,
    header: &Header,
    timestamp: u32,
    higher: &ArchiveInfo,
    lower: &ArchiveInfo,
) -> WhisperResult<bool> {
    let lower_start = timestamp - timestamp % lower.seconds_per_point;
    let window = u64::from(lower.seconds_per_point / higher.seconds_per_point);

    let higher_base = read_base(file, path, higher)?;
    let first = if higher_base == 0 {
        0
    } else {
        slot_index(higher, higher_base, lower_start)
    };

    let known: Vec<f64> = read_slots(file, path, higher, first, window)?
        .into_iter()
        .enumerate()
        .filter_map(|(i, (ts, value))| {
            let expected = u64::from(lower_start) + i as u64 * u64::from(higher.seconds_per_point);
            (u64::from(ts) == expected && !value.is_nan()).then_some(value)
        })
        .collect();

    if known.is_empty() {
        return Ok(false);
    }
    let known_ratio = known.len() as f64 / window as f64;
    if known_ratio < f64::from(header.x_files_factor) {
        return Ok(false);
    }

    let value = header
        .aggregation_method
        .aggregate(&known, window as usize);
    let lower_base = read_base(file, path, lower)?;
    let slot = if lower_base == 0 {
        0
    } else {
        slot_index(lower, lower_base, lower_start)
    };
    write_slot(file, path, lower, slot, lower_start, value)?;
    Ok(true)
}
