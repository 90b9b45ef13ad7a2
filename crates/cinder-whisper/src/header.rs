//! On-disk header: metadata block followed by one info block per archive.
//!
//! ```text
//! metadata:     aggregation u32 | max_retention u32 | x_files_factor f32 | archive_count u32
//! archive info: offset u32 | seconds_per_point u32 | points u32
//! point:        timestamp u32 | value f64
//! ```
//!
//! All fields are big-endian.

use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{WhisperError, WhisperResult};

pub const METADATA_SIZE: u64 = 16;
pub const ARCHIVE_INFO_SIZE: u64 = 12;
pub const POINT_SIZE: u64 = 12;

/// How values are consolidated when propagated to a coarser archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMethod {
    Average,
    Sum,
    Last,
    Max,
    Min,
    AvgZero,
    #[serde(rename = "absmax")]
    AbsMax,
    #[serde(rename = "absmin")]
    AbsMin,
}

impl AggregationMethod {
    pub const ALL: [AggregationMethod; 8] = [
        AggregationMethod::Average,
        AggregationMethod::Sum,
        AggregationMethod::Last,
        AggregationMethod::Max,
        AggregationMethod::Min,
        AggregationMethod::AvgZero,
        AggregationMethod::AbsMax,
        AggregationMethod::AbsMin,
    ];

    pub fn code(self) -> u32 {
        match self {
            AggregationMethod::Average => 1,
            AggregationMethod::Sum => 2,
            AggregationMethod::Last => 3,
            AggregationMethod::Max => 4,
            AggregationMethod::Min => 5,
            AggregationMethod::AvgZero => 6,
            AggregationMethod::AbsMax => 7,
            AggregationMethod::AbsMin => 8,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            AggregationMethod::Average => "average",
            AggregationMethod::Sum => "sum",
            AggregationMethod::Last => "last",
            AggregationMethod::Max => "max",
            AggregationMethod::Min => "min",
            AggregationMethod::AvgZero => "avg_zero",
            AggregationMethod::AbsMax => "absmax",
            AggregationMethod::AbsMin => "absmin",
        }
    }

    /// Consolidate `known` values out of a window of `window` slots.
    /// `known` must not be empty.
    pub fn aggregate(self, known: &[f64], window: usize) -> f64 {
        match self {
            AggregationMethod::Average => known.iter().sum::<f64>() / known.len() as f64,
            AggregationMethod::Sum => known.iter().sum(),
            AggregationMethod::Last => known[known.len() - 1],
            AggregationMethod::Max => known.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            AggregationMethod::Min => known.iter().copied().fold(f64::INFINITY, f64::min),
            AggregationMethod::AvgZero => known.iter().sum::<f64>() / window as f64,
            AggregationMethod::AbsMax => known
                .iter()
                .copied()
                .fold(known[0], |acc, v| if v.abs() > acc.abs() { v } else { acc }),
            AggregationMethod::AbsMin => known
                .iter()
                .copied()
                .fold(known[0], |acc, v| if v.abs() < acc.abs() { v } else { acc }),
        }
    }
}

impl fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AggregationMethod {
    type Err = WhisperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| WhisperError::UnknownAggregationMethod(s.to_string()))
    }
}

/// Requested shape of one archive when creating a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveSpec {
    pub seconds_per_point: u32,
    pub points: u32,
}

impl ArchiveSpec {
    pub fn new(seconds_per_point: u32, points: u32) -> Self {
        Self {
            seconds_per_point,
            points,
        }
    }

    pub fn retention(&self) -> u64 {
        u64::from(self.seconds_per_point) * u64::from(self.points)
    }
}

/// Check that archives (finest first) can consolidate into each other.
pub fn validate_archives(archives: &[ArchiveSpec]) -> WhisperResult<()> {
    let invalid = |msg: String| Err(WhisperError::InvalidConfiguration(msg));

    if archives.is_empty() {
        return invalid("at least one archive is required".to_string());
    }
    for (i, archive) in archives.iter().enumerate() {
        if archive.seconds_per_point == 0 || archive.points == 0 {
            return invalid(format!("archive {i} has zero precision or size"));
        }
        if archive.retention() > u64::from(u32::MAX) {
            return invalid(format!("archive {i} retention does not fit in 32 bits"));
        }
    }
    for (i, pair) in archives.windows(2).enumerate() {
        let (finer, coarser) = (pair[0], pair[1]);
        if finer.seconds_per_point == coarser.seconds_per_point {
            return invalid(format!(
                "archives {i} and {} have the same precision ({}s)",
                i + 1,
                finer.seconds_per_point
            ));
        }
        if coarser.seconds_per_point % finer.seconds_per_point != 0 {
            return invalid(format!(
                "archive {} precision {}s is not a multiple of archive {i} precision {}s",
                i + 1,
                coarser.seconds_per_point,
                finer.seconds_per_point
            ));
        }
        if coarser.retention() <= finer.retention() {
            return invalid(format!(
                "archive {} must retain longer than archive {i}",
                i + 1
            ));
        }
        if finer.points < coarser.seconds_per_point / finer.seconds_per_point {
            return invalid(format!(
                "archive {i} has too few points to consolidate into archive {}",
                i + 1
            ));
        }
    }
    Ok(())
}

/// One archive as laid out in an existing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArchiveInfo {
    pub offset: u32,
    pub seconds_per_point: u32,
    pub points: u32,
}

impl ArchiveInfo {
    pub fn retention(&self) -> u32 {
        self.seconds_per_point.saturating_mul(self.points)
    }

    /// Bytes occupied by the point slots.
    pub fn size(&self) -> u64 {
        u64::from(self.points) * POINT_SIZE
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Header {
    pub aggregation_method: AggregationMethod,
    pub max_retention: u32,
    pub x_files_factor: f32,
    /// Finest first, as stored.
    pub archives: Vec<ArchiveInfo>,
}

impl Header {
    /// Lay out a fresh header for `specs` (already validated, finest first).
    pub(crate) fn layout(
        specs: &[ArchiveSpec],
        x_files_factor: f32,
        aggregation_method: AggregationMethod,
    ) -> Self {
        let mut offset = METADATA_SIZE + ARCHIVE_INFO_SIZE * specs.len() as u64;
        let mut archives = Vec::with_capacity(specs.len());
        for spec in specs {
            archives.push(ArchiveInfo {
                offset: offset as u32,
                seconds_per_point: spec.seconds_per_point,
                points: spec.points,
            });
            offset += u64::from(spec.points) * POINT_SIZE;
        }
        let max_retention = archives.iter().map(|a| a.retention()).max().unwrap_or(0);
        Self {
            aggregation_method,
            max_retention,
            x_files_factor,
            archives,
        }
    }

    pub fn size(&self) -> u64 {
        METADATA_SIZE + ARCHIVE_INFO_SIZE * self.archives.len() as u64
    }

    /// Total file size including every archive's point slots.
    pub fn file_size(&self) -> u64 {
        self.size() + self.archives.iter().map(|a| a.size()).sum::<u64>()
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size() as usize);
        buf.extend_from_slice(&self.aggregation_method.code().to_be_bytes());
        buf.extend_from_slice(&self.max_retention.to_be_bytes());
        buf.extend_from_slice(&self.x_files_factor.to_be_bytes());
        buf.extend_from_slice(&(self.archives.len() as u32).to_be_bytes());
        for archive in &self.archives {
            buf.extend_from_slice(&archive.offset.to_be_bytes());
            buf.extend_from_slice(&archive.seconds_per_point.to_be_bytes());
            buf.extend_from_slice(&archive.points.to_be_bytes());
        }
        buf
    }

    /// Parse and sanity check the header at the start of `file`.
    pub(crate) fn read(file: &mut File, path: &Path) -> WhisperResult<Self> {
        let len = file
            .metadata()
            .map_err(|e| WhisperError::io(path, e))?
            .len();
        if len < METADATA_SIZE {
            return Err(WhisperError::corrupt(path, "truncated metadata"));
        }

        file.seek(SeekFrom::Start(0))
            .map_err(|e| WhisperError::io(path, e))?;
        let mut meta = [0u8; METADATA_SIZE as usize];
        file.read_exact(&mut meta)
            .map_err(|e| WhisperError::io(path, e))?;

        let code = be_u32(&meta[0..4]);
        let max_retention = be_u32(&meta[4..8]);
        let x_files_factor = f32::from_bits(be_u32(&meta[8..12]));
        let count = u64::from(be_u32(&meta[12..16]));

        let aggregation_method = AggregationMethod::from_code(code)
            .ok_or_else(|| WhisperError::corrupt(path, format!("unknown aggregation code {code}")))?;
        if count == 0 {
            return Err(WhisperError::corrupt(path, "no archives"));
        }
        if len < METADATA_SIZE + count * ARCHIVE_INFO_SIZE {
            return Err(WhisperError::corrupt(path, "truncated archive info"));
        }
        if !(0.0..=1.0).contains(&x_files_factor) {
            return Err(WhisperError::corrupt(
                path,
                format!("x_files_factor {x_files_factor} out of range"),
            ));
        }

        let mut raw = vec![0u8; (count * ARCHIVE_INFO_SIZE) as usize];
        file.read_exact(&mut raw)
            .map_err(|e| WhisperError::io(path, e))?;

        let mut archives = Vec::with_capacity(count as usize);
        for (i, chunk) in raw.chunks_exact(ARCHIVE_INFO_SIZE as usize).enumerate() {
            let archive = ArchiveInfo {
                offset: be_u32(&chunk[0..4]),
                seconds_per_point: be_u32(&chunk[4..8]),
                points: be_u32(&chunk[8..12]),
            };
            if archive.seconds_per_point == 0 || archive.points == 0 {
                return Err(WhisperError::corrupt(path, format!("archive {i} is empty")));
            }
            if u64::from(archive.offset) < METADATA_SIZE + count * ARCHIVE_INFO_SIZE
                || u64::from(archive.offset) + archive.size() > len
            {
                return Err(WhisperError::corrupt(
                    path,
                    format!("archive {i} lies outside the file"),
                ));
            }
            archives.push(archive);
        }

        let specs: Vec<ArchiveSpec> = archives
            .iter()
            .map(|a| ArchiveSpec::new(a.seconds_per_point, a.points))
            .collect();
        validate_archives(&specs).map_err(|e| match e {
            WhisperError::InvalidConfiguration(reason) => WhisperError::corrupt(path, reason),
            other => other,
        })?;

        let mut expected_offset = METADATA_SIZE + count * ARCHIVE_INFO_SIZE;
        for (i, archive) in archives.iter().enumerate() {
            if u64::from(archive.offset) != expected_offset {
                return Err(WhisperError::corrupt(
                    path,
                    format!(
                        "archive {i} starts at {} instead of {expected_offset}",
                        archive.offset
                    ),
                ));
            }
            expected_offset += archive.size();
        }

        let retention = archives.last().map(|a| a.retention()).unwrap_or(0);
        if max_retention != retention {
            return Err(WhisperError::corrupt(
                path,
                format!(
                    "max_retention {max_retention} does not match the coarsest archive ({retention})"
                ),
            ));
        }

        Ok(Self {
            aggregation_method,
            max_retention,
            x_files_factor,
            archives,
        })
    }
}

pub(crate) fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
