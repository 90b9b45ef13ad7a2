//! Replica sync: stage donor files batch by batch and heal local copies.
//!
//! Each batch gets a fresh manifest and scratch directory. The transfer
//! runs once per batch; every staged file is then merged into the local
//! tree without discarding points the local copy already holds.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use cinder_core::metric_to_path;
use cinder_whisper as whisper;
use tracing::{debug, info, warn};

use crate::error::{RepairError, RepairResult};
use crate::fill::{FillMode, FillStats, fill_archives};
use crate::lock::StorageLock;
use crate::transfer::{Manifest, Transfer};

pub const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Local storage root the healed files are written under.
    pub storage_dir: PathBuf,
    pub batch_size: usize,
    /// Parent of the per-batch scratch directories. System temp if unset.
    pub tmp_dir: Option<PathBuf>,
    /// Keep scratch directories after each batch.
    pub dirty: bool,
    pub fill_mode: FillMode,
}

impl SyncOptions {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            tmp_dir: None,
            dirty: false,
            fill_mode: FillMode::default(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_tmp_dir(mut self, tmp_dir: Option<PathBuf>) -> Self {
        self.tmp_dir = tmp_dir;
        self
    }

    pub fn with_dirty(mut self, dirty: bool) -> Self {
        self.dirty = dirty;
        self
    }

    pub fn with_fill_mode(mut self, fill_mode: FillMode) -> Self {
        self.fill_mode = fill_mode;
        self
    }
}

/// What happened to one metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealOutcome {
    /// No local file existed; the staged one was copied in.
    Copied,
    /// The local file was unreadable and was replaced.
    Overwritten,
    Filled(FillStats),
    /// Nothing was staged for this metric.
    Missing,
}

/// Merge a staged donor file into the local file at `local`.
pub fn heal(staged: &Path, local: &Path, now: u32, mode: FillMode) -> RepairResult<HealOutcome> {
    if !staged.is_file() {
        warn!(path = %staged.display(), "donor file was not staged, skipping");
        return Ok(HealOutcome::Missing);
    }

    let corruption = match whisper::info(local) {
        Ok(_) => match fill_archives(staged, local, now, now, mode) {
            Ok(stats) => return Ok(HealOutcome::Filled(stats)),
            // Headers can pass validation and still describe an unusable file.
            Err(RepairError::Whisper(e)) if e.is_corrupt() && e.path() == Some(local) => e,
            Err(e) => return Err(e),
        },
        Err(e) if e.is_not_found() => {
            if let Some(parent) = local.parent() {
                fs::create_dir_all(parent).map_err(|source| RepairError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            copy(staged, local)?;
            return Ok(HealOutcome::Copied);
        }
        Err(e) if e.is_corrupt() => e,
        Err(e) => return Err(e.into()),
    };

    warn!(path = %local.display(), error = %corruption, "local file is corrupt, replacing it");
    copy(staged, local)?;
    Ok(HealOutcome::Overwritten)
}

fn copy(from: &Path, to: &Path) -> RepairResult<()> {
    fs::copy(from, to).map_err(|source| RepairError::Io {
        path: to.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Totals for one sync run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub metrics: usize,
    pub batches: usize,
    pub copied: usize,
    pub overwritten: usize,
    pub filled: usize,
    pub missing: usize,
    pub failed: usize,
    pub gaps: usize,
    pub points: usize,
    pub transfer_failures: usize,
    pub transfer_time: Duration,
    pub merge_time: Duration,
}

impl SyncReport {
    fn record(&mut self, outcome: HealOutcome) {
        match outcome {
            HealOutcome::Copied => self.copied += 1,
            HealOutcome::Overwritten => self.overwritten += 1,
            HealOutcome::Filled(stats) => {
                self.filled += 1;
                self.gaps += stats.gaps;
                self.points += stats.points;
            }
            HealOutcome::Missing => self.missing += 1,
        }
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "synced {} metrics in {} batches: {} copied, {} overwritten, {} filled \
             ({} gaps, {} points), {} missing, {} failed; \
             transfer {:.1}s ({} failed), merge {:.1}s",
            self.metrics,
            self.batches,
            self.copied,
            self.overwritten,
            self.filled,
            self.gaps,
            self.points,
            self.missing,
            self.failed,
            self.transfer_time.as_secs_f64(),
            self.transfer_failures,
            self.merge_time.as_secs_f64(),
        )
    }
}

fn rate(count: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { count as f64 / secs } else { 0.0 }
}

/// Drives a sync run over a list of metrics.
pub struct Syncer<T: Transfer> {
    transfer: T,
    options: SyncOptions,
}

impl<T: Transfer> Syncer<T> {
    pub fn new(transfer: T, options: SyncOptions) -> Self {
        Self { transfer, options }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Sync every metric in order. `total_hint` only feeds the ETA.
    ///
    /// Fails only when the storage tree is locked or a scratch area cannot
    /// be created; per-batch and per-metric problems are logged and counted.
    pub fn run<I>(&self, metrics: I, total_hint: Option<usize>) -> RepairResult<SyncReport>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let _lock = StorageLock::acquire(&self.options.storage_dir)?;
        let tmp_dir = self
            .options
            .tmp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let batch_size = self.options.batch_size.max(1);

        let started = Instant::now();
        let mut report = SyncReport::default();
        let mut metrics = metrics.into_iter();

        loop {
            let batch: Vec<String> = metrics
                .by_ref()
                .take(batch_size)
                .map(|m| m.as_ref().to_string())
                .collect();
            if batch.is_empty() {
                break;
            }
            report.batches += 1;
            self.run_batch(&batch, &tmp_dir, &mut report)?;

            let elapsed = started.elapsed();
            let overall = rate(report.metrics, elapsed);
            match total_hint {
                Some(total) if overall > 0.0 && total > report.metrics => {
                    let eta = (total - report.metrics) as f64 / overall;
                    info!(
                        done = report.metrics,
                        total,
                        rate = %format!("{overall:.1}"),
                        eta_secs = %format!("{eta:.0}"),
                        "sync progress"
                    );
                }
                _ => info!(
                    done = report.metrics,
                    rate = %format!("{overall:.1}"),
                    "sync progress"
                ),
            }
        }

        info!(elapsed_secs = %format!("{:.1}", started.elapsed().as_secs_f64()), "{report}");
        Ok(report)
    }

    fn run_batch(&self, batch: &[String], tmp_dir: &Path, report: &mut SyncReport) -> RepairResult<()> {
        let staging_err = |source: std::io::Error| RepairError::Staging {
            path: tmp_dir.to_path_buf(),
            source,
        };
        let staging = tempfile::Builder::new()
            .prefix("cinder-sync-")
            .tempdir_in(tmp_dir)
            .map_err(staging_err)?;
        let mut metrics = Vec::with_capacity(batch.len());
        let mut entries = Vec::with_capacity(batch.len());
        for metric in batch {
            match metric_to_path(metric) {
                Some(relative) => {
                    metrics.push(metric);
                    entries.push(relative);
                }
                None => {
                    warn!(%metric, "metric name does not map to a storage path, skipping");
                    report.failed += 1;
                }
            }
        }
        let manifest = Manifest::create(tmp_dir, entries).map_err(staging_err)?;

        let transfer_started = Instant::now();
        if manifest.is_empty() {
            debug!(batch = report.batches, "nothing to transfer");
        } else if let Err(e) = self.transfer.transfer(&manifest, staging.path()) {
            warn!(error = %e, batch = report.batches, "transfer failed, healing what was staged");
            report.transfer_failures += 1;
        }
        let transfer_time = transfer_started.elapsed();

        let merge_started = Instant::now();
        for (metric, relative) in metrics.iter().zip(manifest.entries()) {
            let staged = staging.path().join(relative);
            let local = self.options.storage_dir.join(relative);
            match heal(&staged, &local, whisper::now(), self.options.fill_mode) {
                Ok(outcome) => {
                    debug!(%metric, ?outcome, "healed");
                    report.record(outcome);
                }
                Err(e) => {
                    warn!(%metric, error = %e, "failed to heal metric, skipping");
                    report.failed += 1;
                }
            }
        }
        let merge_time = merge_started.elapsed();

        report.metrics += batch.len();
        report.transfer_time += transfer_time;
        report.merge_time += merge_time;
        info!(
            batch = report.batches,
            metrics = batch.len(),
            transfer_secs = %format!("{:.2}", transfer_time.as_secs_f64()),
            merge_secs = %format!("{:.2}", merge_time.as_secs_f64()),
            rate = %format!("{:.1}", rate(batch.len(), transfer_time + merge_time)),
            "batch complete"
        );

        drop(manifest);
        if self.options.dirty {
            let kept = staging.keep();
            info!(path = %kept.display(), "keeping staging directory");
        } else if let Err(e) = staging.close() {
            warn!(error = %e, "failed to remove staging directory");
        }
        Ok(())
    }
}
