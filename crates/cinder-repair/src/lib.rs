//! cinder replica repair: anti-entropy between metric replicas.
//!
//! Repairs a node's archive files from a healthy donor without throwing
//! away data the local copy already holds.
//!
//! # Components
//!
//! - **`fill`**: gap detection and backfill between two archive files
//! - **`transfer`**: staging donor files locally (rsync, local copy)
//! - **`sync`**: batch orchestration: stage, heal, report
//! - **`lock`**: single-writer guard on a storage tree

pub mod error;
pub mod fill;
pub mod lock;
pub mod sync;
pub mod transfer;

pub use error::{RepairError, RepairResult};
pub use fill::{FillMode, FillStats, fill, fill_archives, find_gaps};
pub use lock::StorageLock;
pub use sync::{DEFAULT_BATCH_SIZE, HealOutcome, SyncOptions, SyncReport, Syncer, heal};
pub use transfer::{LocalCopy, Manifest, Rsync, Transfer, TransferError};
