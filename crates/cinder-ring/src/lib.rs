//! cinder placement: which storage nodes own which metrics.
//!
//! Placement is a pure function of the destination set and the metric
//! name. Nothing here does I/O.
//!
//! # Components
//!
//! - **`ring`**: the [`Ring`] trait and [`ConsistentHashRing`]
//! - **`sieve`**: lazy ownership filter over a stream of metric names

pub mod ring;
pub mod sieve;

pub use ring::{ConsistentHashRing, DEFAULT_VNODES, Ring};
pub use sieve::{Sieve, owns};
