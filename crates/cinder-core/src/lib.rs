//! Shared building blocks for cinder: cluster configuration, storage
//! destinations, and the mapping between metric names and archive paths.

pub mod config;
pub mod destination;
pub mod metric;

pub use config::{CinderConfig, Cluster, ClusterConfig, ConfigError, ConfigResult};
pub use destination::{Destination, DestinationError};
pub use metric::{WHISPER_EXT, list_metrics, metric_to_path, path_to_metric};
