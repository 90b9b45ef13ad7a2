pub mod cluster;
pub mod metrics;
pub mod sync;
pub mod whisper;

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use cinder_core::{CinderConfig, Cluster};
use clap::ValueEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Text,
    Json,
}

/// Global options shared by the cluster-aware commands.
pub struct Context {
    config_path: PathBuf,
    cluster: Option<String>,
}

impl Context {
    pub fn new(config_path: PathBuf, cluster: Option<String>) -> Self {
        Self {
            config_path,
            cluster,
        }
    }

    /// Load the configuration file and resolve the selected cluster.
    pub fn cluster(&self) -> anyhow::Result<Cluster> {
        let config = CinderConfig::from_file(&self.config_path).with_context(|| {
            format!("failed to load config {}", self.config_path.display())
        })?;
        let cluster = config
            .cluster(self.cluster.as_deref())
            .with_context(|| format!("invalid cluster in {}", self.config_path.display()))?;
        Ok(cluster)
    }
}

/// Metric names from `path`, or stdin when no file is given. Blank lines
/// and surrounding whitespace are dropped.
pub fn metric_lines(path: Option<&Path>) -> anyhow::Result<Box<dyn Iterator<Item = io::Result<String>>>> {
    let reader: Box<dyn BufRead> = match path {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("failed to open metrics file {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(io::stdin())),
    };
    Ok(Box::new(reader.lines().filter_map(|line| match line {
        Ok(line) => {
            let metric = line.trim();
            (!metric.is_empty()).then(|| Ok(metric.to_string()))
        }
        Err(e) => Some(Err(e)),
    })))
}
