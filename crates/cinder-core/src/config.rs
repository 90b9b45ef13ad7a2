//! cinder.toml configuration parser.
//!
//! One file may describe several named clusters; a process activates one
//! of them and passes the resulting [`Cluster`] around explicitly.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

use crate::destination::{Destination, DestinationError};

pub const DEFAULT_CONFIG_PATH: &str = "/opt/graphite/conf/cinder.toml";
pub const DEFAULT_CLUSTER: &str = "main";
pub const DEFAULT_SSH_USER: &str = "carbon";

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unknown cluster: {0}")]
    UnknownCluster(String),

    #[error("cluster {cluster}: invalid destination {destination:?}: {source}")]
    InvalidDestination {
        cluster: String,
        destination: String,
        #[source]
        source: DestinationError,
    },

    #[error("cluster {0}: no destinations configured")]
    NoDestinations(String),

    #[error("cluster {0}: replication_factor must be at least 1")]
    InvalidReplicationFactor(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CinderConfig {
    pub default_cluster: Option<String>,
    #[serde(default)]
    pub clusters: BTreeMap<String, ClusterConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub destinations: Vec<String>,
    pub replication_factor: Option<usize>,
    pub ssh_user: Option<String>,
}

/// A validated, immutable cluster topology.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub name: String,
    pub destinations: Vec<Destination>,
    pub replication_factor: usize,
    pub ssh_user: String,
}

impl CinderConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn default_cluster_name(&self) -> &str {
        self.default_cluster.as_deref().unwrap_or(DEFAULT_CLUSTER)
    }

    pub fn cluster_names(&self) -> impl Iterator<Item = &str> {
        self.clusters.keys().map(String::as_str)
    }

    /// Validate and return the named cluster, or the default one.
    pub fn cluster(&self, name: Option<&str>) -> ConfigResult<Cluster> {
        let name = name.unwrap_or_else(|| self.default_cluster_name());
        let raw = self
            .clusters
            .get(name)
            .ok_or_else(|| ConfigError::UnknownCluster(name.to_string()))?;
        raw.validate(name)
    }
}

impl ClusterConfig {
    fn validate(&self, name: &str) -> ConfigResult<Cluster> {
        let destinations = self
            .destinations
            .iter()
            .map(|d| {
                Destination::parse(d).map_err(|source| ConfigError::InvalidDestination {
                    cluster: name.to_string(),
                    destination: d.clone(),
                    source,
                })
            })
            .collect::<ConfigResult<Vec<_>>>()?;

        if destinations.is_empty() {
            return Err(ConfigError::NoDestinations(name.to_string()));
        }

        let replication_factor = self.replication_factor.unwrap_or(1);
        if replication_factor == 0 {
            return Err(ConfigError::InvalidReplicationFactor(name.to_string()));
        }

        Ok(Cluster {
            name: name.to_string(),
            destinations,
            replication_factor,
            ssh_user: self
                .ssh_user
                .clone()
                .unwrap_or_else(|| DEFAULT_SSH_USER.to_string()),
        })
    }
}

impl Cluster {
    /// Find a configured destination by long or short form.
    pub fn find_destination(&self, id: &str) -> Option<&Destination> {
        self.destinations.iter().find(|d| d.matches(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
default_cluster = "main"

[clusters.main]
destinations = ["10.0.0.1:2004:a", "10.0.0.2:2004:b"]
replication_factor = 2
ssh_user = "graphite"

[clusters.archive]
destinations = ["store01"]
"#;

    #[test]
    fn test_parse_clusters() {
        let config = CinderConfig::from_toml(SAMPLE).unwrap();
        let names: Vec<&str> = config.cluster_names().collect();
        assert_eq!(names, vec!["archive", "main"]);

        let main = config.cluster(None).unwrap();
        assert_eq!(main.name, "main");
        assert_eq!(main.replication_factor, 2);
        assert_eq!(main.ssh_user, "graphite");
        assert_eq!(main.destinations.len(), 2);
        assert_eq!(main.destinations[1].long_form(), "10.0.0.2:2004:b");
    }

    #[test]
    fn test_cluster_defaults() {
        let config = CinderConfig::from_toml(SAMPLE).unwrap();
        let archive = config.cluster(Some("archive")).unwrap();
        assert_eq!(archive.replication_factor, 1);
        assert_eq!(archive.ssh_user, DEFAULT_SSH_USER);
    }

    #[test]
    fn test_unknown_cluster() {
        let config = CinderConfig::from_toml(SAMPLE).unwrap();
        let err = config.cluster(Some("nope")).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownCluster(ref n) if n == "nope"));
    }

    #[test]
    fn test_default_cluster_name_falls_back_to_main() {
        let config = CinderConfig::from_toml("[clusters.main]\ndestinations = [\"a\"]\n").unwrap();
        assert_eq!(config.default_cluster_name(), "main");
        assert!(config.cluster(None).is_ok());
    }

    #[test]
    fn test_rejects_bad_destination() {
        let config =
            CinderConfig::from_toml("[clusters.main]\ndestinations = [\"a:port\"]\n").unwrap();
        assert!(matches!(
            config.cluster(None),
            Err(ConfigError::InvalidDestination { .. })
        ));
    }

    #[test]
    fn test_rejects_empty_and_zero_factor() {
        let config = CinderConfig::from_toml("[clusters.main]\ndestinations = []\n").unwrap();
        assert!(matches!(config.cluster(None), Err(ConfigError::NoDestinations(_))));

        let config = CinderConfig::from_toml(
            "[clusters.main]\ndestinations = [\"a\"]\nreplication_factor = 0\n",
        )
        .unwrap();
        assert!(matches!(
            config.cluster(None),
            Err(ConfigError::InvalidReplicationFactor(_))
        ));
    }

    #[test]
    fn test_non_integer_replication_factor_is_parse_error() {
        let err = CinderConfig::from_toml(
            "[clusters.main]\ndestinations = [\"a\"]\nreplication_factor = \"two\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_find_destination() {
        let config = CinderConfig::from_toml(SAMPLE).unwrap();
        let main = config.cluster(None).unwrap();
        assert_eq!(
            main.find_destination("10.0.0.2").map(|d| d.long_form()),
            Some("10.0.0.2:2004:b")
        );
        assert!(main.find_destination("10.0.0.3").is_none());
    }
}
