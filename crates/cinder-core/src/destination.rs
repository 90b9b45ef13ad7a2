//! Storage destinations: `host[:port[:instance]]`.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Serialize, Serializer};
use thiserror::Error;

/// One physical storage endpoint of a cluster.
///
/// Equality, ordering and hashing all go through the long form, so two
/// destinations that print the same are the same destination.
#[derive(Debug, Clone)]
pub struct Destination {
    host: String,
    port: Option<u16>,
    instance: String,
    long: String,
}

#[derive(Debug, Error, PartialEq)]
pub enum DestinationError {
    #[error("empty destination")]
    Empty,
    #[error("invalid port in destination {0:?}")]
    InvalidPort(String),
    #[error("too many ':' separated fields in destination {0:?}")]
    TooManyFields(String),
}

impl Destination {
    pub fn new(host: impl Into<String>, port: Option<u16>, instance: impl Into<String>) -> Self {
        let host = host.into();
        let instance = instance.into();
        let long = match (port, instance.is_empty()) {
            (None, _) => host.clone(),
            (Some(port), true) => format!("{host}:{port}"),
            (Some(port), false) => format!("{host}:{port}:{instance}"),
        };
        Self { host, port, instance, long }
    }

    pub fn parse(s: &str) -> Result<Self, DestinationError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(DestinationError::Empty);
        }

        let mut fields = s.split(':');
        let host = fields.next().unwrap_or_default();
        if host.is_empty() {
            return Err(DestinationError::Empty);
        }
        let port = match fields.next() {
            Some(p) => Some(
                p.parse::<u16>()
                    .map_err(|_| DestinationError::InvalidPort(s.to_string()))?,
            ),
            None => None,
        };
        let instance = fields.next().unwrap_or_default();
        if fields.next().is_some() {
            return Err(DestinationError::TooManyFields(s.to_string()));
        }

        Ok(Self::new(host, port, instance))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// `host:port:instance`, dropping trailing empty fields.
    pub fn long_form(&self) -> &str {
        &self.long
    }

    /// Just the host.
    pub fn short_form(&self) -> &str {
        &self.host
    }

    /// Whether `id` names this destination in either form.
    pub fn matches(&self, id: &str) -> bool {
        id == self.long || id == self.host
    }
}

impl FromStr for Destination {
    type Err = DestinationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.long)
    }
}

impl PartialEq for Destination {
    fn eq(&self, other: &Self) -> bool {
        self.long == other.long
    }
}

impl Eq for Destination {}

impl Hash for Destination {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.long.hash(state);
    }
}

impl PartialOrd for Destination {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Destination {
    fn cmp(&self, other: &Self) -> Ordering {
        self.long.cmp(&other.long)
    }
}

impl Serialize for Destination {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.long)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_long_form() {
        let d = Destination::parse("10.0.0.1:2004:a").unwrap();
        assert_eq!(d.host(), "10.0.0.1");
        assert_eq!(d.port(), Some(2004));
        assert_eq!(d.instance(), "a");
        assert_eq!(d.long_form(), "10.0.0.1:2004:a");
        assert_eq!(d.short_form(), "10.0.0.1");
    }

    #[test]
    fn test_parse_without_instance() {
        let d = Destination::parse("carbon01:2004").unwrap();
        assert_eq!(d.instance(), "");
        assert_eq!(d.long_form(), "carbon01:2004");
    }

    #[test]
    fn test_parse_trailing_colon_is_same_destination() {
        let a = Destination::parse("carbon01:2004:").unwrap();
        let b = Destination::parse("carbon01:2004").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_parse_host_only() {
        let d = Destination::parse(" carbon01 ").unwrap();
        assert_eq!(d.port(), None);
        assert_eq!(d.long_form(), "carbon01");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Destination::parse(""), Err(DestinationError::Empty));
        assert_eq!(Destination::parse(":2004"), Err(DestinationError::Empty));
        assert!(matches!(
            Destination::parse("h:notaport"),
            Err(DestinationError::InvalidPort(_))
        ));
        assert!(matches!(
            Destination::parse("h:1:a:b"),
            Err(DestinationError::TooManyFields(_))
        ));
    }

    #[test]
    fn test_matches_both_forms() {
        let d = Destination::parse("10.0.0.1:2004:a").unwrap();
        assert!(d.matches("10.0.0.1:2004:a"));
        assert!(d.matches("10.0.0.1"));
        assert!(!d.matches("10.0.0.1:2004"));
    }
}
