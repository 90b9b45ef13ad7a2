//! Consistent hash ring with N-way replication.
//!
//! Every destination is hashed onto the ring at `vnodes` points. A metric
//! resolves to the destinations owning the first distinct points found
//! walking clockwise from the metric's own hash.

use std::collections::BTreeSet;

use cinder_core::{Cluster, Destination};
use tracing::debug;
use wyhash::wyhash;

/// Virtual points per destination.
pub const DEFAULT_VNODES: u32 = 100;

const SEED: u64 = 0;

/// Maps a metric name to the destinations that should store it.
pub trait Ring {
    /// Replicas for `metric`, primary first. Never more than
    /// `replication_factor()` entries and never a destination twice.
    fn destinations(&self, metric: &str) -> Vec<&Destination>;

    fn replication_factor(&self) -> usize;

    /// All destinations on the ring, sorted by long form.
    fn members(&self) -> &[Destination];
}

pub struct ConsistentHashRing {
    members: Vec<Destination>,
    /// (position, member index). The index breaks position ties, and since
    /// members are sorted the tie-break does not depend on input order.
    points: BTreeSet<(u64, usize)>,
    replication_factor: usize,
}

impl ConsistentHashRing {
    pub fn new(
        destinations: impl IntoIterator<Item = Destination>,
        replication_factor: usize,
    ) -> Self {
        Self::with_vnodes(destinations, replication_factor, DEFAULT_VNODES)
    }

    pub fn with_vnodes(
        destinations: impl IntoIterator<Item = Destination>,
        replication_factor: usize,
        vnodes: u32,
    ) -> Self {
        let members: Vec<Destination> = destinations
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut points = BTreeSet::new();
        for (idx, member) in members.iter().enumerate() {
            for slot in 0..vnodes.max(1) {
                let key = format!("{}:{slot}", member.long_form());
                points.insert((wyhash(key.as_bytes(), SEED), idx));
            }
        }

        debug!(
            members = members.len(),
            points = points.len(),
            replication_factor,
            "built hash ring"
        );

        Self {
            members,
            points,
            replication_factor,
        }
    }

    pub fn from_cluster(cluster: &Cluster) -> Self {
        Self::new(cluster.destinations.iter().cloned(), cluster.replication_factor)
    }
}

impl Ring for ConsistentHashRing {
    fn destinations(&self, metric: &str) -> Vec<&Destination> {
        let wanted = self.replication_factor.min(self.members.len());
        let position = wyhash(metric.as_bytes(), SEED);

        let mut found: Vec<usize> = Vec::with_capacity(wanted);
        for &(_, idx) in self
            .points
            .range((position, 0)..)
            .chain(self.points.range(..(position, 0)))
        {
            if found.len() == wanted {
                break;
            }
            if !found.contains(&idx) {
                found.push(idx);
            }
        }

        found.into_iter().map(|idx| &self.members[idx]).collect()
    }

    fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    fn members(&self) -> &[Destination] {
        &self.members
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn dests(ids: &[&str]) -> Vec<Destination> {
        ids.iter().map(|id| Destination::parse(id).unwrap()).collect()
    }

    fn sample_metrics(n: usize) -> Vec<String> {
        (0..n)
            .map(|i| format!("servers.host{:03}.cpu.core{}", i % 250, i))
            .collect()
    }

    fn long_forms(ring: &ConsistentHashRing, metric: &str) -> Vec<String> {
        ring.destinations(metric)
            .iter()
            .map(|d| d.long_form().to_string())
            .collect()
    }

    #[test]
    fn returns_replication_factor_distinct_destinations() {
        let ring = ConsistentHashRing::new(
            dests(&["a:2004:1", "b:2004:1", "c:2004:1", "d:2004:1", "e:2004:1"]),
            3,
        );
        for metric in sample_metrics(500) {
            let found = ring.destinations(&metric);
            assert_eq!(found.len(), 3);
            let unique: BTreeSet<_> = found.iter().map(|d| d.long_form()).collect();
            assert_eq!(unique.len(), 3, "duplicate replica for {metric}");
        }
    }

    #[test]
    fn replication_factor_larger_than_cluster_returns_all() {
        let ring = ConsistentHashRing::new(dests(&["a", "b"]), 5);
        let found = ring.destinations("some.metric");
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn empty_ring_returns_nothing() {
        let ring = ConsistentHashRing::new(Vec::new(), 2);
        assert!(ring.destinations("some.metric").is_empty());
    }

    #[test]
    fn lookup_is_deterministic_and_order_independent() {
        let forward = ConsistentHashRing::new(dests(&["a:1", "b:1", "c:1", "d:1"]), 2);
        let shuffled = ConsistentHashRing::new(dests(&["c:1", "a:1", "d:1", "b:1", "a:1"]), 2);
        for metric in sample_metrics(300) {
            let first = long_forms(&forward, &metric);
            assert_eq!(first, long_forms(&forward, &metric));
            assert_eq!(first, long_forms(&shuffled, &metric));
        }
    }

    #[test]
    fn removing_a_destination_only_moves_its_metrics() {
        let all = ["a:2004", "b:2004", "c:2004", "d:2004", "e:2004"];
        let before = ConsistentHashRing::new(dests(&all), 2);
        let after = ConsistentHashRing::new(dests(&all[..4]), 2);
        let removed = "e:2004";

        let metrics = sample_metrics(2000);
        let mut touched = 0;
        let mut changed = 0;
        for metric in &metrics {
            let old = long_forms(&before, metric);
            let new = long_forms(&after, metric);
            if old.iter().any(|d| d == removed) {
                touched += 1;
            } else {
                assert_eq!(old, new, "{metric} moved without losing a replica");
            }
            if old != new {
                changed += 1;
            }
        }
        assert_eq!(changed, touched);
        assert!(changed < metrics.len() / 2, "{changed} of {} moved", metrics.len());
    }

    #[test]
    fn metrics_spread_over_all_members() {
        let ring = ConsistentHashRing::new(dests(&["a", "b", "c"]), 1);
        let mut counts: HashMap<String, usize> = HashMap::new();
        let metrics = sample_metrics(3000);
        for metric in &metrics {
            let primary = ring.destinations(metric)[0].long_form().to_string();
            *counts.entry(primary).or_default() += 1;
        }
        assert_eq!(counts.len(), 3);
        for (member, count) in counts {
            assert!(count > metrics.len() / 5, "{member} only owns {count}");
        }
    }
}
