//! Placement from a parsed cluster config.

use std::collections::HashSet;

use cinder_core::CinderConfig;
use cinder_ring::{ConsistentHashRing, Ring, Sieve};

const CONFIG: &str = r#"
[clusters.main]
destinations = ["10.0.0.1:2004:a", "10.0.0.2:2004:b"]
replication_factor = 1

[clusters.replicated]
destinations = ["10.0.0.1:2004:a", "10.0.0.2:2004:b", "10.0.0.3:2004:c"]
replication_factor = 2
"#;

fn metric_names() -> Vec<String> {
    [
        "carbon.agents.a.cpuUsage",
        "carbon.agents.a.memUsage",
        "servers.web01.loadavg.01",
        "servers.web01.loadavg.05",
        "servers.web02.loadavg.01",
        "servers.db01.disk.sda.reads",
        "servers.db01.disk.sda.writes",
        "stats.counters.api.requests",
        "stats.timers.api.latency.p99",
        "stats.gauges.queue.depth",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[test]
fn sieve_against_each_node_covers_every_metric_once() {
    let config = CinderConfig::from_toml(CONFIG).unwrap();
    let cluster = config.cluster(None).unwrap();
    let ring = ConsistentHashRing::from_cluster(&cluster);
    let metrics = metric_names();

    let node_a: HashSet<String> = ["10.0.0.1:2004:a".to_string()].into();
    let node_b: HashSet<String> = ["10.0.0.2:2004:b".to_string()].into();

    let on_a: HashSet<String> = Sieve::new(metrics.clone(), &node_a, &ring, false).collect();
    let on_b: HashSet<String> = Sieve::new(metrics.clone(), &node_b, &ring, false).collect();

    assert!(on_a.is_disjoint(&on_b));
    let union: HashSet<String> = on_a.union(&on_b).cloned().collect();
    assert_eq!(union.len(), 10);
    assert_eq!(union, metrics.into_iter().collect::<HashSet<_>>());
}

#[test]
fn replicated_cluster_lookup_has_distinct_replicas() {
    let config = CinderConfig::from_toml(CONFIG).unwrap();
    let cluster = config.cluster(Some("replicated")).unwrap();
    let ring = ConsistentHashRing::from_cluster(&cluster);

    assert_eq!(ring.replication_factor(), 2);
    assert_eq!(ring.members().len(), 3);
    for metric in metric_names() {
        let replicas = ring.destinations(&metric);
        assert_eq!(replicas.len(), 2);
        assert_ne!(replicas[0], replicas[1]);
        assert!(replicas.iter().all(|d| cluster.destinations.contains(d)));
    }
}

#[test]
fn ring_rebuilt_from_same_config_agrees() {
    let config = CinderConfig::from_toml(CONFIG).unwrap();
    let first = ConsistentHashRing::from_cluster(&config.cluster(Some("replicated")).unwrap());
    let second = ConsistentHashRing::from_cluster(&config.cluster(Some("replicated")).unwrap());
    for metric in metric_names() {
        assert_eq!(first.destinations(&metric), second.destinations(&metric));
    }
}
