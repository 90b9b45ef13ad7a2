use cinder_core::{Cluster, Destination};
use cinder_ring::{ConsistentHashRing, Ring};
use serde_json::json;

use super::{Context, Format};

pub fn lookup(ctx: &Context, metric: &str, short: bool, format: Format) -> anyhow::Result<()> {
    let cluster = ctx.cluster()?;
    let ring = ConsistentHashRing::from_cluster(&cluster);
    print!("{}", render_lookup(&ring, metric, short, format)?);
    Ok(())
}

pub fn hosts(ctx: &Context, format: Format) -> anyhow::Result<()> {
    let cluster = ctx.cluster()?;
    print!("{}", render_hosts(&cluster, format)?);
    Ok(())
}

fn form(destination: &Destination, short: bool) -> &str {
    if short {
        destination.short_form()
    } else {
        destination.long_form()
    }
}

fn render_lookup<R: Ring + ?Sized>(
    ring: &R,
    metric: &str,
    short: bool,
    format: Format,
) -> anyhow::Result<String> {
    let replicas = ring.destinations(metric);
    match format {
        Format::Json => {
            let destinations: Vec<&str> = replicas.iter().map(|d| form(d, short)).collect();
            let doc = json!({ "metric": metric, "destinations": destinations });
            Ok(format!("{}\n", serde_json::to_string_pretty(&doc)?))
        }
        Format::Text => Ok(replicas
            .iter()
            .map(|d| format!("{}\n", form(d, short)))
            .collect()),
    }
}

fn render_hosts(cluster: &Cluster, format: Format) -> anyhow::Result<String> {
    match format {
        Format::Json => {
            let hosts: Vec<_> = cluster
                .destinations
                .iter()
                .map(|d| {
                    json!({
                        "destination": d,
                        "host": d.host(),
                        "port": d.port(),
                        "instance": d.instance(),
                    })
                })
                .collect();
            let doc = json!({
                "cluster": cluster.name,
                "replication_factor": cluster.replication_factor,
                "ssh_user": cluster.ssh_user,
                "destinations": hosts,
            });
            Ok(format!("{}\n", serde_json::to_string_pretty(&doc)?))
        }
        Format::Text => Ok(cluster
            .destinations
            .iter()
            .map(|d| format!("{d}\n"))
            .collect()),
    }
}
