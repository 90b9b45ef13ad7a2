use std::collections::HashSet;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::{Context as _, bail};
use cinder_core::list_metrics;
use cinder_ring::{ConsistentHashRing, Ring, Sieve};
use tracing::warn;

use super::{Context, metric_lines};

/// Stream every metric name under `storage_dir` to stdout.
pub fn list(storage_dir: &Path) -> anyhow::Result<()> {
    if !storage_dir.is_dir() {
        bail!("storage directory {} does not exist", storage_dir.display());
    }
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for metric in list_metrics(storage_dir) {
        writeln!(out, "{metric}")?;
    }
    out.flush()?;
    Ok(())
}

pub fn sieve(
    ctx: &Context,
    metrics_file: Option<&Path>,
    nodes: Vec<String>,
    invert: bool,
) -> anyhow::Result<()> {
    let cluster = ctx.cluster()?;
    let ring = ConsistentHashRing::from_cluster(&cluster);
    let nodes: HashSet<String> = nodes.into_iter().collect();
    for node in &nodes {
        if cluster.find_destination(node).is_none() {
            warn!(%node, cluster = %cluster.name, "node is not a destination of this cluster");
        }
    }

    let metrics = metric_lines(metrics_file)?.map_while(|line| match line {
        Ok(metric) => Some(metric),
        Err(e) => {
            warn!(error = %e, "stopped reading metrics");
            None
        }
    });
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    write_sieved(metrics, &nodes, &ring, invert, &mut out)
        .context("failed to write metrics")?;
    Ok(())
}

fn write_sieved<I, R, W>(
    metrics: I,
    nodes: &HashSet<String>,
    ring: &R,
    invert: bool,
    out: &mut W,
) -> io::Result<()>
where
    I: IntoIterator<Item = String>,
    R: Ring + ?Sized,
    W: Write,
{
    for metric in Sieve::new(metrics, nodes, ring, invert) {
        writeln!(out, "{metric}")?;
    }
    out.flush()
}
