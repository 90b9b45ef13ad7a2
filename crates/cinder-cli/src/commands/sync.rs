use std::path::PathBuf;

use anyhow::Context as _;
use cinder_core::Cluster;
use cinder_repair::{FillMode, LocalCopy, Rsync, SyncOptions, Syncer, Transfer};
use tracing::info;

use super::{Context, metric_lines};

/// Where staged files come from.
pub enum Source {
    Donor {
        /// Configured destination (long or short form) or a bare host.
        node: String,
        storage_dir: PathBuf,
        rsync_options: String,
        copy_dest: bool,
    },
    Local(PathBuf),
}

pub struct SyncArgs {
    pub source: Source,
    pub metrics_file: Option<PathBuf>,
    pub storage_dir: PathBuf,
    pub batch_size: usize,
    pub tmpdir: Option<PathBuf>,
    pub dirty: bool,
    pub overwrite: bool,
}

pub fn sync(ctx: &Context, args: SyncArgs) -> anyhow::Result<()> {
    let metrics: Vec<String> = metric_lines(args.metrics_file.as_deref())?
        .collect::<std::io::Result<_>>()
        .context("failed to read metric list")?;

    let mode = if args.overwrite {
        FillMode::Overwrite
    } else {
        FillMode::Gaps
    };
    let options = SyncOptions::new(&args.storage_dir)
        .with_batch_size(args.batch_size)
        .with_tmp_dir(args.tmpdir)
        .with_dirty(args.dirty)
        .with_fill_mode(mode);

    match args.source {
        Source::Donor {
            node,
            storage_dir,
            rsync_options,
            copy_dest,
        } => {
            let cluster = ctx.cluster()?;
            let (user, host) = resolve_donor(&cluster, &node);
            let rsync = Rsync::new(&user, &host, &storage_dir)
                .with_options(&rsync_options)
                .with_copy_dest(copy_dest.then(|| args.storage_dir.clone()));
            info!(donor = %rsync.remote(), metrics = metrics.len(), "starting sync");
            run(rsync, options, metrics)
        }
        Source::Local(root) => {
            info!(source = %root.display(), metrics = metrics.len(), "starting sync");
            run(LocalCopy::new(root), options, metrics)
        }
    }
}

fn run<T: Transfer>(transfer: T, options: SyncOptions, metrics: Vec<String>) -> anyhow::Result<()> {
    let total = metrics.len();
    let report = Syncer::new(transfer, options)
        .run(metrics, Some(total))
        .context("sync aborted")?;
    eprintln!("{report}");
    Ok(())
}

/// ssh user and host to pull from. A node that is not a configured
/// destination is taken as a host name.
fn resolve_donor(cluster: &Cluster, node: &str) -> (String, String) {
    let host = cluster
        .find_destination(node)
        .map(|d| d.host().to_string())
        .unwrap_or_else(|| node.to_string());
    (cluster.ssh_user.clone(), host)
}
