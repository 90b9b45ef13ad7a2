use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

mod commands;

use commands::Format;

/// Default local storage root of a carbon node.
const DEFAULT_STORAGE_DIR: &str = "/opt/graphite/storage/whisper";

#[derive(Parser)]
#[command(
    name = "cinder",
    about = "cinder: consistent-hash placement and replica repair for carbon clusters",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Cluster configuration file
    #[arg(long, global = true, default_value = cinder_core::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Cluster to use (default: the file's default_cluster)
    #[arg(short = 'C', long, global = true)]
    cluster: Option<String>,
    /// Log line format on stderr
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// List every metric stored under a storage root
    List {
        #[arg(short = 'd', long, default_value = DEFAULT_STORAGE_DIR)]
        storage_dir: PathBuf,
    },
    /// Show the replicas that own a metric
    Lookup {
        metric: String,
        /// Print hosts only
        #[arg(short, long)]
        short: bool,
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// List the cluster's destinations
    Hosts {
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Filter a metric list down to those owned by the given nodes.
    ///
    /// Reads metric names, one per line, from --metrics-file or stdin.
    Sieve {
        #[arg(short = 'f', long)]
        metrics_file: Option<PathBuf>,
        /// Node to match, long or short form (repeatable)
        #[arg(short, long = "node", required = true)]
        nodes: Vec<String>,
        /// Emit the metrics the nodes do NOT own
        #[arg(short = 'I', long)]
        invert: bool,
    },
    /// Repair local archive files from a donor replica.
    ///
    /// Files are pulled in batches; missing local files are copied, corrupt
    /// ones replaced and existing ones gap-filled.
    Sync {
        /// Donor node: a configured destination or a bare host
        #[arg(short = 's', long, required_unless_present = "local_source")]
        source_node: Option<String>,
        /// Stage files from this directory instead of the donor
        #[arg(long, conflicts_with = "source_node")]
        local_source: Option<PathBuf>,
        #[arg(short = 'f', long)]
        metrics_file: Option<PathBuf>,
        #[arg(short = 'd', long, default_value = DEFAULT_STORAGE_DIR)]
        storage_dir: PathBuf,
        /// Storage root on the donor (default: same as --storage-dir)
        #[arg(long)]
        source_storage_dir: Option<PathBuf>,
        #[arg(short = 'b', long, default_value_t = cinder_repair::DEFAULT_BATCH_SIZE)]
        batch_size: usize,
        #[arg(long, default_value = cinder_repair::transfer::DEFAULT_RSYNC_OPTIONS, allow_hyphen_values = true)]
        rsync_options: String,
        /// Do not pass --copy-dest pointing at the local storage root
        #[arg(long)]
        rsync_disable_copy_dest: bool,
        /// Parent directory for per-batch staging
        #[arg(long)]
        tmpdir: Option<PathBuf>,
        /// Keep staging directories after each batch
        #[arg(long)]
        dirty: bool,
        /// Write every donor value, not only the missing ones
        #[arg(short, long)]
        overwrite: bool,
    },
    /// Backfill gaps in one archive file from another
    WhisperFill {
        src: PathBuf,
        dst: PathBuf,
        #[arg(long)]
        overwrite: bool,
    },
    /// Change the aggregation method of an archive file
    WhisperAggregate {
        path: PathBuf,
        /// average, sum, last, max, min, avg_zero, absmax or absmin
        method: String,
        /// New x-files factor
        #[arg(long)]
        xff: Option<f32>,
    },
    /// Print an archive file's header
    WhisperInfo {
        path: PathBuf,
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("cinder=info".parse()?);
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match cli.log_format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }

    let ctx = commands::Context::new(cli.config, cli.cluster);

    match cli.command {
        Commands::List { storage_dir } => commands::metrics::list(&storage_dir),
        Commands::Lookup { metric, short, format } => {
            commands::cluster::lookup(&ctx, &metric, short, format)
        }
        Commands::Hosts { format } => commands::cluster::hosts(&ctx, format),
        Commands::Sieve {
            metrics_file,
            nodes,
            invert,
        } => commands::metrics::sieve(&ctx, metrics_file.as_deref(), nodes, invert),
        Commands::Sync {
            source_node,
            local_source,
            metrics_file,
            storage_dir,
            source_storage_dir,
            batch_size,
            rsync_options,
            rsync_disable_copy_dest,
            tmpdir,
            dirty,
            overwrite,
        } => {
            let source = match (source_node, local_source) {
                (_, Some(dir)) => commands::sync::Source::Local(dir),
                (Some(node), None) => commands::sync::Source::Donor {
                    node,
                    storage_dir: source_storage_dir.unwrap_or_else(|| storage_dir.clone()),
                    rsync_options,
                    copy_dest: !rsync_disable_copy_dest,
                },
                (None, None) => anyhow::bail!("either --source-node or --local-source is required"),
            };
            commands::sync::sync(
                &ctx,
                commands::sync::SyncArgs {
                    source,
                    metrics_file,
                    storage_dir,
                    batch_size,
                    tmpdir,
                    dirty,
                    overwrite,
                },
            )
        }
        Commands::WhisperFill { src, dst, overwrite } => {
            commands::whisper::fill(&src, &dst, overwrite)
        }
        Commands::WhisperAggregate { path, method, xff } => {
            commands::whisper::aggregate(&path, &method, xff)
        }
        Commands::WhisperInfo { path, format } => commands::whisper::info(&path, format),
    }
}
