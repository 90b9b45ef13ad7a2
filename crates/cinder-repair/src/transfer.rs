//! Staging donor archive files into a local scratch directory.
//!
//! The sync loop only sees the [`Transfer`] trait. [`Rsync`] pulls files
//! from a remote host; [`LocalCopy`] reads them from a directory on this
//! machine (a mounted snapshot, or a test fixture).

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_RSYNC_OPTIONS: &str = "-azpS";

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited with code {code}")]
    Failed { program: String, code: i32 },

    #[error("{missing} manifest entries were not found at the source")]
    Incomplete { missing: usize },

    #[error("failed to stage {path}: {source}")]
    Copy {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// List of relative file paths to transfer, one per line, backed by a
/// temporary file that is removed on drop.
#[derive(Debug)]
pub struct Manifest {
    file: NamedTempFile,
    entries: Vec<PathBuf>,
}

impl Manifest {
    pub fn create(dir: &Path, entries: Vec<PathBuf>) -> io::Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("cinder-manifest-")
            .suffix(".txt")
            .tempfile_in(dir)?;
        for entry in &entries {
            writeln!(file, "{}", entry.display())?;
        }
        file.flush()?;
        Ok(Self { file, entries })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Pulls every manifest entry into `staging`, keeping relative paths.
pub trait Transfer {
    fn transfer(&self, manifest: &Manifest, staging: &Path) -> Result<(), TransferError>;
}

/// Transfer over `rsync`, reading the file list from the manifest.
#[derive(Debug, Clone)]
pub struct Rsync {
    program: String,
    remote: String,
    options: Vec<String>,
    copy_dest: Option<PathBuf>,
}

impl Rsync {
    /// `remote_root` is the donor's storage directory. An empty `user`
    /// leaves the login to the ssh configuration.
    pub fn new(user: &str, host: &str, remote_root: &Path) -> Self {
        let root = remote_root.display().to_string();
        let root = root.trim_end_matches('/');
        let remote = if user.is_empty() {
            format!("{host}:{root}/")
        } else {
            format!("{user}@{host}:{root}/")
        };
        Self {
            program: "rsync".to_string(),
            remote,
            options: split_options(DEFAULT_RSYNC_OPTIONS),
            copy_dest: None,
        }
    }

    /// Replace the default `-azpS` with a whitespace-separated option string.
    pub fn with_options(mut self, options: &str) -> Self {
        self.options = split_options(options);
        self
    }

    /// Let rsync use matching local files as a delta basis.
    pub fn with_copy_dest(mut self, local_root: Option<PathBuf>) -> Self {
        self.copy_dest = local_root;
        self
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn command(&self, manifest: &Manifest, staging: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.options);
        if let Some(local_root) = &self.copy_dest {
            cmd.arg(format!("--copy-dest={}", local_root.display()));
        }
        cmd.arg(format!("--files-from={}", manifest.path().display()))
            .arg(&self.remote)
            .arg(format!("{}/", staging.display()));
        cmd
    }
}

fn split_options(options: &str) -> Vec<String> {
    options.split_whitespace().map(str::to_string).collect()
}

impl Transfer for Rsync {
    fn transfer(&self, manifest: &Manifest, staging: &Path) -> Result<(), TransferError> {
        info!(
            remote = %self.remote,
            files = manifest.len(),
            staging = %staging.display(),
            "starting rsync"
        );

        // Inherit stdout/stderr so the operator sees rsync's progress.
        let status = self
            .command(manifest, staging)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|source| TransferError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !status.success() {
            return Err(TransferError::Failed {
                program: self.program.clone(),
                code: status.code().unwrap_or(-1),
            });
        }
        Ok(())
    }
}

/// Transfer from a storage tree on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalCopy {
    root: PathBuf,
}

impl LocalCopy {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Transfer for LocalCopy {
    fn transfer(&self, manifest: &Manifest, staging: &Path) -> Result<(), TransferError> {
        let mut missing = 0;
        for entry in manifest.entries() {
            let source = self.root.join(entry);
            if !source.is_file() {
                debug!(path = %source.display(), "not present at source");
                missing += 1;
                continue;
            }
            let target = staging.join(entry);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|source| TransferError::Copy {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            fs::copy(&source, &target).map_err(|e| TransferError::Copy {
                path: source.clone(),
                source: e,
            })?;
        }

        if missing > 0 {
            warn!(root = %self.root.display(), missing, "some files were not found at the source");
            return Err(TransferError::Incomplete { missing });
        }
        Ok(())
    }
}
