//! Per-worker scratch directories under the pool root.
//!
//! Layout: `<root>/T<id>/` for every worker slot. A workspace only ever holds
//! flat files named by the client's base name, plus a transient archive while
//! a compression is in flight.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Component, Path, PathBuf};

use log::warn;
use thiserror::Error;
use walkdir::WalkDir;

use crate::protocol::WORKER_DIR_PREFIX;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("invalid file name {0:?}")]
    InvalidName(String),

    #[error("{0} is not empty and was not created by remcompd; refusing to use it as the pool root")]
    ForeignRoot(PathBuf),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> WorkspaceError + '_ {
    move |source| WorkspaceError::Io { path: path.to_path_buf(), source }
}

/// Marker file identifying a directory as a pool root this daemon created.
pub const POOL_MARKER: &str = ".remcomp-pool";

/// Entries of a pool root that belong to the daemon.
fn owned_entry(name: &str) -> bool {
    if name == POOL_MARKER {
        return true;
    }
    match name.strip_prefix(WORKER_DIR_PREFIX) {
        Some(id) => !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// Reject names that could leave the workspace or are not plain file names.
pub fn validate_file_name(name: &str) -> Result<(), WorkspaceError> {
    if name.is_empty() || name.contains('\0') || name.contains('\\') || name.contains('/') {
        return Err(WorkspaceError::InvalidName(name.to_string()));
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(WorkspaceError::InvalidName(name.to_string())),
    }
}

/// The directory that holds every worker's workspace.
#[derive(Debug, Clone)]
pub struct PoolRoot {
    path: PathBuf,
}

impl PoolRoot {
    /// Claim `path` as the pool root. A missing or empty directory is
    /// adopted; one left by a previous run (it carries [`POOL_MARKER`]) has
    /// its worker directories cleared. Any other non-empty directory is
    /// refused untouched.
    pub fn prepare(path: &Path) -> Result<Self, WorkspaceError> {
        if path.exists() {
            if path.join(POOL_MARKER).is_file() {
                remove_owned(path)?;
            } else {
                let mut entries = fs::read_dir(path).map_err(io_err(path))?;
                if entries.next().is_some() {
                    return Err(WorkspaceError::ForeignRoot(path.to_path_buf()));
                }
            }
        }
        fs::create_dir_all(path).map_err(io_err(path))?;
        let marker = path.join(POOL_MARKER);
        File::create(&marker).map_err(io_err(&marker))?;
        Ok(Self { path: path.to_path_buf() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn workspace(&self, worker_id: usize) -> Workspace {
        Workspace {
            dir: self.path.join(format!("{}{}", WORKER_DIR_PREFIX, worker_id)),
        }
    }

    /// Remove the worker directories and the marker, then the root itself
    /// if nothing else was put there. Only valid once every worker has quiesced.
    pub fn remove(&self) -> Result<(), WorkspaceError> {
        match fs::metadata(&self.path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            _ => remove_owned(&self.path)?,
        }
        fs::remove_dir(&self.path).map_err(io_err(&self.path))
    }
}

/// Delete the worker directories and the marker under `root`, nothing else.
fn remove_owned(root: &Path) -> Result<(), WorkspaceError> {
    for entry in fs::read_dir(root).map_err(io_err(root))? {
        let entry = entry.map_err(io_err(root))?;
        if !owned_entry(&entry.file_name().to_string_lossy()) {
            continue;
        }
        let path = entry.path();
        let res = match entry.file_type() {
            Ok(ft) if ft.is_dir() => fs::remove_dir_all(&path),
            _ => fs::remove_file(&path),
        };
        res.map_err(io_err(&path))?;
    }
    Ok(())
}

/// One worker's exclusive scratch directory.
#[derive(Debug, Clone)]
pub struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Ensure the directory exists and is empty.
    pub fn reset(&self) -> Result<(), WorkspaceError> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;
            return Ok(());
        }
        self.clear().map(|_| ())
    }

    /// Delete every entry; returns how many were removed.
    pub fn clear(&self) -> Result<usize, WorkspaceError> {
        let mut removed = 0;
        let entries = fs::read_dir(&self.dir).map_err(io_err(&self.dir))?;
        for entry in entries {
            let entry = entry.map_err(io_err(&self.dir))?;
            let path = entry.path();
            let res = match entry.file_type() {
                Ok(ft) if ft.is_dir() => fs::remove_dir_all(&path),
                _ => fs::remove_file(&path),
            };
            res.map_err(io_err(&path))?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Remove the directory itself (worker exit).
    pub fn destroy(&self) -> Result<(), WorkspaceError> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&self.dir)(e)),
        }
    }

    pub fn path_for(&self, name: &str) -> Result<PathBuf, WorkspaceError> {
        validate_file_name(name)?;
        Ok(self.dir.join(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        match self.path_for(name) {
            Ok(p) => p.symlink_metadata().is_ok(),
            Err(_) => false,
        }
    }

    /// Create a new staged file; fails if the name is taken.
    pub fn create_file(&self, name: &str) -> Result<(PathBuf, File), WorkspaceError> {
        let path = self.path_for(name)?;
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(io_err(&path))?;
        Ok((path, file))
    }

    /// Names of regular files currently staged, sorted.
    pub fn file_names(&self) -> Result<Vec<String>, WorkspaceError> {
        let mut names = Vec::new();
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| {
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "walk error"));
                WorkspaceError::Io { path: self.dir.clone(), source }
            })?;
            if entry.file_type().is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Best-effort removal of one entry; failures are logged.
    pub fn remove_quietly(&self, path: &Path) {
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("could not remove {}: {}", path.display(), e);
            }
        }
    }
}
