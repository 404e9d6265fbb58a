//! Daemon configuration: defaults, optional TOML file, CLI overrides.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use crate::archiver::ArchiverKind;
use crate::cli::ServerOpts;
use crate::protocol::{DEFAULT_POOL_ROOT, DEFAULT_POOL_SIZE};

/// Keys accepted in the config file. Everything is optional.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub bind: Option<IpAddr>,
    pub workers: Option<usize>,
    pub root: Option<PathBuf>,
    pub archiver: Option<ArchiverKind>,
    pub log_file: Option<PathBuf>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg: FileConfig =
            toml::from_str(&data).with_context(|| format!("parsing config {}", path.display()))?;
        Ok(cfg)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ServerConfig {
    pub port: u16,
    pub bind: IpAddr,
    pub workers: usize,
    pub root: PathBuf,
    pub archiver: ArchiverKind,
    pub log_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            workers: DEFAULT_POOL_SIZE,
            root: PathBuf::from(DEFAULT_POOL_ROOT),
            archiver: ArchiverKind::default(),
            log_file: None,
        }
    }
}

impl ServerConfig {
    /// Defaults, then the config file (if any), then command-line flags.
    pub fn from_opts(opts: &ServerOpts) -> Result<Self> {
        let file = match &opts.config {
            Some(p) => FileConfig::load(p)?,
            None => FileConfig::default(),
        };
        let mut cfg = Self::default();
        cfg.merge(file);
        cfg.merge(FileConfig {
            bind: opts.bind,
            workers: opts.workers,
            root: opts.root.clone(),
            archiver: opts.archiver,
            log_file: opts.log_file.clone(),
        });
        cfg.port = opts.port;
        cfg.validate()?;
        Ok(cfg)
    }

    fn merge(&mut self, over: FileConfig) {
        if let Some(v) = over.bind {
            self.bind = v;
        }
        if let Some(v) = over.workers {
            self.workers = v;
        }
        if let Some(v) = over.root {
            self.root = v;
        }
        if let Some(v) = over.archiver {
            self.archiver = v;
        }
        if over.log_file.is_some() {
            self.log_file = over.log_file;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("worker pool needs at least one worker");
        }
        if self.root.as_os_str().is_empty() {
            bail!("pool root directory must not be empty");
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}
