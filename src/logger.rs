//! Session journal: an optional append-only record of what each client did.
//!
//! Diagnostics go through the `log` facade; this is the audit trail enabled
//! with `--log-file`.

use anyhow::Result;
use chrono::Utc;
use log::{debug, warn};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;

pub trait SessionLogger: Send + Sync {
    fn connected(&self, _worker: usize, _peer: &SocketAddr) {}
    fn uploaded(&self, _worker: usize, _peer: &SocketAddr, _name: &str, _bytes: u64, _staged: u32) {}
    fn compressed(&self, _worker: usize, _peer: &SocketAddr, _archive: &str, _bytes: u64, _files: u32) {}
    fn emptied(&self, _worker: usize, _peer: &SocketAddr, _removed: usize) {}
    fn error(&self, _worker: usize, _context: &str, _msg: &str) {}
    fn disconnected(&self, _worker: usize, _peer: &SocketAddr, _cause: &str) {}
}

pub struct NoopLogger;
impl SessionLogger for NoopLogger {}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                debug!("creating {}: {}", parent.display(), e);
            }
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        let mut f = self.file.lock();
        if let Err(e) = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s) {
            warn!("session journal write failed: {}", e);
        }
    }
}

impl SessionLogger for TextLogger {
    fn connected(&self, worker: usize, peer: &SocketAddr) {
        self.line(&format!("CONNECT worker={} peer={}", worker, peer));
    }
    fn uploaded(&self, worker: usize, peer: &SocketAddr, name: &str, bytes: u64, staged: u32) {
        self.line(&format!(
            "UPLOAD worker={} peer={} name={:?} bytes={} staged={}",
            worker, peer, name, bytes, staged
        ));
    }
    fn compressed(&self, worker: usize, peer: &SocketAddr, archive: &str, bytes: u64, files: u32) {
        self.line(&format!(
            "COMPRESS worker={} peer={} archive={:?} bytes={} files={}",
            worker, peer, archive, bytes, files
        ));
    }
    fn emptied(&self, worker: usize, peer: &SocketAddr, removed: usize) {
        self.line(&format!("EMPTY worker={worker} peer={peer} removed={removed}"));
    }
    fn error(&self, worker: usize, context: &str, msg: &str) {
        self.line(&format!("ERROR worker={} ctx={} msg={}", worker, context, msg));
    }
    fn disconnected(&self, worker: usize, peer: &SocketAddr, cause: &str) {
        self.line(&format!("DISCONNECT worker={worker} peer={peer} cause={cause}"));
    }
}
