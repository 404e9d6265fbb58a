//! Client side of the session protocol.
//!
//! [`Client::execute`] sends one command line and runs whatever sub-dialogue
//! the server answers with, returning a typed [`Reply`]. Local problems
//! (unreadable file, unwritable destination, failed save) are part of the
//! reply; only connection failures are errors.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::debug;
use tempfile::NamedTempFile;

use crate::command::strip_quotes;
use crate::frame::{Channel, Delivery, FrameError};
use crate::progress::TransferProgress;
use crate::protocol::{command as id, MAX_COMMAND_LEN, MAX_TRANSFER_SIZE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The file went through the whole dialogue; `message` is the server's verdict.
    Delivered { path: String, message: String },
    Unreadable { path: String },
    AlreadyStaged { path: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompressOutcome {
    NothingStaged,
    DestinationUnusable { dir: String },
    ServerFailed { archive: String },
    SaveFailed { archive: String, reason: String },
    Saved { path: PathBuf, bytes: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Message { id: u32, text: String },
    Upload(Vec<UploadOutcome>),
    Compress(CompressOutcome),
    Quit,
}

/// Cut `line` to the command limit on a character boundary.
pub fn clamp_command(line: &str) -> &str {
    if line.len() <= MAX_COMMAND_LEN {
        return line;
    }
    let mut end = MAX_COMMAND_LEN;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    &line[..end]
}

/// An existing directory the current user may create files in.
pub fn dir_writable(dir: &Path) -> bool {
    match fs::metadata(dir) {
        Ok(m) if m.is_dir() => can_write(dir, &m),
        _ => false,
    }
}

#[cfg(unix)]
fn can_write(dir: &Path, _meta: &fs::Metadata) -> bool {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;
    match CString::new(dir.as_os_str().as_bytes()) {
        // SAFETY: `c` is a valid NUL-terminated path for the duration of the call.
        Ok(c) => unsafe { libc::access(c.as_ptr(), libc::W_OK) == 0 },
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn can_write(_dir: &Path, meta: &fs::Metadata) -> bool {
    !meta.permissions().readonly()
}

pub struct Client<S> {
    channel: Channel<S>,
    worker: u32,
    progress: TransferProgress,
}

impl Client<TcpStream> {
    pub fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).with_context(|| format!("connect {}", addr))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay: {}", e);
        }
        Client::handshake(stream).context("waiting for a server worker")
    }
}

impl<S: Read + Write> Client<S> {
    /// Wait for the server's assignment greeting.
    pub fn handshake(stream: S) -> Result<Self, FrameError> {
        let mut channel = Channel::new(stream);
        let worker = channel.recv_u32()?;
        debug!("assigned to worker {}", worker);
        Ok(Self {
            channel,
            worker,
            progress: TransferProgress::new(false),
        })
    }

    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.progress = TransferProgress::new(enabled);
        self
    }

    pub fn worker(&self) -> u32 {
        self.worker
    }

    pub fn execute(&mut self, line: &str) -> Result<Reply, FrameError> {
        self.channel.send_text(clamp_command(line.trim()))?;
        let cmd = self.channel.recv_u32()?;
        match cmd {
            id::UNRECOGNIZED
            | id::HELP
            | id::CONFIGURE_COMPRESSOR
            | id::CONFIGURE_NAME
            | id::SHOW_CONFIGURATION
            | id::SHOW_LIST
            | id::EMPTY_LIST => Ok(Reply::Message {
                id: cmd,
                text: self.channel.recv_text()?,
            }),
            id::SEND => {
                let count = self.channel.recv_u32()?;
                let mut outcomes = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    outcomes.push(self.upload_one()?);
                }
                Ok(Reply::Upload(outcomes))
            }
            id::COMPRESS => Ok(Reply::Compress(self.compress()?)),
            id::QUIT => Ok(Reply::Quit),
            _ => Err(FrameError::Malformed("unknown command identifier")),
        }
    }

    fn upload_one(&mut self) -> Result<UploadOutcome, FrameError> {
        let path = self.channel.recv_text()?;
        let opened = fs::metadata(&path)
            .ok()
            .filter(|m| m.is_file() && m.len() <= MAX_TRANSFER_SIZE)
            .and_then(|m| File::open(&path).ok().map(|f| (m.len() as u32, f)));
        let (size, file) = match opened {
            Some(pair) => pair,
            None => {
                self.channel.send_bool(false)?;
                return Ok(UploadOutcome::Unreadable { path });
            }
        };
        self.channel.send_bool(true)?;
        if !self.channel.recv_bool()? {
            return Ok(UploadOutcome::AlreadyStaged { path });
        }

        self.channel.send_u32(size)?;
        if size > 0 {
            self.channel.send_bool(true)?;
            let bar = self.progress.bar(size as u64, "upload", &path);
            let mut reader = bar.wrap_read(file);
            self.channel.send_from(size, &mut reader)?;
            bar.finish_and_clear();
        }
        let message = self.channel.recv_text()?;
        Ok(UploadOutcome::Delivered { path, message })
    }

    fn compress(&mut self) -> Result<CompressOutcome, FrameError> {
        if self.channel.recv_u32()? == 0 {
            return Ok(CompressOutcome::NothingStaged);
        }
        let archive = self.channel.recv_text()?;
        let dir = self.channel.recv_text()?;
        let dir_path = PathBuf::from(strip_quotes(&dir));
        let usable = dir_writable(&dir_path);
        self.channel.send_bool(usable)?;
        if !usable {
            return Ok(CompressOutcome::DestinationUnusable { dir });
        }
        if !self.channel.recv_bool()? {
            return Ok(CompressOutcome::ServerFailed { archive });
        }

        let size = self.channel.recv_u32()?;
        let target = dir_path.join(&archive);
        let saved = self.receive_archive(size, &archive, &dir_path, &target)?;
        self.channel.send_bool(saved.is_ok())?;
        Ok(match saved {
            Ok(()) => CompressOutcome::Saved {
                path: target,
                bytes: size as u64,
            },
            Err(e) => CompressOutcome::SaveFailed {
                archive,
                reason: e.to_string(),
            },
        })
    }

    /// Stream the archive into a temp file next to `target`, then move it
    /// into place. The outer error is the connection; the inner one is local.
    fn receive_archive(
        &mut self,
        size: u32,
        archive: &str,
        dir: &Path,
        target: &Path,
    ) -> Result<io::Result<()>, FrameError> {
        let tmp = match NamedTempFile::new_in(dir) {
            Ok(t) => t,
            Err(e) => {
                self.channel.drain(size as u64)?;
                return Ok(Err(e));
            }
        };
        let bar = self.progress.bar(size as u64, "download", archive);
        let delivery = {
            let mut out = bar.wrap_write(tmp.as_file());
            self.channel.recv_to(size as u64, &mut out)?
        };
        bar.finish_and_clear();
        if let Delivery::SinkFailed(e) = delivery {
            return Ok(Err(e));
        }
        if let Err(e) = tmp.as_file().sync_all() {
            return Ok(Err(e));
        }
        Ok(tmp.persist(target).map(|_| ()).map_err(|e| e.error))
    }
}
