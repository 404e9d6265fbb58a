//! Archive creation backends.
//!
//! The session protocol only needs "turn these staged files into
//! `<name>.tar.<ext>` with this codec"; how that happens is behind the
//! [`Archiver`] trait so tests can run without external tools.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tar::Builder;
use thiserror::Error;

use crate::protocol::Codec;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("no files to archive")]
    NoInput,

    #[error("codec {codec} is not supported by the {archiver} archiver")]
    UnsupportedCodec {
        codec: &'static str,
        archiver: &'static str,
    },

    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: io::Error,
    },

    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("archive was not produced at {0}")]
    MissingOutput(PathBuf),

    #[error("archive i/o error: {0}")]
    Io(#[from] io::Error),
}

pub trait Archiver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Archive `files` (names relative to `workspace`) into `output`.
    fn create(
        &self,
        workspace: &Path,
        files: &[String],
        codec: &Codec,
        output: &Path,
    ) -> Result<(), ArchiveError>;
}

/// Run `archiver` and return the size of the produced archive. Any partial
/// output is removed on failure.
pub fn create_archive(
    archiver: &dyn Archiver,
    workspace: &Path,
    files: &[String],
    codec: &Codec,
    output: &Path,
) -> Result<u64, ArchiveError> {
    let result = if files.is_empty() {
        Err(ArchiveError::NoInput)
    } else {
        archiver
            .create(workspace, files, codec, output)
            .and_then(|_| match output.metadata() {
                Ok(md) if md.is_file() => Ok(md.len()),
                _ => Err(ArchiveError::MissingOutput(output.to_path_buf())),
            })
    };
    if result.is_err() {
        if let Err(e) = std::fs::remove_file(output) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("could not remove partial archive {}: {}", output.display(), e);
            }
        }
    }
    result
}

/// Shells out to the system `tar` with the codec's option letter.
#[derive(Debug, Clone)]
pub struct SystemTar {
    program: PathBuf,
}

impl Default for SystemTar {
    fn default() -> Self {
        Self { program: PathBuf::from("tar") }
    }
}

impl SystemTar {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }
}

impl Archiver for SystemTar {
    fn name(&self) -> &'static str {
        "system"
    }

    fn create(
        &self,
        workspace: &Path,
        files: &[String],
        codec: &Codec,
        output: &Path,
    ) -> Result<(), ArchiveError> {
        let target = output.strip_prefix(workspace).unwrap_or(output);
        let tool = self.program.display().to_string();
        debug!("{} -c{}f {} ({} files)", tool, codec.tool_flag, target.display(), files.len());
        let out = Command::new(&self.program)
            .current_dir(workspace)
            .arg(format!("-c{}f", codec.tool_flag))
            .arg(target)
            .arg("--")
            .args(files)
            .output()
            .map_err(|source| ArchiveError::Spawn { tool: tool.clone(), source })?;
        if !out.status.success() {
            return Err(ArchiveError::ToolFailed {
                tool,
                status: out.status,
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// In-process tar builder; only gzip is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinArchiver;

impl Archiver for BuiltinArchiver {
    fn name(&self) -> &'static str {
        "builtin"
    }

    fn create(
        &self,
        workspace: &Path,
        files: &[String],
        codec: &Codec,
        output: &Path,
    ) -> Result<(), ArchiveError> {
        if codec.extension != "gz" {
            return Err(ArchiveError::UnsupportedCodec {
                codec: codec.name,
                archiver: self.name(),
            });
        }
        let file = File::create(output)?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = Builder::new(encoder);
        for name in files {
            builder.append_path_with_name(workspace.join(name), name)?;
        }
        let encoder = builder.into_inner()?;
        encoder.finish()?.sync_all()?;
        Ok(())
    }
}

/// Backend selector used by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ArchiverKind {
    #[default]
    System,
    Builtin,
}

impl ArchiverKind {
    pub fn build(self) -> Arc<dyn Archiver> {
        match self {
            ArchiverKind::System => Arc::new(SystemTar::default()),
            ArchiverKind::Builtin => Arc::new(BuiltinArchiver),
        }
    }
}
