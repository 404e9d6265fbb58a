//! Server side of one client session: command loop plus the upload and
//! compression sub-dialogues.
//!
//! Every handler returns `Result<(), FrameError>`. An `Err` is a connection
//! failure and ends the session; anything that goes wrong locally (bad codec,
//! name collision, disk error, archiver failure) is reported to the client
//! in a normal response frame and logged, and the session carries on.

use std::fmt;
use std::fs::File;
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::path::Path;

use log::{debug, info, warn};

use crate::archiver::{create_archive, Archiver};
use crate::command::{base_name, split_paths, strip_quotes, Command};
use crate::frame::{Channel, Delivery, FrameError};
use crate::logger::SessionLogger;
use crate::protocol::{
    self, archive_file_name, codec_index, Codec, CODECS, DEFAULT_ARCHIVE_NAME,
    DEFAULT_CODEC_INDEX, MAX_COMMAND_LEN, MAX_TEXT_FRAME,
};
use crate::workspace::{validate_file_name, Workspace};

const UNRECOGNIZED_MSG: &str = " - Command not found or missing parameter.";
const CREATE_FAILED_MSG: &str = " - The server could not create the file; upload failed.";
const WRITE_FAILED_MSG: &str = " - The server could not store the file; upload failed.";
const NO_FILES_MSG: &str = " - No files have been uploaded yet.";
const BAD_NAME_MSG: &str = " - The archive name cannot be empty or only spaces.";

/// Room kept at the end of a listing for the "and N more" line.
const LIST_TAIL_RESERVE: usize = 64;

pub const HELP_TEXT: &str = " - remote-compressor supports the following commands:
    -> configure-compressor [compressor]
    -> configure-name [name]
    -> show-configuration
    -> send [local-file ...]
    -> compress [path]
    -> show-list
    -> empty-list
    -> quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationCause {
    ClientQuit,
    ClientDisconnected,
    ServerShutdown,
}

impl TerminationCause {
    pub fn as_str(self) -> &'static str {
        match self {
            TerminationCause::ClientQuit => "client-quit",
            TerminationCause::ClientDisconnected => "client-disconnected",
            TerminationCause::ServerShutdown => "server-shutdown",
        }
    }
}

impl fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct Session<'a, S> {
    channel: Channel<S>,
    peer: SocketAddr,
    worker: usize,
    codec: usize,
    archive_name: String,
    staged: u32,
    workspace: &'a Workspace,
    archiver: &'a dyn Archiver,
    logger: &'a dyn SessionLogger,
}

impl<'a, S: Read + Write> Session<'a, S> {
    pub fn new(
        stream: S,
        peer: SocketAddr,
        worker: usize,
        workspace: &'a Workspace,
        archiver: &'a dyn Archiver,
        logger: &'a dyn SessionLogger,
    ) -> Self {
        Self {
            channel: Channel::new(stream),
            peer,
            worker,
            codec: DEFAULT_CODEC_INDEX,
            archive_name: DEFAULT_ARCHIVE_NAME.to_string(),
            staged: 0,
            workspace,
            archiver,
            logger,
        }
    }

    pub fn staged(&self) -> u32 {
        self.staged
    }

    pub fn codec(&self) -> &'static Codec {
        protocol::codec(self.codec)
    }

    pub fn archive_name(&self) -> &str {
        &self.archive_name
    }

    /// Serve commands until the client quits or the connection fails.
    pub fn run(&mut self) -> TerminationCause {
        loop {
            match self.step() {
                Ok(true) => {}
                Ok(false) => return TerminationCause::ClientQuit,
                Err(FrameError::Closed) => return TerminationCause::ClientDisconnected,
                Err(e) => {
                    warn!("worker {}: session with {} failed: {}", self.worker, self.peer, e);
                    self.logger.error(self.worker, "session", &e.to_string());
                    return TerminationCause::ClientDisconnected;
                }
            }
        }
    }

    /// One command round. `Ok(false)` after `quit`.
    fn step(&mut self) -> Result<bool, FrameError> {
        let (line, truncated) = self.channel.recv_line(MAX_COMMAND_LEN)?;
        let cmd = if truncated {
            debug!("worker {}: command from {} over {} bytes", self.worker, self.peer, MAX_COMMAND_LEN);
            Command::Unrecognized
        } else {
            Command::parse(&line)
        };
        self.channel.send_u32(cmd.id())?;

        match cmd {
            Command::Unrecognized => self.channel.send_text(UNRECOGNIZED_MSG)?,
            Command::Help => self.channel.send_text(HELP_TEXT)?,
            Command::ConfigureCompressor(name) => self.configure_compressor(&name)?,
            Command::ConfigureName(name) => self.configure_name(&name)?,
            Command::ShowConfiguration => self.show_configuration()?,
            Command::Send(paths) => self.send_files(&paths)?,
            Command::Compress(dest) => self.compress(&dest)?,
            Command::ShowList => self.show_list()?,
            Command::EmptyList => self.empty_list()?,
            Command::Quit => return Ok(false),
        }
        Ok(true)
    }

    fn configure_compressor(&mut self, name: &str) -> Result<(), FrameError> {
        match codec_index(name) {
            Some(idx) => {
                self.codec = idx;
                info!("worker {}: {} selected compressor {}", self.worker, self.peer, name);
                self.channel
                    .send_text(&format!(" - Compressor set to {}.", CODECS[idx].name))
            }
            None => {
                let mut msg = String::from(" - Unknown compressor; available compressors are:");
                for c in CODECS.iter() {
                    msg.push_str("\n   * ");
                    msg.push_str(c.name);
                }
                self.channel.send_text(&msg)
            }
        }
    }

    fn configure_name(&mut self, raw: &str) -> Result<(), FrameError> {
        let name = strip_quotes(raw);
        if name.trim().is_empty() {
            return self.channel.send_text(BAD_NAME_MSG);
        }
        if let Err(e) = validate_file_name(&archive_file_name(&name, self.codec())) {
            debug!("worker {}: rejected archive name: {}", self.worker, e);
            return self
                .channel
                .send_text(" - The archive name must be a plain file name.");
        }
        info!("worker {}: {} set archive name {:?}", self.worker, self.peer, name);
        let msg = format!(" - Archive name set to {}.", name);
        self.archive_name = name;
        self.channel.send_text(&msg)
    }

    fn show_configuration(&mut self) -> Result<(), FrameError> {
        let msg = format!("  Name: {}\n  Compressor: {}", self.archive_name, self.codec().name);
        self.channel.send_text(&msg)
    }

    fn send_files(&mut self, list: &str) -> Result<(), FrameError> {
        let paths = split_paths(list);
        self.channel.send_u32(paths.len() as u32)?;
        for path in &paths {
            self.upload_one(path)?;
        }
        Ok(())
    }

    fn upload_one(&mut self, path: &str) -> Result<(), FrameError> {
        self.channel.send_text(path)?;
        if !self.channel.recv_bool()? {
            debug!("worker {}: {} cannot read {}", self.worker, self.peer, path);
            return Ok(());
        }

        let name = base_name(path);
        let proceed = match validate_file_name(name) {
            Ok(()) => !self.workspace.contains(name),
            Err(e) => {
                warn!("worker {}: {}", self.worker, e);
                false
            }
        };
        self.channel.send_bool(proceed)?;
        if !proceed {
            return Ok(());
        }

        let size = self.channel.recv_u32()?;
        if size > 0 && !self.channel.recv_bool()? {
            debug!("worker {}: {} could not open {}", self.worker, self.peer, path);
            return Ok(());
        }

        let (target, file) = match self.workspace.create_file(name) {
            Ok(pair) => pair,
            Err(e) => {
                warn!("worker {}: {}", self.worker, e);
                self.logger.error(self.worker, "upload", &e.to_string());
                if size > 0 {
                    self.channel.drain(size as u64)?;
                }
                return self.channel.send_text(CREATE_FAILED_MSG);
            }
        };

        self.store_upload(name, &target, size, file)
    }

    /// Step 6: stream the payload into `sink` and report the verdict. The
    /// staged file at `target` is removed unless the whole payload landed.
    fn store_upload<W: Write>(
        &mut self,
        name: &str,
        target: &Path,
        size: u32,
        mut sink: W,
    ) -> Result<(), FrameError> {
        let delivery = if size > 0 {
            match self.channel.recv_to(size as u64, &mut sink) {
                Ok(d) => d,
                Err(e) => {
                    drop(sink);
                    self.workspace.remove_quietly(target);
                    return Err(e);
                }
            }
        } else {
            Delivery::Complete
        };
        drop(sink);

        if let Delivery::SinkFailed(e) = delivery {
            warn!("worker {}: writing {}: {}", self.worker, target.display(), e);
            self.logger.error(self.worker, "upload", &e.to_string());
            self.workspace.remove_quietly(target);
            return self.channel.send_text(WRITE_FAILED_MSG);
        }

        self.staged += 1;
        info!(
            "worker {}: received {} from {} ({} staged)",
            self.worker, name, self.peer, self.staged
        );
        self.logger
            .uploaded(self.worker, &self.peer, name, size as u64, self.staged);
        let plural = if self.staged == 1 { "file" } else { "files" };
        self.channel.send_text(&format!(
            " - File {} uploaded successfully ({} {} staged).",
            name, self.staged, plural
        ))
    }

    fn compress(&mut self, dest: &str) -> Result<(), FrameError> {
        self.channel.send_u32(self.staged)?;
        if self.staged == 0 {
            return Ok(());
        }

        let codec = self.codec();
        let archive = archive_file_name(&self.archive_name, codec);
        self.channel.send_text(&archive)?;
        let mut dest = dest.to_string();
        if !dest.ends_with('/') {
            dest.push('/');
        }
        self.channel.send_text(&dest)?;
        if !self.channel.recv_bool()? {
            warn!("worker {}: {} cannot write to {}", self.worker, self.peer, dest);
            return Ok(());
        }

        let output = self.workspace.dir().join(&archive);
        let built = self.build_archive(&archive, codec, &output);
        self.channel.send_bool(built.is_some())?;
        let (size, mut file, files) = match built {
            Some(b) => b,
            None => return Ok(()),
        };

        let sent = self
            .channel
            .send_u32(size)
            .and_then(|_| self.channel.send_from(size, &mut file));
        drop(file);
        self.workspace.remove_quietly(&output);
        sent?;

        if !self.channel.recv_bool()? {
            warn!("worker {}: {} could not save {}", self.worker, self.peer, archive);
            return Ok(());
        }
        if let Err(e) = self.workspace.clear() {
            warn!("worker {}: clearing workspace: {}", self.worker, e);
        }
        self.staged = 0;
        info!(
            "worker {}: sent {} ({} bytes, {} files) to {}",
            self.worker, archive, size, files, self.peer
        );
        self.logger
            .compressed(self.worker, &self.peer, &archive, size as u64, files);
        Ok(())
    }

    /// Build the archive and open it for streaming. `None` means "not ready";
    /// nothing is left behind in that case.
    fn build_archive(&self, archive: &str, codec: &Codec, output: &Path) -> Option<(u32, File, u32)> {
        let files = match self.workspace.file_names() {
            Ok(names) => names,
            Err(e) => {
                warn!("worker {}: listing workspace: {}", self.worker, e);
                return None;
            }
        };
        if files.iter().any(|f| f == archive) {
            warn!("worker {}: a staged file is named {}", self.worker, archive);
            self.logger
                .error(self.worker, "compress", "staged file shadows archive name");
            return None;
        }

        let size = match create_archive(self.archiver, self.workspace.dir(), &files, codec, output) {
            Ok(size) => size,
            Err(e) => {
                warn!("worker {}: creating {}: {}", self.worker, archive, e);
                self.logger.error(self.worker, "compress", &e.to_string());
                return None;
            }
        };
        let size = match u32::try_from(size) {
            Ok(s) => s,
            Err(_) => {
                warn!("worker {}: {} is {} bytes, over the transfer limit", self.worker, archive, size);
                self.workspace.remove_quietly(output);
                return None;
            }
        };
        match File::open(output) {
            Ok(f) => Some((size, f, files.len() as u32)),
            Err(e) => {
                warn!("worker {}: opening {}: {}", self.worker, output.display(), e);
                self.workspace.remove_quietly(output);
                None
            }
        }
    }

    fn show_list(&mut self) -> Result<(), FrameError> {
        let names = match self.workspace.file_names() {
            Ok(names) => names,
            Err(e) => {
                warn!("worker {}: listing workspace: {}", self.worker, e);
                return self.channel.send_text(" - The server could not list the uploaded files.");
            }
        };
        let msg = match names.len() {
            0 => NO_FILES_MSG.to_string(),
            n => {
                let mut msg = if n == 1 {
                    String::from(" - The server has received the following file:")
                } else {
                    format!(" - The server has received the following {} files:", n)
                };
                for (i, name) in names.iter().enumerate() {
                    if msg.len() + name.len() + 8 + LIST_TAIL_RESERVE > MAX_TEXT_FRAME {
                        msg.push_str(&format!("\n    ... and {} more", n - i));
                        break;
                    }
                    msg.push_str("\n    -> ");
                    msg.push_str(name);
                }
                msg
            }
        };
        self.channel.send_text(&msg)
    }

    fn empty_list(&mut self) -> Result<(), FrameError> {
        match self.workspace.clear() {
            Ok(removed) => {
                self.staged = 0;
                info!("worker {}: {} emptied {} files", self.worker, self.peer, removed);
                self.logger.emptied(self.worker, &self.peer, removed);
                self.channel
                    .send_text(&format!(" - Removed {} uploaded file(s) from the server.", removed))
            }
            Err(e) => {
                warn!("worker {}: emptying workspace: {}", self.worker, e);
                self.logger.error(self.worker, "empty-list", &e.to_string());
                if let Ok(left) = self.workspace.file_names() {
                    self.staged = left.len() as u32;
                }
                self.channel
                    .send_text(" - The server could not remove every uploaded file.")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archiver::ArchiveError;
    use crate::frame::tests::Loopback;
    use crate::logger::NoopLogger;
    use std::fs;
    use tempfile::TempDir;

    /// Writes the list of archived names as the archive body.
    struct ListingArchiver;
    impl Archiver for ListingArchiver {
        fn name(&self) -> &'static str {
            "listing"
        }
        fn create(&self, _: &Path, files: &[String], _: &Codec, output: &Path) -> Result<(), ArchiveError> {
            fs::write(output, files.join(","))?;
            Ok(())
        }
    }

    struct BrokenArchiver;
    impl Archiver for BrokenArchiver {
        fn name(&self) -> &'static str {
            "broken"
        }
        fn create(&self, _: &Path, _: &[String], _: &Codec, output: &Path) -> Result<(), ArchiveError> {
            fs::write(output, b"partial")?;
            Err(ArchiveError::NoInput)
        }
    }

    /// Client-side frames, written in order.
    enum Out<'a> {
        Text(&'a str),
        U32(u32),
        Bool(bool),
        Bytes(&'a [u8]),
    }

    fn script(frames: &[Out]) -> Vec<u8> {
        let mut ch = Channel::new(Loopback::with_input(Vec::new()));
        for f in frames {
            match f {
                Out::Text(t) => ch.send_text(t).unwrap(),
                Out::U32(v) => ch.send_u32(*v).unwrap(),
                Out::Bool(b) => ch.send_bool(*b).unwrap(),
                Out::Bytes(b) => ch.send(b).unwrap(),
            }
        }
        ch.into_inner().output
    }

    struct Harness {
        _tmp: TempDir,
        workspace: Workspace,
    }

    impl Harness {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let workspace = Workspace::at(tmp.path().join("T0"));
            workspace.reset().unwrap();
            Self { _tmp: tmp, workspace }
        }

        fn run(&self, archiver: &dyn Archiver, frames: &[Out]) -> (TerminationCause, u32, Channel<Loopback>) {
            let peer: SocketAddr = "127.0.0.1:5555".parse().unwrap();
            let stream = Loopback::with_input(script(frames));
            let mut session = Session::new(stream, peer, 0, &self.workspace, archiver, &NoopLogger);
            let cause = session.run();
            let staged = session.staged();
            let output = session.channel.into_inner().output;
            (cause, staged, Channel::new(Loopback::with_input(output)))
        }
    }

    #[test]
    fn help_unrecognized_and_quit() {
        let h = Harness::new();
        let (cause, _, mut rx) =
            h.run(&ListingArchiver, &[Out::Text("HELP"), Out::Text("frobnicate"), Out::Text("quit")]);
        assert_eq!(cause, TerminationCause::ClientQuit);
        assert_eq!(rx.recv_u32().unwrap(), 1);
        assert_eq!(rx.recv_text().unwrap(), HELP_TEXT);
        assert_eq!(rx.recv_u32().unwrap(), 0);
        assert_eq!(rx.recv_text().unwrap(), UNRECOGNIZED_MSG);
        assert_eq!(rx.recv_u32().unwrap(), 9);
        assert!(matches!(rx.recv_u32(), Err(FrameError::Closed)));
    }

    #[test]
    fn eof_is_a_disconnect() {
        let h = Harness::new();
        let (cause, _, _) = h.run(&ListingArchiver, &[Out::Text("show-list")]);
        assert_eq!(cause, TerminationCause::ClientDisconnected);
    }

    #[test]
    fn oversized_command_is_unrecognized() {
        let h = Harness::new();
        let long = format!("configure-name {}", "x".repeat(300));
        let (_, _, mut rx) = h.run(&ListingArchiver, &[Out::Text(&long), Out::Text("quit")]);
        assert_eq!(rx.recv_u32().unwrap(), 0);
        assert_eq!(rx.recv_text().unwrap(), UNRECOGNIZED_MSG);
        assert_eq!(rx.recv_u32().unwrap(), 9);
    }

    #[test]
    fn configuration_commands() {
        let h = Harness::new();
        let (_, _, mut rx) = h.run(
            &ListingArchiver,
            &[
                Out::Text("configure-compressor bogus"),
                Out::Text("configure-compressor xz"),
                Out::Text("configure-name \"   \""),
                Out::Text("configure-name \"my pack\""),
                Out::Text("configure-name a/b"),
                Out::Text("show-configuration"),
                Out::Text("quit"),
            ],
        );
        assert_eq!(rx.recv_u32().unwrap(), 2);
        let bogus = rx.recv_text().unwrap();
        for c in CODECS.iter() {
            assert!(bogus.contains(c.name), "{bogus}");
        }
        assert_eq!(rx.recv_u32().unwrap(), 2);
        assert!(rx.recv_text().unwrap().contains("xz"));
        assert_eq!(rx.recv_u32().unwrap(), 3);
        assert_eq!(rx.recv_text().unwrap(), BAD_NAME_MSG);
        assert_eq!(rx.recv_u32().unwrap(), 3);
        assert!(rx.recv_text().unwrap().contains("my pack"));
        assert_eq!(rx.recv_u32().unwrap(), 3);
        assert!(rx.recv_text().unwrap().contains("plain file name"));
        assert_eq!(rx.recv_u32().unwrap(), 4);
        assert_eq!(rx.recv_text().unwrap(), "  Name: my pack\n  Compressor: xz");
    }

    #[test]
    fn upload_skips_unreadable_and_duplicate_files() {
        let h = Harness::new();
        let (_, staged, mut rx) = h.run(
            &ListingArchiver,
            &[
                Out::Text("send /tmp/a.txt missing.txt \"dir/b c.txt\" other/a.txt"),
                // a.txt
                Out::Bool(true),
                Out::U32(3),
                Out::Bool(true),
                Out::Bytes(b"abc"),
                // missing.txt
                Out::Bool(false),
                // b c.txt, empty
                Out::Bool(true),
                Out::U32(0),
                // other/a.txt collides with a.txt
                Out::Bool(true),
                Out::Text("quit"),
            ],
        );
        assert_eq!(staged, 2);
        assert_eq!(rx.recv_u32().unwrap(), 5);
        assert_eq!(rx.recv_u32().unwrap(), 4);

        assert_eq!(rx.recv_text().unwrap(), "/tmp/a.txt");
        assert!(rx.recv_bool().unwrap());
        assert!(rx.recv_text().unwrap().contains("a.txt uploaded successfully (1 file staged)"));

        assert_eq!(rx.recv_text().unwrap(), "missing.txt");

        assert_eq!(rx.recv_text().unwrap(), "dir/b c.txt");
        assert!(rx.recv_bool().unwrap());
        assert!(rx.recv_text().unwrap().contains("(2 files staged)"));

        assert_eq!(rx.recv_text().unwrap(), "other/a.txt");
        assert!(!rx.recv_bool().unwrap());
        assert_eq!(rx.recv_u32().unwrap(), 9);

        assert_eq!(fs::read(h.workspace.dir().join("a.txt")).unwrap(), b"abc");
        assert_eq!(fs::read(h.workspace.dir().join("b c.txt")).unwrap(), b"");
    }

    #[test]
    fn upload_of_unsafe_name_is_refused() {
        let h = Harness::new();
        let (_, staged, mut rx) =
            h.run(&ListingArchiver, &[Out::Text("send dir/.."), Out::Bool(true), Out::Text("quit")]);
        assert_eq!(staged, 0);
        assert_eq!(rx.recv_u32().unwrap(), 5);
        assert_eq!(rx.recv_u32().unwrap(), 1);
        assert_eq!(rx.recv_text().unwrap(), "dir/..");
        assert!(!rx.recv_bool().unwrap());
        assert_eq!(rx.recv_u32().unwrap(), 9);
    }

    #[test]
    fn disconnect_mid_upload_leaves_no_partial_file() {
        let h = Harness::new();
        let mut bytes = script(&[Out::Text("send a.txt"), Out::Bool(true), Out::U32(10), Out::Bool(true)]);
        bytes.extend_from_slice(&crate::frame::encode_header(10));
        bytes.extend_from_slice(b"abc");
        let peer: SocketAddr = "127.0.0.1:5555".parse().unwrap();
        let mut session = Session::new(
            Loopback::with_input(bytes),
            peer,
            0,
            &h.workspace,
            &ListingArchiver,
            &NoopLogger,
        );
        assert_eq!(session.run(), TerminationCause::ClientDisconnected);
        assert!(h.workspace.file_names().unwrap().is_empty());
    }

    #[test]
    fn create_failure_drains_payload_and_session_continues() {
        let h = Harness::new();
        fs::remove_dir_all(h.workspace.dir()).unwrap();
        let (cause, staged, mut rx) = h.run(
            &ListingArchiver,
            &[
                Out::Text("send a.txt"),
                Out::Bool(true),
                Out::U32(3),
                Out::Bool(true),
                Out::Bytes(b"abc"),
                Out::Text("help"),
                Out::Text("quit"),
            ],
        );
        assert_eq!(cause, TerminationCause::ClientQuit);
        assert_eq!(staged, 0);
        assert_eq!(rx.recv_u32().unwrap(), 5);
        assert_eq!(rx.recv_u32().unwrap(), 1);
        assert_eq!(rx.recv_text().unwrap(), "a.txt");
        assert!(rx.recv_bool().unwrap());
        assert_eq!(rx.recv_text().unwrap(), CREATE_FAILED_MSG);
        assert_eq!(rx.recv_u32().unwrap(), 1);
        assert_eq!(rx.recv_text().unwrap(), HELP_TEXT);
        assert_eq!(rx.recv_u32().unwrap(), 9);
    }

    struct FullDisk;
    impl Write for FullDisk {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "no space left"))
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_failure_removes_staged_file_and_session_continues() {
        let h = Harness::new();
        let (target, _file) = h.workspace.create_file("a.txt").unwrap();
        let peer: SocketAddr = "127.0.0.1:5555".parse().unwrap();
        let input = script(&[Out::Bytes(b"abcd"), Out::Text("help"), Out::Text("quit")]);
        let mut session = Session::new(
            Loopback::with_input(input),
            peer,
            0,
            &h.workspace,
            &ListingArchiver,
            &NoopLogger,
        );
        session.store_upload("a.txt", &target, 4, FullDisk).unwrap();
        assert_eq!(session.run(), TerminationCause::ClientQuit);
        assert_eq!(session.staged(), 0);
        assert!(!target.exists());

        let mut rx = Channel::new(Loopback::with_input(session.channel.into_inner().output));
        assert_eq!(rx.recv_text().unwrap(), WRITE_FAILED_MSG);
        assert_eq!(rx.recv_u32().unwrap(), 1);
        assert_eq!(rx.recv_text().unwrap(), HELP_TEXT);
        assert_eq!(rx.recv_u32().unwrap(), 9);
    }

    #[test]
    fn compress_round_trip_clears_workspace_after_save() {
        let h = Harness::new();
        fs::write(h.workspace.dir().join("b.txt"), b"b").unwrap();
        fs::write(h.workspace.dir().join("a.txt"), b"a").unwrap();
        let peer: SocketAddr = "127.0.0.1:5555".parse().unwrap();
        let input = script(&[
            Out::Text("compress ./out"),
            Out::Bool(true),
            Out::Bool(true),
            Out::Text("show-list"),
            Out::Text("quit"),
        ]);
        let mut session = Session::new(
            Loopback::with_input(input),
            peer,
            0,
            &h.workspace,
            &ListingArchiver,
            &NoopLogger,
        );
        session.staged = 2;
        assert_eq!(session.run(), TerminationCause::ClientQuit);
        assert_eq!(session.staged(), 0);
        let mut rx = Channel::new(Loopback::with_input(session.channel.into_inner().output));

        assert_eq!(rx.recv_u32().unwrap(), 6);
        assert_eq!(rx.recv_u32().unwrap(), 2);
        assert_eq!(rx.recv_text().unwrap(), "archive.tar.gz");
        assert_eq!(rx.recv_text().unwrap(), "./out/");
        assert!(rx.recv_bool().unwrap());
        let size = rx.recv_u32().unwrap();
        let body = rx.recv(size as usize).unwrap();
        assert_eq!(body, b"a.txt,b.txt");
        assert_eq!(rx.recv_u32().unwrap(), 7);
        assert_eq!(rx.recv_text().unwrap(), NO_FILES_MSG);
        assert!(h.workspace.file_names().unwrap().is_empty());
    }

    #[test]
    fn compress_keeps_files_when_client_cannot_save() {
        let h = Harness::new();
        fs::write(h.workspace.dir().join("a.txt"), b"a").unwrap();
        let peer: SocketAddr = "127.0.0.1:5555".parse().unwrap();
        let input = script(&[
            Out::Text("compress out/"),
            Out::Bool(true),
            Out::Bool(false),
            Out::Text("quit"),
        ]);
        let mut session = Session::new(
            Loopback::with_input(input),
            peer,
            0,
            &h.workspace,
            &ListingArchiver,
            &NoopLogger,
        );
        session.staged = 1;
        session.run();
        assert_eq!(session.staged(), 1);
        assert_eq!(h.workspace.file_names().unwrap(), vec!["a.txt"]);
    }

    #[test]
    fn compress_with_nothing_staged_stops_after_count() {
        let h = Harness::new();
        let (_, _, mut rx) = h.run(&ListingArchiver, &[Out::Text("compress /tmp"), Out::Text("quit")]);
        assert_eq!(rx.recv_u32().unwrap(), 6);
        assert_eq!(rx.recv_u32().unwrap(), 0);
        assert_eq!(rx.recv_u32().unwrap(), 9);
    }

    #[test]
    fn compress_refused_destination_has_no_side_effects() {
        let h = Harness::new();
        fs::write(h.workspace.dir().join("a.txt"), b"a").unwrap();
        let peer: SocketAddr = "127.0.0.1:5555".parse().unwrap();
        let input = script(&[Out::Text("compress /nope/"), Out::Bool(false), Out::Text("quit")]);
        let mut session = Session::new(
            Loopback::with_input(input),
            peer,
            0,
            &h.workspace,
            &ListingArchiver,
            &NoopLogger,
        );
        session.staged = 1;
        session.run();
        let mut rx = Channel::new(Loopback::with_input(session.channel.into_inner().output));
        assert_eq!(rx.recv_u32().unwrap(), 6);
        assert_eq!(rx.recv_u32().unwrap(), 1);
        assert_eq!(rx.recv_text().unwrap(), "archive.tar.gz");
        assert_eq!(rx.recv_text().unwrap(), "/nope/");
        assert_eq!(rx.recv_u32().unwrap(), 9);
        assert_eq!(h.workspace.file_names().unwrap(), vec!["a.txt"]);
    }

    #[test]
    fn archiver_failure_reports_not_ready_and_cleans_up() {
        let h = Harness::new();
        fs::write(h.workspace.dir().join("a.txt"), b"a").unwrap();
        let peer: SocketAddr = "127.0.0.1:5555".parse().unwrap();
        let input = script(&[Out::Text("compress out"), Out::Bool(true), Out::Text("quit")]);
        let mut session = Session::new(
            Loopback::with_input(input),
            peer,
            0,
            &h.workspace,
            &BrokenArchiver,
            &NoopLogger,
        );
        session.staged = 1;
        assert_eq!(session.run(), TerminationCause::ClientQuit);
        assert_eq!(session.staged(), 1);
        let mut rx = Channel::new(Loopback::with_input(session.channel.into_inner().output));
        rx.recv_u32().unwrap();
        rx.recv_u32().unwrap();
        rx.recv_text().unwrap();
        rx.recv_text().unwrap();
        assert!(!rx.recv_bool().unwrap());
        assert_eq!(rx.recv_u32().unwrap(), 9);
        assert_eq!(h.workspace.file_names().unwrap(), vec!["a.txt"]);
    }

    #[test]
    fn show_list_and_empty_list() {
        let h = Harness::new();
        fs::write(h.workspace.dir().join("z.txt"), b"z").unwrap();
        fs::write(h.workspace.dir().join("m.txt"), b"m").unwrap();
        let (_, staged, mut rx) = h.run(
            &ListingArchiver,
            &[
                Out::Text("show-list"),
                Out::Text("empty-list"),
                Out::Text("empty-list"),
                Out::Text("show-list"),
                Out::Text("quit"),
            ],
        );
        assert_eq!(staged, 0);
        assert_eq!(rx.recv_u32().unwrap(), 7);
        assert_eq!(
            rx.recv_text().unwrap(),
            " - The server has received the following 2 files:\n    -> m.txt\n    -> z.txt"
        );
        assert_eq!(rx.recv_u32().unwrap(), 8);
        assert!(rx.recv_text().unwrap().contains("Removed 2"));
        assert_eq!(rx.recv_u32().unwrap(), 8);
        assert!(rx.recv_text().unwrap().contains("Removed 0"));
        assert_eq!(rx.recv_u32().unwrap(), 7);
        assert_eq!(rx.recv_text().unwrap(), NO_FILES_MSG);
    }

    #[test]
    fn long_listing_fits_one_text_frame() {
        let h = Harness::new();
        for i in 0..400 {
            let name = format!("{:03}-{}.txt", i, "n".repeat(176));
            fs::write(h.workspace.dir().join(name), b"").unwrap();
        }
        let (_, _, mut rx) = h.run(
            &ListingArchiver,
            &[Out::Text("show-list"), Out::Text("help"), Out::Text("quit")],
        );
        assert_eq!(rx.recv_u32().unwrap(), 7);
        let listing = rx.recv(MAX_TEXT_FRAME).unwrap();
        let listing = String::from_utf8(listing).unwrap();
        assert!(listing.starts_with(" - The server has received the following 400 files:"));
        assert!(listing.contains("\n    -> 000-"));
        assert!(listing.ends_with(" more"), "{}", &listing[listing.len() - 40..]);
        assert_eq!(rx.recv_u32().unwrap(), 1);
        assert_eq!(rx.recv_text().unwrap(), HELP_TEXT);
        assert_eq!(rx.recv_u32().unwrap(), 9);
    }

    #[test]
    fn termination_cause_names() {
        assert_eq!(TerminationCause::ClientQuit.to_string(), "client-quit");
        assert_eq!(TerminationCause::ServerShutdown.as_str(), "server-shutdown");
    }
}
