//! Length-prefixed frame transport shared by the server and the client.
//!
//! Every message is `[u32 big-endian length][payload]`. The transport does not
//! know what a payload means; both ends agree on that by protocol step. The
//! typed helpers on [`Channel`] (text, `u32`, `bool`, streamed bytes) are the
//! only encodings used by the remcomp protocol.

use std::io::{self, Read, Write};

use thiserror::Error;

use crate::protocol::MAX_TEXT_FRAME;

const HEADER_LEN: usize = 4;
const STREAM_CHUNK: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("connection closed by peer")]
    Closed,

    #[error("connection i/o error: {0}")]
    Io(#[source] io::Error),

    #[error("frame too large: {len} bytes (max: {max})")]
    TooLarge { len: u64, max: u64 },

    #[error("frame carries {got} bytes, expected {expected}")]
    LengthMismatch { expected: u64, got: u64 },

    #[error("malformed payload: {0}")]
    Malformed(&'static str),

    #[error("local source failed while streaming: {0}")]
    Source(#[source] io::Error),
}

impl From<io::Error> for FrameError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => FrameError::Closed,
            _ => FrameError::Io(e),
        }
    }
}

/// Result of streaming a frame payload into a local writer.
#[derive(Debug)]
pub enum Delivery {
    Complete,
    /// The frame was fully consumed from the connection but the local
    /// writer failed; the connection is still in sync.
    SinkFailed(io::Error),
}

pub fn encode_header(len: u32) -> [u8; HEADER_LEN] {
    len.to_be_bytes()
}

pub fn decode_header(header: [u8; HEADER_LEN]) -> u32 {
    u32::from_be_bytes(header)
}

/// Reject payload lengths above `max` before anything is allocated.
pub fn validate_frame_size(len: u64, max: u64) -> Result<(), FrameError> {
    if len > max {
        return Err(FrameError::TooLarge { len, max });
    }
    Ok(())
}

pub fn write_frame<W: Write>(w: &mut W, payload: &[u8]) -> Result<(), FrameError> {
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::TooLarge {
        len: payload.len() as u64,
        max: u32::MAX as u64,
    })?;
    w.write_all(&encode_header(len))?;
    if !payload.is_empty() {
        w.write_all(payload)?;
    }
    w.flush()?;
    Ok(())
}

pub fn read_header<R: Read>(r: &mut R) -> Result<u32, FrameError> {
    let mut hdr = [0u8; HEADER_LEN];
    r.read_exact(&mut hdr)?;
    Ok(decode_header(hdr))
}

pub fn read_frame<R: Read>(r: &mut R, max: usize) -> Result<Vec<u8>, FrameError> {
    let len = read_header(r)? as u64;
    validate_frame_size(len, max as u64)?;
    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload)?;
    Ok(payload)
}

fn discard<R: Read>(r: &mut R, len: u64) -> Result<(), FrameError> {
    let copied = io::copy(&mut r.take(len), &mut io::sink())?;
    if copied < len {
        return Err(FrameError::Closed);
    }
    Ok(())
}

/// One end of a framed connection.
pub struct Channel<S> {
    stream: S,
}

impl<S: Read + Write> Channel<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    pub fn send(&mut self, payload: &[u8]) -> Result<(), FrameError> {
        write_frame(&mut self.stream, payload)
    }

    pub fn recv(&mut self, max: usize) -> Result<Vec<u8>, FrameError> {
        read_frame(&mut self.stream, max)
    }

    pub fn send_text(&mut self, text: &str) -> Result<(), FrameError> {
        self.send(text.as_bytes())
    }

    /// Receive a text frame. Bytes past `MAX_TEXT_FRAME` are drained and
    /// dropped so an overlong message never desynchronizes the stream.
    pub fn recv_text(&mut self) -> Result<String, FrameError> {
        let (text, _) = self.recv_line(MAX_TEXT_FRAME)?;
        Ok(text)
    }

    /// Receive a text frame, keeping at most `max` bytes. Anything beyond is
    /// drained so the next frame stays aligned. Returns `(text, truncated)`.
    pub fn recv_line(&mut self, max: usize) -> Result<(String, bool), FrameError> {
        let len = read_header(&mut self.stream)? as u64;
        let keep = len.min(max as u64);
        let mut payload = vec![0u8; keep as usize];
        self.stream.read_exact(&mut payload)?;
        if len > keep {
            discard(&mut self.stream, len - keep)?;
        }
        Ok((String::from_utf8_lossy(&payload).into_owned(), len > keep))
    }

    pub fn send_u32(&mut self, v: u32) -> Result<(), FrameError> {
        self.send(&v.to_be_bytes())
    }

    pub fn recv_u32(&mut self) -> Result<u32, FrameError> {
        let payload = self.recv(4)?;
        let bytes: [u8; 4] = payload
            .as_slice()
            .try_into()
            .map_err(|_| FrameError::Malformed("expected a 4-byte integer"))?;
        Ok(u32::from_be_bytes(bytes))
    }

    pub fn send_bool(&mut self, v: bool) -> Result<(), FrameError> {
        self.send(&[v as u8])
    }

    pub fn recv_bool(&mut self) -> Result<bool, FrameError> {
        match self.recv(1)?.as_slice() {
            [0] => Ok(false),
            [1] => Ok(true),
            _ => Err(FrameError::Malformed("expected a boolean byte")),
        }
    }

    /// Send exactly `len` bytes pulled from `src` as a single frame.
    pub fn send_from<R: Read>(&mut self, len: u32, src: &mut R) -> Result<(), FrameError> {
        self.stream.write_all(&encode_header(len))?;
        let mut buf = vec![0u8; STREAM_CHUNK];
        let mut remaining = len as u64;
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = match src.read(&mut buf[..want]) {
                Ok(0) => {
                    return Err(FrameError::Source(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "source ended before the announced size",
                    )))
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(FrameError::Source(e)),
            };
            self.stream.write_all(&buf[..n])?;
            remaining -= n as u64;
        }
        self.stream.flush()?;
        Ok(())
    }

    /// Receive a frame whose length must equal `expected` and copy its
    /// payload into `out`. A failing `out` does not desynchronize the
    /// connection: the rest of the payload is drained.
    pub fn recv_to<W: Write>(&mut self, expected: u64, out: &mut W) -> Result<Delivery, FrameError> {
        let len = read_header(&mut self.stream)? as u64;
        if len != expected {
            return Err(FrameError::LengthMismatch { expected, got: len });
        }
        let mut buf = vec![0u8; STREAM_CHUNK];
        let mut remaining = len;
        let mut sink_err: Option<io::Error> = None;
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = match self.stream.read(&mut buf[..want]) {
                Ok(0) => return Err(FrameError::Closed),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if sink_err.is_none() {
                if let Err(e) = out.write_all(&buf[..n]) {
                    sink_err = Some(e);
                }
            }
            remaining -= n as u64;
        }
        if sink_err.is_none() {
            if let Err(e) = out.flush() {
                sink_err = Some(e);
            }
        }
        Ok(match sink_err {
            None => Delivery::Complete,
            Some(e) => Delivery::SinkFailed(e),
        })
    }

    /// Consume a frame of exactly `expected` bytes without keeping it.
    pub fn drain(&mut self, expected: u64) -> Result<(), FrameError> {
        match self.recv_to(expected, &mut io::sink())? {
            Delivery::Complete => Ok(()),
            Delivery::SinkFailed(e) => Err(FrameError::Io(e)),
        }
    }
}
