//! Buffered reading over a single-channel transport.

use std::io;
use std::thread;

use tracing::warn;

use crate::execution::{is_transient, retry_delay, MAX_READ_RETRIES};
use crate::transport::SingleChannelTransport;

const READ_CHUNK: usize = 4096;

/// One unit read by [`CharStream::next_segment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// A full line, terminator included.
    Line(Vec<u8>),
    /// The marker was found; carries the bytes preceding it on its line.
    Marker(Vec<u8>),
    /// The stream ended; carries any unterminated bytes.
    Eof(Vec<u8>),
}

/// A single-channel transport plus a read-ahead buffer.
pub struct CharStream<T> {
    transport: T,
    buf: Vec<u8>,
    pos: usize,
}

impl<T: SingleChannelTransport> CharStream<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            buf: Vec::new(),
            pos: 0,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Open the transport with an empty buffer.
    pub fn open(&mut self) -> io::Result<()> {
        self.buf.clear();
        self.pos = 0;
        self.transport.open()
    }

    pub fn close(&mut self) -> io::Result<()> {
        self.transport.close()
    }

    /// Write `text` followed by a newline.
    pub fn write_line(&mut self, text: &str) -> io::Result<()> {
        let mut data = Vec::with_capacity(text.len() + 1);
        data.extend_from_slice(text.as_bytes());
        data.push(b'\n');
        self.transport.write(&data)
    }

    /// Refill the buffer. Returns `false` at end of stream.
    fn fill(&mut self) -> io::Result<bool> {
        let mut chunk = [0u8; READ_CHUNK];
        let mut attempt = 0;
        loop {
            match self.transport.read(&mut chunk) {
                Ok(0) => return Ok(false),
                Ok(n) => {
                    self.buf.drain(..self.pos);
                    self.pos = 0;
                    self.buf.extend_from_slice(&chunk[..n]);
                    return Ok(true);
                }
                Err(e) if is_transient(&e) && attempt < MAX_READ_RETRIES => {
                    attempt += 1;
                    warn!("transient read error (attempt {}): {}", attempt, e);
                    thread::sleep(retry_delay(attempt));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn next_byte(&mut self) -> io::Result<Option<u8>> {
        if self.pos == self.buf.len() && !self.fill()? {
            return Ok(None);
        }
        let byte = self.buf[self.pos];
        self.pos += 1;
        Ok(Some(byte))
    }

    /// Read one line, terminator included. Empty at end of stream.
    pub fn read_line(&mut self) -> io::Result<Vec<u8>> {
        let mut line = Vec::new();
        while let Some(byte) = self.next_byte()? {
            line.push(byte);
            if byte == b'\n' {
                break;
            }
        }
        Ok(line)
    }

    /// Read until `marker` and return the bytes before it.
    pub fn read_until(&mut self, marker: &[u8]) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(byte) = self.next_byte()? {
            out.push(byte);
            if out.ends_with(marker) {
                out.truncate(out.len() - marker.len());
                return Ok(out);
            }
        }
        Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "stream closed before {:?}",
                String::from_utf8_lossy(marker)
            ),
        ))
    }

    /// Read one line, stopping early if `marker` shows up first.
    pub fn next_segment(&mut self, marker: &[u8]) -> io::Result<Segment> {
        let mut out = Vec::new();
        while let Some(byte) = self.next_byte()? {
            out.push(byte);
            if byte == b'\n' {
                return Ok(Segment::Line(out));
            }
            if out.ends_with(marker) {
                out.truncate(out.len() - marker.len());
                return Ok(Segment::Marker(out));
            }
        }
        Ok(Segment::Eof(out))
    }
}
