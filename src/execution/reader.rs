//! Background stream readers.
//!
//! Each reader owns one byte stream, splits it into lines and pushes the
//! decoded events onto an [`EventSender`]. Every reader pushes its
//! end-of-stream sentinel(s) exactly once, on success and on failure.

use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Read};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use super::envelope::{ERR_TAG, OUT_TAG, XC_TAG};
use super::event::{Channel, EventSender, StreamEvent};
use crate::logging::log_spy;

/// Maximum retries for transient read errors.
pub const MAX_READ_RETRIES: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(50);
/// Untagged lines kept for diagnostics when framing fails.
const UNTAGGED_HISTORY: usize = 5;

pub(crate) fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Backoff before the given (1-based) retry attempt.
pub(crate) fn retry_delay(attempt: u32) -> Duration {
    RETRY_BACKOFF * attempt
}

/// Read one line, terminator included, into `buf`.
///
/// Returns `Ok(false)` at end of stream when nothing was read.
fn read_line_retrying<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<bool> {
    let mut attempt = 0;
    loop {
        match reader.read_until(b'\n', buf) {
            Ok(_) => return Ok(!buf.is_empty()),
            Err(e) if is_transient(&e) && attempt < MAX_READ_RETRIES => {
                attempt += 1;
                warn!("transient read error (attempt {}): {}", attempt, e);
                thread::sleep(retry_delay(attempt));
            }
            Err(e) => return Err(e),
        }
    }
}

/// Decode raw line bytes, dropping the line terminator only.
pub(crate) fn decode_line(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let text = text.strip_suffix('\n').unwrap_or(&text);
    text.trim_end_matches('\r').to_string()
}

/// Spawn a reader forwarding every line of `stream` as `channel` events.
pub fn spawn_line_reader<R>(
    stream: R,
    channel: Channel,
    events: EventSender,
) -> io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name(format!("{}-reader", channel))
        .spawn(move || {
            let mut reader = BufReader::new(stream);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match read_line_retrying(&mut reader, &mut buf) {
                    Ok(true) => {
                        events.push(channel.line(decode_line(&buf)));
                    }
                    Ok(false) => break,
                    Err(e) => {
                        events.push(StreamEvent::TransportError(format!(
                            "{} read failed: {}",
                            channel, e
                        )));
                        break;
                    }
                }
            }
            debug!("{} reader finished", channel);
            events.push(StreamEvent::Closed(channel));
        })
}

/// Spawn a watcher that reports the exit code produced by `wait`.
pub fn spawn_exit_watcher<F>(wait: F, events: EventSender) -> io::Result<JoinHandle<()>>
where
    F: FnOnce() -> io::Result<i32> + Send + 'static,
{
    thread::Builder::new()
        .name("exit-watcher".into())
        .spawn(move || match wait() {
            Ok(code) => {
                events.push(StreamEvent::ExitCode(code));
            }
            Err(e) => {
                events.push(StreamEvent::TransportError(format!(
                    "waiting for exit status failed: {}",
                    e
                )));
            }
        })
}

/// Decoder for the tagged single-stream framing.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    exit_seen: bool,
    untagged: VecDeque<String>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one line. Untagged lines (command echo, prompts, terminal
    /// noise) are logged and dropped.
    pub fn decode(&mut self, line: &str) -> Option<StreamEvent> {
        if let Some(rest) = line.strip_prefix(OUT_TAG) {
            Some(StreamEvent::Stdout(rest.to_string()))
        } else if let Some(rest) = line.strip_prefix(ERR_TAG) {
            Some(StreamEvent::Stderr(rest.to_string()))
        } else if let Some(rest) = line.strip_prefix(XC_TAG) {
            match rest.trim().parse::<i32>() {
                Ok(code) => {
                    self.exit_seen = true;
                    Some(StreamEvent::ExitCode(code))
                }
                Err(_) => Some(StreamEvent::ProtocolError(format!(
                    "malformed exit code line {:?}",
                    line
                ))),
            }
        } else {
            log_spy(line);
            if !line.is_empty() {
                if self.untagged.len() == UNTAGGED_HISTORY {
                    self.untagged.pop_front();
                }
                self.untagged.push_back(line.to_string());
            }
            None
        }
    }

    /// Whether the exit code line has been decoded.
    pub fn exit_seen(&self) -> bool {
        self.exit_seen
    }

    /// Close the frame. Reports a protocol error when the stream ended
    /// without an exit code line.
    pub fn finish(&self) -> Option<StreamEvent> {
        if self.exit_seen {
            return None;
        }
        let mut message = String::from("stream ended without an exit code line");
        if !self.untagged.is_empty() {
            let tail: Vec<&str> = self.untagged.iter().map(String::as_str).collect();
            message.push_str(&format!(" (last output: {})", tail.join(" | ")));
        }
        Some(StreamEvent::ProtocolError(message))
    }
}

/// Spawn a reader decoding a framed byte stream into stdout, stderr and
/// exit code events. Both channel sentinels are pushed at the end.
pub fn spawn_framed_reader<R>(stream: R, events: EventSender) -> io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name("framed-reader".into())
        .spawn(move || {
            let mut reader = BufReader::new(stream);
            let mut decoder = FrameDecoder::new();
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match read_line_retrying(&mut reader, &mut buf) {
                    Ok(true) => {
                        if let Some(event) = decoder.decode(&decode_line(&buf)) {
                            events.push(event);
                        }
                    }
                    Ok(false) => {
                        if let Some(event) = decoder.finish() {
                            events.push(event);
                        }
                        break;
                    }
                    Err(e) => {
                        events.push(StreamEvent::TransportError(format!(
                            "framed read failed: {}",
                            e
                        )));
                        break;
                    }
                }
            }
            events.push(StreamEvent::Closed(Channel::Stdout));
            events.push(StreamEvent::Closed(Channel::Stderr));
        })
}
