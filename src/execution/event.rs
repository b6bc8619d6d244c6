//! Event queue between stream readers and the result consumer.
//!
//! Readers run on their own threads and push [`StreamEvent`]s; the
//! consumer pops them in arrival order. The queue is unbounded, so a
//! reader never blocks on a slow consumer.

use std::fmt;

use tokio::sync::mpsc;

/// Output channel of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Stdout,
    Stderr,
}

impl Channel {
    /// Wrap a decoded line into the matching event.
    pub fn line(self, text: String) -> StreamEvent {
        match self {
            Self::Stdout => StreamEvent::Stdout(text),
            Self::Stderr => StreamEvent::Stderr(text),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// One item flowing from a reader to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A stdout line, terminator stripped.
    Stdout(String),
    /// A stderr line, terminator stripped.
    Stderr(String),
    /// The command's exit code.
    ExitCode(i32),
    /// End-of-stream sentinel for one channel.
    Closed(Channel),
    /// The underlying stream failed; carried to the consumer.
    TransportError(String),
    /// Framing was malformed or incomplete.
    ProtocolError(String),
}

/// Create a connected sender/queue pair.
pub fn event_queue() -> (EventSender, EventQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, EventQueue { rx })
}

/// Producer half, cloned into each reader.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl EventSender {
    /// Push an event. Returns `false` if the consumer is gone, in which
    /// case the event is discarded.
    pub fn push(&self, event: StreamEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Consumer half, owned by a [`ShellResult`](crate::ShellResult).
#[derive(Debug)]
pub struct EventQueue {
    rx: mpsc::UnboundedReceiver<StreamEvent>,
}

impl EventQueue {
    /// Block until the next event arrives.
    ///
    /// Returns `None` once every sender has been dropped and the queue is
    /// empty. Must not be called from within an async runtime.
    pub fn pop(&mut self) -> Option<StreamEvent> {
        self.rx.blocking_recv()
    }

    /// Take the next event if one is already queued.
    pub fn try_pop(&mut self) -> Option<StreamEvent> {
        self.rx.try_recv().ok()
    }
}
