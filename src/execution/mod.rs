//! Command execution plumbing.
//!
//! This module provides the pieces every shell backend shares:
//! - Command requests and the wire-text envelope
//! - The event queue between readers and consumers
//! - Background stream readers and the framed-stream decoder
//! - The lazily-drained [`ShellResult`]

mod command;
mod envelope;
mod event;
mod reader;
mod result;

pub use command::Command;
pub use envelope::{Envelope, ERR_TAG, OUT_TAG, XC_TAG};
pub use event::{event_queue, Channel, EventQueue, EventSender, StreamEvent};
pub use reader::{
    spawn_exit_watcher, spawn_framed_reader, spawn_line_reader, FrameDecoder, MAX_READ_RETRIES,
};
pub use result::{OutputLine, ShellResult};

pub(crate) use reader::{decode_line, is_transient, retry_delay};
