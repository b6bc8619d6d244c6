//! Character-stream sessions.
//!
//! This module provides the pieces for driving a remote shell over a
//! single interleaved byte stream: prompt marker identity, the connection
//! state machine, buffered reading and the [`Connection`] itself.

mod connection;
mod id;
mod state;
mod stream;

pub use connection::{Connection, Handshake, RebootPolicy};
pub use id::PromptMarker;
pub use state::ConnectionState;
pub use stream::{CharStream, Segment};
