//! Transport abstractions.
//!
//! Two shapes of transport exist:
//! - [`DualChannelTransport`]: every command gets its own stdout and stderr
//!   streams plus an exit status (local processes).
//! - [`SingleChannelTransport`]: one long-lived interleaved byte stream
//!   shared by all commands (pty, telnet).

mod adb;
mod process;
mod pty;
mod telnet;

use std::io::{self, Read, Write};

pub use adb::AdbExecutor;
pub use process::ProcessTransport;
pub use pty::{default_shell, PtyTransport};
pub use telnet::{TelnetFilter, TelnetTransport, DEFAULT_TELNET_PORT};

/// Streams of one command started on a dual-channel transport.
pub struct ChannelSet {
    /// Standard input, if the transport exposes one.
    pub stdin: Option<Box<dyn Write + Send>>,
    pub stdout: Box<dyn Read + Send>,
    pub stderr: Box<dyn Read + Send>,
    /// Blocks until the command exits and returns its exit code.
    pub completion: Box<dyn FnOnce() -> io::Result<i32> + Send>,
}

/// Transport that runs each command with separate output channels.
pub trait DualChannelTransport: Send {
    /// Lifecycle hook run before the first command.
    fn open(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Lifecycle hook run when the shell is torn down.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Start `text` and return its channels.
    fn exec(&mut self, text: &str) -> io::Result<ChannelSet>;

    /// Human-readable target for log messages.
    fn describe(&self) -> String;
}

/// Transport exposing a single interleaved byte stream.
pub trait SingleChannelTransport: Send + 'static {
    /// Open the underlying stream.
    fn open(&mut self) -> io::Result<()>;

    /// Close the underlying stream.
    fn close(&mut self) -> io::Result<()>;

    /// Write all of `data`.
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Read available bytes. `Ok(0)` means end of stream.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Whether the remote end is ready to accept a connection, for
    /// transports that can tell. `None` means unknown.
    fn probe_ready(&mut self) -> Option<bool> {
        None
    }

    /// Human-readable target for log messages.
    fn describe(&self) -> String;
}

/// Exit code of a finished process, mapping signal deaths to `128 + n`.
pub(crate) fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
