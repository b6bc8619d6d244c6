//! Error types for citizen-shell.

use std::fmt;

use thiserror::Error;

use crate::session::ConnectionState;

/// Why a command was considered failed by the checking policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The command exited with a non-zero exit code.
    ExitCode(i32),
    /// The command wrote to stderr.
    Stderr,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExitCode(code) => write!(f, "exit code {}", code),
            Self::Stderr => write!(f, "stderr output"),
        }
    }
}

/// Main error type for citizen-shell operations.
#[derive(Error, Debug)]
pub enum ShellError {
    /// The underlying byte stream failed while reading command output.
    #[error("transport error: {0}")]
    Transport(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Command output framing was malformed or incomplete.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Command failed according to the checking policy.
    #[error("'{command}' terminated with {reason}")]
    CommandFailed {
        command: String,
        reason: FailureReason,
    },

    /// Checksum mismatch or missing tooling during push/pull.
    #[error("file transfer error: {0}")]
    FileTransfer(String),

    /// Environment or working directory cannot be expressed as shell text.
    #[error("invalid environment: {0}")]
    InvalidEnvironment(String),

    /// Invalid connection state transition attempted.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        from: ConnectionState,
        to: ConnectionState,
    },

    /// Operation requires a connected session.
    #[error("not connected")]
    NotConnected,

    /// PTY-related error.
    #[error("PTY error: {0}")]
    Pty(String),

    /// Device did not come back within the allowed time.
    #[error("timed out waiting for device")]
    Timeout,

    /// A background reader panicked and its stream is lost.
    #[error("stream reader panicked")]
    ReaderPanicked,
}

impl ShellError {
    /// Build a `CommandFailed` error.
    pub fn command_failed(command: impl Into<String>, reason: FailureReason) -> Self {
        Self::CommandFailed {
            command: command.into(),
            reason,
        }
    }

    /// The exit code carried by a `CommandFailed` error, if any.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::CommandFailed {
                reason: FailureReason::ExitCode(code),
                ..
            } => Some(*code),
            _ => None,
        }
    }
}

/// Convenience Result type for citizen-shell operations.
pub type Result<T> = std::result::Result<T, ShellError>;
