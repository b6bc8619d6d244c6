//! # citizen-shell
//!
//! Run shell commands on very different targets through one interface.
//!
//! A local process, a pseudo-terminal, a telnet session or an Android
//! device all return the same [`ShellResult`]: stdout and stderr lines,
//! the exit code, and optional fail-fast checking on either.
//!
//! ## Features
//!
//! - **Uniform results**: separated stdout/stderr and exit codes even over
//!   transports that only carry one interleaved character stream
//! - **Blocking or streaming**: drain everything up front, or iterate over
//!   output as it arrives
//! - **Checking policy**: fail on non-zero exit codes and/or stderr output,
//!   per shell or per call
//! - **File transfer**: push/pull with permission bits and md5 verification
//!   over nothing but the command channel
//!
//! ## Quick Start
//!
//! ```no_run
//! use citizen_shell::{Command, LocalShell, PtyShell};
//!
//! fn main() -> citizen_shell::Result<()> {
//!     // Initialize logging
//!     citizen_shell::logging::try_init().ok();
//!
//!     let mut shell = LocalShell::local().check_xc(true);
//!     let result = shell.run("echo Foo; >&2 echo Bar")?;
//!     assert_eq!(result.stdout()?, vec!["Foo"]);
//!     assert_eq!(result.stderr()?, vec!["Bar"]);
//!
//!     // Same behaviour over a pseudo-terminal
//!     let mut pty = PtyShell::pty("/bin/sh");
//!     pty.connect()?;
//!     for line in pty.run(Command::new("seq 3").wait(false))? {
//!         println!("{}", line?);
//!     }
//!     pty.disconnect()?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod execution;
pub mod logging;
pub mod session;
pub mod shell;
pub mod transfer;
pub mod transport;

// Re-export commonly used types
pub use error::{FailureReason, Result, ShellError};
pub use execution::{Channel, Command, Envelope, OutputLine, ShellResult, StreamEvent};
pub use session::{Connection, ConnectionState, Handshake, PromptMarker, RebootPolicy};
pub use shell::{
    AdbShell, DualChannelExecutor, Environment, Executor, LocalShell, NativeTransfer, Policy,
    PtyShell, Shell, TelnetShell,
};
pub use transport::{
    AdbExecutor, DualChannelTransport, ProcessTransport, PtyTransport, SingleChannelTransport,
    TelnetTransport,
};
