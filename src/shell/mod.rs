//! The user-facing shell.
//!
//! A [`Shell`] pairs an [`Executor`] with a global environment and a
//! default checking policy. Every backend (local process, pty, telnet,
//! adb) is a `Shell` over a different executor, so results behave the
//! same everywhere.
//!
//! # Example
//!
//! ```no_run
//! use citizen_shell::{Command, LocalShell};
//!
//! let mut shell = LocalShell::local().with_env("GREETING", "hello");
//! let result = shell.run("echo $GREETING").unwrap();
//! assert!(result == "hello");
//!
//! let result = shell.run(Command::new("exit 13").check_xc(false)).unwrap();
//! assert_eq!(result.exit_code().unwrap(), 13);
//! ```

mod dual;
mod env;

use std::path::Path;

use tracing::debug;

pub use dual::DualChannelExecutor;
pub use env::Environment;

use crate::execution::{Command, Envelope, EventQueue, ShellResult};
use crate::logging::log_stdin;
use crate::session::{Connection, Handshake, RebootPolicy};
use crate::transfer::ToolCache;
use crate::transport::{
    AdbExecutor, PtyTransport, ProcessTransport, SingleChannelTransport, TelnetTransport,
};
use crate::Result;

/// Checking and blocking behaviour of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    /// Fail on a non-zero exit code.
    pub check_xc: bool,
    /// Fail on any stderr output.
    pub check_err: bool,
    /// Drain all output before returning.
    pub wait: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            check_xc: false,
            check_err: false,
            wait: true,
        }
    }
}

impl Policy {
    /// Apply the per-call overrides of `command`.
    pub fn resolve(&self, command: &Command) -> Policy {
        Policy {
            check_xc: command.check_xc.unwrap_or(self.check_xc),
            check_err: command.check_err.unwrap_or(self.check_err),
            wait: command.wait.unwrap_or(self.wait),
        }
    }
}

/// Something that can run an envelope and report its output as events.
pub trait Executor {
    /// Start the command described by `envelope`.
    fn execute(&mut self, envelope: &Envelope) -> Result<EventQueue>;

    /// Block until every command started so far has been fully read.
    fn wait(&mut self) -> Result<()>;

    /// Direct file copy, for executors whose transport supports it.
    fn native_transfer(&mut self) -> Option<&mut dyn NativeTransfer> {
        None
    }

    /// Human-readable target for log messages.
    fn describe(&self) -> String;
}

/// File copy bypassing the command channel.
pub trait NativeTransfer {
    fn download(&mut self, remote: &str, local: &Path) -> Result<()>;
    fn upload(&mut self, local: &Path, remote: &str) -> Result<()>;
}

/// A shell over some executor.
pub struct Shell<E: Executor> {
    executor: E,
    env: Environment,
    policy: Policy,
    pub(crate) tools: ToolCache,
}

/// Shell running commands as local processes.
pub type LocalShell = Shell<DualChannelExecutor<ProcessTransport>>;
/// Shell talking to a local shell over a pseudo-terminal.
pub type PtyShell = Shell<Connection<PtyTransport>>;
/// Shell talking to a remote shell over telnet.
pub type TelnetShell = Shell<Connection<TelnetTransport>>;
/// Shell on an Android device through `adb`.
pub type AdbShell = Shell<AdbExecutor>;

impl<E: Executor> Shell<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            env: Environment::new(),
            policy: Policy::default(),
            tools: ToolCache::default(),
        }
    }

    /// Replace the default policy.
    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the default for exit code checking.
    pub fn check_xc(mut self, check: bool) -> Self {
        self.policy.check_xc = check;
        self
    }

    /// Set the default for stderr checking.
    pub fn check_err(mut self, check: bool) -> Self {
        self.policy.check_err = check;
        self
    }

    /// Set the default blocking behaviour.
    pub fn wait(mut self, wait: bool) -> Self {
        self.policy.wait = wait;
        self
    }

    /// Add a global environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.set(key, value);
        self
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env.set(key, value);
    }

    pub fn get_env(&self, key: &str) -> Option<&str> {
        self.env.get(key)
    }

    pub fn remove_env(&mut self, key: &str) -> Option<String> {
        self.env.remove(key)
    }

    pub fn contains_env(&self, key: &str) -> bool {
        self.env.contains(key)
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut E {
        &mut self.executor
    }

    /// Run a command.
    ///
    /// The global environment is snapshotted here, so later changes do not
    /// affect commands already started. In blocking mode the returned
    /// result is complete and the checking policy has been applied.
    pub fn run(&mut self, command: impl Into<Command>) -> Result<ShellResult> {
        let command = command.into();
        let policy = self.policy.resolve(&command);
        let envelope = Envelope::new(
            command.command_line.as_str(),
            self.env.merged(&command.env),
            command.working_dir.clone(),
        );
        debug!("running on {} with {:?}", self.executor.describe(), policy);
        log_stdin(&command.command_line);
        let queue = self.executor.execute(&envelope)?;
        ShellResult::new(command.command_line, queue, policy)
    }

    /// Block until every in-flight command has been fully read.
    pub fn wait_all(&mut self) -> Result<()> {
        self.executor.wait()
    }
}

impl LocalShell {
    /// Local shell using `/bin/sh`.
    pub fn local() -> Self {
        Shell::new(DualChannelExecutor::new(ProcessTransport::default()))
    }

    /// Local shell using `program -c` to interpret commands.
    pub fn local_with_program(program: impl Into<String>) -> Self {
        Shell::new(DualChannelExecutor::new(ProcessTransport::new(program)))
    }
}

impl PtyShell {
    /// Not connected yet; call [`Shell::connect`].
    pub fn pty(program: impl Into<String>) -> Self {
        Shell::new(Connection::new(
            PtyTransport::new(program),
            Handshake::default(),
        ))
    }
}

impl TelnetShell {
    /// Not connected yet; call [`Shell::connect`].
    pub fn telnet(host: impl Into<String>, port: u16, handshake: Handshake) -> Self {
        Shell::new(Connection::new(TelnetTransport::new(host, port), handshake))
    }
}

impl<T: SingleChannelTransport> Shell<Connection<T>> {
    pub fn connect(&mut self) -> Result<()> {
        self.tools.reset();
        self.executor.connect()
    }

    pub fn disconnect(&mut self) -> Result<()> {
        self.executor.disconnect()
    }

    pub fn is_connected(&self) -> bool {
        self.executor.is_connected()
    }

    /// Reboot the remote end and reconnect once it is back.
    pub fn reboot_and_reconnect(&mut self, policy: &RebootPolicy) -> Result<()> {
        self.tools.reset();
        self.executor.reboot_and_reconnect(policy)
    }
}

impl AdbShell {
    /// Not connected yet; call [`Shell::connect`].
    pub fn adb(target: impl Into<String>) -> Self {
        Shell::new(AdbExecutor::new(target))
    }

    pub fn connect(&mut self) -> Result<()> {
        self.tools.reset();
        self.executor.connect()
    }

    pub fn disconnect(&mut self) -> Result<()> {
        self.executor.disconnect()
    }

    pub fn is_connected(&self) -> bool {
        self.executor.is_connected()
    }
}
