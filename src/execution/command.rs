//! Per-invocation command request.

use std::path::PathBuf;

use indexmap::IndexMap;

/// A command to be executed by a [`Shell`](crate::Shell).
///
/// Every optional field falls back to the shell's configured default
/// when left unset.
#[derive(Debug, Clone, Default)]
pub struct Command {
    /// The command line to execute.
    pub command_line: String,
    /// Working directory override (if any).
    pub working_dir: Option<PathBuf>,
    /// Local environment, overriding the shell's global environment for
    /// this call only.
    pub env: IndexMap<String, String>,
    /// Raise when the exit code is non-zero.
    pub check_xc: Option<bool>,
    /// Raise when anything is written to stderr.
    pub check_err: Option<bool>,
    /// Drain all output before returning.
    pub wait: Option<bool>,
}

impl Command {
    /// Create a new command with the given command line.
    pub fn new(command_line: impl Into<String>) -> Self {
        Self {
            command_line: command_line.into(),
            ..Default::default()
        }
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add multiple environment variables.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in vars {
            self.env.insert(k.into(), v.into());
        }
        self
    }

    /// Override exit code checking for this call.
    pub fn check_xc(mut self, check: bool) -> Self {
        self.check_xc = Some(check);
        self
    }

    /// Override stderr checking for this call.
    pub fn check_err(mut self, check: bool) -> Self {
        self.check_err = Some(check);
        self
    }

    /// Override blocking behaviour for this call.
    pub fn wait(mut self, wait: bool) -> Self {
        self.wait = Some(wait);
        self
    }
}

impl From<&str> for Command {
    fn from(command_line: &str) -> Self {
        Self::new(command_line)
    }
}

impl From<String> for Command {
    fn from(command_line: String) -> Self {
        Self::new(command_line)
    }
}
