//! Local process transport.

use std::io;
use std::process::{Command, Stdio};

use tracing::debug;

use super::{exit_code_of, ChannelSet, DualChannelTransport};

/// Default program used to interpret command text.
pub const DEFAULT_PROGRAM: &str = "/bin/sh";

/// Runs every command as `<program> -c <text>` on the local machine.
#[derive(Debug, Clone)]
pub struct ProcessTransport {
    program: String,
}

impl ProcessTransport {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Default for ProcessTransport {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

impl DualChannelTransport for ProcessTransport {
    fn exec(&mut self, text: &str) -> io::Result<ChannelSet> {
        debug!("spawning {} -c {:?}", self.program, text);
        let mut child = Command::new(&self.program)
            .arg("-c")
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stderr not captured"))?;

        Ok(ChannelSet {
            stdin: None,
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            completion: Box::new(move || child.wait().map(exit_code_of)),
        })
    }

    fn describe(&self) -> String {
        format!("local:{}", self.program)
    }
}
