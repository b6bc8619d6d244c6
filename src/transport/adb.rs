//! Android Debug Bridge executor.
//!
//! Each command runs as its own `adb shell` invocation. The remote side
//! only gives back one merged stream, so commands are framed and decoded
//! the same way as on a character stream.

use std::borrow::Cow;
use std::path::Path;
use std::process::Command as Process;
use std::thread::{self, JoinHandle};

use tracing::debug;

use super::{DualChannelTransport, ProcessTransport};
use crate::error::ShellError;
use crate::execution::{event_queue, spawn_framed_reader, Envelope, EventQueue};
use crate::logging::log_oob;
use crate::shell::{Executor, NativeTransfer};
use crate::Result;

fn quote(text: &str) -> Cow<'_, str> {
    shell_escape::unix::escape(Cow::Borrowed(text))
}

/// Executor running commands on a device through `adb`.
pub struct AdbExecutor {
    target: String,
    program: String,
    process: ProcessTransport,
    connected: bool,
    workers: Vec<JoinHandle<()>>,
}

impl AdbExecutor {
    /// `target` is a device serial or a `host:port` network address.
    pub fn new(target: impl Into<String>) -> Self {
        Self::with_program(target, "adb")
    }

    /// Use a specific `adb` binary.
    pub fn with_program(target: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            program: program.into(),
            process: ProcessTransport::default(),
            connected: false,
            workers: Vec::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Run a local adb subcommand, returning its merged output.
    fn adb(&self, args: &[&str]) -> Result<(bool, String)> {
        debug!("{} {}", self.program, args.join(" "));
        let output = Process::new(&self.program).args(args).output()?;
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok((output.status.success(), text.trim().to_string()))
    }

    /// Attach to the device. Network targets are connected with
    /// `adb connect`; serials are checked with `adb get-state`.
    pub fn connect(&mut self) -> Result<()> {
        if self.connected {
            return Ok(());
        }
        log_oob(&format!("connecting to {}...", self.target));
        let (ok, text) = if self.target.contains(':') {
            self.adb(&["connect", &self.target])?
        } else {
            self.adb(&["-s", &self.target, "get-state"])?
        };
        let lower = text.to_lowercase();
        if !ok || lower.contains("unable to connect") || lower.contains("failed") || lower.contains("error")
        {
            return Err(ShellError::Transport(format!(
                "cannot reach {}: {}",
                self.target, text
            )));
        }
        self.connected = true;
        log_oob("connected!");
        Ok(())
    }

    pub fn disconnect(&mut self) -> Result<()> {
        if !self.connected {
            return Ok(());
        }
        log_oob(&format!("disconnecting from {}...", self.target));
        self.wait()?;
        if self.target.contains(':') {
            let (_, text) = self.adb(&["disconnect", &self.target])?;
            debug!("adb disconnect: {}", text);
        }
        self.connected = false;
        log_oob("disconnected!");
        Ok(())
    }

    fn copy(&self, args: &[&str]) -> Result<()> {
        let (ok, text) = self.adb(args)?;
        if ok {
            Ok(())
        } else {
            Err(ShellError::FileTransfer(text))
        }
    }
}

impl Executor for AdbExecutor {
    fn execute(&mut self, envelope: &Envelope) -> Result<EventQueue> {
        let framed = envelope.framed()?;
        if !self.connected {
            return Err(ShellError::NotConnected);
        }
        let text = format!(
            "exec {} -s {} shell {} 2>&1",
            quote(&self.program),
            quote(&self.target),
            quote(&framed)
        );
        let channels = self.process.exec(&text)?;

        self.workers.retain(|w| !w.is_finished());
        let (events, queue) = event_queue();
        self.workers.push(spawn_framed_reader(channels.stdout, events)?);
        let completion = channels.completion;
        self.workers.push(
            thread::Builder::new()
                .name("adb-reaper".into())
                .spawn(move || match completion() {
                    Ok(code) => debug!("adb exited with {}", code),
                    Err(e) => debug!("waiting for adb failed: {}", e),
                })?,
        );
        Ok(queue)
    }

    fn wait(&mut self) -> Result<()> {
        for worker in self.workers.drain(..) {
            worker.join().map_err(|_| ShellError::ReaderPanicked)?;
        }
        Ok(())
    }

    fn native_transfer(&mut self) -> Option<&mut dyn NativeTransfer> {
        Some(self)
    }

    fn describe(&self) -> String {
        format!("adb:{}", self.target)
    }
}

impl NativeTransfer for AdbExecutor {
    fn download(&mut self, remote: &str, local: &Path) -> Result<()> {
        let local = local.to_string_lossy();
        self.copy(&["-s", &self.target, "pull", remote, &local])
    }

    fn upload(&mut self, local: &Path, remote: &str) -> Result<()> {
        let local = local.to_string_lossy();
        self.copy(&["-s", &self.target, "push", &local, remote])
    }
}
