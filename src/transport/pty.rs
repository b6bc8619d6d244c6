//! Pseudo-terminal transport using portable-pty.

use std::io::{self, Read, Write};

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tracing::{debug, warn};

use super::SingleChannelTransport;

/// Get the default shell for pty sessions.
///
/// A plain POSIX shell is used rather than `$SHELL` so user rc files
/// cannot interfere with the prompt.
pub fn default_shell() -> &'static str {
    "/bin/sh"
}

const PTY_ROWS: u16 = 24;
/// Wide enough that the terminal never wraps long command lines.
const PTY_COLS: u16 = 500;

struct PtySession {
    _master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    reader: Box<dyn Read + Send>,
    writer: Box<dyn Write + Send>,
}

/// A shell running under a local pseudo-terminal.
pub struct PtyTransport {
    program: String,
    session: Option<PtySession>,
}

impl PtyTransport {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            session: None,
        }
    }

    fn spawn(&self) -> io::Result<PtySession> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: PTY_ROWS,
                cols: PTY_COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(pty_error)?;

        let mut cmd = CommandBuilder::new(&self.program);
        cmd.env("TERM", "dumb");
        if let Ok(dir) = std::env::current_dir() {
            cmd.cwd(dir);
        }

        let child = pair.slave.spawn_command(cmd).map_err(pty_error)?;
        debug!(
            "spawned {} under pty (pid {:?})",
            self.program,
            child.process_id()
        );

        let reader = pair.master.try_clone_reader().map_err(pty_error)?;
        let writer = pair.master.take_writer().map_err(pty_error)?;

        Ok(PtySession {
            _master: pair.master,
            child,
            reader,
            writer,
        })
    }

    fn session(&mut self) -> io::Result<&mut PtySession> {
        self.session
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "pty is not open"))
    }
}

impl Default for PtyTransport {
    fn default() -> Self {
        Self::new(default_shell())
    }
}

fn pty_error(e: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.to_string())
}

impl SingleChannelTransport for PtyTransport {
    fn open(&mut self) -> io::Result<()> {
        if self.session.is_none() {
            self.session = Some(self.spawn()?);
        }
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        drop(session.writer);
        if session.child.try_wait()?.is_none() {
            if let Err(e) = session.child.kill() {
                warn!("failed to kill pty child: {}", e);
            }
        }
        session.child.wait()?;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let session = self.session()?;
        session.writer.write_all(data)?;
        session.writer.flush()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.session()?.reader.read(buf) {
            // Linux reports EIO on the master once the child side is gone
            #[cfg(unix)]
            Err(e) if e.raw_os_error() == Some(libc::EIO) => Ok(0),
            other => other,
        }
    }

    fn describe(&self) -> String {
        format!("pty:{}", self.program)
    }
}
