//! Executor for dual-channel transports.

use std::thread::JoinHandle;

use tracing::debug;

use super::Executor;
use crate::error::ShellError;
use crate::execution::{
    event_queue, spawn_exit_watcher, spawn_line_reader, Channel, Envelope, EventQueue,
};
use crate::transport::DualChannelTransport;
use crate::Result;

/// Runs each command on its own channel set, with one reader per output
/// channel and a watcher for the exit status.
pub struct DualChannelExecutor<T: DualChannelTransport> {
    transport: T,
    opened: bool,
    workers: Vec<JoinHandle<()>>,
}

impl<T: DualChannelTransport> DualChannelExecutor<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            opened: false,
            workers: Vec::new(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T: DualChannelTransport> Executor for DualChannelExecutor<T> {
    fn execute(&mut self, envelope: &Envelope) -> Result<EventQueue> {
        let text = envelope.prefixed()?;
        if !self.opened {
            self.transport.open()?;
            self.opened = true;
        }
        let channels = self.transport.exec(&text)?;
        // Commands never read stdin
        drop(channels.stdin);

        self.workers.retain(|w| !w.is_finished());

        let (events, queue) = event_queue();
        self.workers
            .push(spawn_line_reader(channels.stdout, Channel::Stdout, events.clone())?);
        self.workers
            .push(spawn_line_reader(channels.stderr, Channel::Stderr, events.clone())?);
        self.workers
            .push(spawn_exit_watcher(channels.completion, events)?);
        debug!("{} workers in flight", self.workers.len());
        Ok(queue)
    }

    fn wait(&mut self) -> Result<()> {
        for worker in self.workers.drain(..) {
            worker.join().map_err(|_| ShellError::ReaderPanicked)?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.transport.describe()
    }
}

impl<T: DualChannelTransport> Drop for DualChannelExecutor<T> {
    fn drop(&mut self) {
        if self.opened {
            if let Err(e) = self.transport.close() {
                debug!("transport close failed: {}", e);
            }
        }
    }
}
