//! Connection lifecycle over a single-channel transport.
//!
//! A connection installs a unique prompt marker as `PS1` and an empty
//! `PS2`, so continuation lines of multi-line commands carry no prompt.
//! Every command runs as a framed envelope. A background thread reads the framed
//! output up to the next prompt; it owns the stream while the command is
//! in flight and hands it back when done, so commands on one connection
//! are strictly sequential.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::id::PromptMarker;
use super::state::ConnectionState;
use super::stream::{CharStream, Segment};
use crate::error::ShellError;
use crate::execution::{
    decode_line, event_queue, Channel, Envelope, EventQueue, EventSender, FrameDecoder,
    StreamEvent,
};
use crate::logging::{log_oob, log_spy};
use crate::shell::Executor;
use crate::transport::SingleChannelTransport;
use crate::Result;

/// Prompts and credentials exchanged before the marker is installed.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub username: Option<String>,
    pub password: Option<String>,
    pub login_prompt: Option<String>,
    pub password_prompt: Option<String>,
    /// Text to wait for after login, before installing the marker.
    pub ready_prompt: Option<String>,
    /// Command sent on disconnect.
    pub logout_command: Option<String>,
}

impl Default for Handshake {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            login_prompt: None,
            password_prompt: None,
            ready_prompt: None,
            logout_command: Some("exit".into()),
        }
    }
}

/// Timing of [`Connection::reboot_and_reconnect`].
#[derive(Debug, Clone)]
pub struct RebootPolicy {
    pub command: String,
    /// How long to keep the old stream open after sending the command.
    pub disconnect_delay: Duration,
    /// Sleep between readiness checks.
    pub poll_interval: Duration,
    /// Give up after this long.
    pub timeout: Duration,
}

impl Default for RebootPolicy {
    fn default() -> Self {
        Self {
            command: "reboot".into(),
            disconnect_delay: Duration::from_secs(1),
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(60),
        }
    }
}

/// A stateful connection to a remote shell.
pub struct Connection<T: SingleChannelTransport> {
    state: ConnectionState,
    marker: PromptMarker,
    handshake: Handshake,
    target: String,
    stream: Option<CharStream<T>>,
    in_flight: Option<JoinHandle<CharStream<T>>>,
}

impl<T: SingleChannelTransport> Connection<T> {
    pub fn new(transport: T, handshake: Handshake) -> Self {
        Self {
            state: ConnectionState::default(),
            marker: PromptMarker::new(),
            target: transport.describe(),
            handshake,
            stream: Some(CharStream::new(transport)),
            in_flight: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// The prompt marker, stable across reconnects.
    pub fn marker(&self) -> &PromptMarker {
        &self.marker
    }

    /// Open the transport, log in and install the prompt marker.
    ///
    /// Calling this on an established connection is a no-op.
    pub fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.state.transition_to(ConnectionState::Connecting)?;
        log_oob(&format!("connecting to {}...", self.target));

        match self.establish() {
            Ok(()) => {
                self.state.transition_to(ConnectionState::Connected)?;
                log_oob("connected!");
                Ok(())
            }
            Err(e) => {
                if let Some(stream) = self.stream.as_mut() {
                    if let Err(close_err) = stream.close() {
                        debug!("close after failed connect: {}", close_err);
                    }
                }
                self.state.transition_to(ConnectionState::Disconnected)?;
                Err(e)
            }
        }
    }

    fn establish(&mut self) -> Result<()> {
        let handshake = self.handshake.clone();
        let marker = self.marker.clone();
        let stream = self.stream.as_mut().ok_or(ShellError::NotConnected)?;
        stream.open()?;

        if let (Some(prompt), Some(username)) = (&handshake.login_prompt, &handshake.username) {
            stream.read_until(prompt.as_bytes())?;
            stream.write_line(username)?;
        }
        if let (Some(prompt), Some(password)) = (&handshake.password_prompt, &handshake.password)
        {
            stream.read_until(prompt.as_bytes())?;
            stream.write_line(password)?;
        }
        if let Some(prompt) = &handshake.ready_prompt {
            stream.read_until(prompt.as_bytes())?;
        }

        stream.write_line(&format!("export PS1={} PS2=", marker))?;
        // Once for the echoed command, once for the prompt itself
        let echoed = stream.read_until(marker.as_bytes())?;
        log_spy(&String::from_utf8_lossy(&echoed));
        stream.read_until(marker.as_bytes())?;
        Ok(())
    }

    /// Take the stream back from the reader of the previous command,
    /// blocking until that command has finished.
    fn reclaim(&mut self) -> Result<()> {
        if let Some(handle) = self.in_flight.take() {
            match handle.join() {
                Ok(stream) => self.stream = Some(stream),
                Err(_) => {
                    self.state = ConnectionState::Disconnected;
                    return Err(ShellError::ReaderPanicked);
                }
            }
        }
        Ok(())
    }

    /// Send `text` as-is and start reading its framed output.
    pub fn execute_framed(&mut self, text: &str) -> Result<EventQueue> {
        if !self.state.can_execute() {
            return Err(ShellError::NotConnected);
        }
        self.reclaim()?;
        let mut stream = self.stream.take().ok_or(ShellError::NotConnected)?;
        if let Err(e) = stream.write_line(text) {
            self.stream = Some(stream);
            return Err(e.into());
        }

        let (events, queue) = event_queue();
        let marker = self.marker.clone();
        let spawned = thread::Builder::new()
            .name("char-reader".into())
            .spawn(move || {
                read_framed(&mut stream, &marker, &events);
                stream
            });
        match spawned {
            Ok(handle) => {
                self.in_flight = Some(handle);
                Ok(queue)
            }
            Err(e) => {
                // The stream went down with the closure
                self.state = ConnectionState::Disconnected;
                Err(e.into())
            }
        }
    }

    /// Log out and close the transport. The state always ends up
    /// `Disconnected`; calling this when not connected is a no-op.
    pub fn disconnect(&mut self) -> Result<()> {
        if !self.is_connected() {
            return Ok(());
        }
        self.state.transition_to(ConnectionState::Disconnecting)?;
        log_oob(&format!("disconnecting from {}...", self.target));

        let reclaimed = self.reclaim();
        if let Some(stream) = self.stream.as_mut() {
            if let Some(logout) = &self.handshake.logout_command {
                if let Err(e) = stream.write_line(logout) {
                    warn!("logout failed: {}", e);
                }
            }
            if let Err(e) = stream.close() {
                warn!("close failed: {}", e);
            }
        }
        self.state = ConnectionState::Disconnected;
        log_oob("disconnected!");
        reclaimed
    }

    /// Send a reboot command, drop the stream after a delay and reconnect
    /// once the remote end is back.
    pub fn reboot_and_reconnect(&mut self, policy: &RebootPolicy) -> Result<()> {
        if !self.state.can_execute() {
            return Err(ShellError::NotConnected);
        }
        self.reclaim()?;
        let mut stream = self.stream.take().ok_or(ShellError::NotConnected)?;
        self.state.transition_to(ConnectionState::Disconnecting)?;
        log_oob(&format!("rebooting {}...", self.target));

        let command = policy.command.clone();
        let delay = policy.disconnect_delay;
        let closer = thread::Builder::new()
            .name("reboot-closer".into())
            .spawn(move || {
                if let Err(e) = stream.write_line(&command) {
                    warn!("sending reboot command failed: {}", e);
                }
                thread::sleep(delay);
                if let Err(e) = stream.close() {
                    debug!("close during reboot: {}", e);
                }
                stream
            });
        let closer = match closer {
            Ok(handle) => handle,
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                return Err(e.into());
            }
        };
        let joined = closer.join();
        self.state.transition_to(ConnectionState::Disconnected)?;
        self.stream = Some(joined.map_err(|_| ShellError::ReaderPanicked)?);

        let deadline = Instant::now() + policy.timeout;
        loop {
            thread::sleep(policy.poll_interval);
            let ready = self
                .stream
                .as_mut()
                .and_then(|s| s.transport_mut().probe_ready())
                .unwrap_or(true);
            if ready {
                match self.connect() {
                    Ok(()) => return Ok(()),
                    Err(e) => debug!("reconnect attempt failed: {}", e),
                }
            }
            if Instant::now() >= deadline {
                log_oob(&format!("{} did not come back", self.target));
                return Err(ShellError::Timeout);
            }
        }
    }
}

/// Read one command's framed output up to the next prompt marker.
fn read_framed<T: SingleChannelTransport>(
    stream: &mut CharStream<T>,
    marker: &PromptMarker,
    events: &EventSender,
) {
    let mut decoder = FrameDecoder::new();
    let mut decode = |raw: &[u8]| {
        if let Some(event) = decoder.decode(&decode_line(raw)) {
            events.push(event);
        }
    };
    let outcome = loop {
        match stream.next_segment(marker.as_bytes()) {
            Ok(Segment::Line(line)) => decode(&line),
            Ok(Segment::Marker(rest)) => {
                if !rest.is_empty() {
                    decode(&rest);
                }
                break None;
            }
            Ok(Segment::Eof(rest)) => {
                if !rest.is_empty() {
                    decode(&rest);
                }
                break Some("stream closed before the prompt came back".to_string());
            }
            Err(e) => break Some(format!("read failed: {}", e)),
        }
    };
    match outcome {
        Some(message) => {
            events.push(StreamEvent::TransportError(message));
        }
        None => {
            if let Some(event) = decoder.finish() {
                events.push(event);
            }
        }
    }
    events.push(StreamEvent::Closed(Channel::Stdout));
    events.push(StreamEvent::Closed(Channel::Stderr));
}

impl<T: SingleChannelTransport> Executor for Connection<T> {
    fn execute(&mut self, envelope: &Envelope) -> Result<EventQueue> {
        let framed = envelope.framed()?;
        self.execute_framed(&framed)
    }

    fn wait(&mut self) -> Result<()> {
        self.reclaim()
    }

    fn describe(&self) -> String {
        self.target.clone()
    }
}
