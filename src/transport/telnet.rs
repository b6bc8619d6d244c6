//! Telnet transport.
//!
//! Only enough of the protocol is spoken to get a clean byte stream: the
//! server may echo and suppress go-ahead, every other option is refused.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, trace};

use super::SingleChannelTransport;

pub const DEFAULT_TELNET_PORT: u16 = 23;
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;
const OPT_ECHO: u8 = 1;
const OPT_SGA: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum FilterState {
    #[default]
    Data,
    Iac,
    Negotiate(u8),
    Sub,
    SubIac,
}

/// Incremental IAC stripper. Commands may be split across reads.
#[derive(Debug, Default)]
pub struct TelnetFilter {
    state: FilterState,
}

impl TelnetFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split `input` into payload bytes and negotiation replies.
    pub fn feed(&mut self, input: &[u8], data: &mut Vec<u8>, replies: &mut Vec<u8>) {
        for &byte in input {
            self.state = match (self.state, byte) {
                (FilterState::Data, IAC) => FilterState::Iac,
                (FilterState::Data, 0) => FilterState::Data,
                (FilterState::Data, b) => {
                    data.push(b);
                    FilterState::Data
                }
                (FilterState::Iac, IAC) => {
                    data.push(IAC);
                    FilterState::Data
                }
                (FilterState::Iac, cmd @ (DO | DONT | WILL | WONT)) => FilterState::Negotiate(cmd),
                (FilterState::Iac, SB) => FilterState::Sub,
                (FilterState::Iac, _) => FilterState::Data,
                (FilterState::Negotiate(cmd), option) => {
                    if let Some(answer) = answer(cmd, option) {
                        trace!("telnet option {} {} -> {}", cmd, option, answer);
                        replies.extend_from_slice(&[IAC, answer, option]);
                    }
                    FilterState::Data
                }
                (FilterState::Sub, IAC) => FilterState::SubIac,
                (FilterState::Sub, _) => FilterState::Sub,
                (FilterState::SubIac, SE) => FilterState::Data,
                (FilterState::SubIac, _) => FilterState::Sub,
            };
        }
    }
}

fn answer(cmd: u8, option: u8) -> Option<u8> {
    match (cmd, option) {
        (WILL, OPT_ECHO | OPT_SGA) => Some(DO),
        (WILL, _) => Some(DONT),
        (DO, OPT_SGA) => Some(WILL),
        (DO, _) => Some(WONT),
        _ => None,
    }
}

/// Encode outgoing bytes: `\n` becomes `\r\n` and IAC is doubled.
fn encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 2);
    for &b in data {
        match b {
            b'\n' => out.extend_from_slice(b"\r\n"),
            IAC => out.extend_from_slice(&[IAC, IAC]),
            _ => out.push(b),
        }
    }
    out
}

/// A remote shell reached over telnet.
pub struct TelnetTransport {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
    filter: TelnetFilter,
    pending: Vec<u8>,
}

impl TelnetTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            stream: None,
            filter: TelnetFilter::new(),
            pending: Vec::new(),
        }
    }

    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "telnet is not open"))
    }
}

impl SingleChannelTransport for TelnetTransport {
    fn open(&mut self) -> io::Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = TcpStream::connect((self.host.as_str(), self.port))?;
        stream.set_nodelay(true)?;
        debug!("telnet connected to {}:{}", self.host, self.port);
        self.filter = TelnetFilter::new();
        self.pending.clear();
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(stream) = self.stream.take() {
            match stream.shutdown(Shutdown::Both) {
                Err(e) if e.kind() != io::ErrorKind::NotConnected => return Err(e),
                _ => {}
            }
        }
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let encoded = encode(data);
        let stream = self.stream()?;
        stream.write_all(&encoded)?;
        stream.flush()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut raw = [0u8; 4096];
        while self.pending.is_empty() {
            let n = self.stream()?.read(&mut raw)?;
            if n == 0 {
                return Ok(0);
            }
            let mut replies = Vec::new();
            self.filter.feed(&raw[..n], &mut self.pending, &mut replies);
            if !replies.is_empty() {
                self.stream()?.write_all(&replies)?;
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }

    fn probe_ready(&mut self) -> Option<bool> {
        let addrs = (self.host.as_str(), self.port).to_socket_addrs().ok()?;
        let ready = addrs
            .into_iter()
            .any(|addr| TcpStream::connect_timeout(&addr, PROBE_TIMEOUT).is_ok());
        Some(ready)
    }

    fn describe(&self) -> String {
        format!("telnet://{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn run(filter: &mut TelnetFilter, input: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut data = Vec::new();
        let mut replies = Vec::new();
        filter.feed(input, &mut data, &mut replies);
        (data, replies)
    }

    #[test]
    fn test_plain_data_passes_through() {
        let (data, replies) = run(&mut TelnetFilter::new(), b"login: ");
        assert_eq!(data, b"login: ");
        assert!(replies.is_empty());
    }

    #[test]
    fn test_negotiation_is_stripped_and_answered() {
        let input = [b'a', IAC, DO, 24, IAC, WILL, OPT_ECHO, IAC, WILL, 31, b'b'];
        let (data, replies) = run(&mut TelnetFilter::new(), &input);
        assert_eq!(data, b"ab");
        assert_eq!(
            replies,
            vec![IAC, WONT, 24, IAC, DO, OPT_ECHO, IAC, DONT, 31]
        );
    }

    #[test]
    fn test_command_split_across_reads() {
        let mut filter = TelnetFilter::new();
        let (data, replies) = run(&mut filter, &[b'x', IAC]);
        assert_eq!(data, b"x");
        assert!(replies.is_empty());
        let (data, replies) = run(&mut filter, &[DO, OPT_SGA, b'y']);
        assert_eq!(data, b"y");
        assert_eq!(replies, vec![IAC, WILL, OPT_SGA]);
    }

    #[test]
    fn test_subnegotiation_skipped() {
        let input = [IAC, SB, 24, 1, IAC, SE, b'z'];
        let (data, _) = run(&mut TelnetFilter::new(), &input);
        assert_eq!(data, b"z");
    }

    #[test]
    fn test_escaped_iac_and_nul() {
        let (data, _) = run(&mut TelnetFilter::new(), &[IAC, IAC, b'\r', 0]);
        assert_eq!(data, vec![IAC, b'\r']);
    }

    #[test]
    fn test_encode() {
        assert_eq!(encode(b"ls\n"), b"ls\r\n");
        assert_eq!(encode(&[IAC]), vec![IAC, IAC]);
    }

    #[test]
    fn test_transport_against_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            conn.write_all(&[IAC, DO, 24]).unwrap();
            conn.write_all(b"hello\r\n").unwrap();
            let mut reply = [0u8; 3];
            conn.read_exact(&mut reply).unwrap();
            let mut line = [0u8; 4];
            conn.read_exact(&mut line).unwrap();
            (reply, line)
        });

        let mut transport = TelnetTransport::new("127.0.0.1", port);
        transport.open().unwrap();
        let mut got = Vec::new();
        let mut buf = [0u8; 16];
        while !got.ends_with(b"\n") {
            let n = transport.read(&mut buf).unwrap();
            assert!(n > 0);
            got.extend_from_slice(&buf[..n]);
        }
        assert_eq!(got, b"hello\r\n");
        transport.write(b"ok\n").unwrap();

        let (reply, line) = server.join().unwrap();
        assert_eq!(reply, [IAC, WONT, 24]);
        assert_eq!(&line, b"ok\r\n");
        transport.close().unwrap();
    }

    #[test]
    fn test_probe_ready() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut transport = TelnetTransport::new("127.0.0.1", port);
        assert_eq!(transport.probe_ready(), Some(true));
        drop(listener);
        assert_eq!(transport.probe_ready(), Some(false));
    }
}
