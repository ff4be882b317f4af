//! Minimal Telnet line session for the JFW and MXA consoles.
//!
//! Both boxes speak plain text over port 23-style servers. We refuse every
//! option the server proposes (DO -> WONT, WILL -> DONT) and drop
//! subnegotiation, which leaves a raw byte stream of prompts and replies.

use crate::error::{Result, SautoError};
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

const POLL: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// IacFilter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum State {
    #[default]
    Data,
    Iac,
    Option(u8),
    Sub,
    SubIac,
}

/// Streaming Telnet command stripper. Keeps state across reads so a command
/// split between two TCP segments is still recognised.
#[derive(Debug, Default)]
pub struct IacFilter {
    state: State,
}

impl IacFilter {
    /// Split `input` into payload bytes and the negotiation replies to send.
    pub fn feed(&mut self, input: &[u8], data: &mut Vec<u8>, replies: &mut Vec<u8>) {
        for &b in input {
            self.state = match (self.state, b) {
                (State::Data, IAC) => State::Iac,
                (State::Data, _) => {
                    data.push(b);
                    State::Data
                }
                (State::Iac, IAC) => {
                    data.push(IAC);
                    State::Data
                }
                (State::Iac, DO | DONT | WILL | WONT) => State::Option(b),
                (State::Iac, SB) => State::Sub,
                (State::Iac, _) => State::Data,
                (State::Option(cmd), opt) => {
                    match cmd {
                        DO => replies.extend_from_slice(&[IAC, WONT, opt]),
                        WILL => replies.extend_from_slice(&[IAC, DONT, opt]),
                        _ => {}
                    }
                    State::Data
                }
                (State::Sub, IAC) => State::SubIac,
                (State::Sub, _) => State::Sub,
                (State::SubIac, SE) => State::Data,
                (State::SubIac, _) => State::Sub,
            };
        }
    }
}

// ---------------------------------------------------------------------------
// TelnetSession
// ---------------------------------------------------------------------------

pub struct TelnetSession {
    stream: TcpStream,
    filter: IacFilter,
    /// Payload read past the last prompt, handed out on the next read.
    pending: Vec<u8>,
    addr: String,
}

impl TelnetSession {
    pub fn connect(addr: &str, timeout: Duration) -> Result<Self> {
        let connect_err = |source| SautoError::Connect {
            addr: addr.to_string(),
            source,
        };
        let sock = addr
            .to_socket_addrs()
            .map_err(connect_err)?
            .next()
            .ok_or_else(|| {
                connect_err(std::io::Error::new(
                    ErrorKind::AddrNotAvailable,
                    "address did not resolve",
                ))
            })?;
        let stream = TcpStream::connect_timeout(&sock, timeout).map_err(connect_err)?;
        stream.set_nodelay(true)?;
        tracing::debug!(addr, "telnet connected");
        Ok(Self {
            stream,
            filter: IacFilter::default(),
            pending: Vec::new(),
            addr: addr.to_string(),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn send_line(&mut self, line: &str) -> Result<()> {
        tracing::debug!(addr = %self.addr, line, "telnet send");
        self.stream.write_all(line.as_bytes())?;
        self.stream.write_all(b"\r\n")?;
        self.stream.flush()?;
        Ok(())
    }

    /// Read one chunk, answering negotiation. `Ok(None)` means no data arrived
    /// within `wait`; `Ok(Some(0))` is end of stream.
    fn read_chunk(&mut self, wait: Duration) -> Result<Option<usize>> {
        self.stream
            .set_read_timeout(Some(wait.max(Duration::from_millis(1))))?;
        let mut buf = [0u8; 1024];
        match self.stream.read(&mut buf) {
            Ok(0) => Ok(Some(0)),
            Ok(n) => {
                let mut replies = Vec::new();
                let before = self.pending.len();
                self.filter.feed(&buf[..n], &mut self.pending, &mut replies);
                if !replies.is_empty() {
                    self.stream.write_all(&replies)?;
                }
                Ok(Some(self.pending.len() - before))
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Read until `prompt` appears and return the text up to and including it.
    pub fn read_until(&mut self, prompt: &str, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(pos) = find(&self.pending, prompt.as_bytes()) {
                let end = pos + prompt.len();
                let head: Vec<u8> = self.pending.drain(..end).collect();
                return Ok(String::from_utf8_lossy(&head).into_owned());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(SautoError::Protocol {
                    device: "telnet",
                    reason: format!("{} did not send '{prompt}' within {timeout:?}", self.addr),
                });
            }
            if let Some(0) = self.read_chunk((deadline - now).min(POLL))? {
                return Err(SautoError::Protocol {
                    device: "telnet",
                    reason: format!("{} closed the connection before '{prompt}'", self.addr),
                });
            }
        }
    }

    /// Collect everything the peer sends during `wait`.
    pub fn read_for(&mut self, wait: Duration) -> Result<String> {
        let deadline = Instant::now() + wait;
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            if let Some(0) = self.read_chunk((deadline - now).min(POLL))? {
                break;
            }
        }
        let out = std::mem::take(&mut self.pending);
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn filter_refuses_options_and_strips_subnegotiation() {
        let mut f = IacFilter::default();
        let mut data = Vec::new();
        let mut replies = Vec::new();
        let input = [
            b'h', IAC, DO, 1, b'i', IAC, WILL, 3, IAC, SB, 24, 1, IAC, SE, IAC, IAC, b'!',
        ];
        f.feed(&input, &mut data, &mut replies);
        assert_eq!(data, vec![b'h', b'i', IAC, b'!']);
        assert_eq!(replies, vec![IAC, WONT, 1, IAC, DONT, 3]);
    }

    #[test]
    fn filter_handles_split_commands() {
        let mut f = IacFilter::default();
        let mut data = Vec::new();
        let mut replies = Vec::new();
        f.feed(&[b'a', IAC], &mut data, &mut replies);
        f.feed(&[DO], &mut data, &mut replies);
        f.feed(&[31, b'b'], &mut data, &mut replies);
        assert_eq!(data, b"ab");
        assert_eq!(replies, vec![IAC, WONT, 31]);
    }

    #[test]
    fn read_until_prompt_keeps_remainder() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = thread::spawn(move || {
            let (mut s, _) = listener.accept().unwrap();
            s.write_all(&[IAC, WILL, 1]).unwrap();
            s.write_all(b"Welcome\r\nSCPI> extra").unwrap();
            let mut seen = Vec::new();
            let mut buf = [0u8; 64];
            while !seen.ends_with(b"bye\r\n") {
                match s.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => seen.extend_from_slice(&buf[..n]),
                }
            }
            assert!(seen.starts_with(&[IAC, DONT, 1]));
        });

        let mut t = TelnetSession::connect(&addr, Duration::from_secs(2)).unwrap();
        let head = t.read_until("SCPI>", Duration::from_secs(2)).unwrap();
        assert_eq!(head, "Welcome\r\nSCPI>");
        let rest = t.read_for(Duration::from_millis(100)).unwrap();
        assert_eq!(rest, " extra");
        t.send_line("bye").unwrap();
        server.join().unwrap();
    }

    #[test]
    fn read_until_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = thread::spawn(move || {
            let (_s, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(300));
        });
        let mut t = TelnetSession::connect(&addr, Duration::from_secs(2)).unwrap();
        let err = t.read_until("SCPI>", Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, SautoError::Protocol { .. }));
        server.join().unwrap();
    }

    #[test]
    fn connect_failure_names_address() {
        // Bind then drop to get a port nobody listens on.
        let addr = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().to_string()
        };
        match TelnetSession::connect(&addr, Duration::from_millis(200)) {
            Err(SautoError::Connect { addr: a, .. }) => assert_eq!(a, addr),
            other => panic!("expected connect error, got {:?}", other.map(|_| ())),
        }
    }
}
