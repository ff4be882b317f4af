//! RF matrix crossbar.
//!
//! RBM units take fixed 8-byte binary frames over a raw TCP socket. QRB units
//! have per-path attenuators and are driven through their SSH command line
//! with `SA<in>B<out><dB>` text commands.

use crate::config::RfMatrixConfig;
use crate::error::{Result, SautoError};
use crate::shell::{RemoteHost, Ssh};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use super::RfSwitch;

const SOCKET_TIMEOUT: Duration = Duration::from_secs(5);
const FRAME_MARKER: u8 = 0x50;
/// RBM replies are always one frame.
const REPLY_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RbmCommand {
    /// Connect side-A port to side-B port.
    Connect,
    /// Ask whether a port is functioning.
    Health,
    /// Ask which port a port is connected to.
    Check,
}

impl RbmCommand {
    pub fn code(&self) -> u8 {
        match self {
            RbmCommand::Connect => 0x30,
            RbmCommand::Health => 0x31,
            RbmCommand::Check => 0x68,
        }
    }

    /// Whether `reply` acknowledges this command.
    pub fn accepted(&self, reply: &[u8]) -> bool {
        match self {
            RbmCommand::Connect | RbmCommand::Check => reply.get(7) == Some(&0x03),
            RbmCommand::Health => reply.get(6) == Some(&0x06),
        }
    }
}

/// Byte for a port name: `A`/`B` select a side, numbers 1 to 32 are
/// packed BCD (`"12"` is `0x12`).
pub fn encode_port(port: &str) -> Result<u8> {
    let p = port.trim();
    let p = p.strip_prefix(['x', 'X']).unwrap_or(p);
    match p.to_ascii_uppercase().as_str() {
        "A" | "0A" => return Ok(0x0A),
        "B" | "0B" => return Ok(0x0B),
        _ => {}
    }
    let n: u8 = p
        .parse()
        .map_err(|_| SautoError::InvalidPort(port.to_string()))?;
    if !(1..=32).contains(&n) {
        return Err(SautoError::InvalidPort(port.to_string()));
    }
    Ok(((n / 10) << 4) | (n % 10))
}

pub fn decode_bcd(b: u8) -> u32 {
    u32::from(b >> 4) * 10 + u32::from(b & 0x0F)
}

pub fn frame(cmd: RbmCommand, port_a: &str, port_b: &str) -> Result<[u8; 8]> {
    Ok([
        cmd.code(),
        FRAME_MARKER,
        0x00,
        encode_port(port_a)?,
        encode_port(port_b)?,
        0x00,
        0x00,
        0x00,
    ])
}

/// Two-digit QRB port number.
pub fn qrb_port(port: &str) -> Result<String> {
    let n: u32 = port
        .trim()
        .parse()
        .map_err(|_| SautoError::InvalidPort(port.to_string()))?;
    if n == 0 || n > 99 {
        return Err(SautoError::InvalidPort(port.to_string()));
    }
    Ok(format!("{n:02}"))
}

/// QRB attenuation field: nearest 0.5 dB within `0..=max`, as `ddd.d`.
pub fn qrb_attenuation(db: f64, max: f64) -> String {
    let stepped = if db.is_nan() { max } else { (db * 2.0).round() / 2.0 };
    // Adding 0.0 turns a rounded -0.0 into 0.0.
    format!("{:05.1}", stepped.clamp(0.0, max) + 0.0)
}

pub fn qrb_connect_command(input: &str, output: &str, db: f64, max: f64) -> Result<String> {
    Ok(format!(
        "SA{}B{}{}",
        qrb_port(input)?,
        qrb_port(output)?,
        qrb_attenuation(db, max)
    ))
}

/// Input `00` addresses every input feeding `output`.
pub fn qrb_reset_command(output: &str, max: f64) -> Result<String> {
    Ok(format!("SA00B{}{}", qrb_port(output)?, qrb_attenuation(max, max)))
}

pub struct RfMatrix {
    config: RfMatrixConfig,
    ssh: Option<Ssh>,
}

impl RfMatrix {
    pub fn new(config: RfMatrixConfig) -> Self {
        let ssh = config.is_qrb().then(|| {
            Ssh::new(RemoteHost {
                host: config.ip.clone(),
                user: config.ssh_user.clone(),
                password: config.ssh_password.clone(),
            })
        });
        Self { config, ssh }
    }

    /// Use `ssh` for QRB commands instead of the system binaries.
    pub fn with_ssh(config: RfMatrixConfig, ssh: Ssh) -> Self {
        Self {
            config,
            ssh: Some(ssh),
        }
    }

    pub fn config(&self) -> &RfMatrixConfig {
        &self.config
    }

    /// Send one RBM frame and return the raw reply.
    pub fn send_frame(&self, frame: &[u8; 8]) -> Result<Vec<u8>> {
        let addr = self.config.addr();
        tracing::info!(rf_matrix = %self.config.name, %addr, frame = ?frame, "sending RBM frame");
        let connect_err = |source| SautoError::Connect {
            addr: addr.clone(),
            source,
        };
        let sock = addr
            .to_socket_addrs()
            .map_err(connect_err)?
            .next()
            .ok_or_else(|| {
                connect_err(std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    "address did not resolve",
                ))
            })?;
        let mut stream = TcpStream::connect_timeout(&sock, SOCKET_TIMEOUT).map_err(connect_err)?;
        stream.set_read_timeout(Some(SOCKET_TIMEOUT))?;
        stream.write_all(frame)?;
        let mut buf = vec![0u8; REPLY_LEN];
        stream.read_exact(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => SautoError::Protocol {
                device: "rf_matrix",
                reason: format!("reply shorter than {REPLY_LEN} bytes"),
            },
            _ => SautoError::Io(e),
        })?;
        tracing::debug!(rf_matrix = %self.config.name, reply = ?buf, "RBM reply");
        Ok(buf)
    }

    fn rbm(&self, cmd: RbmCommand, port_a: &str, port_b: &str) -> Result<Vec<u8>> {
        let frame = frame(cmd, port_a, port_b)?;
        let reply = self.send_frame(&frame)?;
        if !cmd.accepted(&reply) {
            tracing::error!(rf_matrix = %self.config.name, ?cmd, port_a, port_b, "RBM command failed");
            return Err(SautoError::Rejected {
                device: "rf_matrix",
                command: format!("{cmd:?} {port_a} {port_b}"),
            });
        }
        Ok(reply)
    }

    pub fn connect_ports(&self, input: &str, output: &str) -> Result<()> {
        self.rbm(RbmCommand::Connect, input, output)?;
        tracing::info!(rf_matrix = %self.config.name, input, output, "connected");
        Ok(())
    }

    /// Whether `port` on `side` (`A` or `B`) reports itself functioning.
    pub fn health(&self, side: &str, port: &str) -> Result<bool> {
        match self.rbm(RbmCommand::Health, side, port) {
            Ok(_) => Ok(true),
            Err(SautoError::Rejected { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// The port that `port` on `side` is connected to.
    pub fn check(&self, side: &str, port: &str) -> Result<u32> {
        let reply = self.rbm(RbmCommand::Check, side, port)?;
        let peer = decode_bcd(reply[4]);
        tracing::info!(rf_matrix = %self.config.name, side, port, peer, "port connection");
        Ok(peer)
    }

    fn ssh(&self) -> Result<&Ssh> {
        self.ssh.as_ref().ok_or_else(|| SautoError::Protocol {
            device: "rf_matrix",
            reason: format!("{} is not a QRB switch", self.config.name),
        })
    }

    /// Run QRB CLI commands in one session.
    pub fn qrb_execute(&self, commands: &[String]) -> Result<String> {
        tracing::info!(rf_matrix = %self.config.name, ?commands, "sending QRB commands");
        self.ssh()?.session(commands)
    }

    pub fn qrb_connect(&self, input: &str, output: &str, db: f64) -> Result<()> {
        let cmd = qrb_connect_command(input, output, db, self.config.max_atten)?;
        self.qrb_execute(&[cmd])?;
        Ok(())
    }
}

impl RfSwitch for RfMatrix {
    fn is_qrb(&self) -> bool {
        self.config.is_qrb()
    }

    fn connect(&mut self, input: &str, output: &str, atten_db: Option<f64>) -> Result<()> {
        if self.is_qrb() {
            self.qrb_connect(input, output, atten_db.unwrap_or(self.config.max_atten))
        } else {
            if let Some(db) = atten_db {
                tracing::debug!(db, "RBM paths carry no attenuation, ignoring level");
            }
            self.connect_ports(input, output)
        }
    }

    fn reset_output(&mut self, output: &str) -> Result<()> {
        if !self.is_qrb() {
            return Ok(());
        }
        let cmd = qrb_reset_command(output, self.config.max_atten)?;
        self.qrb_execute(&[cmd])?;
        Ok(())
    }
}
