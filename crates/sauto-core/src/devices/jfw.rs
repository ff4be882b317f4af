//! JFW programmable step attenuator.
//!
//! The box accepts one Telnet login at a time and answers plain text commands
//! without a prompt, so every command opens its own session, waits the
//! configured delay and collects whatever was printed.

use crate::config::JfwConfig;
use crate::error::Result;
use crate::parse;
use crate::telnet::TelnetSession;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;

use super::Attenuator;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Highest step the attenuator accepts; also the "disconnected" setting.
pub const MAX_ATTEN_DB: u32 = 127;

static ATTEN_RE: OnceLock<Regex> = OnceLock::new();

fn atten_re() -> &'static Regex {
    ATTEN_RE.get_or_init(|| Regex::new(r"^\s*Atten\s*#*(\d+)\s*=*\s*(\d+)..").unwrap())
}

/// Parse `RAA` output into `port -> dB`. Lines that are not attenuator
/// readings are ignored.
pub fn parse_attenuations(text: &str) -> BTreeMap<u32, u32> {
    let mut out = BTreeMap::new();
    for line in text.lines() {
        let Some(groups) = parse::all_captures(atten_re(), line) else {
            continue;
        };
        if let (Ok(port), Ok(db)) = (groups[0].parse(), groups[1].parse()) {
            out.insert(port, db);
        }
    }
    out
}

/// Whole-dB step for `db`, clamped to what the box accepts.
pub fn attenuation_step(db: f64) -> u32 {
    if db.is_nan() || db <= 0.0 {
        0
    } else {
        (db.round() as u32).min(MAX_ATTEN_DB)
    }
}

pub struct Jfw {
    config: JfwConfig,
}

impl Jfw {
    pub fn new(config: JfwConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &JfwConfig {
        &self.config
    }

    /// Send `command` and return everything the box printed within the delay.
    pub fn execute(&self, command: &str) -> Result<String> {
        let addr = self.config.addr();
        tracing::info!(jfw = %self.config.name, %addr, command, "sending JFW command");
        let mut session = TelnetSession::connect(&addr, CONNECT_TIMEOUT)?;
        session.send_line(command)?;
        let reply = session.read_for(self.config.delay())?;
        tracing::debug!(jfw = %self.config.name, reply = %reply.trim(), "JFW reply");
        Ok(reply)
    }

    /// `SAR<port> <dB>`, the syntax older firmware also understands.
    pub fn set_attenuation(&self, port: u32, db: f64) -> Result<String> {
        let step = attenuation_step(db);
        if f64::from(step) != db {
            tracing::debug!(port, requested = db, step, "rounded JFW attenuation");
        }
        self.execute(&format!("SAR{port} {step}"))
    }

    /// Read every attenuator with `RAA`.
    pub fn health(&self) -> Result<BTreeMap<u32, u32>> {
        let text = self.execute("RAA")?;
        let readings = parse_attenuations(&text);
        for (port, db) in &readings {
            tracing::info!(jfw = %self.config.name, port, db, "attenuator reading");
        }
        if readings.is_empty() {
            tracing::warn!(jfw = %self.config.name, "RAA returned no attenuator readings");
        }
        Ok(readings)
    }

    pub fn attenuation(&self, port: u32) -> Result<Option<u32>> {
        Ok(self.health()?.get(&port).copied())
    }

    /// Reboot the box and wait `settle` for it to come back.
    pub fn reboot(&self, settle: Duration) -> Result<String> {
        let reply = self.execute("REBOOT")?;
        tracing::warn!(jfw = %self.config.name, settle_secs = settle.as_secs(), "JFW rebooting");
        std::thread::sleep(settle);
        Ok(reply)
    }
}

impl Attenuator for Jfw {
    fn set_attenuation(&mut self, port: u32, db: f64) -> Result<()> {
        Jfw::set_attenuation(self, port, db).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};
    use std::thread;

    /// Loopback stand-in for a JFW box: one command per connection, keeps
    /// attenuator state between connections.
    fn fake_jfw() -> (JfwConfig, Arc<Mutex<BTreeMap<u32, u32>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(BTreeMap::from([(1, 0), (24, 30)])));
        let shared = state.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let mut line = String::new();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                if reader.read_line(&mut line).is_err() {
                    continue;
                }
                let cmd = line.trim();
                let mut st = shared.lock().unwrap();
                let reply = if let Some(rest) = cmd.strip_prefix("SAR") {
                    let mut parts = rest.split_whitespace();
                    let p: u32 = parts.next().unwrap().parse().unwrap();
                    let db: u32 = parts.next().unwrap().parse().unwrap();
                    st.insert(p, db);
                    "OK\r\n".to_string()
                } else if cmd == "RAA" {
                    st.iter()
                        .map(|(p, db)| format!("Atten #{p} = {db}dB\r\n"))
                        .collect()
                } else {
                    "Unknown command\r\n".to_string()
                };
                let _ = stream.write_all(reply.as_bytes());
            }
        });
        let cfg = JfwConfig {
            ip: "127.0.0.1".into(),
            port,
            delay_secs: 1.0,
            ..JfwConfig::default()
        };
        (cfg, state)
    }

    #[test]
    fn parses_health_lines() {
        let text = "RAA\r\nAtten #1 = 10dB\r\nAtten #2 = 127dB\r\nJFW Industries\r\nAtten#3=5dB\r\n";
        let map = parse_attenuations(text);
        assert_eq!(map, BTreeMap::from([(1, 10), (2, 127), (3, 5)]));
    }

    #[test]
    fn ignores_mid_line_matches() {
        assert!(parse_attenuations("status: Atten #4 = 9dB").is_empty());
    }

    #[test]
    fn steps_round_and_clamp() {
        assert_eq!(attenuation_step(14.6), 15);
        assert_eq!(attenuation_step(-3.0), 0);
        assert_eq!(attenuation_step(400.0), MAX_ATTEN_DB);
        assert_eq!(attenuation_step(f64::NAN), 0);
    }

    #[test]
    fn health_reads_fake_box() {
        let (cfg, _) = fake_jfw();
        let jfw = Jfw::new(cfg);
        assert_eq!(jfw.health().unwrap(), BTreeMap::from([(1, 0), (24, 30)]));
    }

    #[test]
    fn setting_attenuation_twice_yields_same_value() {
        let (cfg, state) = fake_jfw();
        let jfw = Jfw::new(cfg);
        jfw.set_attenuation(24, 15.0).unwrap();
        jfw.set_attenuation(24, 15.0).unwrap();
        assert_eq!(jfw.attenuation(24).unwrap(), Some(15));
        assert_eq!(state.lock().unwrap()[&24], 15);
    }

    #[test]
    fn unreachable_box_is_a_connect_error() {
        let addr = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap()
        };
        let jfw = Jfw::new(JfwConfig {
            ip: addr.ip().to_string(),
            port: addr.port(),
            ..JfwConfig::default()
        });
        assert!(matches!(
            jfw.execute("RAA"),
            Err(crate::error::SautoError::Connect { .. })
        ));
    }
}
