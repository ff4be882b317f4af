//! Keysight MXA signal analyzer over its SCPI Telnet console.

use crate::config::MxaConfig;
use crate::error::{Result, SautoError};
use crate::parse;
use crate::telnet::TelnetSession;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::Analyzer;

const PROMPT: &str = "SCPI>";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Field positions in the `READ:EVM?` result list.
const RS_EVM_FIELD: usize = 9;
const RS_POWER_FIELD: usize = 10;

const CRS_PORT_COUNT_CMD: &str = "EVM:DLINk:ANTenna:NCRS";
const CRS_REFERENCE_CMD: &str = "EVM:DLINk:ANTenna:CRSPort";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncType {
    /// Primary synchronisation signal; finds any cell.
    Pss,
    /// Reference signal of a known cell id; used for secondary ports.
    Rs,
}

impl SyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::Pss => "PSS",
            SyncType::Rs => "RS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().trim_matches('"').to_ascii_uppercase().as_str() {
            "PSS" => Some(SyncType::Pss),
            "RS" => Some(SyncType::Rs),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellId {
    Auto,
    Id(i64),
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellId::Auto => f.write_str("AUTO"),
            CellId::Id(id) => write!(f, "{id}"),
        }
    }
}

/// Averaged EVM measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvmResult {
    /// RS EVM in %rms.
    pub evm_avg: f64,
    /// RS transmit power in dBm.
    pub rs_power_avg: f64,
    /// Cell id the analyzer synchronised to, -1 when it could not decode one.
    pub pci: i64,
}

/// Text of the reply between the echoed command and the next prompt.
fn reply_text(raw: &str, command: &str) -> String {
    let body = raw.strip_suffix(PROMPT).unwrap_or(raw);
    body.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && *l != command)
        .last()
        .unwrap_or_default()
        .to_string()
}

/// Parse one `READ:EVM?` reply into (RS EVM, RS power).
pub fn parse_evm_fields(reply: &str) -> Result<(f64, f64)> {
    let fields: Vec<&str> = reply.split(',').collect();
    let field = |idx: usize, what: &str| {
        fields
            .get(idx)
            .and_then(|f| parse::instrument_f64(f))
            .ok_or_else(|| SautoError::Protocol {
                device: "mxa",
                reason: format!(
                    "READ:EVM? returned {} fields, no {what} at position {idx}",
                    fields.len()
                ),
            })
    };
    Ok((field(RS_EVM_FIELD, "RS EVM")?, field(RS_POWER_FIELD, "RS power")?))
}

pub struct Mxa {
    config: MxaConfig,
}

impl Mxa {
    pub fn new(config: MxaConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MxaConfig {
        &self.config
    }

    /// Send one SCPI line and return its reply text (empty for setters).
    pub fn execute(&self, command: &str) -> Result<String> {
        let addr = self.config.addr();
        let timeout = self.config.delay();
        tracing::info!(mxa = %self.config.name, %addr, command, "sending SCPI command");
        let mut session = TelnetSession::connect(&addr, CONNECT_TIMEOUT)?;
        session.read_until(PROMPT, timeout)?;
        session.send_line(command)?;
        let raw = session.read_until(PROMPT, timeout)?;
        let reply = reply_text(&raw, command);
        tracing::debug!(mxa = %self.config.name, command, reply = %reply, "SCPI reply");
        Ok(reply)
    }

    fn query(&self, command: &str) -> Result<String> {
        let reply = self.execute(command)?;
        if reply.is_empty() {
            return Err(SautoError::Protocol {
                device: "mxa",
                reason: format!("no reply to '{command}'"),
            });
        }
        Ok(reply)
    }

    fn query_f64(&self, command: &str) -> Result<f64> {
        let reply = self.query(command)?;
        parse::instrument_f64(&reply).ok_or_else(|| SautoError::Protocol {
            device: "mxa",
            reason: format!("'{command}' returned non-numeric '{reply}'"),
        })
    }

    pub fn identify(&self) -> Result<String> {
        self.query("*IDN?")
    }

    pub fn frequency_hz(&self) -> Result<f64> {
        self.query_f64("FREQ:CENT?")
    }

    pub fn set_frequency_mhz(&self, mhz: f64) -> Result<()> {
        self.execute(&format!("FREQ:CENT {mhz} MHz")).map(drop)
    }

    pub fn range(&self) -> Result<f64> {
        self.query_f64("POW:RANG?")
    }

    pub fn set_range(&self, range: f64) -> Result<()> {
        self.execute(&format!("POW:RANG {range}")).map(drop)
    }

    pub fn attenuation(&self) -> Result<f64> {
        self.query_f64("POW:ATT?")
    }

    pub fn set_attenuation(&self, db: f64) -> Result<()> {
        self.execute(&format!("POW:ATT {db}")).map(drop)
    }

    /// The configured or detected cell id; -1 when it is not a number.
    pub fn cell_id(&self) -> Result<i64> {
        let reply = self.query("EVM:DLINk:SYNC:CID?")?;
        Ok(parse::instrument_f64(&reply).map(|v| v as i64).unwrap_or(-1))
    }

    pub fn set_cell_id(&self, cid: CellId) -> Result<()> {
        self.execute(&format!("EVM:DLINk:SYNC:CID {cid}")).map(drop)
    }

    pub fn sync_type(&self) -> Result<SyncType> {
        let reply = self.query("EVM:DLINk:SYNC:TYPE?")?;
        SyncType::parse(&reply).ok_or_else(|| SautoError::Protocol {
            device: "mxa",
            reason: format!("unknown sync type '{reply}'"),
        })
    }

    pub fn set_sync_type(&self, sync: SyncType) -> Result<()> {
        self.execute(&format!("EVM:DLINk:SYNC:TYPE {}", sync.as_str()))
            .map(drop)
    }

    /// `LTE` for FDD or `LTETDD`.
    pub fn set_mode(&self, mode: &str) -> Result<()> {
        self.execute(&format!("INST:SEL {mode}")).map(drop)
    }

    pub fn recall(&self, register: u32) -> Result<()> {
        self.execute(&format!("*RCL {register}")).map(drop)
    }

    pub fn set_crs_ports(&self, count: u32) -> Result<()> {
        self.execute(&format!("{CRS_PORT_COUNT_CMD} {count}")).map(drop)
    }

    pub fn set_reference_crs_port(&self, port: u32) -> Result<()> {
        self.execute(&format!("{CRS_REFERENCE_CMD} {port}")).map(drop)
    }

    /// Average `samples` EVM reads and report the synchronised cell id.
    pub fn evm_result(&self, samples: u32) -> Result<EvmResult> {
        let samples = samples.max(1);
        let mut evm = 0.0;
        let mut power = 0.0;
        for i in 0..samples {
            let reply = self.query("READ:EVM?")?;
            let (e, p) = parse_evm_fields(&reply)?;
            tracing::info!(sample = i + 1, rs_evm = e, rs_power = p, "EVM sample");
            evm += e;
            power += p;
        }
        let result = EvmResult {
            evm_avg: evm / f64::from(samples),
            rs_power_avg: power / f64::from(samples),
            pci: self.cell_id()?,
        };
        tracing::info!(
            evm = result.evm_avg,
            rs_power = result.rs_power_avg,
            pci = result.pci,
            "EVM average"
        );
        Ok(result)
    }

    /// The full EVM result table, one entry per value.
    pub fn result_table(&self) -> Result<Vec<String>> {
        let reply = self.query("CALC:EVM:DATA4:TABL:STR?")?;
        Ok(reply
            .split(',')
            .map(|s| s.trim().trim_matches('"').to_string())
            .collect())
    }
}

impl Analyzer for Mxa {
    fn recall(&mut self, register: u32) -> Result<()> {
        Mxa::recall(self, register)
    }

    fn set_frequency_mhz(&mut self, mhz: f64) -> Result<()> {
        Mxa::set_frequency_mhz(self, mhz)
    }

    fn set_range(&mut self, range: f64) -> Result<()> {
        Mxa::set_range(self, range)
    }

    fn sync_type(&mut self) -> Result<SyncType> {
        Mxa::sync_type(self)
    }

    fn set_sync_type(&mut self, sync: SyncType) -> Result<()> {
        Mxa::set_sync_type(self, sync)
    }

    fn set_cell_id(&mut self, cid: CellId) -> Result<()> {
        Mxa::set_cell_id(self, cid)
    }

    fn set_crs_ports(&mut self, count: u32) -> Result<()> {
        Mxa::set_crs_ports(self, count)
    }

    fn set_reference_crs_port(&mut self, port: u32) -> Result<()> {
        Mxa::set_reference_crs_port(self, port)
    }

    fn evm_result(&mut self, samples: u32) -> Result<EvmResult> {
        Mxa::evm_result(self, samples)
    }

    fn result_table(&mut self) -> Result<Vec<String>> {
        Mxa::result_table(self)
    }
}
