use crate::error::{Result, SautoError};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// JfwConfig
// ---------------------------------------------------------------------------

/// Address of a JFW attenuator box. Keys accept both the config file spelling
/// (`TCP_IP`) and the inventory column spelling (`ip`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JfwConfig {
    #[serde(rename = "ID", alias = "id")]
    pub id: i64,
    #[serde(rename = "NAME", alias = "name")]
    pub name: String,
    #[serde(rename = "TCP_IP", alias = "ip")]
    pub ip: String,
    #[serde(rename = "TCP_PORT", alias = "port")]
    pub port: u16,
    #[serde(rename = "LOCATION", alias = "location")]
    pub location: String,
    #[serde(rename = "JFW_TABLE_NAME", alias = "jfw_table_name")]
    pub table: String,
    #[serde(rename = "STATUS", alias = "status")]
    pub status: i64,
    /// Seconds to let the box answer before reading its reply.
    #[serde(rename = "DELAY", alias = "delay")]
    pub delay_secs: f64,
}

impl Default for JfwConfig {
    fn default() -> Self {
        Self {
            id: 1,
            name: "JFW1".to_string(),
            ip: "10.155.227.81".to_string(),
            port: 3001,
            location: String::new(),
            table: "jfw".to_string(),
            status: 0,
            delay_secs: 2.0,
        }
    }
}

impl JfwConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs_f64(self.delay_secs.max(0.0))
    }
}

// ---------------------------------------------------------------------------
// MxaConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MxaConfig {
    #[serde(rename = "ID", alias = "id")]
    pub id: i64,
    #[serde(rename = "NAME", alias = "name")]
    pub name: String,
    #[serde(rename = "TCP_IP", alias = "ip")]
    pub ip: String,
    #[serde(rename = "TELNET_PORT", alias = "port")]
    pub telnet_port: u16,
    #[serde(rename = "SOCKET_PORT", alias = "socket_port")]
    pub socket_port: u16,
    #[serde(rename = "LOCATION", alias = "location")]
    pub location: String,
    /// JFW port that sits in front of the analyzer input.
    #[serde(rename = "JFW_PORT", alias = "jfw_port")]
    pub jfw_port: u32,
    /// RF matrix output port wired to the analyzer.
    #[serde(rename = "MXA_PORT", alias = "mxa_port")]
    pub mxa_port: u32,
    #[serde(rename = "STATUS", alias = "status")]
    pub status: i64,
    /// Upper bound on how long a single SCPI reply may take.
    #[serde(rename = "DELAY", alias = "delay")]
    pub delay_secs: f64,
}

impl Default for MxaConfig {
    fn default() -> Self {
        Self {
            id: 1,
            name: "MXA".to_string(),
            ip: "10.155.226.218".to_string(),
            telnet_port: 5023,
            socket_port: 5025,
            location: String::new(),
            jfw_port: 24,
            mxa_port: 1,
            status: 0,
            delay_secs: 5.0,
        }
    }
}

impl MxaConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.telnet_port)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs_f64(self.delay_secs.max(0.0))
    }
}

// ---------------------------------------------------------------------------
// RfMatrixConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RfMatrixConfig {
    #[serde(rename = "ID", alias = "id")]
    pub id: i64,
    #[serde(rename = "NAME", alias = "name")]
    pub name: String,
    #[serde(rename = "TCP_IP", alias = "ip")]
    pub ip: String,
    #[serde(rename = "TCP_PORT", alias = "port")]
    pub port: u16,
    /// Read by older tooling; RBM replies are always read as one 8-byte frame.
    #[serde(rename = "BUFFER_SIZE", alias = "buffer_size")]
    pub buffer_size: usize,
    #[serde(rename = "STATUS", alias = "status")]
    pub status: i64,
    /// SSH login for QRB units, which are driven through their CLI.
    #[serde(rename = "SSH_USER", alias = "ssh_user")]
    pub ssh_user: String,
    #[serde(rename = "SSH_PASSWORD", alias = "ssh_password")]
    pub ssh_password: Option<String>,
    /// Highest attenuation a QRB path accepts, in dB.
    #[serde(rename = "MAX_ATTEN", alias = "max_atten")]
    pub max_atten: f64,
}

impl Default for RfMatrixConfig {
    fn default() -> Self {
        Self {
            id: 2,
            name: "RFM2".to_string(),
            ip: "10.155.220.77".to_string(),
            port: 9100,
            buffer_size: 1024,
            status: 0,
            ssh_user: "user".to_string(),
            ssh_password: Some("user".to_string()),
            max_atten: 95.0,
        }
    }
}

impl RfMatrixConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    pub fn is_qrb(&self) -> bool {
        self.name.contains("QRB")
    }
}

// ---------------------------------------------------------------------------
// LsuConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LsuConfig {
    #[serde(rename = "ID", alias = "id")]
    pub id: i64,
    #[serde(rename = "NAME", alias = "name")]
    pub name: String,
    /// Host or base URL of the LSU web service.
    #[serde(rename = "TCP_IP", alias = "ip")]
    pub ip: String,
    #[serde(rename = "USERNAME", alias = "username")]
    pub username: String,
    #[serde(rename = "PASSWORD", alias = "password")]
    pub password: String,
    #[serde(rename = "SSH_USER", alias = "ssh_user")]
    pub ssh_user: String,
    #[serde(rename = "SSH_PASSWORD", alias = "ssh_password")]
    pub ssh_password: Option<String>,
    /// Directory on the LSU holding the per-PPU cell configuration folders.
    #[serde(rename = "CELL_ROOT", alias = "cell_root")]
    pub cell_root: String,
    #[serde(rename = "TIMEOUT", alias = "timeout")]
    pub timeout_secs: u64,
}

impl Default for LsuConfig {
    fn default() -> Self {
        Self {
            id: 1,
            name: "LSU".to_string(),
            ip: "http://10.155.208.101".to_string(),
            username: "user".to_string(),
            password: "user".to_string(),
            ssh_user: "user".to_string(),
            ssh_password: Some("user".to_string()),
            cell_root: "/res/sdr/cfg".to_string(),
            timeout_secs: 10,
        }
    }
}

impl LsuConfig {
    /// Base URL with a scheme; bare hosts get `http://`.
    pub fn base_url(&self) -> String {
        let trimmed = self.ip.trim_end_matches('/');
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed.to_string()
        } else {
            format!("http://{trimmed}")
        }
    }

    /// Host part of the address, for SSH/SCP.
    pub fn host(&self) -> String {
        self.base_url()
            .trim_start_matches("http://")
            .trim_start_matches("https://")
            .split('/')
            .next()
            .unwrap_or_default()
            .to_string()
    }
}

// ---------------------------------------------------------------------------
// SqliteConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqliteConfig {
    #[serde(rename = "Master", alias = "master", default = "default_database")]
    pub master: PathBuf,
}

fn default_database() -> PathBuf {
    PathBuf::from(paths::DEFAULT_DATABASE)
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            master: default_database(),
        }
    }
}

// ---------------------------------------------------------------------------
// VendorRef
// ---------------------------------------------------------------------------

/// A vendor named in the `VENDORS` section, by inventory id or by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VendorRef {
    Id(i64),
    Name(String),
}

// ---------------------------------------------------------------------------
// WorkflowConfig
// ---------------------------------------------------------------------------

/// Timing and threshold constants of the vendor configuration workflow.
///
/// The defaults are the values tuned on the lab benches; every one of them can
/// be overridden from the `WORKFLOW` section of the device configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub mxa_wait_attempts: u32,
    pub mxa_wait_interval_secs: u64,
    pub evm_samples: u32,
    pub safe_atten_db: f64,
    pub cable_loss_db: f64,
    pub disconnect_atten_db: f64,
    pub qrb_safe_atten_db: f64,
    pub adjust_threshold_db: f64,
    pub min_atten_slack_db: f64,
    pub sync_loss_evm: f64,
    pub secondary_evm: f64,
    pub target_rsrp_dbm: f64,
    pub rsrp_tolerance_db: f64,
    pub rsrp_attempts: u32,
    pub rsrp_interval_secs: u64,
    pub balance_tolerance_db: f64,
    pub cell_dependency_attempts: u32,
    pub cell_dependency_interval_secs: u64,
    pub lsu_settle_secs: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            mxa_wait_attempts: 10,
            mxa_wait_interval_secs: 60,
            evm_samples: 3,
            safe_atten_db: 15.0,
            cable_loss_db: 3.0,
            disconnect_atten_db: 127.0,
            qrb_safe_atten_db: 15.0,
            adjust_threshold_db: 1.0,
            min_atten_slack_db: 5.0,
            sync_loss_evm: 5000.0,
            secondary_evm: 300.0,
            target_rsrp_dbm: -50.0,
            rsrp_tolerance_db: 3.0,
            rsrp_attempts: 10,
            rsrp_interval_secs: 60,
            balance_tolerance_db: 3.0,
            cell_dependency_attempts: 120,
            cell_dependency_interval_secs: 60,
            lsu_settle_secs: 10,
        }
    }
}

impl WorkflowConfig {
    /// A configuration with every wait collapsed to zero, for dry runs and tests.
    pub fn immediate() -> Self {
        Self {
            mxa_wait_interval_secs: 0,
            rsrp_interval_secs: 0,
            cell_dependency_interval_secs: 0,
            lsu_settle_secs: 0,
            ..Self::default()
        }
    }

    pub fn mxa_wait_interval(&self) -> Duration {
        Duration::from_secs(self.mxa_wait_interval_secs)
    }

    pub fn rsrp_interval(&self) -> Duration {
        Duration::from_secs(self.rsrp_interval_secs)
    }

    pub fn cell_dependency_interval(&self) -> Duration {
        Duration::from_secs(self.cell_dependency_interval_secs)
    }

    pub fn lsu_settle(&self) -> Duration {
        Duration::from_secs(self.lsu_settle_secs)
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Contents of `this_device_conf.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "JFW", default)]
    pub jfw: JfwConfig,
    #[serde(rename = "MXA", default)]
    pub mxa: MxaConfig,
    #[serde(rename = "RF_Matrix", default)]
    pub rf_matrix: RfMatrixConfig,
    #[serde(rename = "LSU", default)]
    pub lsu: LsuConfig,
    #[serde(rename = "SQLITE", default)]
    pub sqlite: SqliteConfig,
    /// Cell-number to vendor mapping used when the run is driven from the file.
    #[serde(
        rename = "VENDORS",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub vendors: BTreeMap<String, VendorRef>,
    #[serde(rename = "WORKFLOW", default)]
    pub workflow: WorkflowConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SautoError::ConfigNotFound(path.display().to_string()));
        }
        let data = std::fs::read_to_string(path)?;
        let cfg: Config = if is_yaml(path) {
            serde_yaml::from_str(&data)?
        } else {
            serde_json::from_str(&data)?
        };
        Ok(cfg)
    }

    /// Load `path` when it exists, otherwise fall back to the built-in defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(SautoError::ConfigNotFound(p)) => {
                tracing::warn!(path = %p, "configuration file not found, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = if is_yaml(path) {
            serde_yaml::to_string(self)?
        } else {
            serde_json::to_string_pretty(self)?
        };
        crate::io::atomic_write(path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        for (device, ip, port) in [
            ("JFW", &self.jfw.ip, self.jfw.port),
            ("MXA", &self.mxa.ip, self.mxa.telnet_port),
            ("RF_Matrix", &self.rf_matrix.ip, self.rf_matrix.port),
        ] {
            if ip.trim().is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("{device} has an empty TCP_IP"),
                });
            }
            if port == 0 {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("{device} has port 0"),
                });
            }
        }

        if self.lsu.ip.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "LSU has an empty TCP_IP".to_string(),
            });
        }

        let wf = &self.workflow;
        for (name, value) in [
            ("mxa_wait_attempts", wf.mxa_wait_attempts),
            ("rsrp_attempts", wf.rsrp_attempts),
            ("evm_samples", wf.evm_samples),
        ] {
            if value == 0 {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("WORKFLOW.{name} must be at least 1"),
                });
            }
        }

        if wf.rsrp_tolerance_db <= 0.0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "WORKFLOW.rsrp_tolerance_db <= 0 will adjust on every reading".to_string(),
            });
        }

        for (key, value) in &self.vendors {
            if !key.chars().any(|c| c.is_ascii_digit()) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("VENDORS key '{key}' carries no cell number"),
                });
            }
            if let VendorRef::Name(name) = value {
                if name.trim().is_empty() {
                    warnings.push(ConfigWarning {
                        level: WarnLevel::Error,
                        message: format!("VENDORS entry '{key}' has an empty name"),
                    });
                }
            }
        }

        warnings
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
