//! LSU base-station simulator, driven through its JSON web service.
//!
//! Reads (`/lte/status`, `/lte/cellConfiguration`) are anonymous. Cell
//! changes need a session cookie from `/system/login`, which the client's
//! cookie store keeps for the rest of its life.
//!
//! Cells can be (re)configured two ways: over REST by deleting and
//! re-creating the radio cell, or by writing a cell file and moving it into
//! the PPU directory over SSH.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::{LsuConfig, WorkflowConfig};
use crate::error::{Result, SautoError};
use crate::inventory::{Tech, VendorPlan};
use crate::io;
use crate::paths;
use crate::shell::{RemoteHost, Ssh};

use super::CellSimulator;

// ---------------------------------------------------------------------------
// Value types
// ---------------------------------------------------------------------------

/// Cells currently bound to a user, split by duplex mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BusyCells {
    pub fdd: BTreeSet<u32>,
    pub tdd: BTreeSet<u32>,
}

impl BusyCells {
    pub fn all(&self) -> BTreeSet<u32> {
        self.fdd.union(&self.tdd).copied().collect()
    }

    pub fn contains(&self, cell: u32) -> bool {
        self.fdd.contains(&cell) || self.tdd.contains(&cell)
    }
}

/// Reference signal power seen by the two receive antennas, in dBm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CellRsrp {
    pub a0: f64,
    pub a1: f64,
}

impl CellRsrp {
    pub fn avg(&self) -> f64 {
        (self.a0 + self.a1) / 2.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellMode {
    #[default]
    Rest,
    File,
}

impl CellMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rest" => Some(CellMode::Rest),
            "file" => Some(CellMode::File),
            _ => None,
        }
    }
}

impl fmt::Display for CellMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CellMode::Rest => "rest",
            CellMode::File => "file",
        })
    }
}

/// Pacing for cell reconfiguration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellTiming {
    /// How often to re-check a busy paired cell before giving up.
    pub dependency_attempts: u32,
    pub dependency_interval: Duration,
    /// Pause after each change so the LSU can pick it up.
    pub settle: Duration,
}

impl CellTiming {
    pub fn from_workflow(wf: &WorkflowConfig) -> Self {
        Self {
            dependency_attempts: wf.cell_dependency_attempts,
            dependency_interval: wf.cell_dependency_interval(),
            settle: wf.lsu_settle(),
        }
    }

    pub fn immediate() -> Self {
        Self {
            dependency_attempts: 1,
            dependency_interval: Duration::ZERO,
            settle: Duration::ZERO,
        }
    }
}

impl Default for CellTiming {
    fn default() -> Self {
        Self::from_workflow(&WorkflowConfig::default())
    }
}

/// What a cell must look like for a vendor's radio to be received.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellPlan {
    pub cell: u32,
    pub tech: Tech,
    /// Bandwidth in MHz, e.g. `"20"` or `"1.4"`.
    pub bandwidth: String,
    pub dl_earfcn: i64,
    pub ul_earfcn: i64,
    pub aggr_id: i64,
    pub port_mask: u32,
}

impl CellPlan {
    pub fn from_vendor(plan: &VendorPlan) -> Self {
        Self {
            cell: plan.cell_id,
            tech: plan.tech,
            bandwidth: plan.bandwidth.clone(),
            dl_earfcn: plan.dl_earfcn,
            ul_earfcn: plan.ul_earfcn,
            aggr_id: plan.aggr_id,
            port_mask: plan.effective_port_mask(),
        }
    }

    /// Bandwidth as the LSU spells it.
    pub fn dl_bw(&self) -> String {
        format!("{}Mhz", self.bandwidth)
    }

    /// Cells are hosted in pairs on one SDR: 1+2, 3+4, ...
    pub fn paired_cell(&self) -> u32 {
        if self.cell % 2 == 1 {
            self.cell + 1
        } else {
            self.cell.saturating_sub(1)
        }
    }

    pub fn ppu(&self) -> String {
        format!("0-{}", self.cell)
    }

    fn local_cell(&self) -> u32 {
        self.cell.saturating_sub(1) % 2
    }

    fn sdr(&self) -> u32 {
        self.cell.saturating_sub(1) / 2
    }
}

/// Fields of `/lte/cellConfiguration` compared against a [`CellPlan`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellConfiguration {
    pub dlearfcn: i64,
    pub ulearfcn: i64,
    pub dl_bw: String,
    pub aggr_id: i64,
}

impl CellConfiguration {
    /// Pull the relevant fields out of a reply, looking at the top level
    /// first and then under `genericProperties`. Numbers may come as strings.
    pub fn from_json(value: &Value) -> Option<Self> {
        let field = |name: &str| {
            value
                .get(name)
                .or_else(|| value.get("genericProperties").and_then(|g| g.get(name)))
        };
        let int = |name: &str| -> Option<i64> {
            match field(name)? {
                Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            }
        };
        Some(Self {
            dlearfcn: int("dlearfcn")?,
            ulearfcn: int("ulearfcn")?,
            dl_bw: field("dlBw")?.as_str()?.to_string(),
            aggr_id: int("aggrId").unwrap_or(0),
        })
    }

    pub fn matches(&self, plan: &CellPlan) -> bool {
        self.dlearfcn == plan.dl_earfcn
            && self.ulearfcn == plan.ul_earfcn
            && self.dl_bw == plan.dl_bw()
            && self.aggr_id == plan.aggr_id
    }
}

// ---------------------------------------------------------------------------
// Status parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LteStatus {
    #[serde(default)]
    fdd_cell_status: Vec<CellStatus>,
    #[serde(default)]
    tdd_cell_status: Vec<CellStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CellStatus {
    generic_properties: StatusProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusProperties {
    cell_number: u32,
    #[serde(default)]
    bind_name: Option<String>,
    /// `null` or absent while the antenna decodes nothing.
    #[serde(default)]
    a0_rsrp: Option<f64>,
    #[serde(default)]
    a1_rsrp: Option<f64>,
}

impl StatusProperties {
    fn bound(&self) -> bool {
        self.bind_name.as_deref().is_some_and(|n| !n.is_empty())
    }

    fn rsrp(&self) -> Option<CellRsrp> {
        let a0 = self.a0_rsrp.unwrap_or(0.0);
        let a1 = self.a1_rsrp.unwrap_or(0.0);
        (a0 != 0.0 || a1 != 0.0).then_some(CellRsrp { a0, a1 })
    }
}

/// Busy cells from a `/lte/status` reply.
pub fn parse_busy_cells(status: &Value) -> Result<BusyCells> {
    let status: LteStatus = serde_json::from_value(status.clone())?;
    let mut busy = BusyCells::default();
    for (cells, set) in [
        (&status.fdd_cell_status, &mut busy.fdd),
        (&status.tdd_cell_status, &mut busy.tdd),
    ] {
        for cell in cells {
            let props = &cell.generic_properties;
            if props.bound() {
                tracing::info!(
                    cell = props.cell_number,
                    user = props.bind_name.as_deref().unwrap_or_default(),
                    "cell in use"
                );
                set.insert(props.cell_number);
            }
        }
    }
    Ok(busy)
}

/// Cells reporting a non-zero RSRP on either antenna.
pub fn parse_cell_rsrp(status: &Value) -> Result<BTreeMap<u32, CellRsrp>> {
    let status: LteStatus = serde_json::from_value(status.clone())?;
    Ok(status
        .fdd_cell_status
        .iter()
        .chain(&status.tdd_cell_status)
        .map(|c| &c.generic_properties)
        .filter_map(|p| p.rsrp().map(|r| (p.cell_number, r)))
        .collect())
}

// ---------------------------------------------------------------------------
// Cell rendering
// ---------------------------------------------------------------------------

/// Resource blocks for a bandwidth in MHz.
pub fn resource_blocks(bandwidth: &str) -> Option<u32> {
    let rb = match bandwidth.trim() {
        "1.4" => 6,
        "3" => 15,
        "5" => 25,
        "10" => 50,
        "15" => 75,
        "20" => 100,
        _ => return None,
    };
    Some(rb)
}

/// `lte<tech>.ue.<NN>.01`, the name the LSU looks for in a PPU directory.
pub fn cell_file_name(plan: &CellPlan) -> String {
    format!(
        "lte{}.ue.{:02}.01",
        plan.tech.as_str().to_ascii_lowercase(),
        plan.cell
    )
}

/// Body of a cell file.
pub fn render_cell_file(plan: &CellPlan) -> Result<String> {
    let rb = resource_blocks(&plan.bandwidth).ok_or_else(|| SautoError::CellConfig {
        cell: plan.cell,
        reason: format!("unsupported bandwidth {} MHz", plan.bandwidth),
    })?;
    let entries: Vec<(&str, String)> = vec![
        ("DL_BW", rb.to_string()),
        ("DL_ATTENUATION", "0".into()),
        ("ULEARFCN", plan.ul_earfcn.to_string()),
        ("DLEARFCN", plan.dl_earfcn.to_string()),
        ("UL_TEST", "NO_TEST".into()),
        ("SIBWIN", "0".into()),
        ("TA", "0".into()),
        ("AGGR_ID", plan.aggr_id.to_string()),
        ("INTERFERENCE_ID", "0".into()),
        ("EPDCCH", "0".into()),
        ("NBIOT", "0".into()),
        ("LOCAL_CELLID", plan.local_cell().to_string()),
        ("PORTMASK", plan.port_mask.to_string()),
        ("SDR", plan.sdr().to_string()),
        ("SPLIT_MODE", "0".into()),
        ("DL_RF_GAIN_0", "AUTO".into()),
        ("DL_RF_GAIN_1", "AUTO".into()),
        ("INTFTYPE_SDR00", "COMBINE_RX_TX".into()),
        ("FADING_SIM", String::new()),
        ("EX_CYCLE_PREFIX", "0".into()),
        ("PRACH_CFG", "1".into()),
        ("DOWNLINK_HARQ", "0".into()),
        ("VERBOSITY", "0".into()),
        ("DEBUG", "0".into()),
        ("PDCCH_TYPE", "15".into()),
        ("GP_1", "0".into()),
        ("GP_2", "0".into()),
        ("GP_3", "0".into()),
        ("GP_4", "0".into()),
        ("UL_RF_GAIN", "AUTO".into()),
        ("NBIOT_PRBON", "65535".into()),
        ("NBIOT_PRBUP", "65535".into()),
    ];

    let mut out = format!(
        "#\n# OBJECT: LTE CELL {cell} on PPU 0-{cell}\n#\n\n",
        cell = plan.cell
    );
    for (key, value) in entries {
        out.push_str(&format!("{key:<29}= {value}\n"));
    }
    Ok(out)
}

/// JSON body for `POST /lte/radioCell`.
pub fn rest_payload(plan: &CellPlan) -> Value {
    let local = plan.local_cell();
    json!({
        "cellNumber": plan.cell,
        "type": plan.tech.as_str(),
        "ppu": plan.ppu(),
        "genericProperties": {
            "cellNumber": plan.cell,
            "type": plan.tech.as_str(),
            "ppu": plan.ppu(),
            "dlBw": plan.dl_bw(),
            "dlAttenuation": 0,
            "ulearfcn": plan.ul_earfcn,
            "dlearfcn": plan.dl_earfcn,
            "ta": 0,
            "aggrId": plan.aggr_id,
            "interferenceId": 0,
            "epdcch": 0,
            "nbiot": 0,
            "localCellId0": local == 0,
            "localCellId1": local == 1,
            "sdr": plan.sdr(),
            "splitMode": "RF",
            "intfTypeSdr00": "COMBINE_RX_TX",
            "fadingSim": "",
            "exCyclePrefix": 0,
            "prachCfg": 1,
            "downlinkHarq": 0,
            "verbosity": 4_110_417_920u64,
            "debug": 0,
            "pdcchType": 15,
            "gp1": 0,
            "gp2": 0,
            "gp3": 0,
            "gp4": 0,
            "nbiotPrbDn": 65535,
            "nbiotPrbUp": 65535,
            "nbiotUlEarFcn": 4_294_967_295u64,
            "nbiotDlEarFcn": 4_294_967_295u64,
            "laa": 0,
        }
    })
}

// ---------------------------------------------------------------------------
// Lsu
// ---------------------------------------------------------------------------

pub struct Lsu {
    config: LsuConfig,
    base: String,
    http: Client,
    ssh: Ssh,
    staging_dir: PathBuf,
    logged_in: bool,
}

impl Lsu {
    pub fn new(config: LsuConfig) -> Result<Self> {
        let ssh = Ssh::new(RemoteHost {
            host: config.host(),
            user: config.ssh_user.clone(),
            password: config.ssh_password.clone(),
        });
        Self::with_ssh(config, ssh)
    }

    pub fn with_ssh(config: LsuConfig, ssh: Ssh) -> Result<Self> {
        let http = Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            base: config.base_url(),
            config,
            http,
            ssh,
            staging_dir: PathBuf::from(paths::CELL_STAGING_DIR),
            logged_in: false,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = dir.into();
        self
    }

    pub fn config(&self) -> &LsuConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    fn get_json(&self, path: &str) -> Result<Value> {
        let url = self.url(path);
        tracing::debug!(lsu = %self.config.name, %url, "GET");
        let value = self.http.get(&url).send()?.error_for_status()?.json()?;
        Ok(value)
    }

    /// Open a session; the cookie store keeps the cookie for later calls.
    pub fn login(&mut self) -> Result<()> {
        let url = self.url("system/login");
        tracing::info!(lsu = %self.config.name, user = %self.config.username, "logging in");
        self.http
            .post(&url)
            .json(&json!({
                "username": self.config.username,
                "password": self.config.password,
            }))
            .send()?
            .error_for_status()?;
        self.logged_in = true;
        Ok(())
    }

    fn ensure_login(&mut self) -> Result<()> {
        if !self.logged_in {
            self.login()?;
        }
        Ok(())
    }

    /// Raw `/lte/status` reply.
    pub fn status(&self) -> Result<Value> {
        self.get_json("lte/status")
    }

    pub fn busy_cells(&self) -> Result<BusyCells> {
        parse_busy_cells(&self.status()?)
    }

    pub fn cell_rsrp(&self) -> Result<BTreeMap<u32, CellRsrp>> {
        parse_cell_rsrp(&self.status()?)
    }

    /// Raw `/lte/cellConfiguration` reply for `cell`.
    pub fn cell_configuration_json(&self, cell: u32) -> Result<Value> {
        self.get_json(&format!(
            "lte/cellConfiguration?ppu=0-{cell}&cellNumber={cell}"
        ))
    }

    pub fn cell_configuration(&self, cell: u32) -> Result<Option<CellConfiguration>> {
        Ok(CellConfiguration::from_json(
            &self.cell_configuration_json(cell)?,
        ))
    }

    pub fn is_cell_configured(&self, plan: &CellPlan) -> Result<bool> {
        let current = self.cell_configuration(plan.cell)?;
        let ok = current.as_ref().is_some_and(|c| c.matches(plan));
        if !ok {
            tracing::info!(cell = plan.cell, wanted = ?plan, current = ?current, "cell not configured");
        }
        Ok(ok)
    }

    pub fn delete_cell(&mut self, cell: u32) -> Result<()> {
        self.ensure_login()?;
        let url = self.url(&format!("lte/radioCell?cellNumber={cell}"));
        tracing::info!(lsu = %self.config.name, cell, "deleting radio cell");
        self.http
            .delete(&url)
            .json(&json!({ "cellNumber": cell }))
            .send()?
            .error_for_status()?;
        Ok(())
    }

    pub fn create_cell(&mut self, plan: &CellPlan) -> Result<()> {
        self.ensure_login()?;
        let url = self.url("lte/radioCell");
        tracing::info!(lsu = %self.config.name, cell = plan.cell, tech = %plan.tech, "creating radio cell");
        self.http
            .post(&url)
            .json(&rest_payload(plan))
            .send()?
            .error_for_status()?;
        Ok(())
    }

    /// Block while `plan`'s cell or its SDR partner is bound to a user.
    fn wait_for_pair(&self, plan: &CellPlan, timing: &CellTiming) -> Result<()> {
        let paired = plan.paired_cell();
        let attempts = timing.dependency_attempts.max(1);
        for attempt in 1..=attempts {
            let busy = self.busy_cells()?;
            if !busy.contains(paired) && !busy.contains(plan.cell) {
                return Ok(());
            }
            tracing::warn!(
                cell = plan.cell,
                paired,
                attempt,
                attempts,
                "cell pair in use, waiting"
            );
            if attempt < attempts {
                std::thread::sleep(timing.dependency_interval);
            }
        }
        Err(SautoError::ResourceTimeout {
            resource: format!("LSU cells {} and {paired}", plan.cell),
            waited_secs: timing.dependency_interval.as_secs() * u64::from(attempts),
        })
    }

    fn apply_rest(&mut self, plan: &CellPlan, timing: &CellTiming) -> Result<()> {
        self.delete_cell(plan.cell)?;
        std::thread::sleep(timing.settle);
        self.create_cell(plan)?;
        std::thread::sleep(timing.settle);
        Ok(())
    }

    fn apply_file(&mut self, plan: &CellPlan, timing: &CellTiming) -> Result<()> {
        let name = cell_file_name(plan);
        let local = self.staging_dir.join(&name);
        io::atomic_write(&local, render_cell_file(plan)?.as_bytes())?;

        let ppu_dir = format!("{}/ppu.{}", self.config.cell_root, plan.ppu());
        if let Err(e) = self.ssh.exec(&format!("mv {ppu_dir}/lte* /tmp/")) {
            // An empty PPU directory makes the glob fail.
            tracing::warn!(cell = plan.cell, error = %e, "could not move old cell files aside");
        }
        std::thread::sleep(timing.settle);
        self.ssh.copy_to(&local, "/tmp/")?;
        self.ssh.exec(&format!("mv /tmp/{name} {ppu_dir}/"))?;
        std::thread::sleep(timing.settle);
        Ok(())
    }

    /// Make `plan.cell` match `plan`, then confirm the LSU reports it.
    pub fn configure_cell(
        &mut self,
        plan: &CellPlan,
        mode: CellMode,
        timing: &CellTiming,
    ) -> Result<()> {
        if self.is_cell_configured(plan)? {
            tracing::info!(cell = plan.cell, "cell already configured");
            return Ok(());
        }
        self.wait_for_pair(plan, timing)?;
        tracing::info!(cell = plan.cell, %mode, "configuring cell");
        match mode {
            CellMode::Rest => self.apply_rest(plan, timing)?,
            CellMode::File => self.apply_file(plan, timing)?,
        }
        if !self.is_cell_configured(plan)? {
            return Err(SautoError::CellConfig {
                cell: plan.cell,
                reason: "LSU does not report the requested configuration".into(),
            });
        }
        tracing::info!(cell = plan.cell, "cell configured");
        Ok(())
    }
}

impl CellSimulator for Lsu {
    fn busy_cells(&mut self) -> Result<BusyCells> {
        Lsu::busy_cells(self)
    }

    fn cell_rsrp(&mut self) -> Result<BTreeMap<u32, CellRsrp>> {
        Lsu::cell_rsrp(self)
    }

    fn configure_cell(&mut self, plan: &CellPlan, mode: CellMode, timing: &CellTiming) -> Result<()> {
        Lsu::configure_cell(self, plan, mode, timing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::tests::RecordingRunner;
    use mockito::{Matcher, Server};

    fn plan(cell: u32) -> CellPlan {
        CellPlan {
            cell,
            tech: Tech::Fdd,
            bandwidth: "20".into(),
            dl_earfcn: 8365,
            ul_earfcn: 26365,
            aggr_id: 0,
            port_mask: if cell % 2 == 1 { 3 } else { 12 },
        }
    }

    fn lsu_for(server: &Server) -> (Lsu, RecordingRunner) {
        let rec = RecordingRunner::default();
        let cfg = LsuConfig {
            ip: server.url(),
            ..LsuConfig::default()
        };
        let ssh = Ssh::with_runner(
            RemoteHost {
                host: "127.0.0.1".into(),
                user: "user".into(),
                password: None,
            },
            Box::new(rec.clone()),
        );
        (Lsu::with_ssh(cfg, ssh).unwrap(), rec)
    }

    const STATUS: &str = r#"{
        "fddCellStatus": [
            {"genericProperties": {"cellNumber": 3, "bindName": "alice", "a0Rsrp": -48.0, "a1Rsrp": -52.0}},
            {"genericProperties": {"cellNumber": 4, "bindName": ""}}
        ],
        "tddCellStatus": [
            {"genericProperties": {"cellNumber": 6, "bindName": "bob", "a1Rsrp": -60.5}},
            {"genericProperties": {"cellNumber": 7, "bindName": null, "a0Rsrp": 0.0}}
        ]
    }"#;

    fn config_reply(dl: i64, ul: i64, bw: &str) -> String {
        json!({"dlearfcn": dl, "ulearfcn": ul, "dlBw": bw, "aggrId": 0}).to_string()
    }

    #[test]
    fn busy_cells_follow_bind_name() {
        let busy = parse_busy_cells(&serde_json::from_str(STATUS).unwrap()).unwrap();
        assert_eq!(busy.fdd, BTreeSet::from([3]));
        assert_eq!(busy.tdd, BTreeSet::from([6]));
        assert_eq!(busy.all(), BTreeSet::from([3, 6]));
    }

    #[test]
    fn rsrp_skips_silent_cells() {
        let rsrp = parse_cell_rsrp(&serde_json::from_str(STATUS).unwrap()).unwrap();
        assert_eq!(rsrp.len(), 2);
        assert_eq!(rsrp[&3].avg(), -50.0);
        assert_eq!(rsrp[&6], CellRsrp { a0: 0.0, a1: -60.5 });
    }

    #[test]
    fn null_rsrp_means_not_decoding() {
        let status = json!({
            "fddCellStatus": [
                {"genericProperties": {"cellNumber": 1, "bindName": "carol", "a0Rsrp": null, "a1Rsrp": null}},
                {"genericProperties": {"cellNumber": 2, "bindName": "", "a0Rsrp": -45.0, "a1Rsrp": null}}
            ],
            "tddCellStatus": []
        });
        let rsrp = parse_cell_rsrp(&status).unwrap();
        assert_eq!(rsrp.len(), 1);
        assert_eq!(rsrp[&2], CellRsrp { a0: -45.0, a1: 0.0 });
        assert_eq!(parse_busy_cells(&status).unwrap().fdd, BTreeSet::from([1]));
    }

    #[test]
    fn pairs_cells_on_one_sdr() {
        assert_eq!(plan(3).paired_cell(), 4);
        assert_eq!(plan(4).paired_cell(), 3);
        assert_eq!(plan(1).paired_cell(), 2);
    }

    #[test]
    fn configuration_accepts_string_numbers_and_nesting() {
        let v = json!({"genericProperties": {"dlearfcn": "8365", "ulearfcn": 26365, "dlBw": "20Mhz", "aggrId": "0"}});
        let c = CellConfiguration::from_json(&v).unwrap();
        assert!(c.matches(&plan(3)));
        let other = json!({"dlearfcn": 8365, "ulearfcn": 26365, "dlBw": "10Mhz"});
        assert!(!CellConfiguration::from_json(&other).unwrap().matches(&plan(3)));
        assert!(CellConfiguration::from_json(&json!({})).is_none());
    }

    #[test]
    fn cell_file_layout() {
        let p = CellPlan {
            tech: Tech::Tdd,
            ..plan(4)
        };
        assert_eq!(cell_file_name(&p), "ltetdd.ue.04.01");
        assert_eq!(cell_file_name(&plan(12)), "ltefdd.ue.12.01");

        let body = render_cell_file(&p).unwrap();
        assert!(body.starts_with("#\n# OBJECT: LTE CELL 4 on PPU 0-4\n#\n\n"));
        assert!(body.contains("DL_BW                        = 100\n"));
        assert!(body.contains("LOCAL_CELLID                 = 1\n"));
        assert!(body.contains("PORTMASK                     = 12\n"));
        assert!(body.contains("SDR                          = 1\n"));
        assert!(body.contains("FADING_SIM                   = \n"));
        assert!(body.ends_with("NBIOT_PRBUP                  = 65535\n"));
    }

    #[test]
    fn unknown_bandwidth_is_rejected() {
        let p = CellPlan {
            bandwidth: "7".into(),
            ..plan(3)
        };
        assert!(matches!(
            render_cell_file(&p),
            Err(SautoError::CellConfig { cell: 3, .. })
        ));
    }

    #[test]
    fn rest_payload_fields() {
        let v = rest_payload(&plan(3));
        let g = &v["genericProperties"];
        assert_eq!(v["ppu"], "0-3");
        assert_eq!(v["type"], "FDD");
        assert_eq!(g["dlBw"], "20Mhz");
        assert_eq!(g["localCellId0"], true);
        assert_eq!(g["localCellId1"], false);
        assert_eq!(g["sdr"], 1);
        assert_eq!(g["gp4"], 0);
    }

    #[test]
    fn reads_busy_cells_over_http() {
        let mut server = Server::new();
        let m = server
            .mock("GET", "/lte/status")
            .with_header("content-type", "application/json")
            .with_body(STATUS)
            .create();
        let (lsu, _) = lsu_for(&server);
        assert_eq!(lsu.busy_cells().unwrap().all(), BTreeSet::from([3, 6]));
        m.assert();
    }

    #[test]
    fn configured_cell_is_left_alone() {
        let mut server = Server::new();
        server
            .mock("GET", "/lte/cellConfiguration")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("ppu".into(), "0-5".into()),
                Matcher::UrlEncoded("cellNumber".into(), "5".into()),
            ]))
            .with_body(config_reply(8365, 26365, "20Mhz"))
            .create();
        let post = server.mock("POST", "/lte/radioCell").expect(0).create();
        let (mut lsu, _) = lsu_for(&server);
        lsu.configure_cell(&plan(5), CellMode::Rest, &CellTiming::immediate())
            .unwrap();
        post.assert();
    }

    #[test]
    fn rest_mode_logs_in_and_recreates_the_cell() {
        let mut server = Server::new();
        server
            .mock("GET", "/lte/cellConfiguration")
            .match_query(Matcher::Any)
            .with_body(config_reply(100, 18100, "5Mhz"))
            .create();
        server
            .mock("GET", "/lte/status")
            .with_body(r#"{"fddCellStatus": [], "tddCellStatus": []}"#)
            .create();
        let login = server
            .mock("POST", "/system/login")
            .match_body(Matcher::PartialJson(json!({"username": "user"})))
            .with_header("set-cookie", "session=abc; Path=/")
            .with_body("{}")
            .expect(1)
            .create();
        let delete = server
            .mock("DELETE", "/lte/radioCell")
            .match_query(Matcher::UrlEncoded("cellNumber".into(), "5".into()))
            .with_body("{}")
            .expect(1)
            .create();
        let create = server
            .mock("POST", "/lte/radioCell")
            .match_body(Matcher::PartialJson(json!({
                "cellNumber": 5,
                "genericProperties": {"dlearfcn": 8365, "dlBw": "20Mhz"}
            })))
            .with_body("{}")
            .expect(1)
            .create();

        let (mut lsu, _) = lsu_for(&server);
        // The stub never reflects the change, so verification fails.
        let err = lsu
            .configure_cell(&plan(5), CellMode::Rest, &CellTiming::immediate())
            .unwrap_err();
        assert!(matches!(err, SautoError::CellConfig { cell: 5, .. }));
        login.assert();
        delete.assert();
        create.assert();
    }

    #[test]
    fn busy_partner_cell_times_out() {
        let mut server = Server::new();
        server
            .mock("GET", "/lte/cellConfiguration")
            .match_query(Matcher::Any)
            .with_body(config_reply(1, 2, "5Mhz"))
            .create();
        server.mock("GET", "/lte/status").with_body(STATUS).create();
        let create = server.mock("POST", "/lte/radioCell").expect(0).create();
        let (mut lsu, _) = lsu_for(&server);
        let timing = CellTiming {
            dependency_attempts: 2,
            ..CellTiming::immediate()
        };
        // Cell 4 is free but shares an SDR with busy cell 3.
        let err = lsu.configure_cell(&plan(4), CellMode::Rest, &timing).unwrap_err();
        assert!(matches!(err, SautoError::ResourceTimeout { .. }));
        create.assert();
    }

    #[test]
    fn file_mode_stages_and_moves_the_cell_file() {
        let mut server = Server::new();
        server
            .mock("GET", "/lte/cellConfiguration")
            .match_query(Matcher::Any)
            .with_body(config_reply(1, 2, "5Mhz"))
            .create();
        server
            .mock("GET", "/lte/status")
            .with_body(r#"{"fddCellStatus": [], "tddCellStatus": []}"#)
            .create();
        let dir = tempfile::TempDir::new().unwrap();
        let (lsu, rec) = lsu_for(&server);
        let mut lsu = lsu.with_staging_dir(dir.path());

        let result = lsu.configure_cell(&plan(3), CellMode::File, &CellTiming::immediate());
        assert!(matches!(result, Err(SautoError::CellConfig { .. })));

        let staged = std::fs::read_to_string(dir.path().join("ltefdd.ue.03.01")).unwrap();
        assert!(staged.contains("DLEARFCN                     = 8365"));

        let calls = rec.calls.lock().unwrap();
        let programs: Vec<&str> = calls.iter().map(|c| c.0.as_str()).collect();
        assert_eq!(programs, ["ssh", "scp", "ssh"]);
        assert_eq!(
            calls[0].1.last().unwrap(),
            "mv /res/sdr/cfg/ppu.0-3/lte* /tmp/"
        );
        assert_eq!(
            calls[2].1.last().unwrap(),
            "mv /tmp/ltefdd.ue.03.01 /res/sdr/cfg/ppu.0-3/"
        );
    }
}
