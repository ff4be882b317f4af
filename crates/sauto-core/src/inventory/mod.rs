//! SQLite inventory of bench devices and radios under test.
//!
//! Every device client can be built from a row here, the vendor configuration
//! workflow reads its [`VendorPlan`]s from the vendor join, and the MXA lease
//! lives in the `mxa` table (see [`lease`]).

pub mod lease;
mod record;
mod schema;

pub use lease::{LeaseRegistry, MxaLease};
pub use record::Record;

use crate::config::{JfwConfig, LsuConfig, MxaConfig, RfMatrixConfig};
use crate::error::{Result, SautoError};
use rusqlite::{params, Connection, ToSql};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

// ---------------------------------------------------------------------------
// Tech
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tech {
    Fdd,
    Tdd,
}

impl Tech {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FDD" => Some(Tech::Fdd),
            "TDD" => Some(Tech::Tdd),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tech::Fdd => "FDD",
            Tech::Tdd => "TDD",
        }
    }

    /// Analyzer application selected for this duplex mode.
    pub fn mxa_mode(&self) -> &'static str {
        match self {
            Tech::Fdd => "LTE",
            Tech::Tdd => "LTETDD",
        }
    }

    /// Saved analyzer state holding the EVM setup for this duplex mode.
    pub fn recall_register(&self) -> u32 {
        match self {
            Tech::Fdd => 3,
            Tech::Tdd => 1,
        }
    }
}

impl fmt::Display for Tech {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// VendorPlan
// ---------------------------------------------------------------------------

/// Everything the workflow needs to bring one radio under test onto an LSU
/// cell: the `vendor` row joined with its `pre_config_vendor` patch and the
/// `rf_matrix_db` entry behind the chosen RF matrix output port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorPlan {
    pub id: i64,
    pub name: String,
    /// Centre frequency in MHz.
    pub freq: f64,
    pub pci: i64,
    pub tech: Tech,
    /// Bandwidth in MHz as stored, e.g. `"20"` or `"1.4"`.
    pub bandwidth: String,
    pub dl_earfcn: i64,
    pub ul_earfcn: i64,
    /// Expected RS power loss in dB.
    pub exp_atten: f64,
    /// Starting attenuation; `None` means the safe default.
    pub atten: Option<f64>,
    pub rf_matrix_id: i64,
    pub rf_matrix_input_port: String,
    pub rf_matrix_output_port: String,
    pub mxa_id: i64,
    pub lsu_id: i64,
    pub aggr_id: i64,
    pub tag: Option<String>,
    pub jfw_id: Option<i64>,
    pub jfw_port: Option<u32>,
    pub cell_id: u32,
    pub port_mask: Option<u32>,
}

const PLAN_SELECT: &str = "
SELECT DISTINCT vendor.id, vendor.name, vendor.freq, vendor.pci, vendor.tech, vendor.BW,
       vendor.DLEARFCN, vendor.ULEARFCN, vendor.exp_atten, vendor.atten,
       vendor.rf_matrix_id, vendor.rf_matrix_input_port,
       pre_config_vendor.rf_matrix_output_port, pre_config_vendor.mxa_id,
       pre_config_vendor.lsu_id, pre_config_vendor.aggr_id, pre_config_vendor.tag,
       rf_matrix_db.jfw_id, rf_matrix_db.jfw_port, rf_matrix_db.CELLID
FROM vendor
JOIN pre_config_vendor ON pre_config_vendor.vendor_id = vendor.id
JOIN rf_matrix_db ON rf_matrix_db.rf_matrix_id = vendor.rf_matrix_id
                 AND rf_matrix_db.port = pre_config_vendor.rf_matrix_output_port";

impl VendorPlan {
    pub fn from_record(r: &Record) -> Result<Self> {
        let id = r
            .i64("id")
            .ok_or_else(|| SautoError::Inventory("vendor row without id".into()))?;
        let missing = |col: &str| SautoError::Inventory(format!("vendor {id} has no {col}"));

        let tech_text = r.text("tech").ok_or_else(|| missing("tech"))?;
        let tech = Tech::parse(&tech_text).ok_or_else(|| {
            SautoError::Inventory(format!("vendor {id} has unknown tech '{tech_text}'"))
        })?;
        let cell_id = r.i64("cellid").ok_or_else(|| missing("CELLID"))?;

        Ok(Self {
            id,
            name: r.text("name").unwrap_or_default(),
            freq: r.f64("freq").ok_or_else(|| missing("freq"))?,
            pci: r.i64("pci").unwrap_or(-1),
            tech,
            bandwidth: r.text("bw").ok_or_else(|| missing("BW"))?,
            dl_earfcn: r.i64("dlearfcn").ok_or_else(|| missing("DLEARFCN"))?,
            ul_earfcn: r.i64("ulearfcn").ok_or_else(|| missing("ULEARFCN"))?,
            exp_atten: r.f64("exp_atten").ok_or_else(|| missing("exp_atten"))?,
            atten: r.f64("atten"),
            rf_matrix_id: r.i64("rf_matrix_id").ok_or_else(|| missing("rf_matrix_id"))?,
            rf_matrix_input_port: r
                .text("rf_matrix_input_port")
                .ok_or_else(|| missing("rf_matrix_input_port"))?,
            rf_matrix_output_port: r
                .text("rf_matrix_output_port")
                .ok_or_else(|| missing("rf_matrix_output_port"))?,
            mxa_id: r.i64("mxa_id").ok_or_else(|| missing("mxa_id"))?,
            lsu_id: r.i64("lsu_id").ok_or_else(|| missing("lsu_id"))?,
            aggr_id: r.i64("aggr_id").unwrap_or(0),
            tag: r.text("tag"),
            jfw_id: r.i64("jfw_id").filter(|v| *v > 0),
            jfw_port: r
                .i64("jfw_port")
                .filter(|v| *v > 0)
                .and_then(|v| u32::try_from(v).ok()),
            cell_id: u32::try_from(cell_id)
                .map_err(|_| SautoError::Inventory(format!("vendor {id} has CELLID {cell_id}")))?,
            port_mask: None,
        })
    }

    /// RF port mask on the LSU: odd cells use ports 0/1, even cells 2/3.
    pub fn effective_port_mask(&self) -> u32 {
        self.port_mask
            .unwrap_or(if self.cell_id % 2 == 1 { 3 } else { 12 })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VendorSelector {
    All,
    Id(i64),
    Name(String),
    /// Substring of `pre_config_vendor.tag`.
    Tag(String),
}

impl fmt::Display for VendorSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VendorSelector::All => write!(f, "all vendors"),
            VendorSelector::Id(id) => write!(f, "vendor id {id}"),
            VendorSelector::Name(n) => write!(f, "vendor name '{n}'"),
            VendorSelector::Tag(t) => write!(f, "tag containing '{t}'"),
        }
    }
}

// ---------------------------------------------------------------------------
// DeployedVendor
// ---------------------------------------------------------------------------

/// A radio patched onto an LSU cell through `rf_matrix_db.input_device`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeployedVendor {
    pub cell_id: i64,
    pub id: i64,
    pub name: String,
    pub freq: f64,
    pub rf_matrix_input_port: Option<String>,
}

const DEPLOYED_SELECT: &str = "
SELECT DISTINCT rf_matrix_db.CELLID, vendor.id, vendor.name, vendor.freq,
       vendor.rf_matrix_input_port
FROM vendor
JOIN rf_matrix_db ON rf_matrix_db.input_device = vendor.name
WHERE vendor.freq IS NOT NULL AND vendor.pci IS NOT NULL AND vendor.tech IS NOT NULL
ORDER BY rf_matrix_db.CELLID, vendor.id";

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// Result of a raw statement: column names plus JSON objects per row.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
    pub affected: usize,
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

pub struct Inventory {
    conn: Connection,
}

impl Inventory {
    /// Open (or create) the database at `path` and make sure every table exists.
    pub fn open(path: &Path) -> Result<Self> {
        crate::io::ensure_parent(path)?;
        tracing::debug!(path = %path.display(), "opening inventory");
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        schema::bootstrap(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::bootstrap(&conn)?;
        Ok(Self { conn })
    }

    fn select_one(&self, sql: &str, params: &[&dyn ToSql]) -> Result<Option<Record>> {
        Ok(self.select(sql, params)?.into_iter().next())
    }

    fn select(&self, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<Record>> {
        let mut stmt = self.conn.prepare(sql)?;
        let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let rows = stmt.query_map(params, |row| Record::from_row(row, &names))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Device rows
    // -----------------------------------------------------------------------

    pub fn jfw(&self, id: i64) -> Result<JfwConfig> {
        self.jfw_in("jfw", id)
    }

    /// Read a JFW row from an alternative table (benches keep one per lab).
    pub fn jfw_in(&self, table: &str, id: i64) -> Result<JfwConfig> {
        if !schema::is_identifier(table) {
            return Err(SautoError::Inventory(format!("invalid table name '{table}'")));
        }
        let r = self
            .select_one(&format!("SELECT * FROM {table} WHERE id = ?1"), &[&id])?
            .ok_or(SautoError::RowNotFound { table: "jfw", id })?;
        let d = JfwConfig::default();
        Ok(JfwConfig {
            id,
            name: r.text("name").unwrap_or(d.name),
            ip: r.text("ip").unwrap_or(d.ip),
            port: port_or(&r, d.port),
            location: r.text("location").unwrap_or(d.location),
            table: table.to_string(),
            status: r.i64("status").unwrap_or(d.status),
            delay_secs: d.delay_secs,
        })
    }

    pub fn mxa(&self, id: i64) -> Result<MxaConfig> {
        let r = self
            .select_one("SELECT * FROM mxa WHERE id = ?1", &[&id])?
            .ok_or(SautoError::RowNotFound { table: "mxa", id })?;
        let d = MxaConfig::default();
        Ok(MxaConfig {
            id,
            name: r.text("name").unwrap_or(d.name),
            ip: r.text("ip").unwrap_or(d.ip),
            telnet_port: port_or(&r, d.telnet_port),
            socket_port: d.socket_port,
            location: r.text("location").unwrap_or(d.location),
            jfw_port: r
                .i64("jfw_port")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(d.jfw_port),
            mxa_port: r
                .i64("mxa_port")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(d.mxa_port),
            status: r.i64("status").unwrap_or(d.status),
            delay_secs: d.delay_secs,
        })
    }

    pub fn rf_matrix(&self, id: i64) -> Result<RfMatrixConfig> {
        let r = self
            .select_one("SELECT * FROM rf_matrix WHERE id = ?1", &[&id])?
            .ok_or(SautoError::RowNotFound {
                table: "rf_matrix",
                id,
            })?;
        let d = RfMatrixConfig::default();
        Ok(RfMatrixConfig {
            id,
            name: r.text("name").unwrap_or(d.name),
            ip: r.text("ip").unwrap_or(d.ip),
            port: port_or(&r, d.port),
            status: r.i64("status").unwrap_or(d.status),
            ..d
        })
    }

    pub fn lsu(&self, id: i64) -> Result<LsuConfig> {
        let r = self
            .select_one("SELECT * FROM lsu WHERE id = ?1", &[&id])?
            .ok_or(SautoError::RowNotFound { table: "lsu", id })?;
        Ok(lsu_from_record(id, &r))
    }

    pub fn lsus(&self) -> Result<Vec<LsuConfig>> {
        let records = self.select("SELECT * FROM lsu ORDER BY id", &[])?;
        Ok(records
            .iter()
            .filter_map(|r| r.i64("id").map(|id| lsu_from_record(id, r)))
            .collect())
    }

    // -----------------------------------------------------------------------
    // Vendors
    // -----------------------------------------------------------------------

    pub fn vendor_plans(&self, selector: &VendorSelector) -> Result<Vec<VendorPlan>> {
        let order = " ORDER BY vendor.id, pre_config_vendor.id";
        let records = match selector {
            VendorSelector::All => self.select(&format!("{PLAN_SELECT}{order}"), &[])?,
            VendorSelector::Id(id) => self.select(
                &format!("{PLAN_SELECT} WHERE vendor.id = ?1{order}"),
                &[id],
            )?,
            VendorSelector::Name(name) => self.select(
                &format!("{PLAN_SELECT} WHERE vendor.name = ?1{order}"),
                &[name],
            )?,
            VendorSelector::Tag(tag) => self.select(
                &format!("{PLAN_SELECT} WHERE pre_config_vendor.tag LIKE '%' || ?1 || '%'{order}"),
                &[tag],
            )?,
        };
        records.iter().map(VendorPlan::from_record).collect()
    }

    fn deployed_vendors(&self) -> Result<Vec<DeployedVendor>> {
        let records = self.select(DEPLOYED_SELECT, &[])?;
        Ok(records
            .iter()
            .filter_map(|r| {
                Some(DeployedVendor {
                    cell_id: r.i64("cellid")?,
                    id: r.i64("id")?,
                    name: r.text("name").unwrap_or_default(),
                    freq: r.f64("freq")?,
                    rf_matrix_input_port: r.text("rf_matrix_input_port"),
                })
            })
            .collect())
    }

    /// Vendors patched onto one of the given (busy) LSU cells.
    pub fn vendors_on_cells(&self, cells: &[u32]) -> Result<Vec<DeployedVendor>> {
        let cells: BTreeSet<i64> = cells.iter().map(|c| i64::from(*c)).collect();
        Ok(self
            .deployed_vendors()?
            .into_iter()
            .filter(|v| cells.contains(&v.cell_id))
            .collect())
    }

    /// Vendors whose cells are not in `cells`, one entry per
    /// (id, input port, frequency).
    pub fn vendors_off_cells(&self, cells: &[u32]) -> Result<Vec<DeployedVendor>> {
        let cells: BTreeSet<i64> = cells.iter().map(|c| i64::from(*c)).collect();
        let mut out: Vec<DeployedVendor> = Vec::new();
        for v in self.deployed_vendors()? {
            if cells.contains(&v.cell_id) {
                continue;
            }
            let duplicate = out.iter().any(|seen| {
                seen.id == v.id
                    && seen.rf_matrix_input_port == v.rf_matrix_input_port
                    && seen.freq == v.freq
            });
            if !duplicate {
                out.push(v);
            }
        }
        Ok(out)
    }

    /// Record the PCI the analyzer decoded for every vendor row with `name`.
    pub fn update_vendor_pci(&self, name: &str, pci: i64) -> Result<usize> {
        let n = self
            .conn
            .execute("UPDATE vendor SET pci = ?1 WHERE name = ?2", params![pci, name])?;
        tracing::info!(vendor = name, pci, rows = n, "updated vendor PCI");
        Ok(n)
    }

    pub fn is_vendor_busy(&self, id: i64) -> Result<bool> {
        let r = self
            .select_one("SELECT in_use FROM vendor WHERE id = ?1", &[&id])?
            .ok_or(SautoError::RowNotFound {
                table: "vendor",
                id,
            })?;
        Ok(r.i64("in_use").unwrap_or(0) != 0)
    }

    pub fn set_vendor_in_use(&self, id: i64, in_use: bool) -> Result<()> {
        let n = self.conn.execute(
            "UPDATE vendor SET in_use = ?1 WHERE id = ?2",
            params![i64::from(in_use), id],
        )?;
        if n == 0 {
            return Err(SautoError::RowNotFound {
                table: "vendor",
                id,
            });
        }
        Ok(())
    }

    pub fn is_mxa_busy(&self, id: i64) -> Result<bool> {
        let r = self
            .select_one("SELECT in_use FROM mxa WHERE id = ?1", &[&id])?
            .ok_or(SautoError::RowNotFound { table: "mxa", id })?;
        Ok(r.i64("in_use").unwrap_or(0) != 0)
    }

    // -----------------------------------------------------------------------
    // Raw statements
    // -----------------------------------------------------------------------

    /// Run one SQL statement. Queries return their rows; other statements
    /// report how many rows they changed.
    pub fn execute(&self, sql: &str) -> Result<QueryResult> {
        tracing::info!(sql, "executing statement");
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        if columns.is_empty() {
            let affected = stmt.execute([])?;
            return Ok(QueryResult {
                affected,
                ..QueryResult::default()
            });
        }
        let records = stmt.query_map([], |row| Record::from_row(row, &columns))?;
        let mut rows = Vec::new();
        for r in records {
            rows.push(r?.to_json(&columns));
        }
        Ok(QueryResult {
            columns,
            rows,
            affected: 0,
        })
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}

fn port_or(r: &Record, default: u16) -> u16 {
    r.i64("port")
        .and_then(|p| u16::try_from(p).ok())
        .unwrap_or(default)
}

fn lsu_from_record(id: i64, r: &Record) -> LsuConfig {
    let d = LsuConfig::default();
    LsuConfig {
        id,
        name: r.text("name").unwrap_or(d.name.clone()),
        ip: r.text("ip").unwrap_or(d.ip.clone()),
        ..d
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
