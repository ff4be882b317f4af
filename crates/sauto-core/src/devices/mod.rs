//! Clients for the bench instruments.
//!
//! Each client owns an explicit config struct; nothing is process-global. The
//! traits below are the seams the vendor workflow drives, so it can run
//! against fakes in tests.

pub mod jfw;
pub mod lsu;
pub mod mxa;
pub mod rf_matrix;

use crate::error::Result;
use std::collections::BTreeMap;

pub use jfw::Jfw;
pub use lsu::{BusyCells, CellMode, CellPlan, CellRsrp, CellTiming, Lsu};
pub use mxa::{CellId, EvmResult, Mxa, SyncType};
pub use rf_matrix::RfMatrix;

/// Something with per-port step attenuators.
pub trait Attenuator {
    fn set_attenuation(&mut self, port: u32, db: f64) -> Result<()>;
}

/// Signal analyzer measuring downlink EVM.
pub trait Analyzer {
    fn recall(&mut self, register: u32) -> Result<()>;
    fn set_frequency_mhz(&mut self, mhz: f64) -> Result<()>;
    fn set_range(&mut self, range: f64) -> Result<()>;
    fn sync_type(&mut self) -> Result<SyncType>;
    fn set_sync_type(&mut self, sync: SyncType) -> Result<()>;
    fn set_cell_id(&mut self, cid: CellId) -> Result<()>;
    fn set_crs_ports(&mut self, count: u32) -> Result<()>;
    fn set_reference_crs_port(&mut self, port: u32) -> Result<()>;
    fn evm_result(&mut self, samples: u32) -> Result<EvmResult>;
    fn result_table(&mut self) -> Result<Vec<String>>;
}

/// RF crossbar between radio inputs and cell/analyzer outputs.
pub trait RfSwitch {
    /// QRB units carry their own attenuators and take paths with a level.
    fn is_qrb(&self) -> bool;
    fn connect(&mut self, input: &str, output: &str, atten_db: Option<f64>) -> Result<()>;
    /// Drive `output` to maximum attenuation.
    fn reset_output(&mut self, output: &str) -> Result<()>;
}

/// Base-station simulator hosting the LTE cells.
pub trait CellSimulator {
    fn busy_cells(&mut self) -> Result<BusyCells>;
    fn cell_rsrp(&mut self) -> Result<BTreeMap<u32, CellRsrp>>;
    fn configure_cell(&mut self, plan: &CellPlan, mode: CellMode, timing: &CellTiming)
        -> Result<()>;
}
