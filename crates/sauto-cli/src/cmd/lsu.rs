use crate::cmd::{Bench, DeviceArgs};
use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::{Args, Subcommand};
use sauto_core::config::LsuConfig;
use sauto_core::devices::{CellMode, CellPlan, CellTiming, Lsu};
use sauto_core::inventory::{Inventory, VendorSelector};

#[derive(Args)]
pub struct LsuArgs {
    #[command(flatten)]
    pub device: DeviceArgs,

    #[command(subcommand)]
    pub action: Option<LsuAction>,
}

#[derive(Subcommand)]
pub enum LsuAction {
    /// Cells bound to a user, and the vendors patched onto them (default)
    Busy,
    /// Vendors on cells nobody is using
    Free,
    /// RSRP of every cell that decodes a signal
    Rsrp,
    /// Live configuration of one cell
    Cell { cell: u32 },
    /// Configure the cell of an inventory vendor
    Configure {
        /// Vendor id
        vendor: i64,
        /// Copy a cell file over SSH instead of using REST
        #[arg(long)]
        file_mode: bool,
    },
}

fn load(bench: &Bench, inventory: Option<&Inventory>, id: i64) -> anyhow::Result<LsuConfig> {
    let Some(inv) = inventory else {
        return Ok(bench.config.lsu.clone());
    };
    let row = inv
        .lsu(id)
        .with_context(|| format!("LSU {id} not in inventory"))?;
    Ok(LsuConfig {
        id: row.id,
        name: row.name,
        ip: row.ip,
        ..bench.config.lsu.clone()
    })
}

fn require<'a>(inventory: &'a Option<Inventory>, what: &str) -> anyhow::Result<&'a Inventory> {
    inventory
        .as_ref()
        .with_context(|| format!("{what} needs the inventory; pass -s"))
}

pub fn run(bench: &Bench, args: LsuArgs) -> anyhow::Result<()> {
    let inventory = args.device.inventory(bench)?;
    let mut lsu = Lsu::new(load(bench, inventory.as_ref(), args.device.id)?)?;

    match args.action.unwrap_or(LsuAction::Busy) {
        LsuAction::Busy => {
            let busy = lsu.busy_cells().context("failed to read LSU status")?;
            let cells: Vec<u32> = busy.all().into_iter().collect();
            let vendors = match &inventory {
                Some(inv) => inv.vendors_on_cells(&cells)?,
                None => Vec::new(),
            };
            if bench.json {
                print_json(&serde_json::json!({ "busy": busy, "vendors": vendors }))?;
            } else {
                println!("FDD busy: {:?}", busy.fdd);
                println!("TDD busy: {:?}", busy.tdd);
                if !vendors.is_empty() {
                    let rows = vendors
                        .iter()
                        .map(|v| vec![v.cell_id.to_string(), v.id.to_string(), v.name.clone(), v.freq.to_string()])
                        .collect();
                    print_table(&["CELL", "VENDOR", "NAME", "FREQ"], rows);
                }
            }
        }
        LsuAction::Free => {
            let inv = require(&inventory, "listing free vendors")?;
            let busy: Vec<u32> = lsu.busy_cells()?.all().into_iter().collect();
            let vendors = inv.vendors_off_cells(&busy)?;
            if bench.json {
                print_json(&vendors)?;
            } else {
                let rows = vendors
                    .iter()
                    .map(|v| {
                        vec![
                            v.cell_id.to_string(),
                            v.id.to_string(),
                            v.name.clone(),
                            v.rf_matrix_input_port.clone().unwrap_or_default(),
                        ]
                    })
                    .collect();
                print_table(&["CELL", "VENDOR", "NAME", "INPUT"], rows);
            }
        }
        LsuAction::Rsrp => {
            let rsrp = lsu.cell_rsrp().context("failed to read LSU status")?;
            if bench.json {
                print_json(&rsrp)?;
            } else {
                let rows = rsrp
                    .iter()
                    .map(|(cell, r)| {
                        vec![
                            cell.to_string(),
                            format!("{:.1}", r.a0),
                            format!("{:.1}", r.a1),
                            format!("{:.1}", r.avg()),
                        ]
                    })
                    .collect();
                print_table(&["CELL", "A0", "A1", "AVG"], rows);
            }
        }
        LsuAction::Cell { cell } => {
            let raw = lsu
                .cell_configuration_json(cell)
                .with_context(|| format!("failed to read cell {cell}"))?;
            print_json(&raw)?;
        }
        LsuAction::Configure { vendor, file_mode } => {
            let inv = require(&inventory, "configuring a vendor cell")?;
            let plan = inv
                .vendor_plans(&VendorSelector::Id(vendor))?
                .into_iter()
                .next()
                .with_context(|| format!("vendor {vendor} has no pre-configuration"))?;
            let mode = if file_mode { CellMode::File } else { CellMode::Rest };
            let timing = CellTiming::from_workflow(&bench.config.workflow);
            lsu.configure_cell(&CellPlan::from_vendor(&plan), mode, &timing)
                .with_context(|| format!("cell {} configuration failed", plan.cell_id))?;
            println!("Cell {} configured for {}", plan.cell_id, plan.name);
        }
    }
    Ok(())
}
