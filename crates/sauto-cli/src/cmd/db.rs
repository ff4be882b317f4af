use crate::cmd::Bench;
use crate::output::{print_json, print_query, print_table};
use anyhow::Context;
use clap::{Args, Subcommand};
use sauto_core::inventory::VendorSelector;
use std::path::PathBuf;

#[derive(Args)]
pub struct DbArgs {
    /// Inventory database (default: SQLITE.Master)
    #[arg(short = 's', long = "sql", value_name = "DB")]
    pub sql: Option<PathBuf>,

    #[command(subcommand)]
    pub subcommand: DbSubcommand,
}

#[derive(Subcommand)]
pub enum DbSubcommand {
    /// Create missing tables
    Init,
    /// Run one SQL statement
    Exec { statement: String },
    /// List the LSUs in the inventory
    Lsus,
    /// Show MXA lease holders
    Leases,
    /// Release an MXA lease
    Release {
        /// MXA id
        id: i64,
        /// Owner token; without it the lease is cleared regardless of owner
        #[arg(long)]
        owner: Option<String>,
    },
    /// Mark a vendor in use so no run picks it up
    HoldVendor { id: i64 },
    /// Clear a vendor's in-use flag, e.g. after `vendor-config --hold`
    ReleaseVendor { id: i64 },
    /// List vendor plans
    Vendors {
        #[arg(short = 'i', long)]
        id: Option<i64>,
        #[arg(short = 'n', long)]
        name: Option<String>,
        #[arg(short = 't', long)]
        tag: Option<String>,
    },
}

pub fn run(bench: &Bench, args: DbArgs) -> anyhow::Result<()> {
    let path = bench.database(args.sql.as_deref());
    let inv = bench.open_inventory(args.sql.as_deref())?;

    match args.subcommand {
        DbSubcommand::Init => {
            if bench.json {
                print_json(&serde_json::json!({ "database": path }))?;
            } else {
                println!("Inventory ready at {}", path.display());
            }
        }
        DbSubcommand::Exec { statement } => {
            let result = inv
                .execute(&statement)
                .with_context(|| format!("statement failed: {statement}"))?;
            if bench.json {
                print_json(&result)?;
            } else {
                print_query(&result);
            }
        }
        DbSubcommand::Lsus => {
            let lsus = inv.lsus()?;
            if bench.json {
                print_json(&lsus)?;
            } else {
                let rows = lsus
                    .iter()
                    .map(|l| vec![l.id.to_string(), l.name.clone(), l.ip.clone()])
                    .collect();
                print_table(&["ID", "NAME", "ADDRESS"], rows);
            }
        }
        DbSubcommand::Leases => {
            let leases = inv.mxa_leases()?;
            if bench.json {
                print_json(&leases)?;
            } else {
                let rows = leases
                    .iter()
                    .map(|l| {
                        vec![
                            l.mxa_id.to_string(),
                            l.name.clone(),
                            if l.in_use { "yes" } else { "no" }.to_string(),
                            l.owner.clone().unwrap_or_default(),
                            l.acquired_at.clone().unwrap_or_default(),
                        ]
                    })
                    .collect();
                print_table(&["MXA", "NAME", "IN USE", "OWNER", "SINCE"], rows);
            }
        }
        DbSubcommand::Release { id, owner } => match owner {
            Some(owner) => {
                if !inv.release_mxa(id, &owner)? {
                    anyhow::bail!("MXA {id} is not leased by {owner}");
                }
                println!("Released MXA {id}");
            }
            None => {
                inv.force_release_mxa(id)?;
                println!("Force released MXA {id}");
            }
        },
        DbSubcommand::HoldVendor { id } => {
            inv.set_vendor_in_use(id, true)
                .with_context(|| format!("failed to hold vendor {id}"))?;
            println!("Vendor {id} held");
        }
        DbSubcommand::ReleaseVendor { id } => {
            inv.set_vendor_in_use(id, false)
                .with_context(|| format!("failed to release vendor {id}"))?;
            println!("Vendor {id} released");
        }
        DbSubcommand::Vendors { id, name, tag } => {
            let selector = match (id, name, tag) {
                (Some(id), _, _) => VendorSelector::Id(id),
                (None, Some(name), _) => VendorSelector::Name(name),
                (None, None, Some(tag)) => VendorSelector::Tag(tag),
                (None, None, None) => VendorSelector::All,
            };
            let plans = inv.vendor_plans(&selector)?;
            if bench.json {
                print_json(&plans)?;
            } else {
                let rows = plans
                    .iter()
                    .map(|p| {
                        vec![
                            p.id.to_string(),
                            p.name.clone(),
                            p.freq.to_string(),
                            p.tech.to_string(),
                            p.cell_id.to_string(),
                            format!("{}->{}", p.rf_matrix_input_port, p.rf_matrix_output_port),
                            p.tag.clone().unwrap_or_default(),
                        ]
                    })
                    .collect();
                print_table(&["ID", "NAME", "FREQ", "TECH", "CELL", "PATH", "TAG"], rows);
            }
        }
    }
    Ok(())
}
