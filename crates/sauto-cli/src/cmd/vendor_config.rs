use crate::cmd::Bench;
use crate::output::print_json;
use anyhow::Context;
use clap::Args;
use sauto_core::devices::CellMode;
use sauto_core::inventory::{Inventory, LeaseRegistry, VendorSelector};
use sauto_core::workflow::{
    resolve_vendors, InventoryDevices, RunOptions, VendorConfigurator, VendorSource,
};
use std::path::PathBuf;

#[derive(Args)]
pub struct VendorConfigArgs {
    /// Inventory database (default: SQLITE.Master)
    #[arg(short = 's', long = "sql", value_name = "DB")]
    pub sql: Option<PathBuf>,

    /// Vendor id
    #[arg(short = 'i', long, conflicts_with_all = ["name", "tag"])]
    pub id: Option<i64>,

    /// Vendor name
    #[arg(short = 'n', long, conflicts_with = "tag")]
    pub name: Option<String>,

    /// Substring of the pre-configuration tag
    #[arg(short = 't', long)]
    pub tag: Option<String>,

    /// Copy cell files over SSH instead of using the LSU REST API
    #[arg(long)]
    pub file_mode: bool,

    /// Record per-vendor failures and keep going
    #[arg(short = 'D', long)]
    pub daemon: bool,

    /// Leave configured vendors marked in use
    #[arg(long)]
    pub hold: bool,
}

impl VendorConfigArgs {
    fn source(&self, bench: &Bench) -> VendorSource {
        let selector = if let Some(id) = self.id {
            VendorSelector::Id(id)
        } else if let Some(name) = &self.name {
            VendorSelector::Name(name.clone())
        } else if let Some(tag) = &self.tag {
            VendorSelector::Tag(tag.clone())
        } else if !bench.config.vendors.is_empty() {
            return VendorSource::Cells(bench.config.vendors.clone());
        } else {
            VendorSelector::All
        };
        VendorSource::Inventory(selector)
    }
}

/// Free every MXA this process holds, then exit like an interrupted shell job.
fn install_interrupt_handler(db: PathBuf, registry: LeaseRegistry) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        let held = registry.held();
        if !held.is_empty() {
            match Inventory::open(&db) {
                Ok(inv) => {
                    for id in held {
                        match inv.force_release_mxa(id) {
                            Ok(()) => eprintln!("Released MXA {id}"),
                            Err(e) => eprintln!("error: could not release MXA {id}: {e}"),
                        }
                    }
                }
                Err(e) => eprintln!("error: could not reopen {}: {e}", db.display()),
            }
        }
        std::process::exit(130);
    })
    .context("failed to install Ctrl-C handler")
}

pub fn run(bench: &Bench, args: VendorConfigArgs) -> anyhow::Result<()> {
    let db = bench.database(args.sql.as_deref());
    let inv = bench.open_inventory(args.sql.as_deref())?;

    let source = args.source(bench);
    let plans = resolve_vendors(&inv, &source).context("no vendors to configure")?;
    tracing::info!(vendors = plans.len(), db = %db.display(), "starting vendor configuration");

    let registry = LeaseRegistry::default();
    install_interrupt_handler(db, registry.clone())?;

    let options = RunOptions {
        cell_mode: if args.file_mode {
            CellMode::File
        } else {
            CellMode::Rest
        },
        lenient: args.daemon,
        hold: args.hold,
    };
    let configurator = VendorConfigurator::new(
        &inv,
        InventoryDevices::new(&inv, &bench.config),
        bench.config.workflow.clone(),
    )
    .with_options(options)
    .with_registry(registry);

    let report = configurator.run(&plans)?;

    if bench.json {
        print_json(&report)?;
    } else {
        println!("{}", report.summary());
    }

    if !report.is_success() {
        anyhow::bail!("{} step(s) failed", report.failed());
    }
    Ok(())
}
