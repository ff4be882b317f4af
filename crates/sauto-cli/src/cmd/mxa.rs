use crate::cmd::{Bench, DeviceArgs};
use crate::output::print_json;
use anyhow::Context;
use clap::{Args, Subcommand};
use sauto_core::devices::{CellId, Mxa, SyncType};
use sauto_core::inventory::Tech;

#[derive(Args)]
pub struct MxaArgs {
    #[command(flatten)]
    pub device: DeviceArgs,

    /// Raw SCPI commands; replies are printed
    #[arg(short = 'e', long = "execute", num_args = 1.., value_name = "SCPI")]
    pub execute: Vec<String>,

    #[command(subcommand)]
    pub action: Option<MxaAction>,
}

#[derive(Subcommand)]
pub enum MxaAction {
    /// Identity and current EVM setup (default)
    Status,
    /// Average the EVM measurement
    Evm {
        #[arg(long, default_value_t = 3)]
        samples: u32,
    },
    /// Dump the EVM result table
    Table,
    /// Set up an LTE EVM measurement
    Setup {
        /// Centre frequency in MHz
        #[arg(long)]
        freq: f64,
        /// FDD or TDD
        #[arg(long, default_value = "FDD")]
        tech: String,
        /// Cell id to sync on (default AUTO)
        #[arg(long)]
        cid: Option<i64>,
    },
}

pub fn run(bench: &Bench, args: MxaArgs) -> anyhow::Result<()> {
    let cfg = match args.device.inventory(bench)? {
        Some(inv) => inv
            .mxa(args.device.id)
            .with_context(|| format!("MXA {} not in inventory", args.device.id))?,
        None => bench.config.mxa.clone(),
    };
    let mxa = Mxa::new(cfg);

    if !args.execute.is_empty() {
        for command in &args.execute {
            let reply = mxa
                .execute(command)
                .with_context(|| format!("SCPI '{command}' failed"))?;
            if bench.json {
                print_json(&serde_json::json!({ "command": command, "reply": reply }))?;
            } else {
                println!("{reply}");
            }
        }
        return Ok(());
    }

    match args.action.unwrap_or(MxaAction::Status) {
        MxaAction::Status => status(&mxa, bench.json),
        MxaAction::Evm { samples } => {
            let r = mxa.evm_result(samples).context("EVM read failed")?;
            if bench.json {
                print_json(&r)
            } else {
                println!("EVM      {:.2} %rms", r.evm_avg);
                println!("RS power {:.2} dBm", r.rs_power_avg);
                println!("PCI      {}", r.pci);
                Ok(())
            }
        }
        MxaAction::Table => {
            let table = mxa.result_table().context("result table read failed")?;
            if bench.json {
                print_json(&table)
            } else {
                for field in table {
                    println!("{field}");
                }
                Ok(())
            }
        }
        MxaAction::Setup { freq, tech, cid } => {
            let tech = Tech::parse(&tech).with_context(|| format!("unknown technology '{tech}'"))?;
            mxa.set_mode(tech.mxa_mode())?;
            mxa.recall(tech.recall_register())?;
            mxa.set_frequency_mhz(freq)?;
            mxa.set_range(0.0)?;
            match cid {
                Some(id) => {
                    mxa.set_sync_type(SyncType::Rs)?;
                    mxa.set_cell_id(CellId::Id(id))?;
                }
                None => {
                    mxa.set_sync_type(SyncType::Pss)?;
                    mxa.set_cell_id(CellId::Auto)?;
                }
            }
            status(&mxa, bench.json)
        }
    }
}

fn status(mxa: &Mxa, json: bool) -> anyhow::Result<()> {
    let idn = mxa.identify().context("MXA did not identify")?;
    let freq = mxa.frequency_hz()?;
    let sync = mxa.sync_type()?;
    let cid = mxa.cell_id()?;
    let atten = mxa.attenuation()?;
    if json {
        print_json(&serde_json::json!({
            "idn": idn,
            "frequency_hz": freq,
            "sync": sync.as_str(),
            "cell_id": cid,
            "attenuation_db": atten,
        }))
    } else {
        println!("{idn}");
        println!("Frequency   {:.3} MHz", freq / 1e6);
        println!("Sync        {}", sync.as_str());
        println!("Cell id     {cid}");
        println!("Attenuation {atten} dB");
        Ok(())
    }
}
