use crate::cmd::{Bench, DeviceArgs};
use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::{Args, Subcommand};
use sauto_core::config::JfwConfig;
use sauto_core::devices::Jfw;
use std::time::Duration;

/// Time the box needs to come back after `REBOOT`.
const REBOOT_SETTLE: Duration = Duration::from_secs(20);

#[derive(Args)]
pub struct JfwArgs {
    #[command(flatten)]
    pub device: DeviceArgs,

    /// Inventory table holding the JFW row
    #[arg(short = 'n', long = "name", value_name = "TABLE")]
    pub table: Option<String>,

    /// Seconds to collect output after each command
    #[arg(short = 'd', long)]
    pub delay: Option<f64>,

    /// Raw commands to send, one session each
    #[arg(short = 'e', long = "execute", num_args = 1.., value_name = "CMD")]
    pub execute: Vec<String>,

    #[command(subcommand)]
    pub action: Option<JfwAction>,
}

#[derive(Subcommand)]
pub enum JfwAction {
    /// Read every attenuator (default)
    Health,
    /// Read one attenuator
    Get { port: u32 },
    /// Set one attenuator in dB
    Set { port: u32, db: f64 },
    /// Reboot the box and wait for it
    Reboot,
}

fn load(bench: &Bench, args: &JfwArgs) -> anyhow::Result<JfwConfig> {
    let mut cfg = match args.device.inventory(bench)? {
        Some(inv) => {
            let table = args.table.as_deref().unwrap_or(&bench.config.jfw.table);
            inv.jfw_in(table, args.device.id)
                .with_context(|| format!("JFW {} not in table '{table}'", args.device.id))?
        }
        None => bench.config.jfw.clone(),
    };
    if let Some(d) = args.delay {
        cfg.delay_secs = d;
    }
    Ok(cfg)
}

pub fn run(bench: &Bench, args: JfwArgs) -> anyhow::Result<()> {
    let jfw = Jfw::new(load(bench, &args)?);

    if !args.execute.is_empty() {
        for command in &args.execute {
            let reply = jfw
                .execute(command)
                .with_context(|| format!("JFW command '{command}' failed"))?;
            if bench.json {
                print_json(&serde_json::json!({ "command": command, "reply": reply.trim() }))?;
            } else {
                println!("{}", reply.trim_end());
            }
        }
        return Ok(());
    }

    match args.action.unwrap_or(JfwAction::Health) {
        JfwAction::Health => {
            let readings = jfw.health().context("failed to read attenuators")?;
            if bench.json {
                print_json(&readings)?;
            } else {
                let rows = readings
                    .iter()
                    .map(|(port, db)| vec![port.to_string(), db.to_string()])
                    .collect();
                print_table(&["PORT", "DB"], rows);
            }
        }
        JfwAction::Get { port } => {
            let db = jfw.attenuation(port).context("failed to read attenuator")?;
            match (db, bench.json) {
                (_, true) => print_json(&serde_json::json!({ "port": port, "db": db }))?,
                (Some(db), false) => println!("{db}"),
                (None, false) => anyhow::bail!("attenuator {port} not reported"),
            }
        }
        JfwAction::Set { port, db } => {
            jfw.set_attenuation(port, db)
                .with_context(|| format!("failed to set attenuator {port}"))?;
            if bench.json {
                print_json(&serde_json::json!({ "port": port, "db": db }))?;
            } else {
                println!("Attenuator {port} set to {db} dB");
            }
        }
        JfwAction::Reboot => {
            jfw.reboot(REBOOT_SETTLE).context("reboot failed")?;
            println!("JFW {} rebooted", jfw.config().name);
        }
    }
    Ok(())
}
