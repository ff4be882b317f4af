use crate::cmd::{Bench, DeviceArgs};
use crate::output::print_json;
use anyhow::Context;
use clap::{Args, Subcommand};
use sauto_core::devices::{RfMatrix, RfSwitch};

#[derive(Args)]
pub struct RfMatrixArgs {
    #[command(flatten)]
    pub device: DeviceArgs,

    /// Raw QRB CLI commands, sent in one SSH session
    #[arg(short = 'e', long = "execute", num_args = 1.., value_name = "CMD")]
    pub execute: Vec<String>,

    #[command(subcommand)]
    pub action: Option<RfMatrixAction>,
}

#[derive(Subcommand)]
pub enum RfMatrixAction {
    /// Connect an input to an output
    Connect {
        input: String,
        output: String,
        /// Path attenuation in dB (QRB only)
        #[arg(long)]
        atten: Option<f64>,
    },
    /// Ask whether a port answers
    Health { side: String, port: String },
    /// Show which port a port is connected to
    Check { side: String, port: String },
    /// Drive an output to maximum attenuation (QRB only)
    Reset { output: String },
}

pub fn run(bench: &Bench, args: RfMatrixArgs) -> anyhow::Result<()> {
    let cfg = match args.device.inventory(bench)? {
        Some(inv) => {
            let row = inv
                .rf_matrix(args.device.id)
                .with_context(|| format!("RF matrix {} not in inventory", args.device.id))?;
            let d = &bench.config.rf_matrix;
            sauto_core::config::RfMatrixConfig {
                buffer_size: d.buffer_size,
                ssh_user: d.ssh_user.clone(),
                ssh_password: d.ssh_password.clone(),
                max_atten: d.max_atten,
                ..row
            }
        }
        None => bench.config.rf_matrix.clone(),
    };
    let mut matrix = RfMatrix::new(cfg);

    if !args.execute.is_empty() {
        if !matrix.is_qrb() {
            anyhow::bail!("raw commands need a QRB unit; '{}' is an RBM", matrix.config().name);
        }
        let out = matrix.qrb_execute(&args.execute).context("QRB session failed")?;
        print!("{out}");
        return Ok(());
    }

    let Some(action) = args.action else {
        anyhow::bail!("nothing to do: give a subcommand or -e");
    };
    match action {
        RfMatrixAction::Connect {
            input,
            output,
            atten,
        } => {
            RfSwitch::connect(&mut matrix, &input, &output, atten)
                .with_context(|| format!("failed to connect {input} -> {output}"))?;
            if bench.json {
                print_json(&serde_json::json!({ "input": input, "output": output, "atten": atten }))?;
            } else {
                println!("Connected {input} -> {output}");
            }
        }
        RfMatrixAction::Health { side, port } => {
            let ok = matrix.health(&side, &port)?;
            if bench.json {
                print_json(&serde_json::json!({ "side": side, "port": port, "healthy": ok }))?;
            } else {
                println!("{side}{port}: {}", if ok { "OK" } else { "NOT RESPONDING" });
            }
        }
        RfMatrixAction::Check { side, port } => {
            let connected = matrix.check(&side, &port)?;
            if bench.json {
                print_json(&serde_json::json!({ "side": side, "port": port, "connected": connected }))?;
            } else {
                println!("{side}{port} -> {connected}");
            }
        }
        RfMatrixAction::Reset { output } => {
            matrix
                .reset_output(&output)
                .with_context(|| format!("failed to reset output {output}"))?;
            println!("Output {output} reset");
        }
    }
    Ok(())
}
