use crate::cmd::Bench;
use crate::output::print_json;
use clap::Subcommand;
use anyhow::Context;
use sauto_core::config::{Config, WarnLevel};

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Write the built-in defaults to the config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
    /// Validate the config for common mistakes
    Validate,
}

pub fn run(bench: &Bench, subcmd: ConfigSubcommand) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Init { force } => {
            let path = &bench.config_path;
            if path.exists() && !force {
                anyhow::bail!("{} already exists; pass --force to overwrite", path.display());
            }
            Config::default()
                .save(path)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Wrote {}", path.display());
            Ok(())
        }
        ConfigSubcommand::Show => {
            if !bench.json {
                println!("# {}", bench.config_path.display());
            }
            print_json(&bench.config)
        }
        ConfigSubcommand::Validate => validate(bench),
    }
}

fn validate(bench: &Bench) -> anyhow::Result<()> {
    let warnings = bench.config.validate();

    if bench.json {
        print_json(&serde_json::json!({ "warnings": warnings }))?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}
