mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    config::ConfigSubcommand, db::DbArgs, jfw::JfwArgs, lsu::LsuArgs, mxa::MxaArgs,
    rf_matrix::RfMatrixArgs, vendor_config::VendorConfigArgs, Bench,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "sauto",
    about = "RF test-bench control: attenuators, analyzers, RF matrices, LSU cells, and vendor pre-configuration",
    version,
    propagate_version = true
)]
struct Cli {
    /// Device configuration file (default: <root>/config_files/this_device_conf.json)
    #[arg(long, global = true, env = "SAUTO_CONFIG")]
    config: Option<PathBuf>,

    /// Install root holding config_files/
    #[arg(long, global = true, env = "SAUTO_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Control a JFW step attenuator
    Jfw(JfwArgs),

    /// Query and configure an MXA signal analyzer
    Mxa(MxaArgs),

    /// Switch paths on an RBM or QRB RF matrix
    RfMatrix(RfMatrixArgs),

    /// Inspect and configure LSU cells
    Lsu(LsuArgs),

    /// Inventory database maintenance
    Db(DbArgs),

    /// Inspect the device configuration file
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Calibrate vendors on the MXA and bring up their LSU cells
    VendorConfig(VendorConfigArgs),
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::VendorConfig(_) => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let result = Bench::load(cli.config.as_deref(), cli.root.as_deref(), cli.json).and_then(
        |bench| match cli.command {
            Commands::Jfw(args) => cmd::jfw::run(&bench, args),
            Commands::Mxa(args) => cmd::mxa::run(&bench, args),
            Commands::RfMatrix(args) => cmd::rf_matrix::run(&bench, args),
            Commands::Lsu(args) => cmd::lsu::run(&bench, args),
            Commands::Db(args) => cmd::db::run(&bench, args),
            Commands::Config { subcommand } => cmd::config::run(&bench, subcommand),
            Commands::VendorConfig(args) => cmd::vendor_config::run(&bench, args),
        },
    );

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
