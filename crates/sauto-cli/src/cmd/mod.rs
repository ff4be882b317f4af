pub mod config;
pub mod db;
pub mod jfw;
pub mod lsu;
pub mod mxa;
pub mod rf_matrix;
pub mod vendor_config;

use anyhow::Context;
use clap::Args;
use sauto_core::config::Config;
use sauto_core::inventory::Inventory;
use std::path::{Path, PathBuf};

use crate::root;

/// Loaded configuration plus the global flags every subcommand sees.
pub struct Bench {
    pub config_path: PathBuf,
    pub config: Config,
    pub root: Option<PathBuf>,
    pub json: bool,
}

impl Bench {
    pub fn load(config: Option<&Path>, root: Option<&Path>, json: bool) -> anyhow::Result<Self> {
        let config_path = root::resolve_config(config, root);
        let cfg = Config::load_or_default(&config_path)
            .with_context(|| format!("failed to load {}", config_path.display()))?;
        tracing::debug!(path = %config_path.display(), "configuration loaded");
        Ok(Self {
            config_path,
            config: cfg,
            root: root.map(Path::to_path_buf),
            json,
        })
    }

    /// Inventory path for a `-s/--sql` flag that may or may not carry a path.
    pub fn database(&self, flag: Option<&Path>) -> PathBuf {
        root::resolve_database(flag, &self.config.sqlite.master, self.root.as_deref())
    }

    pub fn open_inventory(&self, flag: Option<&Path>) -> anyhow::Result<Inventory> {
        let path = self.database(flag);
        Inventory::open(&path).with_context(|| format!("failed to open inventory {}", path.display()))
    }
}

/// Flags shared by the device subcommands.
#[derive(Args, Debug, Clone)]
pub struct DeviceArgs {
    /// Load the device from the inventory (default database: SQLITE.Master)
    #[arg(short = 's', long = "sql", value_name = "DB", num_args = 0..=1)]
    pub sql: Option<Option<PathBuf>>,

    /// Device id in the inventory
    #[arg(short = 'i', long = "id", default_value_t = 1)]
    pub id: i64,
}

impl DeviceArgs {
    /// Open the inventory when `-s` was given.
    pub fn inventory(&self, bench: &Bench) -> anyhow::Result<Option<Inventory>> {
        match &self.sql {
            Some(path) => Ok(Some(bench.open_inventory(path.as_deref())?)),
            None => Ok(None),
        }
    }
}
