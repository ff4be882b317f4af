use sauto_core::paths;
use std::path::{Path, PathBuf};

/// Resolve the device configuration file.
///
/// Priority:
/// 1. `--config` flag / `SAUTO_CONFIG` env var (passed in as `explicit`)
/// 2. `--root` flag / `SAUTO_ROOT` env var: `<root>/config_files/this_device_conf.json`
/// 3. The install root recorded in `rootpath.conf`
/// 4. `this_device_conf.json` in the working directory
pub fn resolve_config(explicit: Option<&Path>, root: Option<&Path>) -> PathBuf {
    paths::resolve_config(explicit, root)
}

/// Resolve the inventory database.
///
/// Priority:
/// 1. A path given to `-s/--sql`
/// 2. `SQLITE.Master` from the configuration; relative paths are taken from
///    the install root when one is known
pub fn resolve_database(flag: Option<&Path>, master: &Path, root: Option<&Path>) -> PathBuf {
    if let Some(p) = flag {
        return p.to_path_buf();
    }
    match root {
        Some(r) if master.is_relative() => r.join(master),
        _ => master.to_path_buf(),
    }
}
