use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// File and directory constants
// ---------------------------------------------------------------------------

pub const CONFIG_DIR: &str = "config_files";
pub const CONFIG_FILE: &str = "this_device_conf.json";
pub const ROOTPATH_FILE: &str = "rootpath.conf";
pub const DEFAULT_DATABASE: &str = "simple.sqlite";

/// Directory on the lab server where the install step drops `rootpath.conf`.
pub const INSTALL_DIR: &str = "/var/www/html/sauto";

/// Directory the LSU file mode stages generated cell files in.
pub const CELL_STAGING_DIR: &str = "/tmp";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_DIR).join(CONFIG_FILE)
}

/// Read the install root recorded in `rootpath.conf`, if any.
pub fn read_rootpath(install_dir: &Path) -> Option<PathBuf> {
    let text = std::fs::read_to_string(install_dir.join(ROOTPATH_FILE)).ok()?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(PathBuf::from(trimmed))
    }
}

/// Resolve the device configuration file.
///
/// Priority:
/// 1. `--config` flag / `SAUTO_CONFIG` env var (passed in as `explicit`)
/// 2. `<root>/config_files/this_device_conf.json` when a root is given
/// 3. The root recorded in `/var/www/html/sauto/rootpath.conf`
/// 4. `this_device_conf.json` in the working directory
pub fn resolve_config(explicit: Option<&Path>, root: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    if let Some(r) = root {
        return config_path(r);
    }
    if let Some(r) = read_rootpath(Path::new(INSTALL_DIR)) {
        let candidate = config_path(&r);
        if candidate.exists() {
            return candidate;
        }
    }
    PathBuf::from(CONFIG_FILE)
}

/// Per-user fallback location for the inventory database.
pub fn user_database() -> Option<PathBuf> {
    home::home_dir().map(|h| h.join(".sauto").join(DEFAULT_DATABASE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn explicit_config_wins() {
        let dir = TempDir::new().unwrap();
        let explicit = dir.path().join("bench.json");
        let resolved = resolve_config(Some(&explicit), Some(dir.path()));
        assert_eq!(resolved, explicit);
    }

    #[test]
    fn root_maps_to_config_files_dir() {
        let dir = TempDir::new().unwrap();
        let resolved = resolve_config(None, Some(dir.path()));
        assert_eq!(resolved, dir.path().join("config_files/this_device_conf.json"));
    }

    #[test]
    fn rootpath_file_is_trimmed() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(ROOTPATH_FILE), "/opt/sauto\n").unwrap();
        assert_eq!(read_rootpath(dir.path()), Some(PathBuf::from("/opt/sauto")));
    }

    #[test]
    fn empty_rootpath_file_is_ignored() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(ROOTPATH_FILE), "  \n").unwrap();
        assert_eq!(read_rootpath(dir.path()), None);
    }
}
