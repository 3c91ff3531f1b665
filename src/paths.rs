//! Path resolution for netkeep
//!
//! # Environment Variables
//!
//! - `NETKEEP_CONFIG` - Inventory file (also accepted as `--config`)
//! - `NETKEEP_STATE_DIR` - Override state directory
//!
//! # Path Resolution Priority
//!
//! For config_file():
//! 1. `--config` / `NETKEEP_CONFIG`
//! 2. `XDG_CONFIG_HOME/netkeep/netkeep.toml` (if set)
//! 3. `~/.config/netkeep/netkeep.toml`
//!
//! For state_dir():
//! 1. `settings.state_dir` from the inventory
//! 2. `NETKEEP_STATE_DIR` environment variable
//! 3. `XDG_STATE_HOME/netkeep` (if set)
//! 4. `~/.local/state/netkeep`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for the inventory file
pub const ENV_CONFIG: &str = "NETKEEP_CONFIG";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "NETKEEP_STATE_DIR";

const APP: &str = "netkeep";
const INVENTORY_FILE: &str = "netkeep.toml";

/// Resolve the inventory file path
pub fn config_file(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        let path = expand(&path.to_string_lossy());
        log::debug!("Using inventory from command line: {}", path.display());
        return Ok(path);
    }

    if let Ok(file) = std::env::var(ENV_CONFIG) {
        let path = expand(&file);
        log::debug!("Using inventory from {}: {}", ENV_CONFIG, path.display());
        return Ok(path);
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join(APP).join(INVENTORY_FILE);
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join(APP).join(INVENTORY_FILE))
}

/// Resolve the state directory (snapshots and job records)
pub fn state_dir(configured: Option<&str>) -> Result<PathBuf> {
    if let Some(dir) = configured {
        let path = expand(dir);
        log::debug!("Using state dir from settings: {}", path.display());
        return Ok(path);
    }

    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join(APP);
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join(APP);
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    /// Run a test with a temporary env var.
    ///
    /// Each variable is touched by a single test only.
    fn with_env_var<F, R>(key: &str, value: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let original = env::var(key).ok();
        // SAFETY: no other test reads or writes this variable
        unsafe { env::set_var(key, value) };
        let result = f();
        match original {
            // SAFETY: as above
            Some(v) => unsafe { env::set_var(key, v) },
            None => unsafe { env::remove_var(key) },
        }
        result
    }

    #[test]
    fn test_explicit_config_wins() {
        let result = config_file(Some(Path::new("/etc/netkeep/lab.toml"))).unwrap();
        assert_eq!(result, PathBuf::from("/etc/netkeep/lab.toml"));
    }

    #[test]
    fn test_config_env_override() {
        with_env_var(ENV_CONFIG, "/custom/netkeep.toml", || {
            assert_eq!(
                config_file(None).unwrap(),
                PathBuf::from("/custom/netkeep.toml")
            );
        });
    }

    #[test]
    fn test_configured_state_dir_expands_tilde() {
        let home = dirs::home_dir().unwrap();
        let result = state_dir(Some("~/netkeep-state")).unwrap();
        assert_eq!(result, home.join("netkeep-state"));
    }

    #[test]
    fn test_expand_absolute() {
        assert_eq!(expand("/absolute/path"), PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_expand_unknown_env_var_unchanged() {
        let result = expand("/path/$NONEXISTENT_NETKEEP_VAR/file");
        assert_eq!(result, PathBuf::from("/path/$NONEXISTENT_NETKEEP_VAR/file"));
    }
}
