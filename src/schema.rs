use anyhow::{Context, Result};
use confkit::{DeploySettings, DeviceDescriptor, PoolSettings, Registry, RetryConfig, VerifyMode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Inventory Schema
// ============================================================================

/// The netkeep inventory: global settings plus managed devices
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Inventory {
    #[serde(default)]
    pub settings: Settings,

    #[serde(default)]
    pub devices: Vec<DeviceDescriptor>,
}

/// Tunables for the pool, the orchestrator, and the local store
#[derive(Debug, Serialize, Deserialize)]
pub struct Settings {
    /// Snapshot and job record directory
    #[serde(default)]
    pub state_dir: Option<String>,

    /// Default compliance rules for `deploy`
    #[serde(default)]
    pub rules: Option<String>,

    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    #[serde(default = "default_io_timeout")]
    pub io_timeout_secs: u64,

    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_true")]
    pub reuse_sessions: bool,

    #[serde(default)]
    pub verify: VerifyMode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_dir: None,
            rules: None,
            pool_size: default_pool_size(),
            acquire_timeout_secs: default_acquire_timeout(),
            io_timeout_secs: default_io_timeout(),
            job_timeout_secs: default_job_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay(),
            reuse_sessions: true,
            verify: VerifyMode::default(),
        }
    }
}

fn default_pool_size() -> usize {
    4
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_io_timeout() -> u64 {
    60
}

fn default_job_timeout() -> u64 {
    600
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

impl Inventory {
    /// Load and validate an inventory file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read inventory: {}", path.display()))?;
        let inventory = Self::parse(&content)
            .with_context(|| format!("Invalid inventory: {}", path.display()))?;
        log::debug!(
            "Loaded {} devices from {}",
            inventory.devices.len(),
            path.display()
        );
        Ok(inventory)
    }

    /// Parse and validate inventory TOML
    pub fn parse(content: &str) -> Result<Self> {
        let inventory: Self = toml::from_str(content).context("Invalid TOML format")?;
        inventory.validate()?;
        Ok(inventory)
    }

    /// Validate the inventory
    pub fn validate(&self) -> Result<()> {
        if self.settings.pool_size == 0 {
            anyhow::bail!("settings.pool_size must be at least 1");
        }
        if self.settings.retry_attempts == 0 {
            anyhow::bail!("settings.retry_attempts must be at least 1");
        }
        for device in &self.devices {
            validate_device(device).with_context(|| format!("Invalid device '{}'", device.name))?;
        }
        Ok(())
    }

    /// Build the immutable device registry
    pub fn registry(&self) -> Result<Registry> {
        Ok(Registry::new(self.devices.clone())?)
    }

    pub fn pool_settings(&self) -> PoolSettings {
        let s = &self.settings;
        PoolSettings {
            size: s.pool_size,
            acquire_timeout: Duration::from_secs(s.acquire_timeout_secs),
            io_timeout: Duration::from_secs(s.io_timeout_secs),
            retry: RetryConfig {
                max_attempts: s.retry_attempts,
                base_delay: Duration::from_millis(s.retry_base_delay_ms),
                ..RetryConfig::default()
            },
            reuse_sessions: s.reuse_sessions,
        }
    }

    pub fn deploy_settings(&self) -> DeploySettings {
        DeploySettings {
            job_timeout: Duration::from_secs(self.settings.job_timeout_secs),
            verify: self.settings.verify,
        }
    }

    /// Default rule file for deployments, if configured
    pub fn rules_path(&self) -> Option<PathBuf> {
        self.settings.rules.as_deref().map(crate::paths::expand)
    }

    pub fn find_device(&self, name: &str) -> Option<&DeviceDescriptor> {
        self.devices.iter().find(|d| d.name == name)
    }
}

/// Device names become directory and file names in the store.
fn validate_device(device: &DeviceDescriptor) -> Result<()> {
    if device.name.is_empty() {
        anyhow::bail!("Device name cannot be empty");
    }
    if !device
        .name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        || device.name.starts_with('.')
    {
        anyhow::bail!("Device name may only contain letters, digits, '-', '_' and '.'");
    }
    if device.address.is_empty() {
        anyhow::bail!("Device address cannot be empty");
    }
    if device.device_type.is_empty() {
        anyhow::bail!("Device type cannot be empty");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_example_inventory() {
        let toml = r#"
[settings]
state_dir = "~/.local/state/netkeep"
rules = "~/netkeep/rules.json"
pool_size = 2
job_timeout_secs = 120
verify = "exact"

[[devices]]
name = "core-1"
address = "10.0.0.1"
device_type = "cisco_ios"
username = "netops"
credential = "~/.ssh/netops_ed25519"
port = 2222

[[devices]]
name = "edge-1"
address = "file:/tmp/edge-1.cfg"
device_type = "juniper"
"#;

        let inventory = Inventory::parse(toml).expect("Failed to parse inventory");

        assert_eq!(inventory.devices.len(), 2);
        let core = inventory.find_device("core-1").unwrap();
        assert_eq!(core.port, Some(2222));
        assert_eq!(core.username.as_deref(), Some("netops"));
        assert!(inventory.find_device("edge-1").unwrap().credential.is_none());

        let pool = inventory.pool_settings();
        assert_eq!(pool.size, 2);
        assert_eq!(pool.acquire_timeout, Duration::from_secs(30));
        assert_eq!(pool.retry.max_attempts, 3);

        let deploy = inventory.deploy_settings();
        assert_eq!(deploy.job_timeout, Duration::from_secs(120));
        assert_eq!(deploy.verify, VerifyMode::Exact);

        assert_eq!(inventory.registry().unwrap().len(), 2);
    }

    #[test]
    fn test_defaults_without_settings() {
        let inventory = Inventory::parse("").unwrap();
        assert!(inventory.devices.is_empty());
        assert_eq!(inventory.settings.pool_size, 4);
        assert_eq!(inventory.settings.io_timeout_secs, 60);
        assert!(inventory.settings.reuse_sessions);
        assert_eq!(inventory.settings.verify, VerifyMode::Contains);
    }

    #[test]
    fn test_duplicate_devices_rejected() {
        let toml = r#"
[[devices]]
name = "core-1"
address = "10.0.0.1"
device_type = "cisco_ios"

[[devices]]
name = "core-1"
address = "10.0.0.2"
device_type = "cisco_ios"
"#;
        let inventory = Inventory::parse(toml).unwrap();
        let err = inventory.registry().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_device_name_validation() {
        let toml = r#"
[[devices]]
name = "../etc"
address = "10.0.0.1"
device_type = "cisco_ios"
"#;
        assert!(Inventory::parse(toml).is_err());
    }

    #[test]
    fn test_zero_pool_size_rejected() {
        assert!(Inventory::parse("[settings]\npool_size = 0\n").is_err());
    }
}
