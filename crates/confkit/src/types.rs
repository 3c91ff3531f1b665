//! Core types shared across the engines.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Identity of one managed device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Unique device name (the device id used everywhere else)
    pub name: String,
    /// Management address: host, IP, or `file:PATH` for lab devices
    pub address: String,
    /// Platform tag, e.g. `cisco_ios` or `juniper`
    pub device_type: String,
    /// Login user, if the transport needs one
    #[serde(default)]
    pub username: Option<String>,
    /// Credential reference resolved by the transport (e.g. an ssh identity file)
    #[serde(default)]
    pub credential: Option<String>,
    /// Management port, if not the transport default
    #[serde(default)]
    pub port: Option<u16>,
}

impl DeviceDescriptor {
    /// Create a descriptor with no credentials.
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        device_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            device_type: device_type.into(),
            username: None,
            credential: None,
            port: None,
        }
    }
}

/// Immutable, ordered set of devices.
///
/// Built once from the inventory and handed to the connection manager at
/// construction; nothing looks devices up from global state.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    devices: Vec<DeviceDescriptor>,
}

impl Registry {
    /// Build a registry, rejecting duplicate device names.
    pub fn new(devices: Vec<DeviceDescriptor>) -> Result<Self> {
        let mut seen = HashSet::new();
        for device in &devices {
            if !seen.insert(device.name.as_str()) {
                return Err(Error::DuplicateDevice(device.name.clone()));
            }
        }
        Ok(Self { devices })
    }

    /// Find a device by name.
    pub fn get(&self, name: &str) -> Option<&DeviceDescriptor> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// Find a device by name or fail with [`Error::UnknownDevice`].
    pub fn require(&self, name: &str) -> Result<&DeviceDescriptor> {
        self.get(name)
            .ok_or_else(|| Error::UnknownDevice(name.to_string()))
    }

    /// Iterate devices in inventory order.
    pub fn iter(&self) -> impl Iterator<Item = &DeviceDescriptor> {
        self.devices.iter()
    }

    /// Device names in inventory order.
    pub fn names(&self) -> Vec<String> {
        self.devices.iter().map(|d| d.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Configuration for retry behavior on connection establishment.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with custom settings.
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            max_delay: Duration::from_secs(30),
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}
