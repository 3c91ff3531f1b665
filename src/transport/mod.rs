//! Concrete device transports.
//!
//! Addresses of the form `file:PATH` go to the local lab transport,
//! everything else goes over OpenSSH.

pub mod local;
pub mod ssh;

use confkit::{ConnectOptions, Connector, DeviceDescriptor, Result, Session};

pub use local::LocalConnector;
pub use ssh::SshConnector;

/// Picks a transport from the device address scheme.
#[derive(Debug, Default)]
pub struct RoutingConnector {
    local: LocalConnector,
    ssh: SshConnector,
}

impl RoutingConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Connector for RoutingConnector {
    fn connect(
        &self,
        device: &DeviceDescriptor,
        options: &ConnectOptions,
    ) -> Result<Box<dyn Session>> {
        if local::lab_path(&device.address).is_some() {
            self.local.connect(device, options)
        } else {
            self.ssh.connect(device, options)
        }
    }
}
