//! Transport capability contract.
//!
//! The [`Connector`] and [`Session`] traits are the only way the engines
//! talk to devices. Concrete transports (ssh, lab files, test doubles)
//! live outside this crate and classify their own failures into the
//! [`Error`](crate::Error) taxonomy:
//!
//! - refused/reset/unreachable → [`Error::Connection`](crate::Error::Connection)
//! - rejected credentials → [`Error::Auth`](crate::Error::Auth)
//! - read/write deadline exceeded → [`Error::TransportTimeout`](crate::Error::TransportTimeout)

use crate::error::Result;
use crate::types::DeviceDescriptor;
use std::time::Duration;

/// Options handed to a connector for every new session.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Deadline for each individual transport read/write
    pub io_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            io_timeout: Duration::from_secs(60),
        }
    }
}

/// An authenticated text channel to one device.
pub trait Session: Send {
    /// Send one command and return its output.
    fn send_command(&mut self, command: &str) -> Result<String>;

    /// Send a batch of commands as one unit and return the combined output.
    ///
    /// Configuration pushes go through this method, so transports that can
    /// stream a whole batch in one round trip should override it.
    fn send_batch(&mut self, commands: &[String]) -> Result<String> {
        let mut output = String::new();
        for command in commands {
            output.push_str(&self.send_command(command)?);
            if !output.ends_with('\n') {
                output.push('\n');
            }
        }
        Ok(output)
    }

    /// Close the channel. Called exactly once by the connection manager.
    fn close(&mut self) -> Result<()>;
}

/// Factory for sessions.
pub trait Connector: Send + Sync {
    /// Open an authenticated session to a device.
    fn connect(&self, device: &DeviceDescriptor, options: &ConnectOptions)
    -> Result<Box<dyn Session>>;
}
