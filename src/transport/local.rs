//! File-backed lab devices.
//!
//! The running configuration of a lab device is the content of a file.
//! `show` commands return it; a configuration push replaces it with the
//! pushed lines. Useful for rehearsing deployments without hardware.

use confkit::{
    ConnectOptions, Connector, DeviceDescriptor, Error, Platform, Result, Session,
};
use std::fs;
use std::path::{Path, PathBuf};

const SCHEME: &str = "file:";

/// Path of a lab device address, if it is one.
pub fn lab_path(address: &str) -> Option<PathBuf> {
    address
        .strip_prefix(SCHEME)
        .filter(|p| !p.is_empty())
        .map(crate::paths::expand)
}

#[derive(Debug, Default)]
pub struct LocalConnector;

impl Connector for LocalConnector {
    fn connect(
        &self,
        device: &DeviceDescriptor,
        _options: &ConnectOptions,
    ) -> Result<Box<dyn Session>> {
        let path = lab_path(&device.address).ok_or_else(|| Error::Connection {
            device: device.name.clone(),
            message: format!("not a lab address: {}", device.address),
        })?;
        if !path.is_file() {
            return Err(Error::Connection {
                device: device.name.clone(),
                message: format!("lab device file not found: {}", path.display()),
            });
        }
        log::debug!("Opened lab device {} at {}", device.name, path.display());
        Ok(Box::new(LocalSession {
            device: device.name.clone(),
            platform: Platform::for_device_type(&device.device_type),
            path,
        }))
    }
}

struct LocalSession {
    device: String,
    platform: Platform,
    path: PathBuf,
}

impl LocalSession {
    fn io_error(&self, e: &std::io::Error) -> Error {
        Error::Connection {
            device: self.device.clone(),
            message: format!("{}: {}", self.path.display(), e),
        }
    }

    fn is_mode_switch(&self, line: &str) -> bool {
        Some(line) == self.platform.config_enter || Some(line) == self.platform.config_exit
    }
}

impl Session for LocalSession {
    fn send_command(&mut self, command: &str) -> Result<String> {
        if command.trim_start().starts_with("show") {
            return fs::read_to_string(&self.path).map_err(|e| self.io_error(&e));
        }
        log::trace!("Lab device {} ignores '{}'", self.device, command);
        Ok(String::new())
    }

    fn send_batch(&mut self, commands: &[String]) -> Result<String> {
        let mut text = String::new();
        for line in commands.iter().filter(|l| !self.is_mode_switch(l)) {
            text.push_str(line);
            text.push('\n');
        }
        write_atomic(&self.path, &text).map_err(|e| self.io_error(&e))?;
        Ok(String::new())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Replace a file's content without exposing a partial write.
fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".netkeep-tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lab(dir: &Path, text: &str) -> DeviceDescriptor {
        let path = dir.join("r1.cfg");
        fs::write(&path, text).unwrap();
        DeviceDescriptor::new("r1", format!("file:{}", path.display()), "cisco_ios")
    }

    #[test]
    fn test_lab_path() {
        assert_eq!(lab_path("file:/tmp/r1.cfg"), Some(PathBuf::from("/tmp/r1.cfg")));
        assert_eq!(lab_path("10.0.0.1"), None);
        assert_eq!(lab_path("file:"), None);
    }

    #[test]
    fn test_show_returns_file_content() {
        let dir = tempfile::tempdir().unwrap();
        let device = lab(dir.path(), "hostname r1\n");
        let mut session = LocalConnector
            .connect(&device, &ConnectOptions::default())
            .unwrap();
        assert_eq!(
            session.send_command("show running-config").unwrap(),
            "hostname r1\n"
        );
        assert_eq!(session.send_command("write memory").unwrap(), "");
    }

    #[test]
    fn test_push_replaces_config_without_mode_switches() {
        let dir = tempfile::tempdir().unwrap();
        let device = lab(dir.path(), "hostname r1\n");
        let mut session = LocalConnector
            .connect(&device, &ConnectOptions::default())
            .unwrap();

        let batch = Platform::for_device_type("cisco_ios")
            .push_batch(&["hostname r2".to_string(), "ntp server 10.0.0.1".to_string()]);
        session.send_batch(&batch).unwrap();

        let text = fs::read_to_string(dir.path().join("r1.cfg")).unwrap();
        assert_eq!(text, "hostname r2\nntp server 10.0.0.1\n");
    }

    #[test]
    fn test_missing_file_is_a_connection_error() {
        let device = DeviceDescriptor::new("r1", "file:/nonexistent/netkeep/r1.cfg", "cisco_ios");
        let err = LocalConnector
            .connect(&device, &ConnectOptions::default())
            .err()
            .unwrap();
        assert!(err.is_retryable());
    }
}
