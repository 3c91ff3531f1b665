//! OpenSSH transport.
//!
//! `connect` starts a ControlMaster connection in the background; commands
//! then run over its control socket, so authentication happens once per
//! session. Configuration batches are piped to the remote shell on stdin.
//! Every call is bounded by the configured I/O timeout.

use crate::runner;
use confkit::{ConnectOptions, Connector, DeviceDescriptor, Error, Result, Session};
use std::fs::{self, File};
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Exit status ssh itself uses for connection-level failures.
const SSH_FAILURE: i32 = 255;

static SESSION_SEQ: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Default)]
pub struct SshConnector;

impl Connector for SshConnector {
    fn connect(
        &self,
        device: &DeviceDescriptor,
        options: &ConnectOptions,
    ) -> Result<Box<dyn Session>> {
        let seq = SESSION_SEQ.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!("netkeep-{}", std::process::id()));
        fs::create_dir_all(&dir)?;
        let socket = dir.join(format!("{}-{}.sock", device.name, seq));
        let log_path = dir.join(format!("{}-{}.log", device.name, seq));

        let mut session = SshSession {
            device: device.clone(),
            socket,
            timeout: options.io_timeout,
            open: false,
        };

        // The backgrounded master keeps its stdio; never pipe it
        let stderr = File::create(&log_path)?;
        let mut child = session
            .base_command()
            .args(["-M", "-f", "-N"])
            .arg("-o")
            .arg(format!("ConnectTimeout={}", options.io_timeout.as_secs().max(1)))
            .arg(&device.address)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr))
            .spawn()?;

        let status = runner::wait_with_deadline(&mut child, options.io_timeout)?;
        let stderr = fs::read_to_string(&log_path).unwrap_or_default();
        let _ = fs::remove_file(&log_path);

        match status {
            Some(status) if status.success() => {
                log::debug!("SSH master for {} at {}", device.name, session.socket.display());
                session.open = true;
                Ok(Box::new(session))
            }
            Some(_) => Err(Error::from_transport_output(&device.name, &stderr)),
            None => Err(Error::TransportTimeout {
                device: device.name.clone(),
                operation: "connect".to_string(),
                timeout_secs: options.io_timeout.as_secs(),
            }),
        }
    }
}

struct SshSession {
    device: DeviceDescriptor,
    socket: PathBuf,
    timeout: Duration,
    open: bool,
}

impl SshSession {
    fn base_command(&self) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-S")
            .arg(&self.socket)
            .args(["-o", "BatchMode=yes", "-o", "StrictHostKeyChecking=accept-new"]);
        if let Some(port) = self.device.port {
            cmd.arg("-p").arg(port.to_string());
        }
        if let Some(user) = &self.device.username {
            cmd.arg("-l").arg(user);
        }
        if let Some(identity) = &self.device.credential {
            cmd.arg("-i").arg(crate::paths::expand(identity));
        }
        cmd
    }

    fn run(&self, operation: &str, remote: Option<&str>, input: Option<&str>) -> Result<String> {
        let mut cmd = self.base_command();
        cmd.arg("-T").arg(&self.device.address);
        if let Some(remote) = remote {
            cmd.arg(remote);
        }

        let output = runner::run_with_deadline(&mut cmd, input, self.timeout)?;
        let Some(output) = output else {
            return Err(Error::TransportTimeout {
                device: self.device.name.clone(),
                operation: operation.to_string(),
                timeout_secs: self.timeout.as_secs(),
            });
        };
        self.check(output)
    }

    fn check(&self, output: Output) -> Result<String> {
        if output.status.code() == Some(SSH_FAILURE) || output.status.code().is_none() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::from_transport_output(&self.device.name, &stderr));
        }
        // Device CLIs report rejected lines on stdout; callers inspect it
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Session for SshSession {
    fn send_command(&mut self, command: &str) -> Result<String> {
        self.run(command, Some(command), None)
    }

    fn send_batch(&mut self, commands: &[String]) -> Result<String> {
        let mut script = commands.join("\n");
        script.push('\n');
        self.run("configuration push", None, Some(&script))
    }

    fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        let mut cmd = self.base_command();
        cmd.args(["-O", "exit"]).arg(&self.device.address);
        let result = runner::run_with_deadline(&mut cmd, None, self.timeout);
        let _ = fs::remove_file(&self.socket);
        match result? {
            Some(_) => Ok(()),
            None => Err(Error::TransportTimeout {
                device: self.device.name.clone(),
                operation: "close".to_string(),
                timeout_secs: self.timeout.as_secs(),
            }),
        }
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::debug!("Closing SSH master for {} failed: {}", self.device.name, e);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn session(device: DeviceDescriptor) -> SshSession {
        SshSession {
            device,
            socket: PathBuf::from("/tmp/netkeep-test.sock"),
            timeout: Duration::from_secs(5),
            open: false,
        }
    }

    fn args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_command_carries_device_options() {
        let mut device = DeviceDescriptor::new("core-1", "10.0.0.1", "cisco_ios");
        device.port = Some(2222);
        device.username = Some("netops".to_string());
        let cmd = session(device).base_command();

        let args = args(&cmd);
        assert_eq!(cmd.get_program(), "ssh");
        assert!(args.windows(2).any(|w| w == ["-S", "/tmp/netkeep-test.sock"]));
        assert!(args.windows(2).any(|w| w == ["-p", "2222"]));
        assert!(args.windows(2).any(|w| w == ["-l", "netops"]));
        assert!(args.contains(&"BatchMode=yes".to_string()));
    }

    #[test]
    fn test_ssh_failure_status_is_classified() {
        use std::os::unix::process::ExitStatusExt;

        let s = session(DeviceDescriptor::new("core-1", "10.0.0.1", "cisco_ios"));
        let output = Output {
            status: std::process::ExitStatus::from_raw(SSH_FAILURE << 8),
            stdout: Vec::new(),
            stderr: b"netops@10.0.0.1: Permission denied (publickey).".to_vec(),
        };
        assert!(matches!(s.check(output), Err(Error::Auth { .. })));
    }

    #[test]
    fn test_remote_exit_status_keeps_output() {
        use std::os::unix::process::ExitStatusExt;

        let s = session(DeviceDescriptor::new("core-1", "10.0.0.1", "cisco_ios"));
        let output = Output {
            status: std::process::ExitStatus::from_raw(1 << 8),
            stdout: b"% Invalid input detected at '^' marker.\n".to_vec(),
            stderr: Vec::new(),
        };
        assert!(s.check(output).unwrap().starts_with("% Invalid"));
    }
}
