//! In-memory transport for unit tests.

use crate::error::{Error, Result};
use crate::pool::PoolSettings;
use crate::transport::{ConnectOptions, Connector, Session};
use crate::types::{DeviceDescriptor, Registry, RetryConfig};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How the fake device reacts to the next configuration push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushMode {
    /// Replace the running config with the pushed lines
    Apply,
    /// Accept the push but leave the running config untouched
    Ignore,
    /// Answer with a `% Invalid input` marker
    Reject,
    /// Drop the channel mid-push
    Drop,
}

#[derive(Default)]
pub struct FakeState {
    pub running: Mutex<HashMap<String, String>>,
    pub pushes: Mutex<HashMap<String, VecDeque<PushMode>>>,
    pub refusals: Mutex<HashMap<String, u32>>,
    pub command_faults: Mutex<HashMap<String, u32>>,
    pub auth_rejects: Mutex<HashSet<String>>,
    pub delay: Mutex<Duration>,
    pub connect_attempts: AtomicUsize,
    pub connects: AtomicUsize,
    pub open: AtomicUsize,
    pub peak_open: AtomicUsize,
    pub writes: AtomicUsize,
    pub saves: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct FakeConnector(Arc<FakeState>);

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &FakeState {
        &self.0
    }

    pub fn set_running(&self, device: &str, text: &str) {
        self.0
            .running
            .lock()
            .unwrap()
            .insert(device.to_string(), text.to_string());
    }

    pub fn running(&self, device: &str) -> String {
        self.0
            .running
            .lock()
            .unwrap()
            .get(device)
            .cloned()
            .unwrap_or_default()
    }

    pub fn queue_push(&self, device: &str, mode: PushMode) {
        self.0
            .pushes
            .lock()
            .unwrap()
            .entry(device.to_string())
            .or_default()
            .push_back(mode);
    }

    pub fn refuse_connects(&self, device: &str, times: u32) {
        self.0
            .refusals
            .lock()
            .unwrap()
            .insert(device.to_string(), times);
    }

    pub fn fail_commands(&self, device: &str, times: u32) {
        self.0
            .command_faults
            .lock()
            .unwrap()
            .insert(device.to_string(), times);
    }

    pub fn reject_auth(&self, device: &str) {
        self.0
            .auth_rejects
            .lock()
            .unwrap()
            .insert(device.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.0.delay.lock().unwrap() = delay;
    }
}

fn take_one(map: &Mutex<HashMap<String, u32>>, device: &str) -> bool {
    let mut map = map.lock().unwrap();
    match map.get_mut(device) {
        Some(n) if *n > 0 => {
            *n -= 1;
            true
        }
        _ => false,
    }
}

impl Connector for FakeConnector {
    fn connect(
        &self,
        device: &DeviceDescriptor,
        _options: &ConnectOptions,
    ) -> Result<Box<dyn Session>> {
        self.0.connect_attempts.fetch_add(1, Ordering::SeqCst);

        if self.0.auth_rejects.lock().unwrap().contains(&device.name) {
            return Err(Error::Auth {
                device: device.name.clone(),
                message: "Permission denied (publickey)".to_string(),
            });
        }
        if take_one(&self.0.refusals, &device.name) {
            return Err(Error::Connection {
                device: device.name.clone(),
                message: "Connection refused".to_string(),
            });
        }

        self.0.connects.fetch_add(1, Ordering::SeqCst);
        let open = self.0.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.0.peak_open.fetch_max(open, Ordering::SeqCst);

        Ok(Box::new(FakeSession {
            device: device.name.clone(),
            state: Arc::clone(&self.0),
        }))
    }
}

struct FakeSession {
    device: String,
    state: Arc<FakeState>,
}

impl FakeSession {
    fn fault(&self, operation: &str) -> Error {
        Error::TransportTimeout {
            device: self.device.clone(),
            operation: operation.to_string(),
            timeout_secs: 1,
        }
    }
}

impl Session for FakeSession {
    fn send_command(&mut self, command: &str) -> Result<String> {
        let delay = *self.state.delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if take_one(&self.state.command_faults, &self.device) {
            return Err(self.fault(command));
        }

        if command.starts_with("show running-config") || command.starts_with("show configuration")
        {
            let running = self
                .state
                .running
                .lock()
                .unwrap()
                .get(&self.device)
                .cloned()
                .unwrap_or_default();
            if running.is_empty() {
                return Ok(String::new());
            }
            return Ok(format!(
                "Building configuration...\r\n\r\nCurrent configuration : {} bytes\r\n{}",
                running.len(),
                running.replace('\n', "\r\n")
            ));
        }
        if command == "write memory" {
            self.state.saves.fetch_add(1, Ordering::SeqCst);
            return Ok("Building configuration...\n[OK]\n".to_string());
        }
        Ok(String::new())
    }

    fn send_batch(&mut self, commands: &[String]) -> Result<String> {
        self.state.writes.fetch_add(1, Ordering::SeqCst);
        let mode = self
            .state
            .pushes
            .lock()
            .unwrap()
            .get_mut(&self.device)
            .and_then(VecDeque::pop_front)
            .unwrap_or(PushMode::Apply);

        match mode {
            PushMode::Apply => {
                let body: Vec<&str> = commands
                    .iter()
                    .map(String::as_str)
                    .filter(|c| *c != "configure terminal" && *c != "end")
                    .collect();
                let mut text = body.join("\n");
                text.push('\n');
                self.state
                    .running
                    .lock()
                    .unwrap()
                    .insert(self.device.clone(), text);
                Ok(String::new())
            }
            PushMode::Ignore => Ok(String::new()),
            PushMode::Reject => Ok("% Invalid input detected at '^' marker.\n".to_string()),
            PushMode::Drop => Err(self.fault("configuration push")),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.state.open.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn registry_of(names: &[&str]) -> Registry {
    Registry::new(
        names
            .iter()
            .map(|n| DeviceDescriptor::new(*n, format!("10.0.0.{}", n.len()), "cisco_ios"))
            .collect(),
    )
    .unwrap()
}

pub fn fast_settings() -> PoolSettings {
    PoolSettings {
        size: 4,
        acquire_timeout: Duration::from_secs(2),
        io_timeout: Duration::from_secs(1),
        retry: RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_millis(5),
        },
        reuse_sessions: true,
    }
}
