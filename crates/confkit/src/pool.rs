//! Connection manager: a bounded pool of device sessions.
//!
//! Two limits apply independently:
//! 1. At most `size` sessions are open at once across the fleet
//!    (idle sessions kept for reuse count toward the limit)
//! 2. At most one operation is in flight per device
//!
//! Sessions are handed out as [`SessionGuard`]s. Dropping the guard
//! releases the slot and the device on every exit path, including
//! unwinding.

use crate::error::{Error, Result};
use crate::retry::{LogCallback, with_retry};
use crate::transport::{ConnectOptions, Connector, Session};
use crate::types::{DeviceDescriptor, Registry, RetryConfig};
use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Pool sizing, timeouts and retry policy.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Maximum number of open sessions
    pub size: usize,
    /// How long `acquire` may block waiting for a slot
    pub acquire_timeout: Duration,
    /// Deadline for each transport read/write
    pub io_timeout: Duration,
    /// Retry policy for connection establishment
    pub retry: RetryConfig,
    /// Keep released sessions open for the next operation on the same device
    pub reuse_sessions: bool,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            size: 4,
            acquire_timeout: Duration::from_secs(30),
            io_timeout: Duration::from_secs(60),
            retry: RetryConfig::default(),
            reuse_sessions: true,
        }
    }
}

#[derive(Default)]
struct PoolState {
    /// Sessions currently handed out
    in_use: usize,
    /// Devices with an operation in flight
    busy: HashSet<String>,
    /// Released sessions, oldest first
    idle: Vec<(String, Box<dyn Session>)>,
}

impl PoolState {
    fn open(&self) -> usize {
        self.in_use + self.idle.len()
    }
}

enum Slot {
    Reuse(Box<dyn Session>),
    Fresh,
    Evict(String, Box<dyn Session>),
}

/// Owns the pool of transport sessions for one registry.
pub struct ConnectionManager {
    registry: Arc<Registry>,
    connector: Arc<dyn Connector>,
    settings: PoolSettings,
    state: Mutex<PoolState>,
    freed: Condvar,
}

impl ConnectionManager {
    pub fn new(
        registry: Arc<Registry>,
        connector: Arc<dyn Connector>,
        settings: PoolSettings,
    ) -> Self {
        Self {
            registry,
            connector,
            settings,
            state: Mutex::new(PoolState::default()),
            freed: Condvar::new(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Number of sessions currently open (in use or idle).
    pub fn open_sessions(&self) -> usize {
        self.lock_state().open()
    }

    /// Acquire an exclusive session for a device.
    ///
    /// Blocks until both a pool slot and the device are free, or fails
    /// with [`Error::PoolTimeout`] once the acquire deadline passes.
    pub fn acquire(&self, device_name: &str) -> Result<SessionGuard<'_>> {
        self.acquire_before(device_name, Instant::now() + self.settings.acquire_timeout)
    }

    /// Like [`acquire`](Self::acquire), but gives up at `limit` when that
    /// comes before the acquire deadline.
    pub fn acquire_before(&self, device_name: &str, limit: Instant) -> Result<SessionGuard<'_>> {
        let device = self.registry.require(device_name)?.clone();
        let started = Instant::now();
        let deadline = (started + self.settings.acquire_timeout).min(limit);
        let size = self.settings.size.max(1);

        let slot = {
            let mut state = self.lock_state();
            let slot = loop {
                if !state.busy.contains(&device.name) {
                    if let Some(pos) = state.idle.iter().position(|(n, _)| *n == device.name) {
                        let (_, session) = state.idle.remove(pos);
                        break Slot::Reuse(session);
                    }
                    if state.open() < size {
                        break Slot::Fresh;
                    }
                    if !state.idle.is_empty() {
                        let (name, session) = state.idle.remove(0);
                        break Slot::Evict(name, session);
                    }
                }

                let now = Instant::now();
                if now >= deadline {
                    log::debug!("Acquire for {} timed out", device.name);
                    return Err(Error::PoolTimeout {
                        device: device.name.clone(),
                        waited_ms: started.elapsed().as_millis(),
                    });
                }
                let (guard, _) = self
                    .freed
                    .wait_timeout(state, deadline - now)
                    .unwrap_or_else(PoisonError::into_inner);
                state = guard;
            };
            state.busy.insert(device.name.clone());
            state.in_use += 1;
            slot
        };

        let mut guard = SessionGuard {
            manager: self,
            device,
            session: None,
            healthy: true,
        };

        match slot {
            Slot::Reuse(session) => {
                log::debug!("Reusing idle session for {}", guard.device.name);
                guard.session = Some(session);
            }
            Slot::Fresh => {}
            Slot::Evict(name, mut session) => {
                log::debug!("Evicting idle session for {} to make room", name);
                if let Err(e) = session.close() {
                    log::debug!("Closing evicted session for {} failed: {}", name, e);
                }
            }
        }

        if guard.session.is_none() {
            let session = self.open_session(&guard.device)?;
            guard.session = Some(session);
        }

        Ok(guard)
    }

    /// Run an operation with an exclusive session, releasing it afterwards.
    pub fn with_session<T, F>(&self, device_name: &str, operation: F) -> Result<T>
    where
        F: FnOnce(&mut SessionGuard<'_>) -> Result<T>,
    {
        let mut guard = self.acquire(device_name)?;
        operation(&mut guard)
    }

    /// Close every idle session.
    pub fn shutdown(&self) {
        let idle = std::mem::take(&mut self.lock_state().idle);
        for (name, mut session) in idle {
            if let Err(e) = session.close() {
                log::debug!("Closing idle session for {} failed: {}", name, e);
            }
        }
    }

    fn open_session(&self, device: &DeviceDescriptor) -> Result<Box<dyn Session>> {
        let options = ConnectOptions {
            io_timeout: self.settings.io_timeout,
        };
        log::debug!("Connecting to {} ({})", device.name, device.address);
        with_retry(&self.settings.retry, Some(&LogCallback), || {
            self.connector.connect(device, &options)
        })
    }

    fn release(&self, device: &str, session: Option<Box<dyn Session>>, healthy: bool) {
        // Close before freeing the slot so the open count never overshoots
        let keep = healthy && self.settings.reuse_sessions;
        let session = match session {
            Some(mut session) if !keep => {
                if let Err(e) = session.close() {
                    log::debug!("Closing session for {} failed: {}", device, e);
                }
                None
            }
            other => other,
        };

        {
            let mut state = self.lock_state();
            state.busy.remove(device);
            state.in_use = state.in_use.saturating_sub(1);
            if let Some(session) = session {
                state.idle.push((device.to_string(), session));
            }
        }
        self.freed.notify_all();
        log::trace!("Released session slot for {}", device);
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Exclusive, scoped access to one device session.
pub struct SessionGuard<'a> {
    manager: &'a ConnectionManager,
    device: DeviceDescriptor,
    session: Option<Box<dyn Session>>,
    healthy: bool,
}

impl SessionGuard<'_> {
    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    /// Send one command on the session.
    pub fn send_command(&mut self, command: &str) -> Result<String> {
        let result = self.session_mut()?.send_command(command);
        self.observe(&result);
        result
    }

    /// Send a batch of commands on the session.
    pub fn send_batch(&mut self, commands: &[String]) -> Result<String> {
        let result = self.session_mut()?.send_batch(commands);
        self.observe(&result);
        result
    }

    /// Whether no transport fault has been seen on this session.
    pub fn is_healthy(&self) -> bool {
        self.healthy && self.session.is_some()
    }

    /// Replace the session with a fresh one, keeping the slot and the device.
    pub fn reconnect(&mut self) -> Result<()> {
        if let Some(mut old) = self.session.take() {
            if let Err(e) = old.close() {
                log::debug!("Closing broken session for {} failed: {}", self.device.name, e);
            }
        }
        let session = self.manager.open_session(&self.device)?;
        self.session = Some(session);
        self.healthy = true;
        Ok(())
    }

    fn session_mut(&mut self) -> Result<&mut Box<dyn Session>> {
        let device = &self.device.name;
        self.session.as_mut().ok_or_else(|| Error::Connection {
            device: device.clone(),
            message: "session is closed".to_string(),
        })
    }

    fn observe<T>(&mut self, result: &Result<T>) {
        if let Err(e) = result {
            if e.is_transport_fault() {
                self.healthy = false;
            }
        }
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        let session = self.session.take();
        self.manager.release(&self.device.name, session, self.healthy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeConnector, fast_settings, registry_of};
    use std::sync::atomic::Ordering;

    fn manager(
        devices: &[&str],
        connector: &FakeConnector,
        settings: PoolSettings,
    ) -> ConnectionManager {
        ConnectionManager::new(
            Arc::new(registry_of(devices)),
            Arc::new(connector.clone()),
            settings,
        )
    }

    #[test]
    fn test_pool_of_two_serves_five_devices_without_exceeding_limit() {
        let names = ["r1", "r2", "r3", "r4", "r5"];
        let connector = FakeConnector::new();
        connector.set_delay(Duration::from_millis(30));
        for name in names {
            connector.set_running(name, "hostname x\n");
        }
        let mut settings = fast_settings();
        settings.size = 2;
        settings.acquire_timeout = Duration::from_secs(10);
        let pool = manager(&names, &connector, settings);

        let results: Vec<Result<String>> = std::thread::scope(|scope| {
            let handles: Vec<_> = names
                .iter()
                .map(|name| {
                    let pool = &pool;
                    scope.spawn(move || {
                        pool.with_session(name, |s| s.send_command("show running-config"))
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(results.iter().all(Result::is_ok));
        assert!(connector.state().peak_open.load(Ordering::SeqCst) <= 2);
        assert!(pool.open_sessions() <= 2);
    }

    #[test]
    fn test_acquire_times_out_when_pool_is_full() {
        let connector = FakeConnector::new();
        let mut settings = fast_settings();
        settings.size = 1;
        settings.reuse_sessions = false;
        settings.acquire_timeout = Duration::from_millis(50);
        let pool = manager(&["a", "b"], &connector, settings);

        let _held = pool.acquire("a").unwrap();
        let err = pool.acquire("b").err().unwrap();
        assert!(matches!(err, Error::PoolTimeout { ref device, .. } if device == "b"));
    }

    #[test]
    fn test_acquire_before_gives_up_at_caller_limit() {
        let connector = FakeConnector::new();
        let pool = manager(&["a"], &connector, fast_settings());

        let _held = pool.acquire("a").unwrap();
        let started = Instant::now();
        let err = pool
            .acquire_before("a", started + Duration::from_millis(50))
            .err()
            .unwrap();

        assert!(matches!(err, Error::PoolTimeout { ref device, .. } if device == "a"));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_same_device_is_exclusive_even_with_free_slots() {
        let connector = FakeConnector::new();
        let mut settings = fast_settings();
        settings.size = 4;
        settings.acquire_timeout = Duration::from_millis(50);
        let pool = manager(&["a"], &connector, settings);

        let _held = pool.acquire("a").unwrap();
        let second = std::thread::scope(|scope| scope.spawn(|| pool.acquire("a").err()).join());
        assert!(matches!(second.unwrap(), Some(Error::PoolTimeout { .. })));
    }

    #[test]
    fn test_slot_released_when_operation_fails() {
        let connector = FakeConnector::new();
        let mut settings = fast_settings();
        settings.size = 1;
        settings.acquire_timeout = Duration::from_millis(50);
        let pool = manager(&["a", "b"], &connector, settings);

        let failed: Result<()> = pool.with_session("a", |_| {
            Err(Error::EmptyConfig {
                device: "a".to_string(),
            })
        });
        assert!(failed.is_err());
        assert!(pool.with_session("b", |_| Ok(())).is_ok());
    }

    #[test]
    fn test_idle_session_is_reused() {
        let connector = FakeConnector::new();
        let pool = manager(&["a"], &connector, fast_settings());

        pool.with_session("a", |s| s.send_command("show version")).unwrap();
        pool.with_session("a", |s| s.send_command("show version")).unwrap();

        assert_eq!(connector.state().connects.load(Ordering::SeqCst), 1);
        assert_eq!(pool.open_sessions(), 1);
    }

    #[test]
    fn test_faulted_session_is_not_reused() {
        let connector = FakeConnector::new();
        connector.fail_commands("a", 1);
        let pool = manager(&["a"], &connector, fast_settings());

        let first = pool.with_session("a", |s| s.send_command("show version"));
        assert!(matches!(first, Err(Error::TransportTimeout { .. })));
        pool.with_session("a", |s| s.send_command("show version")).unwrap();

        assert_eq!(connector.state().connects.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_connect_retries_transient_failures() {
        let connector = FakeConnector::new();
        connector.refuse_connects("a", 2);
        let pool = manager(&["a"], &connector, fast_settings());

        pool.with_session("a", |_| Ok(())).unwrap();
        assert_eq!(connector.state().connect_attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_auth_failure_fails_fast() {
        let connector = FakeConnector::new();
        connector.reject_auth("a");
        let pool = manager(&["a"], &connector, fast_settings());

        let err = pool.acquire("a").err().unwrap();
        assert!(matches!(err, Error::Auth { .. }));
        assert_eq!(connector.state().connect_attempts.load(Ordering::SeqCst), 1);
        assert_eq!(pool.open_sessions(), 0);
    }

    #[test]
    fn test_unknown_device() {
        let pool = manager(&["a"], &FakeConnector::new(), fast_settings());
        assert!(matches!(pool.acquire("zz").err(), Some(Error::UnknownDevice(_))));
    }

    #[test]
    fn test_shutdown_closes_idle_sessions() {
        let connector = FakeConnector::new();
        let pool = manager(&["a", "b"], &connector, fast_settings());
        pool.with_session("a", |_| Ok(())).unwrap();
        pool.with_session("b", |_| Ok(())).unwrap();

        pool.shutdown();
        assert_eq!(pool.open_sessions(), 0);
        assert_eq!(connector.state().open.load(Ordering::SeqCst), 0);
    }
}
