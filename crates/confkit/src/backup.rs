//! Backup engine: capture running configuration as snapshots.

use crate::error::{Error, Result};
use crate::platform::Platform;
use crate::pool::{ConnectionManager, SessionGuard};
use crate::snapshot::ConfigSnapshot;
use chrono::Utc;
use rayon::prelude::*;

/// Capture the running configuration over an already-acquired session.
pub fn capture(session: &mut SessionGuard<'_>) -> Result<ConfigSnapshot> {
    let device = session.device().clone();
    let platform = Platform::for_device_type(&device.device_type);

    let output = session.send_command(platform.show_running)?;
    let snapshot = ConfigSnapshot::from_text(&device.name, Utc::now(), &output);
    if snapshot.is_empty() {
        return Err(Error::EmptyConfig {
            device: device.name,
        });
    }

    log::debug!(
        "Captured {} lines from {} ({})",
        snapshot.lines().len(),
        device.name,
        &snapshot.checksum()[..12]
    );
    Ok(snapshot)
}

/// Back up one device.
pub fn backup(manager: &ConnectionManager, device: &str) -> Result<ConfigSnapshot> {
    manager.with_session(device, capture)
}

/// Back up many devices concurrently on `jobs` worker threads.
///
/// `on_done` is called from the worker thread as each device finishes.
/// Results come back in input order; one device failing does not affect
/// the others.
pub fn backup_all<F>(
    manager: &ConnectionManager,
    devices: &[String],
    jobs: usize,
    on_done: F,
) -> Result<Vec<(String, Result<ConfigSnapshot>)>>
where
    F: Fn(&str, &Result<ConfigSnapshot>) + Sync,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.max(1))
        .build()
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;

    Ok(pool.install(|| {
        devices
            .par_iter()
            .map(|name| {
                let result = backup(manager, name);
                on_done(name, &result);
                (name.clone(), result)
            })
            .collect()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeConnector, fast_settings, registry_of};
    use std::sync::Arc;

    fn manager(names: &[&str], connector: &FakeConnector) -> ConnectionManager {
        ConnectionManager::new(
            Arc::new(registry_of(names)),
            Arc::new(connector.clone()),
            fast_settings(),
        )
    }

    #[test]
    fn test_backup_is_idempotent_for_unchanged_device() {
        let connector = FakeConnector::new();
        connector.set_running("r1", "hostname r1\nntp server 10.0.0.1\n");
        let pool = manager(&["r1"], &connector);

        let first = backup(&pool, "r1").unwrap();
        let second = backup(&pool, "r1").unwrap();

        assert_eq!(first.checksum(), second.checksum());
        assert_eq!(first.lines(), ["hostname r1", "ntp server 10.0.0.1"]);
    }

    #[test]
    fn test_empty_response_is_an_error() {
        let connector = FakeConnector::new();
        let pool = manager(&["r1"], &connector);

        let err = backup(&pool, "r1").unwrap_err();
        assert!(matches!(err, Error::EmptyConfig { ref device } if device == "r1"));
    }

    #[test]
    fn test_transport_failure_propagates() {
        let connector = FakeConnector::new();
        connector.set_running("r1", "hostname r1\n");
        connector.fail_commands("r1", 1);
        let pool = manager(&["r1"], &connector);

        assert!(matches!(
            backup(&pool, "r1"),
            Err(Error::TransportTimeout { .. })
        ));
    }

    #[test]
    fn test_backup_all_keeps_input_order_and_isolates_failures() {
        let connector = FakeConnector::new();
        connector.set_running("a", "hostname a\n");
        connector.set_running("c", "hostname c\n");
        let pool = manager(&["a", "b", "c"], &connector);

        let names: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let finished = std::sync::atomic::AtomicUsize::new(0);
        let results = backup_all(&pool, &names, 3, |_, _| {
            finished.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        })
        .unwrap();

        assert_eq!(finished.into_inner(), 3);

        let order: Vec<&str> = results.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(order, ["a", "b", "c"]);
        assert!(results[0].1.is_ok());
        assert!(matches!(results[1].1, Err(Error::EmptyConfig { .. })));
        assert!(results[2].1.is_ok());
    }
}
