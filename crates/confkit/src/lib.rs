//! # confkit
//!
//! Configuration management core for network devices.
//!
//! This crate provides:
//! - A bounded, per-device-exclusive connection pool over pluggable transports
//! - Configuration snapshots with content checksums
//! - A symmetric line diff between snapshots
//! - Regex compliance rules
//! - A deployment state machine with verification and automatic rollback
//!
//! Transports are supplied by the caller through the [`Connector`] and
//! [`Session`] traits; the crate itself never opens a socket.
//!
//! ## Example
//!
//! ```
//! use chrono::Utc;
//! use confkit::compliance::{self, ComplianceRule, Severity};
//! use confkit::diff;
//! use confkit::ConfigSnapshot;
//!
//! let before = ConfigSnapshot::from_text("core-1", Utc::now(), "hostname core-1\n");
//! let after = ConfigSnapshot::from_text(
//!     "core-1",
//!     Utc::now(),
//!     "hostname core-1\nntp server 10.0.0.1\n",
//! );
//!
//! let result = diff::diff(&before, &after);
//! assert_eq!(result.summary().added, 1);
//!
//! let rules = vec![ComplianceRule::absent(
//!     "No Telnet",
//!     Severity::Error,
//!     "transport input telnet",
//! )];
//! let results = compliance::evaluate(&after.text(), &rules);
//! assert!(results[0].passed());
//! ```

#![warn(clippy::all)]

pub mod backup;
pub mod compliance;
pub mod deploy;
pub mod diff;
pub mod error;
pub mod platform;
pub mod pool;
pub mod retry;
pub mod snapshot;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testing;

pub use compliance::{ComplianceRule, Severity, ValidationReport, ValidationResult};
pub use deploy::{CancelToken, DeploySettings, DeploymentJob, JobState, Orchestrator, VerifyMode};
pub use diff::{DiffOp, DiffResult, DiffSummary};
pub use error::{Error, ErrorCategory, Result};
pub use platform::Platform;
pub use pool::{ConnectionManager, PoolSettings, SessionGuard};
pub use snapshot::ConfigSnapshot;
pub use transport::{ConnectOptions, Connector, Session};
pub use types::{DeviceDescriptor, Registry, RetryConfig};
