//! Error types for device configuration operations.
//!
//! Errors are categorized so the connection manager can decide what to
//! retry and the CLI can map every failure class to its own exit code.
//! Failed compliance rules are not errors: they are reported as
//! [`ValidationResult`](crate::compliance::ValidationResult) values.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Categories of failures, used for retry decisions and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    /// Transport unreachable, refused or reset (transient, retryable)
    Connection,
    /// Credentials rejected
    Auth,
    /// No pool slot became free before the acquire deadline
    PoolTimeout,
    /// A transport read or write exceeded its deadline
    TransportTimeout,
    /// Device returned no configuration data
    EmptyConfig,
    /// Push or verification failure during a deployment
    Deployment,
    /// Rollback push failed; the device needs manual attention
    RollbackFailure,
    /// Overall job wall-clock deadline exceeded
    JobTimeout,
    /// Job cancelled by the caller before applying
    Cancelled,
    /// Bad input: unknown device, bad rule file, illegal request
    Usage,
    /// Local I/O or serialization failure
    Io,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection)
    }

    /// Process exit code used by the CLI for this failure class.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Usage | Self::Io => 2,
            Self::Connection => 3,
            Self::Auth => 4,
            Self::PoolTimeout => 5,
            Self::TransportTimeout => 6,
            Self::EmptyConfig => 7,
            Self::Deployment => 8,
            Self::RollbackFailure => 9,
            Self::JobTimeout => 10,
            Self::Cancelled => 11,
        }
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Connection => "Device unreachable",
            Self::Auth => "Authentication failed",
            Self::PoolTimeout => "Connection pool exhausted",
            Self::TransportTimeout => "Device unresponsive",
            Self::EmptyConfig => "Device returned an empty configuration",
            Self::Deployment => "Deployment failed",
            Self::RollbackFailure => "Rollback failed",
            Self::JobTimeout => "Deployment job timed out",
            Self::Cancelled => "Cancelled",
            Self::Usage => "Invalid request",
            Self::Io => "Local I/O error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Connection => "Check reachability of the device and its management port",
            Self::Auth => "Check the username and credential reference in the inventory",
            Self::PoolTimeout => "Raise pool_size or acquire_timeout_secs, or lower --jobs",
            Self::TransportTimeout => "The device stopped answering; raise io_timeout_secs",
            Self::EmptyConfig => "Inspect the device; an empty running config is not trusted",
            Self::Deployment => "The device was restored to its baseline; review the job log",
            Self::RollbackFailure => {
                "Manual intervention required: restore the logged baseline on the device"
            }
            Self::JobTimeout => "Raise job_timeout_secs or investigate the slow device",
            Self::Cancelled => "No action needed - nothing was applied",
            Self::Usage => "Check the command arguments and input files",
            Self::Io => "Check file permissions and free space",
        }
    }
}

/// Errors that can occur while managing device configuration.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport unreachable or reset
    #[error("connection to {device} failed: {message}")]
    Connection {
        /// Device name
        device: String,
        /// Transport-level detail
        message: String,
    },

    /// Credentials rejected by the device
    #[error("authentication to {device} failed: {message}")]
    Auth {
        /// Device name
        device: String,
        /// Transport-level detail
        message: String,
    },

    /// No pool slot became free in time
    #[error("timed out after {waited_ms}ms waiting for a connection slot for {device}")]
    PoolTimeout {
        /// Device name
        device: String,
        /// How long the caller waited
        waited_ms: u128,
    },

    /// Transport read/write deadline exceeded
    #[error("{device} did not answer within {timeout_secs}s: {operation}")]
    TransportTimeout {
        /// Device name
        device: String,
        /// What was being sent
        operation: String,
        /// Configured I/O deadline
        timeout_secs: u64,
    },

    /// Device returned no configuration
    #[error("{device} returned an empty configuration")]
    EmptyConfig {
        /// Device name
        device: String,
    },

    /// Push or verification failure
    #[error("deployment to {device} failed during {phase}: {message}")]
    Deployment {
        /// Device name
        device: String,
        /// State machine phase where the failure happened
        phase: String,
        /// Failure detail
        message: String,
    },

    /// Rollback push failed
    #[error(
        "rollback of {device} failed: {message}; baseline {baseline_checksum} must be restored manually"
    )]
    RollbackFailure {
        /// Device name
        device: String,
        /// Checksum of the retained baseline
        baseline_checksum: String,
        /// Failure detail
        message: String,
    },

    /// Job wall-clock deadline exceeded
    #[error("deployment job {job_id} exceeded its {timeout_secs}s deadline during {phase}")]
    JobTimeout {
        /// Job identifier
        job_id: String,
        /// Phase where the deadline was noticed
        phase: String,
        /// Configured deadline
        timeout_secs: u64,
    },

    /// Job cancelled before applying
    #[error("deployment job {job_id} was cancelled")]
    Cancelled {
        /// Job identifier
        job_id: String,
    },

    /// Cancellation requested after applying started
    #[error("deployment job {job_id} is already applying and cannot be cancelled")]
    CancelRejected {
        /// Job identifier
        job_id: String,
    },

    /// State machine misuse
    #[error("illegal job transition {from} -> {to}")]
    InvalidTransition {
        /// Current state
        from: String,
        /// Requested state
        to: String,
    },

    /// Device not present in the registry
    #[error("device not found: {0}")]
    UnknownDevice(String),

    /// Two registry entries share a name
    #[error("duplicate device name in inventory: {0}")]
    DuplicateDevice(String),

    /// Rule file could not be read or parsed
    #[error("invalid rule file {path}: {message}")]
    RuleLoad {
        /// Path of the rule file
        path: PathBuf,
        /// Parse failure detail
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Get the error category for retry logic and exit codes.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Connection { .. } => ErrorCategory::Connection,
            Error::Auth { .. } => ErrorCategory::Auth,
            Error::PoolTimeout { .. } => ErrorCategory::PoolTimeout,
            Error::TransportTimeout { .. } => ErrorCategory::TransportTimeout,
            Error::EmptyConfig { .. } => ErrorCategory::EmptyConfig,
            Error::Deployment { .. } => ErrorCategory::Deployment,
            Error::RollbackFailure { .. } => ErrorCategory::RollbackFailure,
            Error::JobTimeout { .. } => ErrorCategory::JobTimeout,
            Error::Cancelled { .. } => ErrorCategory::Cancelled,
            Error::CancelRejected { .. }
            | Error::InvalidTransition { .. }
            | Error::UnknownDevice(_)
            | Error::DuplicateDevice(_)
            | Error::RuleLoad { .. } => ErrorCategory::Usage,
            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Whether the session that produced this error can no longer be trusted.
    pub fn is_transport_fault(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Connection | ErrorCategory::Auth | ErrorCategory::TransportTimeout
        )
    }

    /// Classify transport stderr text for a device.
    ///
    /// Transports that only see text (ssh client output, device banners)
    /// use this to land in the right taxonomy class.
    pub fn from_transport_output(device: &str, stderr: &str) -> Self {
        let lower = stderr.to_lowercase();

        if lower.contains("permission denied")
            || lower.contains("authentication failed")
            || lower.contains("too many authentication failures")
            || lower.contains("access denied")
            || lower.contains("no supported authentication methods")
        {
            return Error::Auth {
                device: device.to_string(),
                message: stderr.trim().to_string(),
            };
        }

        Error::Connection {
            device: device.to_string(),
            message: stderr.trim().to_string(),
        }
    }
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connection_is_retryable() {
        assert!(ErrorCategory::Connection.is_retryable());
        assert!(!ErrorCategory::Auth.is_retryable());
        assert!(!ErrorCategory::PoolTimeout.is_retryable());
        assert!(!ErrorCategory::RollbackFailure.is_retryable());
    }

    #[test]
    fn test_exit_codes_are_distinct_per_failure_class() {
        let categories = [
            ErrorCategory::Connection,
            ErrorCategory::Auth,
            ErrorCategory::PoolTimeout,
            ErrorCategory::TransportTimeout,
            ErrorCategory::EmptyConfig,
            ErrorCategory::Deployment,
            ErrorCategory::RollbackFailure,
            ErrorCategory::JobTimeout,
            ErrorCategory::Cancelled,
        ];
        let mut codes: Vec<u8> = categories.iter().map(ErrorCategory::exit_code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), categories.len());
        assert!(!codes.contains(&0));
        assert!(!codes.contains(&1));
    }

    #[test]
    fn test_from_transport_output_auth() {
        let err = Error::from_transport_output(
            "core-1",
            "netops@10.0.0.1: Permission denied (publickey).",
        );
        assert_eq!(err.category(), ErrorCategory::Auth);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_from_transport_output_refused() {
        let err = Error::from_transport_output(
            "core-1",
            "ssh: connect to host 10.0.0.1 port 22: Connection refused",
        );
        assert_eq!(err.category(), ErrorCategory::Connection);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_transport_fault_classification() {
        let timeout = Error::TransportTimeout {
            device: "edge".into(),
            operation: "show running-config".into(),
            timeout_secs: 5,
        };
        assert!(timeout.is_transport_fault());
        let deploy = Error::Deployment {
            device: "edge".into(),
            phase: "applying".into(),
            message: "% Invalid input".into(),
        };
        assert!(!deploy.is_transport_fault());
    }
}
