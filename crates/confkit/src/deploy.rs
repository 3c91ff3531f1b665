//! Deployment orchestrator: staged push with verification and rollback.
//!
//! A [`DeploymentJob`] moves through an explicit state machine:
//!
//! ```text
//! pending -> dry-run-validated -> applying -> applied -> verifying -> committed
//!    |              |                 |           |           |
//!    +-> aborted <--+                 +-----------+-----------+-> failed -> rolled-back
//! ```
//!
//! Nothing is written to the device until the job enters `applying`.
//! Every transition is appended to the job's event log.

use crate::backup;
use crate::compliance::{self, ComplianceRule, ValidationReport, ValidationResult};
use crate::diff::{diff_lines, normalized_for_verify};
use crate::error::{Error, ErrorCategory, Result};
use crate::platform::Platform;
use crate::pool::{ConnectionManager, SessionGuard};
use crate::snapshot::{ConfigSnapshot, normalize_capture};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Deployment job states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    Pending,
    DryRunValidated,
    Applying,
    Applied,
    Verifying,
    Committed,
    Failed,
    RolledBack,
    Aborted,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::DryRunValidated => "dry-run-validated",
            Self::Applying => "applying",
            Self::Applied => "applied",
            Self::Verifying => "verifying",
            Self::Committed => "committed",
            Self::Failed => "failed",
            Self::RolledBack => "rolled-back",
            Self::Aborted => "aborted",
        }
    }

    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, DryRunValidated)
                | (Pending, Aborted)
                | (DryRunValidated, Applying)
                | (DryRunValidated, Aborted)
                | (Applying, Applied)
                | (Applying, Failed)
                | (Applied, Verifying)
                | (Applied, Failed)
                | (Verifying, Committed)
                | (Verifying, Failed)
                | (Failed, RolledBack)
        )
    }

}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the applied configuration is checked against the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifyMode {
    /// Every target line appears in the running configuration
    #[default]
    Contains,
    /// The running configuration equals the target
    Exact,
}

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct DeploySettings {
    /// Wall-clock budget for the whole job
    pub job_timeout: Duration,
    pub verify: VerifyMode,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            job_timeout: Duration::from_secs(600),
            verify: VerifyMode::Contains,
        }
    }
}

/// Something that happened to a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum JobEventKind {
    Transition {
        from: JobState,
        to: JobState,
    },
    Validated {
        passed: usize,
        failed: usize,
        warnings: usize,
    },
    BaselineCaptured {
        checksum: String,
        lines: usize,
    },
    Pushed {
        lines: usize,
    },
    Verified {
        mode: VerifyMode,
    },
    Saved {
        command: String,
    },
    RollbackFailed {
        baseline_checksum: String,
    },
    Note {
        message: String,
    },
}

/// Timestamped entry of the job's outcome log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEvent {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: JobEventKind,
}

#[derive(Debug, Default)]
enum CancelState {
    #[default]
    Open,
    Requested,
    Sealed,
}

#[derive(Debug, Default)]
struct CancelInner {
    job_id: String,
    state: Mutex<CancelState>,
}

/// Handle for cancelling a job from another thread.
///
/// Cancellation is honored until the orchestrator starts applying; after
/// that `cancel` is rejected.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    fn new(job_id: &str) -> Self {
        Self {
            inner: Arc::new(CancelInner {
                job_id: job_id.to_string(),
                state: Mutex::new(CancelState::Open),
            }),
        }
    }

    /// Request cancellation.
    pub fn cancel(&self) -> Result<()> {
        let mut state = self.lock();
        match *state {
            CancelState::Open | CancelState::Requested => {
                *state = CancelState::Requested;
                Ok(())
            }
            CancelState::Sealed => Err(Error::CancelRejected {
                job_id: self.inner.job_id.clone(),
            }),
        }
    }

    pub fn is_requested(&self) -> bool {
        matches!(*self.lock(), CancelState::Requested)
    }

    fn check(&self) -> Result<()> {
        if self.is_requested() {
            return Err(self.cancelled());
        }
        Ok(())
    }

    /// Refuse further cancellation, unless it was already requested.
    fn seal(&self) -> Result<()> {
        let mut state = self.lock();
        match *state {
            CancelState::Requested => Err(self.cancelled()),
            CancelState::Open | CancelState::Sealed => {
                *state = CancelState::Sealed;
                Ok(())
            }
        }
    }

    fn cancelled(&self) -> Error {
        Error::Cancelled {
            job_id: self.inner.job_id.clone(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CancelState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// One deployment of a target configuration to one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentJob {
    id: String,
    device: String,
    created_at: DateTime<Utc>,
    dry_run: bool,
    target: Vec<String>,
    state: JobState,
    events: Vec<JobEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    baseline: Option<ConfigSnapshot>,
    #[serde(default)]
    validation: Vec<ValidationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure_kind: Option<ErrorCategory>,
    #[serde(skip)]
    cancel: CancelToken,
}

impl DeploymentJob {
    pub fn new(device: impl Into<String>, target: &str, dry_run: bool) -> Self {
        let device = device.into();
        let created_at = Utc::now();
        let id = format!("{}-{}", created_at.format("%Y%m%dT%H%M%S%.6fZ"), device);
        let cancel = CancelToken::new(&id);
        Self {
            id,
            device,
            created_at,
            dry_run,
            target: normalize_capture(target),
            state: JobState::Pending,
            events: Vec::new(),
            baseline: None,
            validation: Vec::new(),
            failure: None,
            failure_kind: None,
            cancel,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn target(&self) -> &[String] {
        &self.target
    }

    pub fn target_text(&self) -> String {
        self.target.iter().map(|l| format!("{l}\n")).collect()
    }

    pub fn events(&self) -> &[JobEvent] {
        &self.events
    }

    /// Configuration captured before the push.
    pub fn baseline(&self) -> Option<&ConfigSnapshot> {
        self.baseline.as_ref()
    }

    pub fn validation(&self) -> &[ValidationResult] {
        &self.validation
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn failure_kind(&self) -> Option<ErrorCategory> {
        self.failure_kind
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Sequence of states the job went through, starting at `pending`.
    pub fn state_history(&self) -> Vec<JobState> {
        let mut states = vec![JobState::Pending];
        states.extend(self.events.iter().filter_map(|e| match e.kind {
            JobEventKind::Transition { to, .. } => Some(to),
            _ => None,
        }));
        states
    }

    /// Move to `next`, recording the transition.
    pub fn transition(&mut self, next: JobState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        let from = self.state;
        self.state = next;
        log::debug!("Job {}: {} -> {}", self.id, from, next);
        self.record(JobEventKind::Transition { from, to: next });
        Ok(())
    }

    fn record(&mut self, kind: JobEventKind) {
        self.events.push(JobEvent {
            at: Utc::now(),
            kind,
        });
    }

    fn note(&mut self, message: impl Into<String>) {
        self.record(JobEventKind::Note {
            message: message.into(),
        });
    }
}

/// Drives deployment jobs against devices from a connection manager.
pub struct Orchestrator<'a> {
    manager: &'a ConnectionManager,
    rules: &'a [ComplianceRule],
    settings: DeploySettings,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        manager: &'a ConnectionManager,
        rules: &'a [ComplianceRule],
        settings: DeploySettings,
    ) -> Self {
        Self {
            manager,
            rules,
            settings,
        }
    }

    /// Run a pending job to a terminal state.
    ///
    /// Returns the final state when the job ends without a runtime error:
    /// `committed`, `dry-run-validated`, or `aborted` by a blocking
    /// validation failure. Every other outcome is returned as the error
    /// that caused it, with the job left in `aborted`, `rolled-back`, or
    /// `failed` (rollback failure).
    pub fn run(&self, job: &mut DeploymentJob) -> Result<JobState> {
        if job.state != JobState::Pending {
            return Err(Error::InvalidTransition {
                from: job.state.to_string(),
                to: JobState::DryRunValidated.to_string(),
            });
        }
        let deadline = Instant::now() + self.settings.job_timeout;

        if let Err(e) = job.cancel.check() {
            return abort(job, e);
        }

        let report = ValidationReport::new(compliance::evaluate(&job.target_text(), self.rules));
        job.record(JobEventKind::Validated {
            passed: report.passed().count(),
            failed: report.failed().count(),
            warnings: report.warnings().count(),
        });
        let blocking = report.results.iter().filter(|r| r.is_blocking()).count();
        job.validation = report.results;
        if blocking > 0 {
            job.failure = Some(format!("{blocking} blocking compliance rule(s) failed"));
            job.transition(JobState::Aborted)?;
            log::info!("Job {} aborted by validation", job.id);
            return Ok(JobState::Aborted);
        }
        job.transition(JobState::DryRunValidated)?;

        if job.dry_run {
            return Ok(JobState::DryRunValidated);
        }

        if let Err(e) = self.check_deadline(job, deadline).and_then(|()| job.cancel.check()) {
            return abort(job, e);
        }

        let mut session = match self.manager.acquire_before(&job.device, deadline) {
            Ok(session) => session,
            Err(e @ Error::PoolTimeout { .. }) => {
                return abort(job, self.check_deadline(job, deadline).err().unwrap_or(e));
            }
            Err(e) => return abort(job, e),
        };
        if let Err(e) = job.cancel.check() {
            return abort(job, e);
        }

        let baseline = match backup::capture(&mut session) {
            Ok(baseline) => baseline,
            Err(e) => return abort(job, e),
        };
        log::info!(
            "Job {}: baseline of {} captured ({} lines, {})",
            job.id,
            job.device,
            baseline.lines().len(),
            baseline.checksum()
        );
        job.record(JobEventKind::BaselineCaptured {
            checksum: baseline.checksum().to_string(),
            lines: baseline.lines().len(),
        });
        job.baseline = Some(baseline);

        if let Err(e) = self.check_deadline(job, deadline).and_then(|()| job.cancel.seal()) {
            return abort(job, e);
        }

        job.transition(JobState::Applying)?;
        let platform = Platform::for_device_type(&session.device().device_type);
        if let Err(e) = push(&mut session, &platform, &job.target, "applying") {
            return self.roll_back(job, &mut session, &platform, e);
        }
        job.record(JobEventKind::Pushed {
            lines: job.target.len(),
        });
        job.transition(JobState::Applied)?;

        if let Err(e) = self.check_deadline(job, deadline) {
            return self.roll_back(job, &mut session, &platform, e);
        }
        job.transition(JobState::Verifying)?;

        if let Err(e) = self.verify(job, &mut session) {
            return self.roll_back(job, &mut session, &platform, e);
        }
        job.record(JobEventKind::Verified {
            mode: self.settings.verify,
        });

        if let Err(e) = self.check_deadline(job, deadline) {
            return self.roll_back(job, &mut session, &platform, e);
        }
        if let Some(save) = platform.save {
            if let Err(e) = push_command(&mut session, &platform, save, "saving") {
                return self.roll_back(job, &mut session, &platform, e);
            }
            job.record(JobEventKind::Saved {
                command: save.to_string(),
            });
        }

        job.transition(JobState::Committed)?;
        log::info!("Job {} committed to {}", job.id, job.device);
        Ok(JobState::Committed)
    }

    fn check_deadline(&self, job: &DeploymentJob, deadline: Instant) -> Result<()> {
        if Instant::now() >= deadline {
            return Err(Error::JobTimeout {
                job_id: job.id.clone(),
                phase: job.state.to_string(),
                timeout_secs: self.settings.job_timeout.as_secs(),
            });
        }
        Ok(())
    }

    fn verify(&self, job: &DeploymentJob, session: &mut SessionGuard<'_>) -> Result<()> {
        let running = backup::capture(session)?;
        let want = normalized_for_verify(&job.target);
        let have = normalized_for_verify(running.lines());

        let problem = match self.settings.verify {
            VerifyMode::Contains => {
                let present: HashSet<&str> = have.iter().map(String::as_str).collect();
                let missing: Vec<&String> =
                    want.iter().filter(|l| !present.contains(l.as_str())).collect();
                missing.first().map(|first| {
                    format!(
                        "{} target line(s) missing from running configuration, first: '{}'",
                        missing.len(),
                        first
                    )
                })
            }
            VerifyMode::Exact => {
                let residual = diff_lines(&want, &have);
                (!residual.is_empty()).then(|| {
                    let s = residual.summary();
                    format!(
                        "running configuration differs from target ({} added, {} removed, {} changed)",
                        s.added, s.removed, s.changed
                    )
                })
            }
        };

        match problem {
            Some(message) => Err(Error::Deployment {
                device: job.device.clone(),
                phase: JobState::Verifying.to_string(),
                message,
            }),
            None => Ok(()),
        }
    }

    /// Record the failure and restore the baseline on the same session.
    fn roll_back(
        &self,
        job: &mut DeploymentJob,
        session: &mut SessionGuard<'_>,
        platform: &Platform,
        cause: Error,
    ) -> Result<JobState> {
        let phase = job.state;
        let cause = match cause {
            e @ (Error::Deployment { .. } | Error::JobTimeout { .. }) => e,
            other => Error::Deployment {
                device: job.device.clone(),
                phase: phase.to_string(),
                message: other.to_string(),
            },
        };
        log::warn!("Job {} failed during {}: {}", job.id, phase, cause);
        job.failure = Some(cause.to_string());
        job.failure_kind = Some(cause.category());
        job.transition(JobState::Failed)?;

        let Some(baseline) = job.baseline.clone() else {
            return Err(cause);
        };

        let mut restored = Ok(());
        if !session.is_healthy() {
            job.note("reconnecting before rollback");
            restored = session.reconnect();
        }
        let restored = restored.and_then(|()| push(session, platform, baseline.lines(), "rollback"));

        match restored {
            Ok(()) => {
                job.transition(JobState::RolledBack)?;
                log::info!(
                    "Job {}: {} restored to baseline {}",
                    job.id,
                    job.device,
                    baseline.checksum()
                );
                Err(cause)
            }
            Err(e) => {
                log::error!(
                    "Rollback of {} failed; baseline checksum {}: {}",
                    job.device,
                    baseline.checksum(),
                    e
                );
                job.record(JobEventKind::RollbackFailed {
                    baseline_checksum: baseline.checksum().to_string(),
                });
                let err = Error::RollbackFailure {
                    device: job.device.clone(),
                    baseline_checksum: baseline.checksum().to_string(),
                    message: e.to_string(),
                };
                job.failure = Some(format!("{cause}; {err}"));
                job.failure_kind = Some(ErrorCategory::RollbackFailure);
                Err(err)
            }
        }
    }
}

fn abort(job: &mut DeploymentJob, cause: Error) -> Result<JobState> {
    log::warn!("Job {} aborted: {}", job.id, cause);
    job.failure = Some(cause.to_string());
    job.failure_kind = Some(cause.category());
    job.transition(JobState::Aborted)?;
    Err(cause)
}

/// Push lines in configuration mode, treating device error markers as failure.
fn push(
    session: &mut SessionGuard<'_>,
    platform: &Platform,
    lines: &[String],
    phase: &str,
) -> Result<()> {
    let output = session.send_batch(&platform.push_batch(lines))?;
    check_output(session, platform, &output, phase)
}

fn push_command(
    session: &mut SessionGuard<'_>,
    platform: &Platform,
    command: &str,
    phase: &str,
) -> Result<()> {
    let output = session.send_command(command)?;
    check_output(session, platform, &output, phase)
}

fn check_output(
    session: &SessionGuard<'_>,
    platform: &Platform,
    output: &str,
    phase: &str,
) -> Result<()> {
    match platform.rejected_line(output) {
        Some(line) => Err(Error::Deployment {
            device: session.device().name.clone(),
            phase: phase.to_string(),
            message: format!("device rejected configuration: {}", line.trim()),
        }),
        None => Ok(()),
    }
}
