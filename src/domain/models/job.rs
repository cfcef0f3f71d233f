//! Job domain model.
//!
//! A job is one execution of a [`TestSpec`](super::test_spec::TestSpec) in an
//! execution slot. Its lifecycle is shared by the local and batch backends;
//! the final verdict comes from the outcome classifier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use super::slot::SlotId;
use super::test_spec::TestSpec;
use crate::domain::errors::{RegressionError, RegressionResult};

/// Final verdict of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pass,
    Fail,
    Timeout,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Timeout => "TIMEOUT",
            Self::Error => "ERROR",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PASS" | "PASSED" => Some(Self::Pass),
            "FAIL" | "FAILED" => Some(Self::Fail),
            "TIMEOUT" => Some(Self::Timeout),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }

    pub const fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a job inside a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Accepted but not yet started (queued at the scheduler)
    Pending,
    /// Simulator is executing
    Running,
    /// Process ended; the classifier decides pass or fail
    Completed,
    /// Killed after exceeding the budget
    TimedOut,
    /// The job never started
    SubmissionFailed,
}

impl Default for JobState {
    fn default() -> Self {
        Self::Pending
    }
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
            Self::SubmissionFailed => "submission_failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::TimedOut | Self::SubmissionFailed
        )
    }

    /// Valid transitions from this state.
    pub fn valid_transitions(&self) -> Vec<JobState> {
        match self {
            // Fast jobs may finish between two scheduler polls.
            Self::Pending => vec![Self::Running, Self::Completed, Self::SubmissionFailed],
            Self::Running => vec![Self::Completed, Self::TimedOut, Self::SubmissionFailed],
            Self::Completed | Self::TimedOut | Self::SubmissionFailed => vec![],
        }
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// Move to `next`, rejecting illegal transitions.
    pub fn transition(&mut self, next: Self) -> RegressionResult<()> {
        if !self.can_transition_to(next) {
            return Err(RegressionError::InvalidTransition {
                from: *self,
                to: next,
            });
        }
        *self = next;
        Ok(())
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome record produced exactly once per executed spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub name: String,
    pub base_name: String,
    pub sequence: usize,
    pub status: JobStatus,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    /// Archived log when available, otherwise the log inside the slot
    pub log_path: Option<PathBuf>,
    pub error_message: Option<String>,
    pub diagnostic_error_count: u32,
    pub diagnostic_fatal_count: u32,
    pub seed_used: Option<u32>,
    pub extra_args: Option<String>,
    pub slot_id: Option<SlotId>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl JobResult {
    /// Start a result for `spec`; timestamps are set to now.
    pub fn new(spec: &TestSpec, status: JobStatus) -> Self {
        let now = Utc::now();
        Self {
            name: spec.name.clone(),
            base_name: spec.base_name.clone(),
            sequence: spec.sequence,
            status,
            duration: Duration::ZERO,
            log_path: None,
            error_message: None,
            diagnostic_error_count: 0,
            diagnostic_fatal_count: 0,
            seed_used: spec.seed,
            extra_args: spec.extra_args.clone(),
            slot_id: None,
            started_at: now,
            finished_at: now,
        }
    }

    /// A result for a job that never ran.
    pub fn error(spec: &TestSpec, message: impl Into<String>) -> Self {
        let mut result = Self::new(spec, JobStatus::Error);
        result.error_message = Some(message.into());
        result
    }

    #[must_use]
    pub fn with_window(mut self, started_at: DateTime<Utc>, finished_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self.finished_at = finished_at;
        self.duration = (finished_at - started_at).to_std().unwrap_or_default();
        self
    }

    #[must_use]
    pub fn with_slot(mut self, slot: SlotId) -> Self {
        self.slot_id = Some(slot);
        self
    }

    pub const fn is_pass(&self) -> bool {
        self.status.is_pass()
    }

    /// Whether the execution windows of two results overlap.
    pub fn overlaps(&self, other: &Self) -> bool {
        self.started_at < other.finished_at && other.started_at < self.finished_at
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}
