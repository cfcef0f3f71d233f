//! Regression session aggregate.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::job::{JobResult, JobStatus};

/// One invocation of the orchestrator over an expanded test list.
///
/// Counters are only mutated through [`Session::record`], which the session
/// recorder calls from a single task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Timestamp-derived identifier, e.g. `20250709_144850`
    pub id: String,
    pub total: usize,
    pub completed: usize,
    pub passed: usize,
    pub failed: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub interrupted: bool,
    pub results: Vec<JobResult>,
}

impl Session {
    pub fn new(total: usize) -> Self {
        Self::with_id(Local::now().format("%Y%m%d_%H%M%S").to_string(), total)
    }

    pub fn with_id(id: impl Into<String>, total: usize) -> Self {
        Self {
            id: id.into(),
            total,
            completed: 0,
            passed: 0,
            failed: 0,
            started_at: Utc::now(),
            finished_at: None,
            interrupted: false,
            results: Vec::with_capacity(total),
        }
    }

    /// Fold one result into the counters.
    pub fn record(&mut self, result: JobResult) {
        self.completed += 1;
        if result.is_pass() {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
        self.results.push(result);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
        self.results.sort_by_key(|r| r.sequence);
    }

    pub fn mark_interrupted(&mut self) {
        self.interrupted = true;
    }

    pub const fn is_complete(&self) -> bool {
        self.completed == self.total
    }

    /// 0 iff nothing failed and every spec produced a result.
    pub const fn exit_code(&self) -> i32 {
        if self.failed == 0 && self.is_complete() && !self.interrupted {
            0
        } else {
            1
        }
    }

    pub fn elapsed(&self) -> Duration {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).to_std().unwrap_or_default()
    }

    pub fn pass_rate(&self) -> f64 {
        if self.completed == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.passed as f64 * 100.0 / self.completed as f64;
        rate
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn passes(&self) -> impl Iterator<Item = &JobResult> {
        self.results.iter().filter(|r| r.is_pass())
    }

    pub fn non_passes(&self) -> impl Iterator<Item = &JobResult> {
        self.results.iter().filter(|r| !r.is_pass())
    }
}
