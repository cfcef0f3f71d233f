//! Batch scheduler port.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Identifier assigned by the scheduler on submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub String);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Job state as reported by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteState {
    Pending,
    Running,
    Done,
    Exited,
    /// A state the adapter does not map; the tracker keeps its current view
    Unknown,
}

impl RemoteState {
    pub const fn is_finished(&self) -> bool {
        matches!(self, Self::Done | Self::Exited)
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Scheduler command '{program}' could not be started: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Scheduler command '{program}' failed: {stderr}")]
    CommandFailed { program: String, stderr: String },

    #[error("Could not parse scheduler output: {0}")]
    Parse(String),
}

/// Parameters for the scheduler-specific header of a job script.
#[derive(Debug, Clone)]
pub struct ScriptRequest {
    pub job_name: String,
    pub working_directory: PathBuf,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    pub queue: String,
    pub cores: u32,
    pub memory_mb: u64,
    pub wall_clock: Duration,
}

#[async_trait]
pub trait BatchScheduler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the scheduler's commands can be run from this host.
    async fn is_available(&self) -> bool;

    /// Directive lines placed after the shebang of a job script.
    fn directives(&self, request: &ScriptRequest) -> Vec<String>;

    async fn submit(&self, script: &Path) -> Result<JobId, SchedulerError>;

    /// Query many jobs at once. Ids missing from the answer have left the
    /// scheduler's view.
    async fn query(&self, ids: &[JobId]) -> Result<HashMap<JobId, RemoteState>, SchedulerError>;

    async fn kill(&self, id: &JobId) -> Result<(), SchedulerError>;
}
