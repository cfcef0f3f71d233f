//! Batch execution backend.
//!
//! Jobs are written as self-contained scripts into their slot and submitted
//! through a [`BatchScheduler`]. A single tracker task owns the table of
//! outstanding jobs, polls the scheduler for all of them at once and wakes
//! each waiting worker through a oneshot channel.

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::domain::errors::RegressionError;
use crate::domain::models::{
    BatchConfig, Config, ExecutionConfig, ExecutionSlot, JobResult, JobState, JobStatus,
    RetryConfig, SimulatorConfig, TestSpec,
};
use crate::domain::ports::{
    BatchScheduler, ExecutionBackend, JobId, RemoteState, SchedulerError, ScriptRequest,
};
use crate::services::classifier::Classifier;
use crate::services::invocation::{shell_quote, SimulatorInvocation};

const STDERR_EXCERPT_LEN: usize = 200;

/// How a tracked job left the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedOutcome {
    Done,
    Exited,
    TimedOut,
    Cancelled,
}

/// A submitted job as seen by the tracker.
#[derive(Debug)]
pub struct TrackedJob {
    pub id: JobId,
    pub name: String,
    pub slot_dir: PathBuf,
    pub log_path: PathBuf,
    pub stdout_path: PathBuf,
    pub submit_time: Instant,
    pub run_start: Option<Instant>,
    pub state: JobState,
}

impl TrackedJob {
    pub fn new(id: JobId, name: impl Into<String>, slot_dir: &Path, log_path: PathBuf, stdout_path: PathBuf) -> Self {
        Self {
            id,
            name: name.into(),
            slot_dir: slot_dir.to_path_buf(),
            log_path,
            stdout_path,
            submit_time: Instant::now(),
            run_start: None,
            state: JobState::Pending,
        }
    }

    /// A job that left the scheduler's view is done if it left output behind.
    fn resolve_from_disk(&self) -> TrackedOutcome {
        if self.log_path.is_file() || self.stdout_path.is_file() {
            TrackedOutcome::Done
        } else {
            TrackedOutcome::Exited
        }
    }
}

struct Registration {
    job: TrackedJob,
    reply: oneshot::Sender<TrackedOutcome>,
}

/// Tracker tuning.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub max_query_failures: u32,
}

impl TrackerConfig {
    pub fn from_config(batch: &BatchConfig, execution: &ExecutionConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(batch.poll_interval_secs.max(1)),
            timeout: Duration::from_secs(execution.timeout_secs),
            max_query_failures: batch.max_query_failures.max(1),
        }
    }
}

/// Handle used by workers to hand jobs to the tracker.
#[derive(Clone)]
pub struct TrackerHandle {
    tx: mpsc::Sender<Registration>,
    scheduler: Arc<dyn BatchScheduler>,
}

impl TrackerHandle {
    /// Spawn the tracker task.
    pub fn spawn(
        scheduler: Arc<dyn BatchScheduler>,
        config: TrackerConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(256);
        let tracker = BatchTracker {
            scheduler: Arc::clone(&scheduler),
            config,
            cancel,
            jobs: HashMap::new(),
            waiters: HashMap::new(),
            query_failures: 0,
        };
        tokio::spawn(tracker.run(rx));
        Self { tx, scheduler }
    }

    /// Register a submitted job and wait until it leaves the scheduler.
    ///
    /// A job the tracker never took over is killed here, so a stopped tracker
    /// cannot leave it running remotely.
    pub async fn track(&self, job: TrackedJob) -> TrackedOutcome {
        let id = job.id.clone();
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Registration { job, reply }).await.is_err() {
            kill_untracked(self.scheduler.as_ref(), &id).await;
            return TrackedOutcome::Cancelled;
        }
        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => {
                kill_untracked(self.scheduler.as_ref(), &id).await;
                TrackedOutcome::Cancelled
            }
        }
    }
}

async fn kill_untracked(scheduler: &dyn BatchScheduler, id: &JobId) {
    tracing::warn!(job_id = %id, "Batch tracker stopped, killing job directly");
    if let Err(e) = scheduler.kill(id).await {
        tracing::warn!(job_id = %id, error = %e, "Failed to kill batch job");
    }
}

struct BatchTracker {
    scheduler: Arc<dyn BatchScheduler>,
    config: TrackerConfig,
    cancel: CancellationToken,
    jobs: HashMap<JobId, TrackedJob>,
    waiters: HashMap<JobId, oneshot::Sender<TrackedOutcome>>,
    query_failures: u32,
}

impl BatchTracker {
    async fn run(mut self, mut rx: mpsc::Receiver<Registration>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut accepting = true;
        let cancel = self.cancel.clone();

        loop {
            tokio::select! {
                registration = rx.recv(), if accepting => match registration {
                    Some(Registration { job, reply }) => {
                        tracing::debug!(job_id = %job.id, test = %job.name, "Tracking batch job");
                        self.waiters.insert(job.id.clone(), reply);
                        self.jobs.insert(job.id.clone(), job);
                    }
                    None => accepting = false,
                },
                _ = ticker.tick() => self.poll().await,
                () = cancel.cancelled() => {
                    rx.close();
                    while let Ok(Registration { job, reply }) = rx.try_recv() {
                        self.waiters.insert(job.id.clone(), reply);
                        self.jobs.insert(job.id.clone(), job);
                    }
                    self.kill_all().await;
                    break;
                }
            }
            if !accepting && self.jobs.is_empty() {
                break;
            }
        }
        tracing::debug!("Batch tracker stopped");
    }

    async fn poll(&mut self) {
        if self.jobs.is_empty() {
            return;
        }
        let ids: Vec<JobId> = self.jobs.keys().cloned().collect();

        match self.scheduler.query(&ids).await {
            Ok(states) => {
                self.query_failures = 0;
                for id in ids {
                    match states.get(&id).copied() {
                        Some(RemoteState::Pending | RemoteState::Unknown) => {}
                        Some(RemoteState::Running) => self.mark_running(&id),
                        Some(RemoteState::Done) => self.finish(&id, TrackedOutcome::Done),
                        Some(RemoteState::Exited) => self.finish(&id, TrackedOutcome::Exited),
                        None => {
                            let outcome = self.jobs[&id].resolve_from_disk();
                            tracing::debug!(job_id = %id, ?outcome, "Job left the scheduler's view");
                            self.finish(&id, outcome);
                        }
                    }
                }
            }
            Err(e) => {
                self.query_failures += 1;
                tracing::warn!(
                    error = %e,
                    failures = self.query_failures,
                    "Batch status query failed"
                );
                if self.query_failures >= self.config.max_query_failures {
                    tracing::error!("Scheduler unreachable, resolving outstanding jobs from disk");
                    for id in ids {
                        let outcome = self.jobs[&id].resolve_from_disk();
                        self.finish(&id, outcome);
                    }
                    self.query_failures = 0;
                }
            }
        }

        self.enforce_timeouts().await;
    }

    fn mark_running(&mut self, id: &JobId) {
        if let Some(job) = self.jobs.get_mut(id) {
            if job.state == JobState::Pending && job.state.transition(JobState::Running).is_ok() {
                job.run_start = Some(Instant::now());
                tracing::debug!(
                    job_id = %id,
                    test = %job.name,
                    queued_secs = job.submit_time.elapsed().as_secs(),
                    "Batch job started"
                );
            }
        }
    }

    async fn enforce_timeouts(&mut self) {
        let expired: Vec<JobId> = self
            .jobs
            .values()
            .filter(|j| j.run_start.is_some_and(|s| s.elapsed() > self.config.timeout))
            .map(|j| j.id.clone())
            .collect();
        for id in expired {
            tracing::warn!(job_id = %id, "Batch job exceeded its budget, killing");
            if let Err(e) = self.scheduler.kill(&id).await {
                tracing::warn!(job_id = %id, error = %e, "Failed to kill batch job");
            }
            self.finish(&id, TrackedOutcome::TimedOut);
        }
    }

    async fn kill_all(&mut self) {
        let ids: Vec<JobId> = self.jobs.keys().cloned().collect();
        if !ids.is_empty() {
            tracing::warn!(count = ids.len(), "Killing outstanding batch jobs");
        }
        for id in ids {
            if let Err(e) = self.scheduler.kill(&id).await {
                tracing::warn!(job_id = %id, error = %e, "Failed to kill batch job");
            }
            self.finish(&id, TrackedOutcome::Cancelled);
        }
    }

    fn finish(&mut self, id: &JobId, outcome: TrackedOutcome) {
        let Some(mut job) = self.jobs.remove(id) else {
            return;
        };
        let next = match outcome {
            TrackedOutcome::TimedOut => JobState::TimedOut,
            _ => JobState::Completed,
        };
        if let Err(e) = job.state.transition(next) {
            tracing::warn!(job_id = %id, error = %e, "Unexpected batch job transition");
        }
        if let Some(waiter) = self.waiters.remove(id) {
            let _ = waiter.send(outcome);
        }
    }
}

/// Runs jobs through a batch scheduler.
pub struct BatchBackend {
    scheduler: Arc<dyn BatchScheduler>,
    tracker: TrackerHandle,
    simulator: SimulatorConfig,
    execution: ExecutionConfig,
    batch: BatchConfig,
    retry: RetryConfig,
    classifier: Arc<Classifier>,
    last_submit: Mutex<Option<Instant>>,
    cancel: CancellationToken,
}

impl BatchBackend {
    pub fn new(
        config: &Config,
        scheduler: Arc<dyn BatchScheduler>,
        classifier: Arc<Classifier>,
        cancel: CancellationToken,
    ) -> Self {
        let tracker = TrackerHandle::spawn(
            Arc::clone(&scheduler),
            TrackerConfig::from_config(&config.batch, &config.execution),
            cancel.clone(),
        );
        Self {
            scheduler,
            tracker,
            simulator: config.simulator.clone(),
            execution: config.execution.clone(),
            batch: config.batch.clone(),
            retry: config.retry.clone(),
            classifier,
            last_submit: Mutex::new(None),
            cancel,
        }
    }

    /// Render the job script for `invocation` running in `slot`.
    pub fn render_script(&self, spec: &TestSpec, slot: &ExecutionSlot, invocation: &SimulatorInvocation) -> String {
        let request = self.script_request(spec, slot);
        let mut script = String::from("#!/bin/bash\n");
        for directive in self.scheduler.directives(&request) {
            script.push_str(&directive);
            script.push('\n');
        }
        script.push_str(&format!("\ncd {}\n", shell_quote(&slot.path().display().to_string())));
        script.push_str(&invocation.command_line());
        script.push('\n');
        script
    }

    fn script_request(&self, spec: &TestSpec, slot: &ExecutionSlot) -> ScriptRequest {
        ScriptRequest {
            job_name: spec.name.clone(),
            working_directory: slot.path().to_path_buf(),
            stdout_path: stdout_path(spec, slot),
            stderr_path: stderr_path(spec, slot),
            queue: self.batch.queue.clone(),
            cores: self.batch.cores,
            memory_mb: self.batch.memory_mb,
            wall_clock: Duration::from_secs(self.execution.timeout_secs),
        }
    }

    /// Submit with retries, keeping consecutive submissions apart. Returns
    /// `None` when the stop signal arrived before the job went out.
    async fn submit(&self, script: &Path) -> Result<Option<JobId>, SchedulerError> {
        let mut last = tokio::select! {
            guard = self.last_submit.lock() => guard,
            () = self.cancel.cancelled() => return Ok(None),
        };
        let spacing = Duration::from_millis(self.batch.submit_spacing_ms);
        if let Some(prev) = *last {
            tokio::select! {
                () = tokio::time::sleep_until(prev + spacing) => {}
                () = self.cancel.cancelled() => return Ok(None),
            }
        }

        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.retry.initial_backoff_ms))
            .with_max_interval(Duration::from_millis(self.retry.max_backoff_ms))
            .with_max_elapsed_time(None)
            .build();
        let max_retries = self.retry.max_retries;
        let scheduler = &self.scheduler;
        let cancel = &self.cancel;
        let mut attempt = 0u32;

        let result = backoff::future::retry(policy, || {
            attempt += 1;
            let current = attempt;
            async move {
                if cancel.is_cancelled() {
                    return Ok(None);
                }
                scheduler.submit(script).await.map(Some).map_err(|e| {
                    if current > max_retries {
                        backoff::Error::permanent(e)
                    } else {
                        tracing::warn!(attempt = current, error = %e, "Submission failed, retrying");
                        backoff::Error::transient(e)
                    }
                })
            }
        })
        .await;

        *last = Some(Instant::now());
        result
    }

    async fn write_script(&self, path: &Path, content: &str) -> std::io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::write(path, content).await?;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await
    }
}

fn stdout_path(spec: &TestSpec, slot: &ExecutionSlot) -> PathBuf {
    slot.path().join(format!("{}_lsf.out", spec.name))
}

fn stderr_path(spec: &TestSpec, slot: &ExecutionSlot) -> PathBuf {
    slot.path().join(format!("{}_lsf.err", spec.name))
}

async fn read_optional(path: &Path) -> Option<String> {
    tokio::fs::read(path)
        .await
        .ok()
        .map(|b| String::from_utf8_lossy(&b).into_owned())
}

#[async_trait]
impl ExecutionBackend for BatchBackend {
    fn name(&self) -> &'static str {
        "batch"
    }

    async fn execute(&self, spec: &TestSpec, slot: &ExecutionSlot) -> JobResult {
        let invocation = SimulatorInvocation::new(&self.simulator, &self.execution, spec, slot);
        let started_at = Utc::now();
        let mut result = JobResult::new(spec, JobStatus::Error).with_slot(slot.id);
        result.seed_used = Some(invocation.seed);

        let out_path = stdout_path(spec, slot);
        let err_path = stderr_path(spec, slot);
        for stale in [&invocation.log_path, &out_path, &err_path] {
            let _ = tokio::fs::remove_file(stale).await;
        }

        if self.cancel.is_cancelled() {
            result.error_message = Some(RegressionError::Cancelled.to_string());
            return result.with_window(started_at, Utc::now());
        }

        let script_path = slot.path().join(format!("{}_job.sh", spec.name));
        let script = self.render_script(spec, slot, &invocation);
        if let Err(e) = self.write_script(&script_path, &script).await {
            result.error_message = Some(RegressionError::io(&script_path, e).to_string());
            return result.with_window(started_at, Utc::now());
        }

        let job_id = match self.submit(&script_path).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                tracing::debug!(test = %spec.name, "Stop requested, job not submitted");
                result.error_message = Some(RegressionError::Cancelled.to_string());
                return result.with_window(started_at, Utc::now());
            }
            Err(e) => {
                let err = RegressionError::SubmissionError {
                    test: spec.name.clone(),
                    reason: e.to_string(),
                };
                tracing::error!(test = %spec.name, error = %err, "Batch submission failed");
                result.error_message = Some(err.to_string());
                return result.with_window(started_at, Utc::now());
            }
        };
        tracing::info!(test = %spec.name, job_id = %job_id, slot = %slot.id, "Submitted batch job");

        let outcome = self
            .tracker
            .track(TrackedJob::new(
                job_id,
                spec.name.clone(),
                slot.path(),
                invocation.log_path.clone(),
                out_path.clone(),
            ))
            .await;
        let result = result.with_window(started_at, Utc::now());
        self.map_outcome(result, outcome, &invocation, &out_path, &err_path).await
    }
}

impl BatchBackend {
    async fn map_outcome(
        &self,
        mut result: JobResult,
        outcome: TrackedOutcome,
        invocation: &SimulatorInvocation,
        out_path: &Path,
        err_path: &Path,
    ) -> JobResult {
        let log_path = invocation.log_path.is_file().then(|| invocation.log_path.clone());
        result.log_path.clone_from(&log_path);

        match outcome {
            TrackedOutcome::TimedOut => {
                result.status = JobStatus::Timeout;
                result.error_message = Some(
                    RegressionError::TimeoutError {
                        test: result.name.clone(),
                        timeout_secs: self.execution.timeout_secs,
                    }
                    .to_string(),
                );
            }
            TrackedOutcome::Cancelled => {
                result.error_message = Some(RegressionError::Cancelled.to_string());
            }
            TrackedOutcome::Exited if log_path.is_none() => {
                let stderr = read_optional(err_path).await.unwrap_or_default();
                let excerpt: String = stderr.trim().chars().take(STDERR_EXCERPT_LEN).collect();
                result.status = JobStatus::Fail;
                result.error_message = Some(if excerpt.is_empty() {
                    "Batch job exited with error".to_string()
                } else {
                    format!("Batch job exited with error: {excerpt}")
                });
            }
            TrackedOutcome::Done | TrackedOutcome::Exited => {
                let stdout = read_optional(out_path).await.unwrap_or_default();
                let log = match &log_path {
                    Some(p) => read_optional(p).await,
                    None => None,
                };
                let verdict = self.classifier.classify(&stdout, log.as_deref());
                result.status = verdict.status;
                result.error_message = verdict.message;
                result.diagnostic_error_count = verdict.error_count;
                result.diagnostic_fatal_count = verdict.fatal_count;
            }
        }
        result
    }
}
