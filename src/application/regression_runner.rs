//! Regression orchestration.
//!
//! Wires the building blocks together for one session:
//!
//! ```text
//! test list -> specs -> queue -> workers (lease slot -> execute -> archive log
//!                                          -> stage coverage -> release slot)
//!                                    |
//!                                    v  JobResult over mpsc
//!                             session recorder -> reports -> coverage merge
//! ```
//!
//! Workers stop taking specs once the cancellation token fires; in-flight
//! jobs are killed by their backend and still report a result.

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::domain::errors::RegressionError;
use crate::domain::models::{Config, JobResult, Session, TestSpec};
use crate::domain::ports::{BatchScheduler, ExecutionBackend};
use crate::infrastructure::scheduler::LsfScheduler;
use crate::services::coverage::{CoverageCollector, MergeOutcome};
use crate::services::log_archive::LogArchiver;
use crate::services::reporter::Reporter;
use crate::services::session_recorder::SessionRecorder;
use crate::services::slot_pool::{SlotPool, SlotPoolConfig};
use crate::services::{test_list, BatchBackend, Classifier, LocalBackend};

/// What a finished (or interrupted) session left behind.
#[derive(Debug)]
pub struct RegressionOutcome {
    pub session: Session,
    pub session_dir: PathBuf,
    pub coverage: Option<MergeOutcome>,
}

impl RegressionOutcome {
    pub const fn exit_code(&self) -> i32 {
        self.session.exit_code()
    }
}

/// Runs one regression session.
pub struct RegressionRunner {
    config: Config,
    scheduler: Option<Arc<dyn BatchScheduler>>,
    cancel: CancellationToken,
    progress: Option<ProgressBar>,
    handle_signals: bool,
}

#[derive(Clone)]
struct Worker {
    queue: Arc<Mutex<VecDeque<TestSpec>>>,
    pool: SlotPool,
    backend: Arc<dyn ExecutionBackend>,
    archiver: LogArchiver,
    coverage: Option<CoverageCollector>,
    results: mpsc::Sender<JobResult>,
    cancel: CancellationToken,
}

impl RegressionRunner {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            scheduler: None,
            cancel: CancellationToken::new(),
            progress: None,
            handle_signals: false,
        }
    }

    /// Use `scheduler` instead of LSF in batch mode.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Arc<dyn BatchScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    #[must_use]
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    /// Cancel on SIGINT/SIGTERM.
    #[must_use]
    pub const fn with_signal_handling(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    /// Token that stops the session when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Number of slots for `total` runs.
    pub fn slot_count(&self, total: usize) -> usize {
        if self.config.execution.batch {
            total
        } else {
            self.config.execution.parallelism.min(total)
        }
    }

    /// Load `test_list` and run every spec in it.
    pub async fn run(&self, test_list: &Path) -> Result<RegressionOutcome> {
        let specs = test_list::load(test_list)?;
        self.run_specs(specs).await
    }

    /// Run already expanded specs.
    pub async fn run_specs(&self, specs: Vec<TestSpec>) -> Result<RegressionOutcome> {
        if specs.is_empty() {
            return Err(RegressionError::ConfigError("No tests to run".to_string()).into());
        }
        let classifier = Classifier::new(self.config.classifier.clone())
            .map(Arc::new)
            .map_err(|e| RegressionError::ConfigError(format!("Invalid classifier pattern: {e}")))?;

        let backend = self.backend(classifier).await?;

        let total = specs.len();
        let session = Session::new(total);
        let session_dir = Path::new(&self.config.output.results_root)
            .join(format!("regression_result_{}", session.id));
        std::fs::create_dir_all(&session_dir)
            .map_err(|e| RegressionError::io(&session_dir, e))
            .context("Failed to create session directory")?;
        tracing::info!(
            session = %session.id,
            runs = total,
            backend = backend.name(),
            dir = %session_dir.display(),
            "Starting regression"
        );

        let reporter = Reporter::new(&session_dir);
        let (pool, archiver, coverage) = match self.prepare(&session_dir, total) {
            Ok(parts) => parts,
            Err(e) => {
                let mut partial = session;
                partial.mark_interrupted();
                partial.finish();
                if let Err(report_err) = reporter.write_all(&partial) {
                    tracing::warn!(error = %report_err, "Could not write partial reports");
                }
                return Err(e);
            }
        };

        let signals = self.handle_signals.then(|| spawn_signal_listener(self.cancel.clone()));

        if let Some(bar) = &self.progress {
            bar.set_length(u64::try_from(total).unwrap_or(u64::MAX));
        }
        let recorder = SessionRecorder::spawn(session, self.progress.clone());

        let worker = Worker {
            queue: Arc::new(Mutex::new(specs.into())),
            pool: pool.clone(),
            backend,
            archiver,
            coverage: coverage.clone(),
            results: recorder.sender(),
            cancel: self.cancel.clone(),
        };
        let mut workers = JoinSet::new();
        for _ in 0..pool.len() {
            workers.spawn(worker.clone().run());
        }
        drop(worker);

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Worker task failed");
            }
        }

        let mut session = recorder
            .finish()
            .await
            .context("Session recorder failed")?;
        if let Some(listener) = signals {
            listener.abort();
        }
        if self.cancel.is_cancelled() {
            tracing::warn!(
                completed = session.completed,
                total = session.total,
                "Regression interrupted"
            );
            session.mark_interrupted();
        }
        session.finish();

        reporter
            .write_all(&session)
            .context("Failed to write reports")?;

        let coverage = match coverage {
            Some(collector) if session.is_complete() && !session.interrupted => {
                Some(collector.merge().await)
            }
            Some(_) => {
                tracing::warn!("Skipping coverage merge for an incomplete session");
                None
            }
            None => None,
        };

        pool.cleanup(session.exit_code() == 0).await;

        tracing::info!(
            session = %session.id,
            passed = session.passed,
            failed = session.failed,
            elapsed_secs = session.elapsed().as_secs(),
            "Regression finished"
        );
        Ok(RegressionOutcome {
            session,
            session_dir,
            coverage,
        })
    }

    async fn backend(&self, classifier: Arc<Classifier>) -> Result<Arc<dyn ExecutionBackend>> {
        if !self.config.execution.batch {
            return Ok(Arc::new(LocalBackend::new(
                &self.config,
                classifier,
                self.cancel.clone(),
            )));
        }

        let scheduler = self.scheduler.clone().unwrap_or_else(|| {
            Arc::new(LsfScheduler::new(&self.config.batch)) as Arc<dyn BatchScheduler>
        });
        if !scheduler.is_available().await {
            return Err(RegressionError::ConfigError(format!(
                "Batch scheduler '{}' is not available (checked {}, {}, {})",
                scheduler.name(),
                self.config.batch.submit_program,
                self.config.batch.query_program,
                self.config.batch.kill_program
            ))
            .into());
        }
        Ok(Arc::new(BatchBackend::new(
            &self.config,
            scheduler,
            classifier,
            self.cancel.clone(),
        )))
    }

    fn prepare(
        &self,
        session_dir: &Path,
        total: usize,
    ) -> Result<(SlotPool, LogArchiver, Option<CoverageCollector>)> {
        let pool = SlotPool::create(
            Path::new(&self.config.output.slot_root),
            self.slot_count(total),
            SlotPoolConfig::from_simulator(
                &self.config.simulator,
                Duration::from_millis(self.config.execution.settle_delay_ms),
                self.config.output.keep_slots,
            ),
        )?;
        let archiver = LogArchiver::create(session_dir, self.config.output.compress_logs)?;
        let coverage = if self.config.execution.coverage {
            Some(CoverageCollector::create(session_dir, &self.config.coverage)?)
        } else {
            None
        };
        Ok((pool, archiver, coverage))
    }
}

impl Worker {
    async fn run(self) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let Some(spec) = self.queue.lock().await.pop_front() else {
                break;
            };
            if !self.run_one(spec).await {
                break;
            }
        }
    }

    /// Returns false when the worker should stop.
    async fn run_one(&self, spec: TestSpec) -> bool {
        let lease = tokio::select! {
            lease = self.pool.acquire() => match lease {
                Ok(lease) => lease,
                Err(e) => {
                    tracing::error!(test = %spec.name, error = %e, "Could not acquire a slot");
                    return false;
                }
            },
            () = self.cancel.cancelled() => return false,
        };

        tracing::debug!(test = %spec.name, slot = %lease.id(), "Running");
        let mut result = self.backend.execute(&spec, lease.slot()).await;

        let receipt = self
            .archiver
            .archive(lease.id(), result.log_path.as_deref(), &spec.name, result.status)
            .await;
        if let Some(archived) = receipt.archived_path() {
            result.log_path = Some(archived.to_path_buf());
        }
        if let Some(coverage) = &self.coverage {
            coverage.collect(&spec, lease.slot()).await;
        }
        let released = match self.pool.release(lease, receipt) {
            Ok(()) => true,
            Err(lease) => {
                tracing::error!(test = %spec.name, slot = %lease.id(), "Slot was not released, stopping worker");
                false
            }
        };

        self.results.send(result).await.is_ok() && released
    }
}

/// Cancel `token` on the first SIGINT or SIGTERM.
fn spawn_signal_listener(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Cannot listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::warn!("Interrupt received, stopping regression"),
            () = terminate => tracing::warn!("SIGTERM received, stopping regression"),
        }
        token.cancel();
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_count_local_is_bounded_by_parallelism() {
        let mut config = Config::default();
        config.execution.parallelism = 4;
        let runner = RegressionRunner::new(config);
        assert_eq!(runner.slot_count(10), 4);
        assert_eq!(runner.slot_count(2), 2);
    }

    #[test]
    fn test_slot_count_batch_is_one_per_run() {
        let mut config = Config::default();
        config.execution.parallelism = 4;
        config.execution.batch = true;
        let runner = RegressionRunner::new(config);
        assert_eq!(runner.slot_count(10), 10);
    }

    #[tokio::test]
    async fn test_empty_spec_list_is_config_error() {
        let runner = RegressionRunner::new(Config::default());
        let err = runner.run_specs(Vec::new()).await.unwrap_err();
        let regression = err.downcast_ref::<RegressionError>().unwrap();
        assert!(regression.is_config());
    }
}
