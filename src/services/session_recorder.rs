//! Session recorder actor.
//!
//! The recorder task is the only owner of the [`Session`]: workers send their
//! [`JobResult`]s over a channel and the recorder folds them into the
//! counters and reports progress. Dropping every sender ends the task, which
//! hands the session back.

use indicatif::ProgressBar;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};

use crate::domain::models::{JobResult, Session};

const CHANNEL_CAPACITY: usize = 256;

/// Handle to a running recorder.
pub struct RecorderHandle {
    tx: mpsc::Sender<JobResult>,
    task: JoinHandle<Session>,
}

impl RecorderHandle {
    /// Sender for workers. Every clone must be dropped before
    /// [`RecorderHandle::finish`] can return.
    pub fn sender(&self) -> mpsc::Sender<JobResult> {
        self.tx.clone()
    }

    /// Close the channel and wait for the recorder to drain it.
    pub async fn finish(self) -> Result<Session, JoinError> {
        drop(self.tx);
        self.task.await
    }
}

pub struct SessionRecorder {
    session: Session,
    progress: Option<ProgressBar>,
    started: Instant,
}

impl SessionRecorder {
    /// Start the recorder task for `session`.
    ///
    /// With a progress bar, progress lines are printed above the bar;
    /// otherwise they go to the log.
    pub fn spawn(session: Session, progress: Option<ProgressBar>) -> RecorderHandle {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let recorder = Self {
            session,
            progress,
            started: Instant::now(),
        };
        RecorderHandle {
            tx,
            task: tokio::spawn(recorder.run(rx)),
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<JobResult>) -> Session {
        while let Some(result) = rx.recv().await {
            self.record(result);
        }
        if let Some(bar) = self.progress.take() {
            bar.finish_and_clear();
        }
        self.session
    }

    fn record(&mut self, result: JobResult) {
        if !result.is_pass() {
            tracing::warn!(
                test = %result.name,
                status = %result.status,
                slot = ?result.slot_id,
                message = result.error_message.as_deref().unwrap_or(""),
                "Run did not pass"
            );
        }

        let completed = self.session.completed + 1;
        let line = progress_line(
            completed,
            self.session.total,
            &result,
            self.started.elapsed(),
        );
        self.session.record(result);

        match &self.progress {
            Some(bar) => {
                bar.println(&line);
                bar.inc(1);
            }
            None => tracing::info!("{line}"),
        }
    }
}

/// `[ 3/10] PASS t1 (12.3s) 30.0% ETA 0:01:10`
pub fn progress_line(completed: usize, total: usize, result: &JobResult, elapsed: Duration) -> String {
    let width = total.to_string().len();
    #[allow(clippy::cast_precision_loss)]
    let percent = if total == 0 {
        100.0
    } else {
        completed as f64 * 100.0 / total as f64
    };
    format!(
        "[{completed:>width$}/{total}] {} {} ({:.1}s) {percent:.1}% ETA {}",
        result.status,
        result.name,
        result.duration.as_secs_f64(),
        format_hms(eta(completed, total, elapsed)),
    )
}

/// Remaining time extrapolated from the average so far.
pub fn eta(completed: usize, total: usize, elapsed: Duration) -> Duration {
    if completed == 0 || completed >= total {
        return Duration::ZERO;
    }
    let remaining = u32::try_from(total - completed).unwrap_or(u32::MAX);
    let done = u32::try_from(completed).unwrap_or(u32::MAX);
    elapsed / done * remaining
}

/// `H:MM:SS`
pub fn format_hms(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
