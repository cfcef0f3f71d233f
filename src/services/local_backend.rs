//! Local execution backend.
//!
//! Each job runs as a subprocess in its own process group with the slot as
//! working directory. Starts are serialised through a global lock that is held
//! until the process exits or the startup window elapses, so concurrent
//! compilations do not trample shared simulator state.

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::RegressionError;
use crate::domain::models::{
    Config, ExecutionConfig, ExecutionSlot, JobResult, JobState, JobStatus, SimulatorConfig,
    TestSpec,
};
use crate::domain::ports::ExecutionBackend;
use crate::infrastructure::process::kill_process_group;
use crate::services::classifier::Classifier;
use crate::services::invocation::SimulatorInvocation;

const LOG_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug)]
enum WaitOutcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Runs jobs as local subprocesses.
pub struct LocalBackend {
    simulator: SimulatorConfig,
    execution: ExecutionConfig,
    classifier: Arc<Classifier>,
    startup_lock: Arc<Mutex<()>>,
    cancel: CancellationToken,
}

impl LocalBackend {
    pub fn new(config: &Config, classifier: Arc<Classifier>, cancel: CancellationToken) -> Self {
        Self {
            simulator: config.simulator.clone(),
            execution: config.execution.clone(),
            classifier,
            startup_lock: Arc::new(Mutex::new(())),
            cancel,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.execution.timeout_secs)
    }

    /// Result for a job stopped before its simulator was started.
    fn cancelled_before_start(
        spec: &TestSpec,
        slot: &ExecutionSlot,
        invocation: &SimulatorInvocation,
        state: &mut JobState,
    ) -> JobResult {
        advance(state, JobState::Completed, &spec.name);
        tracing::debug!(test = %spec.name, "Stop requested, simulator not started");
        let now = Utc::now();
        let mut result = JobResult::error(spec, RegressionError::Cancelled.to_string())
            .with_window(now, now)
            .with_slot(slot.id);
        result.seed_used = Some(invocation.seed);
        result
    }

    /// Wait for the log to appear, looking in the alternate directory too.
    async fn locate_log(&self, invocation: &SimulatorInvocation) -> Option<PathBuf> {
        let expected = &invocation.log_path;
        let alternate = self
            .simulator
            .alternate_log_dir
            .as_deref()
            .and_then(|dir| invocation.log_in(Path::new(dir)));

        let deadline = tokio::time::Instant::now() + Duration::from_millis(self.execution.log_wait_ms);
        loop {
            if expected.is_file() {
                return Some(expected.clone());
            }
            if let Some(alt) = alternate.as_ref().filter(|p| p.is_file()) {
                return Some(adopt_log(alt, expected).await);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(LOG_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl ExecutionBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn execute(&self, spec: &TestSpec, slot: &ExecutionSlot) -> JobResult {
        let invocation =
            SimulatorInvocation::new(&self.simulator, &self.execution, spec, slot);
        let mut state = JobState::Pending;

        // A log left over from an earlier run in this slot must not be classified.
        let _ = tokio::fs::remove_file(&invocation.log_path).await;

        tracing::debug!(
            test = %spec.name,
            slot = %slot.id,
            seed = invocation.seed,
            command = %invocation.command_line(),
            "Starting simulator"
        );

        let startup_guard = tokio::select! {
            guard = Arc::clone(&self.startup_lock).lock_owned() => guard,
            () = self.cancel.cancelled() => {
                return Self::cancelled_before_start(spec, slot, &invocation, &mut state);
            }
        };
        if self.cancel.is_cancelled() {
            return Self::cancelled_before_start(spec, slot, &invocation, &mut state);
        }
        let started_at = Utc::now();

        let spawned = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(slot.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                drop(startup_guard);
                advance(&mut state, JobState::SubmissionFailed, &spec.name);
                tracing::error!(test = %spec.name, error = %e, "Failed to start simulator");
                let mut result = JobResult::error(
                    spec,
                    format!("Failed to start '{}': {e}", invocation.program),
                )
                .with_window(started_at, Utc::now())
                .with_slot(slot.id);
                result.seed_used = Some(invocation.seed);
                return result;
            }
        };
        advance(&mut state, JobState::Running, &spec.name);

        let pid = child.id();
        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);

        let deadline = tokio::time::sleep(self.timeout());
        let window = tokio::time::sleep(Duration::from_secs(self.execution.startup_window_secs));
        tokio::pin!(deadline);
        tokio::pin!(window);
        let mut startup_guard = Some(startup_guard);

        let outcome = loop {
            tokio::select! {
                status = child.wait() => break WaitOutcome::Exited(status),
                () = &mut window, if startup_guard.is_some() => {
                    startup_guard = None;
                }
                () = &mut deadline => break WaitOutcome::TimedOut,
                () = self.cancel.cancelled() => break WaitOutcome::Cancelled,
            }
        };
        drop(startup_guard);

        if matches!(outcome, WaitOutcome::TimedOut | WaitOutcome::Cancelled) {
            if let Some(pid) = pid {
                if let Err(e) = kill_process_group(pid) {
                    tracing::warn!(test = %spec.name, pid, error = %e, "Failed to kill process group");
                }
            }
            let _ = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;
        }
        let finished_at = Utc::now();

        let mut output = collect_output(stdout_reader, self.execution.log_wait_ms).await;
        let stderr = collect_output(stderr_reader, self.execution.log_wait_ms).await;
        if !stderr.is_empty() {
            output.push('\n');
            output.push_str(&stderr);
        }

        let mut result = JobResult::new(spec, JobStatus::Error)
            .with_window(started_at, finished_at)
            .with_slot(slot.id);
        result.seed_used = Some(invocation.seed);

        match outcome {
            WaitOutcome::TimedOut => {
                advance(&mut state, JobState::TimedOut, &spec.name);
                result.status = JobStatus::Timeout;
                result.error_message = Some(
                    RegressionError::TimeoutError {
                        test: spec.name.clone(),
                        timeout_secs: self.execution.timeout_secs,
                    }
                    .to_string(),
                );
                result.log_path = invocation.log_path.is_file().then(|| invocation.log_path.clone());
            }
            WaitOutcome::Cancelled => {
                advance(&mut state, JobState::Completed, &spec.name);
                result.error_message = Some(RegressionError::Cancelled.to_string());
                result.log_path = invocation.log_path.is_file().then(|| invocation.log_path.clone());
            }
            WaitOutcome::Exited(status) => {
                advance(&mut state, JobState::Completed, &spec.name);
                if let Ok(status) = status {
                    tracing::debug!(test = %spec.name, code = ?status.code(), "Simulator exited");
                }
                let log_path = self.locate_log(&invocation).await;
                let log_text = match &log_path {
                    Some(path) => read_lossy(path).await,
                    None => None,
                };
                let verdict = self.classifier.classify(&output, log_text.as_deref());
                result.status = verdict.status;
                result.error_message = verdict.message;
                result.diagnostic_error_count = verdict.error_count;
                result.diagnostic_fatal_count = verdict.fatal_count;
                result.log_path = log_path;
            }
        }

        tracing::debug!(test = %spec.name, state = %state, status = %result.status, "Job finished");
        result
    }
}

fn advance(state: &mut JobState, next: JobState, test: &str) {
    if let Err(e) = state.transition(next) {
        tracing::warn!(test, error = %e, "Unexpected local job transition");
    }
}

fn spawn_reader<R>(mut stream: R) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stream.read_to_end(&mut buf).await;
        buf
    })
}

/// Join a reader task. Background processes may keep the pipe open, so the
/// wait is bounded.
async fn collect_output(reader: Option<JoinHandle<Vec<u8>>>, wait_ms: u64) -> String {
    let Some(mut reader) = reader else {
        return String::new();
    };
    match tokio::time::timeout(Duration::from_millis(wait_ms.max(100)), &mut reader).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        _ => {
            reader.abort();
            String::new()
        }
    }
}

async fn read_lossy(path: &Path) -> Option<String> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Could not read log");
            None
        }
    }
}

/// Move a log found in the alternate directory into the slot.
async fn adopt_log(found: &Path, expected: &Path) -> PathBuf {
    if tokio::fs::rename(found, expected).await.is_ok() {
        return expected.to_path_buf();
    }
    match tokio::fs::copy(found, expected).await {
        Ok(_) => {
            let _ = tokio::fs::remove_file(found).await;
            expected.to_path_buf()
        }
        Err(e) => {
            tracing::warn!(path = %found.display(), error = %e, "Could not move log into slot");
            found.to_path_buf()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ClassifierConfig, SlotId};
    use tempfile::TempDir;

    fn backend(tmp: &Path, script: &str, timeout_secs: u64) -> (LocalBackend, CancellationToken) {
        let script_path = tmp.join("fake_sim.sh");
        std::fs::write(&script_path, script).unwrap();

        let mut config = Config::default();
        config.simulator.program = "sh".into();
        config.simulator.args = vec![script_path.display().to_string(), "{test}".into()];
        config.simulator.log_file = "{test}.log".into();
        config.execution.timeout_secs = timeout_secs;
        config.execution.log_wait_ms = 200;
        let cancel = CancellationToken::new();
        let classifier = Arc::new(Classifier::new(ClassifierConfig::default()).unwrap());
        (LocalBackend::new(&config, classifier, cancel.clone()), cancel)
    }

    fn slot(tmp: &Path) -> ExecutionSlot {
        let slot = ExecutionSlot::new(SlotId(0), tmp);
        std::fs::create_dir_all(slot.path()).unwrap();
        slot
    }

    #[tokio::test]
    async fn test_passing_run() {
        let tmp = TempDir::new().unwrap();
        let (backend, _) = backend(tmp.path(), "echo 'TEST PASSED' > \"$1.log\"\n", 10);
        let result = backend
            .execute(&TestSpec::single("t1", 0).with_seed(3), &slot(tmp.path()))
            .await;
        assert_eq!(result.status, JobStatus::Pass);
        assert_eq!(result.seed_used, Some(3));
        assert_eq!(result.slot_id, Some(SlotId(0)));
        assert!(result.log_path.unwrap().ends_with("run_folder_00/t1.log"));
        assert!(result.started_at <= result.finished_at);
    }

    #[tokio::test]
    async fn test_timeout_kills_group() {
        let tmp = TempDir::new().unwrap();
        let (backend, _) = backend(tmp.path(), "sleep 30 &\nsleep 30\n", 1);
        let start = std::time::Instant::now();
        let result = backend
            .execute(&TestSpec::single("t1", 0), &slot(tmp.path()))
            .await;
        assert_eq!(result.status, JobStatus::Timeout);
        assert!(start.elapsed() < Duration::from_secs(15));
        assert!(result.error_message.unwrap().contains("1s"));
    }

    #[tokio::test]
    async fn test_missing_log_is_error() {
        let tmp = TempDir::new().unwrap();
        let (backend, _) = backend(tmp.path(), "echo compiling\n", 10);
        let result = backend
            .execute(&TestSpec::single("t1", 0), &slot(tmp.path()))
            .await;
        assert_eq!(result.status, JobStatus::Error);
        assert!(result.log_path.is_none());
    }

    #[tokio::test]
    async fn test_stdout_is_classified() {
        let tmp = TempDir::new().unwrap();
        let (backend, _) = backend(
            tmp.path(),
            "echo 'Error-[XMRE] cannot elaborate' >&2\necho done > \"$1.log\"\n",
            10,
        );
        let result = backend
            .execute(&TestSpec::single("t1", 0), &slot(tmp.path()))
            .await;
        assert_eq!(result.status, JobStatus::Fail);
        assert!(result.error_message.unwrap().starts_with("Error-[XMRE]"));
    }

    #[tokio::test]
    async fn test_unknown_program_is_error() {
        let tmp = TempDir::new().unwrap();
        let (mut backend, _) = backend(tmp.path(), "", 10);
        backend.simulator.program = "/nonexistent/simulator".into();
        let result = backend
            .execute(&TestSpec::single("t1", 0), &slot(tmp.path()))
            .await;
        assert_eq!(result.status, JobStatus::Error);
        assert!(result.error_message.unwrap().contains("Failed to start"));
    }

    #[tokio::test]
    async fn test_cancellation_stops_job() {
        let tmp = TempDir::new().unwrap();
        let (backend, cancel) = backend(tmp.path(), "sleep 30\n", 60);
        let slot = slot(tmp.path());
        let spec = TestSpec::single("t1", 0);
        let canceller = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel.cancel();
        };
        let (result, ()) = tokio::join!(backend.execute(&spec, &slot), canceller);
        assert_eq!(result.status, JobStatus::Error);
        assert!(result.error_message.unwrap().contains("cancelled"));
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_startup_lock_skips_spawn() {
        let tmp = TempDir::new().unwrap();
        let (backend, cancel) = backend(tmp.path(), "touch started\nsleep 30\n", 60);
        let slot = slot(tmp.path());
        let spec = TestSpec::single("t1", 0);

        let held = Arc::clone(&backend.startup_lock).lock_owned().await;
        let canceller = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel.cancel();
        };
        let (result, ()) = tokio::join!(backend.execute(&spec, &slot), canceller);
        drop(held);

        assert_eq!(result.status, JobStatus::Error);
        assert!(result.error_message.unwrap().contains("cancelled"));
        assert!(result.seed_used.is_some());
        assert!(!slot.path().join("started").exists());
    }

    #[tokio::test]
    async fn test_startup_window_serialises_starts() {
        let tmp = TempDir::new().unwrap();
        let (mut backend, _) = backend(
            tmp.path(),
            "sleep 2\necho 'TEST PASSED' > \"$1.log\"\n",
            30,
        );
        backend.execution.startup_window_secs = 1;
        let first_slot = ExecutionSlot::new(SlotId(0), tmp.path());
        let second_slot = ExecutionSlot::new(SlotId(1), tmp.path());
        std::fs::create_dir_all(first_slot.path()).unwrap();
        std::fs::create_dir_all(second_slot.path()).unwrap();
        let first_spec = TestSpec::single("t1", 0);
        let second_spec = TestSpec::single("t2", 1);

        let (a, b) = tokio::join!(
            backend.execute(&first_spec, &first_slot),
            backend.execute(&second_spec, &second_slot)
        );
        assert_eq!(a.status, JobStatus::Pass);
        assert_eq!(b.status, JobStatus::Pass);

        let (early, late) = if a.started_at <= b.started_at { (&a, &b) } else { (&b, &a) };
        let gap = late.started_at - early.started_at;
        assert!(gap >= chrono::Duration::milliseconds(900), "starts only {gap} apart");
        assert!(late.started_at < early.finished_at, "second run waited for the first to finish");
    }

    #[tokio::test]
    async fn test_startup_lock_released_when_process_exits() {
        let tmp = TempDir::new().unwrap();
        let (mut backend, _) = backend(tmp.path(), "echo 'TEST PASSED' > \"$1.log\"\n", 30);
        backend.execution.startup_window_secs = 10;
        let first_slot = ExecutionSlot::new(SlotId(0), tmp.path());
        let second_slot = ExecutionSlot::new(SlotId(1), tmp.path());
        std::fs::create_dir_all(first_slot.path()).unwrap();
        std::fs::create_dir_all(second_slot.path()).unwrap();

        let start = std::time::Instant::now();
        let first_spec = TestSpec::single("t1", 0);
        let second_spec = TestSpec::single("t2", 1);
        let (a, b) = tokio::join!(
            backend.execute(&first_spec, &first_slot),
            backend.execute(&second_spec, &second_slot)
        );
        assert_eq!(a.status, JobStatus::Pass);
        assert_eq!(b.status, JobStatus::Pass);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_advance_keeps_state_on_illegal_transition() {
        let mut state = JobState::Pending;
        advance(&mut state, JobState::TimedOut, "t1");
        assert_eq!(state, JobState::Pending);
        advance(&mut state, JobState::Running, "t1");
        advance(&mut state, JobState::TimedOut, "t1");
        assert_eq!(state, JobState::TimedOut);
        advance(&mut state, JobState::Completed, "t1");
        assert_eq!(state, JobState::TimedOut);
    }

    #[tokio::test]
    async fn test_log_in_alternate_dir_is_adopted() {
        let tmp = TempDir::new().unwrap();
        let alt = tmp.path().join("alt");
        std::fs::create_dir_all(&alt).unwrap();
        let script = format!("echo 'TEST PASSED' > {}/\"$1.log\"\n", alt.display());
        let (mut backend, _) = backend(tmp.path(), &script, 10);
        backend.simulator.alternate_log_dir = Some(alt.display().to_string());

        let slot = slot(tmp.path());
        let result = backend.execute(&TestSpec::single("t1", 0), &slot).await;
        assert_eq!(result.status, JobStatus::Pass);
        assert_eq!(result.log_path.unwrap(), slot.path().join("t1.log"));
        assert!(!alt.join("t1.log").exists());
    }
}
