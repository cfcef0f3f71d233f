//! Execution slot pool.
//!
//! A fixed set of `run_folder_NN` directories guarded by a semaphore. A slot
//! is leased for exactly one job; it goes back to the pool only once the job's
//! log has been archived, which [`SlotPool::release`] enforces by requiring an
//! [`ArchiveReceipt`].

use regex::Regex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::domain::errors::{RegressionError, RegressionResult};
use crate::domain::models::{ExecutionSlot, SimulatorConfig, SlotId, SlotState};
use crate::services::log_archive::ArchiveReceipt;

/// Pool behaviour knobs.
#[derive(Debug, Clone)]
pub struct SlotPoolConfig {
    /// Pause after resetting a slot that already hosted a job
    pub settle_delay: Duration,
    pub artifact_patterns: Vec<String>,
    pub setup_files: Vec<PathBuf>,
    pub keep_slots: bool,
}

impl SlotPoolConfig {
    pub fn from_simulator(simulator: &SimulatorConfig, settle_delay: Duration, keep_slots: bool) -> Self {
        Self {
            settle_delay,
            artifact_patterns: simulator.artifact_patterns.clone(),
            setup_files: simulator.setup_files.iter().map(PathBuf::from).collect(),
            keep_slots,
        }
    }
}

#[derive(Debug)]
struct SlotEntry {
    slot: ExecutionSlot,
    used: bool,
}

#[derive(Debug)]
struct PoolInner {
    slots: Mutex<Vec<SlotEntry>>,
    available: Mutex<VecDeque<SlotId>>,
    semaphore: Arc<Semaphore>,
    artifacts: Vec<Regex>,
    config: SlotPoolConfig,
}

impl PoolInner {
    fn slots(&self) -> MutexGuard<'_, Vec<SlotEntry>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, id: SlotId, state: SlotState) {
        if let Some(entry) = self.slots().get_mut(id.0) {
            entry.slot.state = state;
        }
    }

    fn give_back(&self, id: SlotId) {
        self.set_state(id, SlotState::Available);
        self.available
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(id);
    }
}

/// Cloneable handle to the pool.
#[derive(Debug, Clone)]
pub struct SlotPool {
    root: PathBuf,
    inner: Arc<PoolInner>,
}

impl SlotPool {
    /// Wipe stale slot directories under `root` and create `count` fresh ones.
    pub fn create(root: &Path, count: usize, config: SlotPoolConfig) -> RegressionResult<Self> {
        if count == 0 {
            return Err(RegressionError::ConfigError(
                "Slot pool needs at least one slot".to_string(),
            ));
        }
        std::fs::create_dir_all(root).map_err(|e| RegressionError::io(root, e))?;
        remove_stale_slots(root)?;

        let mut slots = Vec::with_capacity(count);
        for i in 0..count {
            let slot = ExecutionSlot::new(SlotId(i), root);
            std::fs::create_dir_all(slot.path()).map_err(|e| RegressionError::io(slot.path(), e))?;
            slots.push(SlotEntry { slot, used: false });
        }

        let artifacts = config
            .artifact_patterns
            .iter()
            .map(String::as_str)
            .map(glob_to_regex)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| RegressionError::ConfigError(format!("Invalid artifact pattern: {e}")))?;

        tracing::info!(root = %root.display(), slots = count, "Created execution slots");

        Ok(Self {
            root: root.to_path_buf(),
            inner: Arc::new(PoolInner {
                slots: Mutex::new(slots),
                available: Mutex::new((0..count).map(SlotId).collect()),
                semaphore: Arc::new(Semaphore::new(count)),
                artifacts,
                config,
            }),
        })
    }

    pub fn len(&self) -> usize {
        self.inner.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Current state of every slot, by id.
    pub fn states(&self) -> Vec<SlotState> {
        self.inner.slots().iter().map(|e| e.slot.state).collect()
    }

    /// Wait for a free slot, reset it and mark it busy.
    pub async fn acquire(&self) -> RegressionResult<SlotLease> {
        let permit = Arc::clone(&self.inner.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| RegressionError::Cancelled)?;

        let id = self
            .inner
            .available
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| RegressionError::ConfigError("Slot pool out of sync".to_string()))?;

        let (slot, used) = {
            let mut slots = self.inner.slots();
            let entry = &mut slots[id.0];
            entry.slot.state = SlotState::Reserved;
            let used = entry.used;
            entry.used = true;
            (entry.slot.clone(), used)
        };

        // From here on the lease owns the slot, so an early return gives it back.
        let mut lease = SlotLease {
            pool: Arc::clone(&self.inner),
            slot,
            permit: Some(permit),
            released: false,
        };

        let removed = reset_slot(lease.slot.path(), &self.inner.artifacts).await;
        if removed > 0 {
            tracing::debug!(slot = %id, removed, "Reset slot");
        }
        copy_setup_files(lease.slot.path(), &self.inner.config.setup_files).await;

        if used && !self.inner.config.settle_delay.is_zero() {
            tokio::time::sleep(self.inner.config.settle_delay).await;
        }

        self.inner.set_state(id, SlotState::Busy);
        lease.slot.state = SlotState::Busy;
        Ok(lease)
    }

    /// Hand a slot back once its log has been archived.
    ///
    /// A receipt issued for another slot proves nothing about this one, so the
    /// release is refused and the lease is returned still busy.
    pub fn release(&self, mut lease: SlotLease, receipt: ArchiveReceipt) -> Result<(), SlotLease> {
        if receipt.slot() != lease.slot.id {
            tracing::error!(
                slot = %lease.slot.id,
                receipt_slot = %receipt.slot(),
                "Archive receipt belongs to another slot, refusing release"
            );
            return Err(lease);
        }
        lease.released = true;
        self.inner.give_back(lease.slot.id);
        Ok(())
    }

    /// Remove slot directories after a fully passing session, unless asked to keep them.
    pub async fn cleanup(&self, all_passed: bool) {
        if !all_passed || self.inner.config.keep_slots {
            tracing::info!(root = %self.root.display(), "Keeping slot directories for inspection");
            return;
        }
        let paths: Vec<PathBuf> = self
            .inner
            .slots()
            .iter()
            .map(|e| e.slot.working_directory.clone())
            .collect();
        for path in paths {
            if let Err(e) = tokio::fs::remove_dir_all(&path).await {
                tracing::warn!(path = %path.display(), error = %e, "Could not remove slot directory");
            }
        }
    }
}

/// Exclusive use of one slot for one job.
#[derive(Debug)]
pub struct SlotLease {
    pool: Arc<PoolInner>,
    slot: ExecutionSlot,
    permit: Option<OwnedSemaphorePermit>,
    released: bool,
}

impl SlotLease {
    pub const fn slot(&self) -> &ExecutionSlot {
        &self.slot
    }

    pub const fn id(&self) -> SlotId {
        self.slot.id
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!(slot = %self.slot.id, "Slot lease dropped without release, reclaiming");
            self.pool.give_back(self.slot.id);
        }
        // The permit must only be returned after the id is back in the list.
        drop(self.permit.take());
    }
}

fn remove_stale_slots(root: &Path) -> RegressionResult<()> {
    let stale = Regex::new(r"^run_folder_\d+$")
        .map_err(|e| RegressionError::ConfigError(e.to_string()))?;
    let entries = std::fs::read_dir(root).map_err(|e| RegressionError::io(root, e))?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() && stale.is_match(&entry.file_name().to_string_lossy()) {
            std::fs::remove_dir_all(&path).map_err(|e| RegressionError::io(&path, e))?;
            tracing::debug!(path = %path.display(), "Removed stale slot directory");
        }
    }
    Ok(())
}

/// Delete top-level artifacts matching `patterns`. Logs are never touched.
async fn reset_slot(dir: &Path, patterns: &[Regex]) -> usize {
    let mut removed = 0;
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(slot = %dir.display(), error = %e, "Could not list slot for reset");
            return 0;
        }
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_log(&name) || !patterns.iter().any(|p| p.is_match(&name)) {
            continue;
        }
        let path = entry.path();
        let result = match entry.file_type().await {
            Ok(ft) if ft.is_dir() => tokio::fs::remove_dir_all(&path).await,
            _ => tokio::fs::remove_file(&path).await,
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove artifact"),
        }
    }
    removed
}

async fn copy_setup_files(dir: &Path, files: &[PathBuf]) {
    for file in files {
        let Some(name) = file.file_name() else {
            continue;
        };
        if !file.is_file() {
            tracing::debug!(file = %file.display(), "Setup file not found, skipping");
            continue;
        }
        if let Err(e) = tokio::fs::copy(file, dir.join(name)).await {
            tracing::warn!(file = %file.display(), error = %e, "Failed to copy setup file");
        }
    }
}

fn is_log(name: &str) -> bool {
    name.ends_with(".log") || name.ends_with(".log.gz")
}

/// Translate a shell glob (`*`, `?`) into an anchored regex.
pub fn glob_to_regex(glob: &str) -> Result<Regex, regex::Error> {
    let mut pattern = String::from("^");
    for c in glob.chars() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            c => pattern.push_str(&regex::escape(&c.to_string())),
        }
    }
    pattern.push('$');
    Regex::new(&pattern)
}
