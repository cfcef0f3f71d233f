//! Execution slots: isolated working directories hosting one job at a time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Index of a slot in the pool (0..K-1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(pub usize);

impl SlotId {
    /// Directory name of this slot (`run_folder_00`, `run_folder_01`, ...).
    pub fn folder_name(&self) -> String {
        format!("run_folder_{:02}", self.0)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    /// Free for the next job
    Available,
    /// Leased and being reset
    Reserved,
    /// Hosting a job
    Busy,
}

impl SlotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Reserved => "reserved",
            Self::Busy => "busy",
        }
    }
}

/// A view of a leased slot handed to execution backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionSlot {
    pub id: SlotId,
    pub working_directory: PathBuf,
    pub state: SlotState,
}

impl ExecutionSlot {
    pub fn new(id: SlotId, root: &Path) -> Self {
        Self {
            working_directory: root.join(id.folder_name()),
            id,
            state: SlotState::Available,
        }
    }

    pub fn path(&self) -> &Path {
        &self.working_directory
    }
}
