//! Service layer: the regression building blocks.

pub mod batch_backend;
pub mod classifier;
pub mod coverage;
pub mod invocation;
pub mod local_backend;
pub mod log_archive;
pub mod reporter;
pub mod session_recorder;
pub mod slot_pool;
pub mod test_list;

pub use batch_backend::{BatchBackend, TrackerHandle};
pub use classifier::{Classification, Classifier};
pub use coverage::{CoverageCollector, MergeOutcome};
pub use invocation::SimulatorInvocation;
pub use local_backend::LocalBackend;
pub use log_archive::{ArchiveReceipt, LogArchiver};
pub use reporter::Reporter;
pub use session_recorder::{RecorderHandle, SessionRecorder};
pub use slot_pool::{SlotLease, SlotPool, SlotPoolConfig};
