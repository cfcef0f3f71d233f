pub mod config;
pub mod job;
pub mod session;
pub mod slot;
pub mod test_spec;

pub use config::{
    BatchConfig, ClassifierConfig, Config, CoverageConfig, ExecutionConfig, LoggingConfig,
    OutputConfig, RetryConfig, SimulatorConfig,
};
pub use job::{JobResult, JobState, JobStatus};
pub use session::Session;
pub use slot::{ExecutionSlot, SlotId, SlotState};
pub use test_spec::{GroupId, TestSpec, MAX_SEED};
