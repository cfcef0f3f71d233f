//! Port trait definitions (Hexagonal Architecture)
//!
//! - ExecutionBackend: runs one spec in a leased slot and yields its result
//! - BatchScheduler: submit/query/kill against a remote job scheduler

pub mod backend;
pub mod scheduler;

pub use backend::ExecutionBackend;
pub use scheduler::{BatchScheduler, JobId, RemoteState, SchedulerError, ScriptRequest};
