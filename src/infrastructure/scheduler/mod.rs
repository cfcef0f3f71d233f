//! Batch scheduler adapters.

pub mod lsf;

pub use lsf::LsfScheduler;
