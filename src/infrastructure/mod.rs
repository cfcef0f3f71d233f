//! Infrastructure layer
//!
//! Adapters for the outside world:
//! - Configuration loading
//! - Logging setup
//! - Process group control
//! - Batch scheduler adapters

pub mod config;
pub mod logging;
pub mod process;
pub mod scheduler;
