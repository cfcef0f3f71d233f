//! Domain layer for the simreg regression engine
//!
//! This module contains the run descriptors, job lifecycle, session aggregate
//! and the ports execution backends plug into.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{RegressionError, RegressionResult};
