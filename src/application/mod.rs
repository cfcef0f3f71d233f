//! Application layer: session orchestration.

pub mod regression_runner;

pub use regression_runner::{RegressionOutcome, RegressionRunner};
