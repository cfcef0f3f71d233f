//! simreg - Regression Orchestrator for Hardware Simulation Suites
//!
//! simreg takes a declarative test list, runs every test as an isolated
//! simulator subprocess (locally or through a batch scheduler), classifies
//! each run from its log and writes pass/fail reports.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, errors and ports
//! - **Service Layer** (`services`): test list expansion, slot pool, backends,
//!   classifier, recorder, reporter, coverage
//! - **Application Layer** (`application`): the regression runner
//! - **Infrastructure Layer** (`infrastructure`): configuration, logging,
//!   process control, scheduler adapters
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use simreg::application::RegressionRunner;
//! use simreg::infrastructure::config::ConfigLoader;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runner = RegressionRunner::new(ConfigLoader::load()?);
//!     let outcome = runner.run("test.list".as_ref()).await?;
//!     std::process::exit(outcome.exit_code());
//! }
//! ```

pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use application::{RegressionOutcome, RegressionRunner};
pub use domain::errors::{RegressionError, RegressionResult};
pub use domain::models::{
    Config, JobResult, JobState, JobStatus, Session, SlotId, TestSpec,
};
pub use domain::ports::{BatchScheduler, ExecutionBackend};
pub use infrastructure::config::{ConfigLoader, ConfigValidationError};
