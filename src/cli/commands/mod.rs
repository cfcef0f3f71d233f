//! CLI command implementations.

pub mod classify;
pub mod expand;
pub mod run;
