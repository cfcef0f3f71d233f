//! Command line interface.

pub mod commands;
pub mod output;
pub mod types;

use anyhow::Result;
use std::path::Path;

use crate::domain::errors::RegressionError;
use crate::domain::models::Config;
use crate::infrastructure::config::{ConfigLoader, ConfigValidationError};

pub use types::{Cli, Commands};

/// Exit status for configuration problems.
pub const EXIT_CONFIG_ERROR: i32 = 2;

/// Load configuration from `path`, or from the default locations.
///
/// Any failure is reported as a configuration error.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let loaded = match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    };
    loaded.map_err(|e| RegressionError::ConfigError(format!("{e:#}")).into())
}

/// Whether `err` stems from bad input or configuration.
pub fn is_config_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause.downcast_ref::<ConfigValidationError>().is_some()
            || cause
                .downcast_ref::<RegressionError>()
                .is_some_and(RegressionError::is_config)
    })
}

/// Exit code for a failed command.
pub fn error_exit_code(err: &anyhow::Error) -> i32 {
    if is_config_error(err) {
        EXIT_CONFIG_ERROR
    } else {
        1
    }
}

/// Report `err` and terminate the process.
pub fn handle_error(err: anyhow::Error, json: bool) -> ! {
    let code = error_exit_code(&err);
    if json {
        let body = serde_json::json!({
            "error": format!("{err}"),
            "causes": err.chain().skip(1).map(ToString::to_string).collect::<Vec<_>>(),
            "exit_code": code,
        });
        eprintln!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("{} {err}", console::style("error:").red().bold());
        for cause in err.chain().skip(1) {
            eprintln!("  caused by: {cause}");
        }
    }
    std::process::exit(code)
}
