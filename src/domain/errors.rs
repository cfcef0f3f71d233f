//! Domain errors for the simreg regression engine.

use std::path::PathBuf;

use thiserror::Error;

use super::models::job::JobState;

/// Domain-level errors that can occur while orchestrating a regression.
///
/// Only [`RegressionError::ConfigError`] aborts a session before any job runs.
/// Submission and timeout failures are folded into the affected job's result.
#[derive(Debug, Error)]
pub enum RegressionError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Submission of '{test}' failed: {reason}")]
    SubmissionError { test: String, reason: String },

    #[error("'{test}' exceeded its budget of {timeout_secs}s")]
    TimeoutError { test: String, timeout_secs: u64 },

    #[error("Invalid job state transition from {from} to {to}")]
    InvalidTransition { from: JobState, to: JobState },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot serialize {what}: {source}")]
    Serialization {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Regression cancelled by stop signal")]
    Cancelled,
}

impl RegressionError {
    /// Wrap an I/O error with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error aborts the session before execution.
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::ConfigError(_))
    }
}

pub type RegressionResult<T> = Result<T, RegressionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_mentions_path() {
        let err = RegressionError::io(
            "/tmp/run_folder_00",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/tmp/run_folder_00"));
        assert!(msg.contains("gone"));
        assert!(!err.is_config());
    }

    #[test]
    fn serialization_error_is_not_config() {
        let source = serde_json::from_str::<u8>("not json").unwrap_err();
        let err = RegressionError::Serialization {
            what: "session",
            source,
        };
        assert!(err.to_string().starts_with("Cannot serialize session:"));
        assert!(!err.is_config());
    }

    #[test]
    fn invalid_transition_display() {
        let err = RegressionError::InvalidTransition {
            from: JobState::Completed,
            to: JobState::Running,
        };
        assert_eq!(
            err.to_string(),
            "Invalid job state transition from completed to running"
        );
    }
}
