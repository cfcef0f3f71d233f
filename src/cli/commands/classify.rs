//! `simreg classify`: classify a captured log offline.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;
use crate::services::classifier::{Classification, Classifier};

#[derive(Args, Debug)]
pub struct ClassifyArgs {
    /// Simulation log to classify
    pub log: PathBuf,

    /// Captured simulator stdout, checked before the log
    #[arg(long)]
    pub stdout: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct ClassifyOutput {
    pub log: String,
    #[serde(flatten)]
    pub classification: Classification,
}

impl CommandOutput for ClassifyOutput {
    fn to_human(&self) -> String {
        let c = &self.classification;
        let mut lines = vec![
            format!("Log:     {}", self.log),
            format!("Status:  {}", c.status),
            format!("Rule:    {}", c.rule),
        ];
        if let Some(message) = &c.message {
            lines.push(format!("Message: {message}"));
        }
        if c.error_count > 0 || c.fatal_count > 0 {
            lines.push(format!(
                "Counts:  UVM_ERROR={} UVM_FATAL={}",
                c.error_count, c.fatal_count
            ));
        }
        lines.join("\n")
    }
}

/// Exit code 0 when the log classifies as a pass, 1 otherwise.
pub fn execute(args: &ClassifyArgs, config: &Config, json: bool) -> Result<i32> {
    let log = read_lossy(&args.log)?;
    let stdout = match &args.stdout {
        Some(path) => read_lossy(path)?,
        None => String::new(),
    };

    let classifier = Classifier::new(config.classifier.clone())
        .context("Failed to compile classifier patterns")?;
    let classification = classifier.classify(&stdout, Some(&log));
    let code = i32::from(!classification.status.is_pass());

    output(
        &ClassifyOutput {
            log: args.log.display().to_string(),
            classification,
        },
        json,
    );
    Ok(code)
}

fn read_lossy(path: &std::path::Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_for(dir: &std::path::Path, log: &str) -> ClassifyArgs {
        let path = dir.join("sim.log");
        std::fs::write(&path, log).unwrap();
        ClassifyArgs {
            log: path,
            stdout: None,
        }
    }

    #[test]
    fn test_passing_log_exits_zero() {
        let dir = tempfile::tempdir().unwrap();
        let args = args_for(dir.path(), "UVM_INFO @ 10: TEST PASSED\n");
        assert_eq!(execute(&args, &Config::default(), true).unwrap(), 0);
    }

    #[test]
    fn test_failing_log_exits_one() {
        let dir = tempfile::tempdir().unwrap();
        let args = args_for(dir.path(), "UVM_FATAL @ 10: [CFG] bad config\n");
        assert_eq!(execute(&args, &Config::default(), true).unwrap(), 1);
    }

    #[test]
    fn test_missing_log_is_an_error() {
        let args = ClassifyArgs {
            log: PathBuf::from("/nonexistent/sim.log"),
            stdout: None,
        };
        assert!(execute(&args, &Config::default(), true).is_err());
    }
}
