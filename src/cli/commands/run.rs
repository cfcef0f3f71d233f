//! `simreg run`: execute a regression.

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use serde::Serialize;
use std::path::PathBuf;

use crate::application::{RegressionOutcome, RegressionRunner};
use crate::cli::output::progress::{create_progress_bar, should_show_progress};
use crate::cli::output::{output, CommandOutput, TableFormatter};
use crate::domain::models::{Config, JobResult, JobStatus};
use crate::infrastructure::config::ConfigLoader;
use crate::services::coverage::MergeOutcome;
use crate::services::session_recorder::format_hms;

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Test list file
    #[arg(default_value = "test.list")]
    pub test_list: PathBuf,

    /// Number of concurrent local jobs
    #[arg(short, long)]
    pub parallel: Option<usize>,

    /// Per-job timeout in seconds
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Submit jobs to the batch scheduler
    #[arg(long)]
    pub batch: bool,

    /// Collect and merge coverage
    #[arg(long)]
    pub cov: bool,

    /// Dump waveforms
    #[arg(long)]
    pub waveform: bool,

    /// Keep archived logs uncompressed
    #[arg(long)]
    pub no_compress: bool,

    /// Keep slot directories even when everything passed
    #[arg(long)]
    pub keep_slots: bool,

    /// Parent directory for the session results
    #[arg(long)]
    pub results_dir: Option<PathBuf>,
}

impl RunArgs {
    /// Apply command line flags on top of the loaded configuration.
    pub fn apply(&self, config: &mut Config) {
        if let Some(parallel) = self.parallel {
            config.execution.parallelism = parallel;
        }
        if let Some(timeout) = self.timeout {
            config.execution.timeout_secs = timeout;
        }
        config.execution.batch |= self.batch;
        config.execution.coverage |= self.cov;
        config.execution.waveform |= self.waveform;
        if self.no_compress {
            config.output.compress_logs = false;
        }
        config.output.keep_slots |= self.keep_slots;
        if let Some(dir) = &self.results_dir {
            config.output.results_root = dir.display().to_string();
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RunOutput {
    pub session_id: String,
    pub results_dir: String,
    pub total: usize,
    pub completed: usize,
    pub passed: usize,
    pub failed: usize,
    pub timeouts: usize,
    pub errors: usize,
    pub pass_rate: f64,
    pub elapsed_secs: f64,
    pub interrupted: bool,
    pub exit_code: i32,
    pub coverage: Option<String>,
    pub non_passing: Vec<JobResult>,
}

impl From<&RegressionOutcome> for RunOutput {
    fn from(outcome: &RegressionOutcome) -> Self {
        let session = &outcome.session;
        Self {
            session_id: session.id.clone(),
            results_dir: outcome.session_dir.display().to_string(),
            total: session.total,
            completed: session.completed,
            passed: session.passed,
            failed: session.failed,
            timeouts: session.count(JobStatus::Timeout),
            errors: session.count(JobStatus::Error),
            pass_rate: session.pass_rate(),
            elapsed_secs: session.elapsed().as_secs_f64(),
            interrupted: session.interrupted,
            exit_code: outcome.exit_code(),
            coverage: outcome.coverage.as_ref().map(|c| match c {
                MergeOutcome::Merged { report, .. } => report.display().to_string(),
                MergeOutcome::NothingToMerge => "nothing to merge".to_string(),
                MergeOutcome::Failed(reason) => format!("failed: {reason}"),
            }),
            non_passing: session.non_passes().cloned().collect(),
        }
    }
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            String::new(),
            style("REGRESSION SUMMARY").bold().to_string(),
            format!("  Session:      {}", self.session_id),
            format!("  Total runs:   {}", self.total),
            format!(
                "  Passed:       {}",
                style(format!("{} ({:.1}%)", self.passed, self.pass_rate)).green()
            ),
        ];
        let failed = format!("{} (timeouts {}, errors {})", self.failed, self.timeouts, self.errors);
        lines.push(if self.failed == 0 {
            format!("  Failed:       {failed}")
        } else {
            format!("  Failed:       {}", style(failed).red())
        });
        lines.push(format!(
            "  Total time:   {}",
            format_hms(std::time::Duration::from_secs_f64(self.elapsed_secs))
        ));
        lines.push(format!("  Results:      {}", self.results_dir));
        if let Some(coverage) = &self.coverage {
            lines.push(format!("  Coverage:     {coverage}"));
        }
        if self.interrupted {
            lines.push(
                style(format!(
                    "  Interrupted after {} of {} runs",
                    self.completed, self.total
                ))
                .yellow()
                .to_string(),
            );
        }
        if !self.non_passing.is_empty() {
            lines.push(String::new());
            lines.push(TableFormatter::new().format_results(&self.non_passing));
        }
        lines.join("\n")
    }
}

/// Run the regression and return the session exit code.
pub async fn execute(args: &RunArgs, mut config: Config, json: bool) -> Result<i32> {
    args.apply(&mut config);
    ConfigLoader::validate(&config).context("Invalid run options")?;

    let mut runner = RegressionRunner::new(config).with_signal_handling(true);
    if should_show_progress(json) {
        runner = runner.with_progress(create_progress_bar(0));
    }

    let outcome = runner
        .run(&args.test_list)
        .await
        .with_context(|| format!("Regression over {} failed", args.test_list.display()))?;

    output(&RunOutput::from(&outcome), json);
    Ok(outcome.exit_code())
}
