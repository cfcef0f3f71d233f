//! Coverage collection and merging.
//!
//! Each finished run's coverage database is staged in `coverage_collect/`
//! before its slot is released; once the whole session is done the merge
//! tool combines the staged databases into one report. Nothing here can fail
//! a session: problems are logged as warnings.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use walkdir::WalkDir;

use crate::domain::errors::{RegressionError, RegressionResult};
use crate::domain::models::{CoverageConfig, ExecutionSlot, TestSpec};
use crate::services::invocation::expand_template;
use crate::services::slot_pool::glob_to_regex;

pub const STAGING_DIR: &str = "coverage_collect";
pub const MERGED_DB: &str = "merged_coverage.vdb";
pub const REPORT_DIR: &str = "coverage_report";

/// How a merge attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged { databases: usize, report: PathBuf },
    NothingToMerge,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct CoverageCollector {
    staging: PathBuf,
    artifact: String,
    extra_patterns: Vec<Regex>,
    merge_program: String,
    merge_timeout: Duration,
}

impl CoverageCollector {
    /// Create the staging directory under `session_dir`.
    pub fn create(session_dir: &Path, config: &CoverageConfig) -> RegressionResult<Self> {
        let staging = session_dir.join(STAGING_DIR);
        std::fs::create_dir_all(&staging).map_err(|e| RegressionError::io(&staging, e))?;
        let extra_patterns = config
            .extra_patterns
            .iter()
            .map(String::as_str)
            .map(glob_to_regex)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| RegressionError::ConfigError(format!("Invalid coverage pattern: {e}")))?;
        Ok(Self {
            staging,
            artifact: config.artifact.clone(),
            extra_patterns,
            merge_program: config.merge_program.clone(),
            merge_timeout: Duration::from_secs(config.merge_timeout_secs),
        })
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging
    }

    /// Stage the coverage output of `spec` from `slot`. Returns how many
    /// entries were copied.
    pub async fn collect(&self, spec: &TestSpec, slot: &ExecutionSlot) -> usize {
        let artifact = expand_template(
            &self.artifact,
            &[("test", spec.base_name.as_str()), ("name", spec.name.as_str())],
        );
        let source = slot.path().join(artifact);
        let slot_dir = slot.path().to_path_buf();
        let staging = self.staging.clone();
        let patterns = self.extra_patterns.clone();
        let name = spec.name.clone();
        let slot_id = slot.id;

        let copied = tokio::task::spawn_blocking(move || {
            let mut copied = 0;
            if source.exists() {
                let dest = staging.join(format!("{name}_cov_{slot_id}"));
                match copy_tree(&source, &dest) {
                    Ok(()) => copied += 1,
                    Err(e) => tracing::warn!(
                        test = %name,
                        source = %source.display(),
                        error = %e,
                        "Could not stage coverage database"
                    ),
                }
            } else {
                tracing::debug!(test = %name, source = %source.display(), "No coverage database");
            }

            let entries = match std::fs::read_dir(&slot_dir) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(slot = %slot_dir.display(), error = %e, "Cannot list slot");
                    return copied;
                }
            };
            for entry in entries.flatten() {
                let file_name = entry.file_name().to_string_lossy().into_owned();
                if !entry.path().is_file() || !patterns.iter().any(|re| re.is_match(&file_name)) {
                    continue;
                }
                let dest = staging.join(format!("{name}_{file_name}"));
                match std::fs::copy(entry.path(), &dest) {
                    Ok(_) => copied += 1,
                    Err(e) => tracing::warn!(file = %file_name, error = %e, "Could not stage coverage file"),
                }
            }
            copied
        })
        .await
        .unwrap_or(0);

        if copied > 0 {
            tracing::debug!(test = %spec.name, slot = %slot.id, copied, "Staged coverage");
        }
        copied
    }

    /// Databases staged so far, in name order.
    pub fn staged_databases(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.staging) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.contains("_cov_"))
            .collect();
        names.sort();
        names
    }

    /// Merge tool arguments, relative to the staging directory.
    pub fn merge_args(databases: &[String]) -> Vec<String> {
        let mut args = Vec::with_capacity(databases.len() * 2 + 6);
        for db in databases {
            args.push("-dir".to_string());
            args.push(db.clone());
        }
        args.extend(
            ["-dbname", MERGED_DB, "-format", "both", "-report", REPORT_DIR]
                .map(String::from),
        );
        args
    }

    /// Run the merge tool once over everything staged.
    pub async fn merge(&self) -> MergeOutcome {
        let databases = self.staged_databases();
        if databases.is_empty() {
            tracing::warn!(staging = %self.staging.display(), "No coverage data to merge");
            return MergeOutcome::NothingToMerge;
        }

        tracing::info!(databases = databases.len(), program = %self.merge_program, "Merging coverage");
        let run = Command::new(&self.merge_program)
            .args(Self::merge_args(&databases))
            .current_dir(&self.staging)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let outcome = match tokio::time::timeout(self.merge_timeout, run).await {
            Err(_) => MergeOutcome::Failed(format!(
                "merge timed out after {}s",
                self.merge_timeout.as_secs()
            )),
            Ok(Err(e)) => MergeOutcome::Failed(format!(
                "cannot run '{}': {e}",
                self.merge_program
            )),
            Ok(Ok(output)) if !output.status.success() => MergeOutcome::Failed(format!(
                "'{}' exited with {}: {}",
                self.merge_program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )),
            Ok(Ok(_)) => MergeOutcome::Merged {
                databases: databases.len(),
                report: self.staging.join(REPORT_DIR),
            },
        };

        match &outcome {
            MergeOutcome::Merged { report, .. } => {
                tracing::info!(report = %report.display(), "Coverage merge completed");
                log_summary(&report.join("summary.txt"));
            }
            MergeOutcome::Failed(reason) => {
                tracing::warn!(reason = %reason, "Coverage merge failed");
            }
            MergeOutcome::NothingToMerge => {}
        }
        outcome
    }
}

fn log_summary(path: &Path) {
    let Ok(content) = std::fs::read_to_string(path) else {
        return;
    };
    for line in content.lines().take(10) {
        tracing::info!("coverage: {line}");
    }
}

/// Copy a file or a directory tree to `dest`, replacing what was there.
fn copy_tree(source: &Path, dest: &Path) -> std::io::Result<()> {
    if dest.exists() {
        std::fs::remove_dir_all(dest).or_else(|_| std::fs::remove_file(dest))?;
    }
    if source.is_file() {
        std::fs::copy(source, dest)?;
        return Ok(());
    }
    for entry in WalkDir::new(source) {
        let entry = entry.map_err(std::io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(std::io::Error::other)?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::SlotId;

    fn collector(session: &Path, program: &str) -> CoverageCollector {
        let config = CoverageConfig {
            merge_program: program.to_string(),
            merge_timeout_secs: 5,
            ..CoverageConfig::default()
        };
        CoverageCollector::create(session, &config).unwrap()
    }

    fn slot_with_coverage(root: &Path, test: &str) -> ExecutionSlot {
        let slot = ExecutionSlot::new(SlotId(3), root);
        let vdb = slot.path().join(format!("{test}.vdb")).join("snps").join("coverage");
        std::fs::create_dir_all(&vdb).unwrap();
        std::fs::write(vdb.join("db.xml"), "<db/>").unwrap();
        std::fs::write(slot.path().join("line.cm"), "cm").unwrap();
        std::fs::write(slot.path().join("sim.log"), "log").unwrap();
        slot
    }

    #[tokio::test]
    async fn test_collect_stages_database_and_extras() {
        let session = tempfile::tempdir().unwrap();
        let slots = tempfile::tempdir().unwrap();
        let coverage = collector(session.path(), "urg");
        let slot = slot_with_coverage(slots.path(), "t2");

        let mut spec = TestSpec::single("t2_1", 0);
        spec.base_name = "t2".to_string();
        assert_eq!(coverage.collect(&spec, &slot).await, 2);

        let staged = coverage.staging_dir();
        assert!(staged.join("t2_1_cov_03/snps/coverage/db.xml").is_file());
        assert!(staged.join("t2_1_line.cm").is_file());
        assert!(!staged.join("t2_1_sim.log").exists());
        assert_eq!(coverage.staged_databases(), ["t2_1_cov_03"]);
    }

    #[tokio::test]
    async fn test_collect_without_database() {
        let session = tempfile::tempdir().unwrap();
        let slots = tempfile::tempdir().unwrap();
        let coverage = collector(session.path(), "urg");
        let slot = ExecutionSlot::new(SlotId(0), slots.path());
        std::fs::create_dir_all(slot.path()).unwrap();

        assert_eq!(coverage.collect(&TestSpec::single("t1", 0), &slot).await, 0);
        assert!(coverage.staged_databases().is_empty());
    }

    #[test]
    fn test_merge_args() {
        let args = CoverageCollector::merge_args(&["a_cov_00".into(), "b_cov_01".into()]);
        assert_eq!(
            args,
            [
                "-dir", "a_cov_00", "-dir", "b_cov_01", "-dbname", MERGED_DB, "-format", "both",
                "-report", REPORT_DIR
            ]
        );
    }

    #[tokio::test]
    async fn test_merge_with_nothing_staged() {
        let session = tempfile::tempdir().unwrap();
        assert_eq!(
            collector(session.path(), "urg").merge().await,
            MergeOutcome::NothingToMerge
        );
    }

    #[tokio::test]
    async fn test_merge_missing_tool_is_reported() {
        let session = tempfile::tempdir().unwrap();
        let coverage = collector(session.path(), "/nonexistent/urg");
        std::fs::create_dir_all(coverage.staging_dir().join("t1_cov_00")).unwrap();
        assert!(matches!(coverage.merge().await, MergeOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_merge_runs_tool_in_staging_dir() {
        let session = tempfile::tempdir().unwrap();
        let coverage = collector(session.path(), "true");
        std::fs::create_dir_all(coverage.staging_dir().join("t1_cov_00")).unwrap();
        match coverage.merge().await {
            MergeOutcome::Merged { databases, report } => {
                assert_eq!(databases, 1);
                assert!(report.ends_with(REPORT_DIR));
            }
            other => panic!("expected a merge, got {other:?}"),
        }
    }
}
