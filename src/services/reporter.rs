//! Session report files.
//!
//! All files are rendered from a finished [`Session`] whose results are in
//! sequence order. `pass_list` and `no_pass_list` stay loadable as test lists:
//! they carry the logical test name with the seed that was actually used, and
//! the run name in a trailing comment.

use chrono::Local;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::errors::{RegressionError, RegressionResult};
use crate::domain::models::{JobResult, JobStatus, Session};
use crate::services::session_recorder::format_hms;

const RULE: &str = "================================================================================";
const THIN_RULE: &str = "--------------------------------------------------------------------------------";

/// Writes the report files of one session into its result directory.
#[derive(Debug, Clone)]
pub struct Reporter {
    dir: PathBuf,
}

impl Reporter {
    pub fn new(session_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: session_dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write every report. Returns the paths written.
    pub fn write_all(&self, session: &Session) -> RegressionResult<Vec<PathBuf>> {
        let generated = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let summary = render_summary(session, &generated);
        let json = serde_json::to_string_pretty(session).map_err(|source| {
            RegressionError::Serialization {
                what: "session",
                source,
            }
        })?;

        let files = [
            ("pass_list".to_string(), render_pass_list(session, &generated)),
            ("no_pass_list".to_string(), render_no_pass_list(session, &generated)),
            ("running_list".to_string(), render_running_list(session, &generated)),
            ("regression_summary.txt".to_string(), summary),
            (
                format!("regression_results_{}.txt", session.id),
                render_detailed_results(session, &generated),
            ),
            ("results.json".to_string(), json),
        ];

        let mut written = Vec::with_capacity(files.len());
        for (name, content) in files {
            let path = self.dir.join(name);
            std::fs::write(&path, content).map_err(|e| RegressionError::io(&path, e))?;
            written.push(path);
        }
        tracing::info!(dir = %self.dir.display(), files = written.len(), "Reports written");
        Ok(written)
    }
}

/// `base_name seed=S [command_add=X]`, the part of a list line the loader reads back.
pub fn list_entry(result: &JobResult) -> String {
    let mut line = result.base_name.clone();
    if let Some(seed) = result.seed_used {
        let _ = write!(line, " seed={seed}");
    }
    if let Some(extra) = &result.extra_args {
        let _ = write!(line, " command_add={}", quote_value(extra));
    }
    line
}

/// Double-quote a value the list tokenizer would otherwise split.
fn quote_value(value: &str) -> String {
    if value.is_empty() || value.chars().any(|c| c.is_whitespace() || c == '#') {
        format!("\"{value}\"")
    } else {
        value.to_string()
    }
}

fn list_header(out: &mut String, title: &str, generated: &str, description: &str, count: usize) {
    let _ = writeln!(out, "# {title} generated on {generated}");
    let _ = writeln!(out, "# {description}");
    let _ = writeln!(out, "# Format: test_name [seed=XXX] [command_add=XXX]");
    let _ = writeln!(out, "# Total runs: {count}");
    out.push_str("#\n");
}

pub fn render_pass_list(session: &Session, generated: &str) -> String {
    let passed: Vec<&JobResult> = session.passes().collect();
    let mut out = String::new();
    list_header(
        &mut out,
        "Pass list",
        generated,
        "Execution parameters of passed runs",
        passed.len(),
    );
    for result in passed {
        let _ = writeln!(out, "{}  # run={}", list_entry(result), result.name);
    }
    out
}

pub fn render_no_pass_list(session: &Session, generated: &str) -> String {
    let failed: Vec<&JobResult> = session.non_passes().collect();
    let mut out = String::new();
    list_header(
        &mut out,
        "No pass list",
        generated,
        "Execution parameters of failed, timed out and errored runs",
        failed.len(),
    );
    for result in failed {
        let _ = writeln!(
            out,
            "{}  # run={} {} {:.1}s",
            list_entry(result),
            result.name,
            result.status,
            result.duration.as_secs_f64()
        );
    }
    out
}

pub fn render_running_list(session: &Session, generated: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Running list generated on {generated}");
    let _ = writeln!(out, "# All runs executed in session {}", session.id);
    let _ = writeln!(out, "# Total runs: {}", session.results.len());
    out.push_str("#\n");
    for result in &session.results {
        let mut line = format!("{} [{}]", result.name, result.status);
        if let Some(seed) = result.seed_used {
            let _ = write!(line, " seed={seed}");
        }
        if let Some(extra) = &result.extra_args {
            let _ = write!(line, " command_add={}", quote_value(extra));
        }
        let _ = writeln!(out, "{line}");
    }
    out
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let pct = part as f64 * 100.0 / whole as f64;
    pct
}

fn average_duration(session: &Session) -> Duration {
    let count = u32::try_from(session.results.len()).unwrap_or(u32::MAX);
    if count == 0 {
        return Duration::ZERO;
    }
    session.results.iter().map(|r| r.duration).sum::<Duration>() / count
}

fn record_line(out: &mut String, result: &JobResult) {
    let _ = write!(
        out,
        "  {:<8} {:<50} ({:.1}s)",
        result.status.as_str(),
        result.name,
        result.duration.as_secs_f64()
    );
    if let Some(slot) = result.slot_id {
        let _ = write!(out, " slot={slot}");
    }
    if let Some(seed) = result.seed_used {
        let _ = write!(out, " seed={seed}");
    }
    out.push('\n');
    if let Some(log) = &result.log_path {
        let _ = writeln!(out, "           log: {}", log.display());
    }
}

pub fn render_summary(session: &Session, generated: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Regression Summary");
    let _ = writeln!(out, "Session: {}", session.id);
    let _ = writeln!(out, "Generated: {generated}");
    let _ = writeln!(out, "{RULE}\n");

    let _ = writeln!(out, "Statistics:");
    let _ = writeln!(out, "  Total Tests:      {}", session.total);
    let _ = writeln!(out, "  Completed:        {}", session.completed);
    let _ = writeln!(
        out,
        "  Passed:           {} ({:.1}%)",
        session.passed,
        percent(session.passed, session.completed)
    );
    let _ = writeln!(
        out,
        "  Failed:           {} ({:.1}%)",
        session.failed,
        percent(session.failed, session.completed)
    );
    for status in [JobStatus::Fail, JobStatus::Timeout, JobStatus::Error] {
        let _ = writeln!(out, "    {:<15} {}", status.as_str(), session.count(status));
    }
    let _ = writeln!(out, "  Total Time:       {}", format_hms(session.elapsed()));
    let _ = writeln!(
        out,
        "  Average per Test: {:.1}s",
        average_duration(session).as_secs_f64()
    );
    if session.interrupted {
        let _ = writeln!(
            out,
            "  Interrupted:      yes ({} of {} runs not executed)",
            session.total - session.completed,
            session.total
        );
    }

    let groups: [(&str, Vec<&JobResult>); 3] = [
        (
            "TIMEOUT",
            session
                .results
                .iter()
                .filter(|r| r.status == JobStatus::Timeout)
                .collect(),
        ),
        (
            "FAIL/ERROR",
            session
                .results
                .iter()
                .filter(|r| matches!(r.status, JobStatus::Fail | JobStatus::Error))
                .collect(),
        ),
        ("PASS", session.passes().collect()),
    ];
    let _ = writeln!(out, "\nDetailed Results:");
    let _ = writeln!(out, "{THIN_RULE}");
    for (label, results) in &groups {
        if results.is_empty() {
            continue;
        }
        let _ = writeln!(out, "{label} ({}):", results.len());
        for result in results {
            record_line(&mut out, result);
        }
        out.push('\n');
    }

    let failures: Vec<&JobResult> = session.non_passes().collect();
    if !failures.is_empty() {
        let _ = writeln!(out, "Failure Summary:");
        let _ = writeln!(out, "{THIN_RULE}");
        for result in failures {
            let _ = writeln!(out, "{:<8} {}", result.status.as_str(), result.name);
            if let Some(message) = &result.error_message {
                let _ = writeln!(out, "         Error: {message}");
            }
            if result.diagnostic_error_count > 0 || result.diagnostic_fatal_count > 0 {
                let _ = writeln!(
                    out,
                    "         UVM_ERROR: {}, UVM_FATAL: {}",
                    result.diagnostic_error_count, result.diagnostic_fatal_count
                );
            }
        }
    }
    out
}

pub fn render_detailed_results(session: &Session, generated: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Regression Results {}", session.id);
    let _ = writeln!(out, "Generated: {generated}");
    let _ = writeln!(out, "{RULE}");
    for result in &session.results {
        let _ = writeln!(out, "Run:        {}", result.name);
        let _ = writeln!(out, "Test:       {}", result.base_name);
        let _ = writeln!(out, "Status:     {}", result.status);
        if let Some(seed) = result.seed_used {
            let _ = writeln!(out, "Seed:       {seed}");
        }
        if let Some(extra) = &result.extra_args {
            let _ = writeln!(out, "Extra args: {extra}");
        }
        if let Some(slot) = result.slot_id {
            let _ = writeln!(out, "Slot:       {}", slot.folder_name());
        }
        let _ = writeln!(out, "Duration:   {:.1}s", result.duration.as_secs_f64());
        let _ = writeln!(out, "Started:    {}", result.started_at.to_rfc3339());
        let _ = writeln!(out, "Finished:   {}", result.finished_at.to_rfc3339());
        if let Some(log) = &result.log_path {
            let _ = writeln!(out, "Log:        {}", log.display());
        }
        if let Some(message) = &result.error_message {
            let _ = writeln!(out, "Message:    {message}");
        }
        if result.diagnostic_error_count > 0 || result.diagnostic_fatal_count > 0 {
            let _ = writeln!(
                out,
                "Counts:     UVM_ERROR={} UVM_FATAL={}",
                result.diagnostic_error_count, result.diagnostic_fatal_count
            );
        }
        let _ = writeln!(out, "{THIN_RULE}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::TestSpec;
    use crate::services::test_list;

    fn result(spec: TestSpec, status: JobStatus, seed: u32) -> JobResult {
        let mut result = JobResult::new(&spec, status);
        result.seed_used = Some(seed);
        result.duration = Duration::from_millis(12_300);
        result
    }

    fn session() -> Session {
        let mut session = Session::with_id("20250709_144850", 3);
        let mut t2_1 = TestSpec::single("t2_1", 1);
        t2_1.base_name = "t2".to_string();
        let mut t2_2 = TestSpec::single("t2_2", 2);
        t2_2.base_name = "t2".to_string();

        session.record(result(t2_2, JobStatus::Timeout, 7));
        session.record(result(TestSpec::single("t1", 0), JobStatus::Pass, 5));
        let mut failed = result(
            t2_1.with_extra_args("+define+A +define+B"),
            JobStatus::Fail,
            6,
        );
        failed.error_message = Some("UVM_FATAL @ 10: boom".to_string());
        failed.diagnostic_fatal_count = 1;
        session.record(failed);
        session.finish();
        session
    }

    fn entries(content: &str) -> Vec<&str> {
        content.lines().filter(|l| !l.starts_with('#')).collect()
    }

    #[test]
    fn test_pass_list_lines() {
        let content = render_pass_list(&session(), "now");
        assert_eq!(entries(&content), ["t1 seed=5  # run=t1"]);
    }

    #[test]
    fn test_no_pass_list_lines() {
        let content = render_no_pass_list(&session(), "now");
        assert_eq!(
            entries(&content),
            [
                "t2 seed=6 command_add=\"+define+A +define+B\"  # run=t2_1 FAIL 12.3s",
                "t2 seed=7  # run=t2_2 TIMEOUT 12.3s",
            ]
        );
    }

    #[test]
    fn test_no_pass_list_is_loadable() {
        let content = render_no_pass_list(&session(), "now");
        let entries = test_list::parse(&content);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "t2");
        assert_eq!(entries[0].seed, Some(6));
        assert_eq!(entries[0].extra_args.as_deref(), Some("+define+A +define+B"));
        assert_eq!(entries[1].seed, Some(7));
    }

    #[test]
    fn test_running_list_covers_both_lists() {
        let session = session();
        let running = render_running_list(&session, "now");
        let run_names: Vec<&str> = entries(&running)
            .iter()
            .filter_map(|l| l.split_whitespace().next())
            .collect();
        assert_eq!(run_names, ["t1", "t2_1", "t2_2"]);
        assert!(running.contains("t2_2 [TIMEOUT] seed=7"));
    }

    #[test]
    fn test_summary_groups_and_counts() {
        let summary = render_summary(&session(), "now");
        assert!(summary.contains("Total Tests:      3"));
        assert!(summary.contains("Passed:           1 (33.3%)"));
        assert!(summary.contains("TIMEOUT (1):"));
        assert!(summary.contains("FAIL/ERROR (1):"));
        assert!(summary.contains("PASS (1):"));
        assert!(summary.contains("Error: UVM_FATAL @ 10: boom"));
        assert!(summary.contains("UVM_ERROR: 0, UVM_FATAL: 1"));
        assert!(summary.contains("Average per Test: 12.3s"));
    }

    #[test]
    fn test_write_all_creates_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let session = session();
        let written = Reporter::new(dir.path()).write_all(&session).unwrap();
        assert_eq!(written.len(), 6);
        for name in [
            "pass_list",
            "no_pass_list",
            "running_list",
            "regression_summary.txt",
            "regression_results_20250709_144850.txt",
            "results.json",
        ] {
            assert!(dir.path().join(name).is_file(), "missing {name}");
        }

        let json = std::fs::read_to_string(dir.path().join("results.json")).unwrap();
        let parsed: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.results.len(), 3);
        assert_eq!(parsed.passed, 1);
    }
}
