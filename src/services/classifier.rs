//! Log-based outcome classification.
//!
//! The classifier is a pure function of a run's captured stdout and its log.
//! Rules are evaluated in a fixed order and the first rule that decides wins,
//! so a hang marker always beats a pass marker.

use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;

use crate::domain::models::{ClassifierConfig, JobStatus};

/// Verdict plus diagnostic counts extracted from the output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub status: JobStatus,
    pub message: Option<String>,
    pub error_count: u32,
    pub fatal_count: u32,
    /// Name of the rule that decided
    pub rule: &'static str,
}

impl Classification {
    fn new(status: JobStatus, rule: &'static str) -> Self {
        Self {
            status,
            message: None,
            error_count: 0,
            fatal_count: 0,
            rule,
        }
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    fn with_counts(mut self, counts: SummaryCounts) -> Self {
        self.error_count = counts.errors;
        self.fatal_count = counts.fatals;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct SummaryCounts {
    errors: u32,
    fatals: u32,
}

impl SummaryCounts {
    const fn any(self) -> bool {
        self.errors > 0 || self.fatals > 0
    }
}

/// A failure pattern and the continuations that disqualify a match.
#[derive(Debug)]
struct FailurePattern {
    pattern: Regex,
    rejected_suffixes: Vec<Regex>,
}

impl FailurePattern {
    fn matches_in(&self, text: &str) -> bool {
        self.pattern.find_iter(text).any(|m| {
            let rest = &text[m.end()..];
            !self.rejected_suffixes.iter().any(|r| r.is_match(rest))
        })
    }
}

#[derive(Debug)]
enum Rule {
    HangMarker(Vec<Regex>),
    Repetition,
    SuccessMarker(Vec<Regex>),
    SummaryCounters,
    FailureMarker(Vec<FailurePattern>),
    Fallback,
}

impl Rule {
    const fn name(&self) -> &'static str {
        match self {
            Self::HangMarker(_) => "hang_marker",
            Self::Repetition => "repetition",
            Self::SuccessMarker(_) => "success_marker",
            Self::SummaryCounters => "summary_counters",
            Self::FailureMarker(_) => "failure_marker",
            Self::Fallback => "fallback",
        }
    }
}

const HANG_PATTERNS: &[&str] = &[
    r"simulation time.*exceeded",
    r"infinite loop detected",
    r"simulation appears to be hung",
    r"excessive repetition detected",
    r"simulation stuck at time",
];

const SUCCESS_PATTERNS: &[&str] = &[
    r"TEST PASSED",
    r"TestCase PASSED",
    r"UVM_INFO.*PASSED",
    r"Simulation completed successfully",
    r"test completed successfully",
    r"Test execution completed",
];

/// Compiled rule table.
#[derive(Debug)]
pub struct Classifier {
    config: ClassifierConfig,
    rules: Vec<Rule>,
    summary_marker: Regex,
    error_count: Regex,
    fatal_count: Regex,
    completion: Vec<Regex>,
    timestamp: Regex,
}

impl Classifier {
    pub fn new(config: ClassifierConfig) -> Result<Self, regex::Error> {
        let insensitive = |p: &str| Regex::new(&format!("(?i){p}"));
        let compile_all = |patterns: &[&str]| -> Result<Vec<Regex>, regex::Error> {
            patterns.iter().map(|p| insensitive(*p)).collect()
        };

        let summary_suffix = Regex::new(r"^\s*:\s*\d+")?;
        let failures = vec![
            FailurePattern {
                pattern: insensitive("UVM_FATAL")?,
                rejected_suffixes: vec![summary_suffix.clone()],
            },
            FailurePattern {
                pattern: insensitive("UVM_ERROR")?,
                rejected_suffixes: vec![summary_suffix, Regex::new(r"^\s+@\s+0:")?],
            },
            FailurePattern {
                pattern: insensitive(r"Error-\[")?,
                rejected_suffixes: vec![],
            },
            FailurePattern {
                pattern: insensitive(r"\*E,")?,
                rejected_suffixes: vec![],
            },
            FailurePattern {
                pattern: insensitive("FAILED")?,
                rejected_suffixes: vec![],
            },
            FailurePattern {
                pattern: insensitive("simulation aborted")?,
                rejected_suffixes: vec![],
            },
            FailurePattern {
                pattern: insensitive("Segmentation fault")?,
                rejected_suffixes: vec![],
            },
            FailurePattern {
                pattern: insensitive("core dumped")?,
                rejected_suffixes: vec![],
            },
        ];

        let rules = vec![
            Rule::HangMarker(compile_all(HANG_PATTERNS)?),
            Rule::Repetition,
            Rule::SuccessMarker(compile_all(SUCCESS_PATTERNS)?),
            Rule::SummaryCounters,
            Rule::FailureMarker(failures),
            Rule::Fallback,
        ];

        Ok(Self {
            config,
            rules,
            summary_marker: Regex::new(r"UVM Report Summary|Report counts by severity")?,
            error_count: Regex::new(r"UVM_ERROR\s*:\s*(\d+)")?,
            fatal_count: Regex::new(r"UVM_FATAL\s*:\s*(\d+)")?,
            completion: vec![
                Regex::new(r"\$finish called")?,
                Regex::new(r"TEST_DONE.*run.*phase.*ready")?,
            ],
            timestamp: Regex::new(r"@\s*\d+:")?,
        })
    }

    pub const fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Classify a run from its stdout and, when one was produced, its log.
    pub fn classify(&self, stdout: &str, log: Option<&str>) -> Classification {
        let mut text = String::with_capacity(stdout.len() + 1 + log.map_or(0, str::len));
        text.push_str(stdout);
        text.push('\n');
        if let Some(log) = log {
            text.push_str(log);
        }

        let counts = self.summary_counts(&text);

        for rule in &self.rules {
            if let Some(verdict) = self.apply(rule, &text, log.is_some(), counts) {
                return verdict;
            }
        }

        // Fallback always decides; this is unreachable with the standard table.
        Classification::new(JobStatus::Fail, Rule::Fallback.name())
    }

    fn apply(
        &self,
        rule: &Rule,
        text: &str,
        has_log: bool,
        counts: Option<SummaryCounts>,
    ) -> Option<Classification> {
        let name = rule.name();
        match rule {
            Rule::HangMarker(patterns) => {
                let pattern = patterns.iter().find(|p| p.is_match(text))?;
                let line = first_line_matching(text, |l| pattern.is_match(l)).unwrap_or_default();
                Some(
                    Classification::new(JobStatus::Timeout, name)
                        .with_message(self.truncate(&format!("Simulation hung or stuck: {line}"))),
                )
            }
            Rule::Repetition => self.repeated_message(text).map(|(message, count)| {
                tracing::debug!(count, message = %message, "Repeated informational message");
                Classification::new(JobStatus::Timeout, name)
                    .with_message("Excessive repetition detected, simulation likely stuck")
            }),
            Rule::SuccessMarker(patterns) => patterns
                .iter()
                .any(|p| p.is_match(text))
                .then(|| Classification::new(JobStatus::Pass, name)),
            Rule::SummaryCounters => {
                let counts = counts?;
                if counts.any() {
                    Some(
                        Classification::new(JobStatus::Fail, name)
                            .with_message(format!(
                                "UVM_ERROR Count: {}, UVM_FATAL Count: {}",
                                counts.errors, counts.fatals
                            ))
                            .with_counts(counts),
                    )
                } else if self.completion.iter().any(|r| r.is_match(text)) {
                    Some(Classification::new(JobStatus::Pass, name))
                } else {
                    None
                }
            }
            Rule::FailureMarker(patterns) => {
                let pattern = patterns.iter().find(|p| p.matches_in(text))?;
                let line = first_line_matching(text, |l| pattern.matches_in(l))
                    .map(|l| self.truncate(l.trim()))
                    .unwrap_or_else(|| format!("Failed with pattern: {}", pattern.pattern));
                let counts = counts.unwrap_or_default();
                let message = if counts.any() {
                    format!(
                        "{line} (UVM_ERROR Count: {}, UVM_FATAL Count: {})",
                        counts.errors, counts.fatals
                    )
                } else {
                    line
                };
                Some(
                    Classification::new(JobStatus::Fail, name)
                        .with_message(message)
                        .with_counts(counts),
                )
            }
            Rule::Fallback => Some(if text.contains("CPU TIME") || text.contains("Total simulation time") {
                Classification::new(JobStatus::Pass, name)
            } else if !has_log {
                Classification::new(JobStatus::Error, name).with_message("No log produced")
            } else {
                Classification::new(JobStatus::Fail, name)
                    .with_message("Simulation did not complete cleanly")
            }),
        }
    }

    /// Summary counters, when a UVM report summary is present.
    fn summary_counts(&self, text: &str) -> Option<SummaryCounts> {
        if !self.summary_marker.is_match(text) {
            return None;
        }
        let capture = |re: &Regex| {
            re.captures(text)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0)
        };
        Some(SummaryCounts {
            errors: capture(&self.error_count),
            fatals: capture(&self.fatal_count),
        })
    }

    /// The most repeated informational message in the trailing window, when
    /// it exceeds the threshold.
    fn repeated_message(&self, text: &str) -> Option<(String, usize)> {
        let lines: Vec<&str> = text.split('\n').collect();
        if lines.len() < self.config.repetition_min_lines {
            return None;
        }

        let window_start = lines.len().saturating_sub(self.config.repetition_window);
        let mut counts: HashMap<String, usize> = HashMap::new();
        for line in lines[window_start..].iter().filter(|l| l.contains("UVM_INFO")) {
            let normalized = self.timestamp.replace_all(line, "@TIME:").into_owned();
            *counts.entry(normalized).or_insert(0) += 1;
        }

        counts
            .into_iter()
            .filter(|(_, count)| *count > self.config.repetition_threshold)
            .max_by_key(|(_, count)| *count)
    }

    fn truncate(&self, message: &str) -> String {
        message.chars().take(self.config.max_message_len).collect()
    }
}

fn first_line_matching(text: &str, pred: impl Fn(&str) -> bool) -> Option<&str> {
    text.lines().find(|l| pred(l))
}
