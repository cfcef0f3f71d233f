//! Table output formatting for CLI commands
//!
//! Tables for run results and expanded test lists using comfy-table.

use crate::domain::models::{JobResult, JobStatus, TestSpec};
use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use std::env;

use super::truncate;

/// Table formatter for CLI output
pub struct TableFormatter {
    use_colors: bool,
    /// Maximum width for tables (None = auto)
    max_width: Option<u16>,
}

impl TableFormatter {
    pub fn new() -> Self {
        Self {
            use_colors: supports_color(),
            max_width: None,
        }
    }

    pub const fn with_config(use_colors: bool, max_width: Option<u16>) -> Self {
        Self {
            use_colors,
            max_width,
        }
    }

    /// One row per run: status, name, duration, slot, seed, message.
    pub fn format_results<'a>(&self, results: impl IntoIterator<Item = &'a JobResult>) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["Status", "Run", "Time", "Slot", "Seed", "Message"]));

        for result in results {
            let status_cell = if self.use_colors {
                Cell::new(result.status.as_str()).fg(status_color(result.status))
            } else {
                Cell::new(result.status.as_str())
            };
            table.add_row(vec![
                status_cell,
                Cell::new(&result.name),
                Cell::new(format!("{:.1}s", result.duration.as_secs_f64())),
                Cell::new(result.slot_id.map_or_else(|| "-".to_string(), |s| s.to_string())),
                Cell::new(result.seed_used.map_or_else(|| "-".to_string(), |s| s.to_string())),
                Cell::new(truncate(result.error_message.as_deref().unwrap_or(""), 60)),
            ]);
        }
        table.to_string()
    }

    /// One row per expanded run.
    pub fn format_specs(&self, specs: &[TestSpec]) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["#", "Run", "Test", "Seed", "Extra args", "Group"]));

        for spec in specs {
            table.add_row(vec![
                Cell::new(spec.sequence + 1),
                Cell::new(&spec.name),
                Cell::new(&spec.base_name),
                Cell::new(spec.seed.map_or_else(|| "random".to_string(), |s| s.to_string())),
                Cell::new(truncate(spec.extra_args.as_deref().unwrap_or("-"), 40)),
                Cell::new(spec.group_id.map_or_else(|| "-".to_string(), |g| g.to_string())),
            ]);
        }
        table.to_string()
    }

    fn create_base_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(presets::NOTHING)
            .set_content_arrangement(ContentArrangement::Dynamic);
        if let Some(width) = self.max_width {
            table.set_width(width);
        }
        table
    }
}

impl Default for TableFormatter {
    fn default() -> Self {
        Self::new()
    }
}

fn header(names: &[&str]) -> Vec<Cell> {
    names
        .iter()
        .map(|n| Cell::new(n).add_attribute(Attribute::Bold))
        .collect()
}

/// Check if color output is supported
fn supports_color() -> bool {
    if env::var("NO_COLOR").is_ok() {
        return false;
    }
    if let Ok(term) = env::var("TERM") {
        if term == "dumb" {
            return false;
        }
    }
    console::Term::stdout().is_term()
}

const fn status_color(status: JobStatus) -> Color {
    match status {
        JobStatus::Pass => Color::Green,
        JobStatus::Fail => Color::Red,
        JobStatus::Timeout => Color::Yellow,
        JobStatus::Error => Color::Magenta,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::SlotId;

    #[test]
    fn test_format_results() {
        let mut result = JobResult::new(&TestSpec::single("axi4_wstrb_test_2", 0), JobStatus::Fail);
        result.slot_id = Some(SlotId(3));
        result.seed_used = Some(1234);
        result.error_message = Some("UVM_FATAL @ 100: boom".to_string());

        let formatter = TableFormatter::with_config(false, None);
        let output = formatter.format_results([&result]);
        assert!(output.contains("Status"));
        assert!(output.contains("FAIL"));
        assert!(output.contains("axi4_wstrb_test_2"));
        assert!(output.contains("03"));
        assert!(output.contains("1234"));
        assert!(output.contains("UVM_FATAL @ 100: boom"));
    }

    #[test]
    fn test_format_specs() {
        let specs = vec![
            TestSpec::single("t1", 0).with_seed(7),
            TestSpec::single("t2", 1).with_extra_args("+define+X"),
        ];
        let output = TableFormatter::with_config(false, None).format_specs(&specs);
        assert!(output.contains("t1"));
        assert!(output.contains("random"));
        assert!(output.contains("+define+X"));
    }

    #[test]
    fn test_status_color_mapping() {
        assert_eq!(status_color(JobStatus::Pass), Color::Green);
        assert_eq!(status_color(JobStatus::Fail), Color::Red);
        assert_eq!(status_color(JobStatus::Timeout), Color::Yellow);
    }
}
