//! Test list loading and expansion.
//!
//! A test list is line oriented: `name [key=value ...]`, with `run_cnt`,
//! `seed` and `command_add` as recognised keys. Malformed values never abort
//! loading; they are logged and the key falls back to its default.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::domain::errors::{RegressionError, RegressionResult};
use crate::domain::models::{GroupId, TestSpec, MAX_SEED};

/// One parsed line of a test list, before expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestListEntry {
    pub line_no: usize,
    pub name: String,
    pub run_cnt: Option<u32>,
    pub seed: Option<u32>,
    pub extra_args: Option<String>,
}

/// Read, parse and expand the list at `path`.
///
/// Fails only when the file cannot be read or yields no usable entry.
pub fn load(path: &Path) -> RegressionResult<Vec<TestSpec>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        RegressionError::ConfigError(format!(
            "Cannot read test list {}: {e}",
            path.display()
        ))
    })?;

    let specs = expand(&parse(&content));
    if specs.is_empty() {
        return Err(RegressionError::ConfigError(format!(
            "Test list {} contains no runnable tests",
            path.display()
        )));
    }

    tracing::info!(
        path = %path.display(),
        runs = specs.len(),
        "Loaded test list"
    );
    Ok(specs)
}

/// Parse every line of `content`, skipping blanks and comments.
pub fn parse(content: &str) -> Vec<TestListEntry> {
    content
        .lines()
        .enumerate()
        .filter_map(|(idx, line)| parse_line(line, idx + 1))
        .collect()
}

/// Parse one line. Returns `None` for blank, comment-only and unusable lines.
pub fn parse_line(line: &str, line_no: usize) -> Option<TestListEntry> {
    let tokens = tokenize(line, line_no);
    let (name, params) = tokens.split_first()?;

    if name.is_empty() {
        tracing::warn!(line = line_no, "Empty test name, skipping");
        return None;
    }
    if name.contains('=') {
        tracing::warn!(line = line_no, token = %name, "Line starts with a parameter, skipping");
        return None;
    }

    let mut entry = TestListEntry {
        line_no,
        name: name.clone(),
        run_cnt: None,
        seed: None,
        extra_args: None,
    };

    for token in params {
        let Some((key, value)) = token.split_once('=') else {
            tracing::warn!(line = line_no, token = %token, "Ignoring token without '='");
            continue;
        };
        match key {
            "run_cnt" => match value.parse::<u32>() {
                Ok(n) if n >= 1 => entry.run_cnt = Some(n),
                _ => tracing::warn!(
                    line = line_no,
                    value = %value,
                    "run_cnt must be a positive integer, using 1"
                ),
            },
            "seed" => match value.parse::<u32>() {
                Ok(s) if s <= MAX_SEED => entry.seed = Some(s),
                _ => tracing::warn!(
                    line = line_no,
                    value = %value,
                    "seed must be in 0..={MAX_SEED}, a random seed will be used"
                ),
            },
            "command_add" => {
                if value.is_empty() {
                    tracing::warn!(line = line_no, "Empty command_add ignored");
                } else {
                    entry.extra_args = Some(value.to_string());
                }
            }
            other => {
                tracing::warn!(line = line_no, key = %other, "Unknown parameter ignored");
            }
        }
    }

    Some(entry)
}

/// Split a line into whitespace separated tokens.
///
/// Double quotes group whitespace and are removed; a token starting with `#`
/// ends the line.
fn tokenize(line: &str, line_no: usize) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut in_quotes = false;

    for c in line.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                in_token = true;
            }
            '#' if !in_token && !in_quotes => break,
            c if c.is_whitespace() && !in_quotes => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if in_quotes {
        tracing::warn!(line = line_no, "Unterminated quote, using the rest of the line");
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

/// Expand parsed entries into concrete, uniquely named runs.
///
/// `run_cnt=N` yields `name_1..name_N` sharing a group. A name repeated on a
/// later line gets a `_cfgK` suffix so every run stays addressable.
pub fn expand(entries: &[TestListEntry]) -> Vec<TestSpec> {
    let mut specs = Vec::new();
    let mut used: HashSet<String> = HashSet::new();
    let mut occurrences: HashMap<&str, u32> = HashMap::new();
    let mut seen_configs: HashSet<(&str, Option<u32>, Option<&str>)> = HashSet::new();
    let mut next_group = 0u32;

    for entry in entries {
        let occurrence = occurrences.entry(entry.name.as_str()).or_insert(0);
        *occurrence += 1;

        if !seen_configs.insert((
            entry.name.as_str(),
            entry.seed,
            entry.extra_args.as_deref(),
        )) {
            tracing::warn!(
                line = entry.line_no,
                test = %entry.name,
                "Duplicate test configuration, it will run again"
            );
        }

        let stem = if *occurrence > 1 {
            format!("{}_cfg{}", entry.name, occurrence)
        } else {
            entry.name.clone()
        };

        let base = TestSpec {
            name: String::new(),
            base_name: entry.name.clone(),
            run_index: 1,
            seed: entry.seed,
            extra_args: entry.extra_args.clone(),
            group_id: None,
            sequence: 0,
        };

        match entry.run_cnt {
            Some(count) => {
                let group = GroupId(next_group);
                next_group += 1;
                for index in 1..=count {
                    let mut spec = base.clone();
                    spec.name = unique_name(format!("{stem}_{index}"), &mut used);
                    spec.run_index = index;
                    spec.group_id = Some(group);
                    spec.sequence = specs.len();
                    specs.push(spec);
                }
            }
            None => {
                let mut spec = base;
                spec.name = unique_name(stem, &mut used);
                spec.sequence = specs.len();
                specs.push(spec);
            }
        }
    }

    specs
}

fn unique_name(candidate: String, used: &mut HashSet<String>) -> String {
    let mut name = candidate.clone();
    let mut n = 2;
    while used.contains(&name) {
        name = format!("{candidate}_cfg{n}");
        n += 1;
    }
    used.insert(name.clone());
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_all_keys() {
        let entry =
            parse_line("axi4_wstrb_test run_cnt=3 seed=42 command_add=+define+X", 1).unwrap();
        assert_eq!(entry.name, "axi4_wstrb_test");
        assert_eq!(entry.run_cnt, Some(3));
        assert_eq!(entry.seed, Some(42));
        assert_eq!(entry.extra_args.as_deref(), Some("+define+X"));
    }

    #[test]
    fn test_comments_and_blank_lines() {
        let entries = parse("# header\n\n   \nt1 # trailing comment seed=5\n  # indented\nt2\n");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "t1");
        assert_eq!(entries[0].seed, None);
        assert_eq!(entries[0].line_no, 4);
        assert_eq!(entries[1].name, "t2");
    }

    #[test]
    fn test_quoted_command_add() {
        let entry = parse_line(r#"t1 command_add="+define+A +define+B" seed=1"#, 1).unwrap();
        assert_eq!(entry.extra_args.as_deref(), Some("+define+A +define+B"));
        assert_eq!(entry.seed, Some(1));
    }

    #[test]
    fn test_empty_quoted_name_is_skipped() {
        assert!(parse_line(r#""" seed=1"#, 1).is_none());
    }

    #[test]
    fn test_malformed_values_fall_back() {
        let entry = parse_line("t1 run_cnt=0 seed=abc command_add= bogus=1 stray", 1).unwrap();
        assert_eq!(entry.run_cnt, None);
        assert_eq!(entry.seed, None);
        assert_eq!(entry.extra_args, None);

        let entry = parse_line("t1 seed=-1 run_cnt=x", 1).unwrap();
        assert_eq!(entry.seed, None);
        assert_eq!(entry.run_cnt, None);
    }

    #[test]
    fn test_seed_bounds() {
        assert_eq!(parse_line("t seed=0", 1).unwrap().seed, Some(0));
        assert_eq!(
            parse_line("t seed=2147483647", 1).unwrap().seed,
            Some(MAX_SEED)
        );
        assert_eq!(parse_line("t seed=2147483648", 1).unwrap().seed, None);
    }

    #[test]
    fn test_line_starting_with_parameter_is_skipped() {
        assert!(parse_line("seed=1 t1", 1).is_none());
    }

    #[test]
    fn test_run_cnt_expansion() {
        let specs = expand(&parse("t1\nt2 run_cnt=2 seed=9\n"));
        let names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["t1", "t2_1", "t2_2"]);

        assert_eq!(specs[0].group_id, None);
        assert_eq!(specs[1].group_id, specs[2].group_id);
        assert!(specs[1].group_id.is_some());
        assert_eq!(specs[2].run_index, 2);
        assert_eq!(specs[2].base_name, "t2");
        assert_eq!(specs[2].seed, Some(9));
        assert_eq!(specs[2].sequence, 2);
    }

    #[test]
    fn test_explicit_single_run_cnt_is_suffixed() {
        let specs = expand(&parse("t1 run_cnt=1\n"));
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "t1_1");
        assert!(specs[0].is_repeated());
    }

    #[test]
    fn test_duplicate_lines_get_config_suffix() {
        let specs = expand(&parse("t1 seed=1\nt1 seed=2\nt1 seed=2 run_cnt=2\n"));
        let names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["t1", "t1_cfg2", "t1_cfg3_1", "t1_cfg3_2"]);
        assert!(specs.iter().all(|s| s.base_name == "t1"));
    }

    #[test]
    fn test_generated_names_never_collide() {
        let specs = expand(&parse("t_1\nt run_cnt=2\n"));
        let names: HashSet<_> = specs.iter().map(|s| s.name.clone()).collect();
        assert_eq!(names.len(), specs.len());
        assert_eq!(specs[1].name, "t_1_cfg2");
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let err = load(Path::new("/nonexistent/simreg/list")).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_load_comment_only_file_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# nothing here\n\n# still nothing").unwrap();
        let err = load(file.path()).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("no runnable tests"));
    }

    #[test]
    fn test_load_expands_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "t1\nt2 run_cnt=2").unwrap();
        let specs = load(file.path()).unwrap();
        assert_eq!(specs.len(), 3);
    }
}
