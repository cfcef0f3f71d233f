//! Simulator command construction shared by both execution backends.

use rand::Rng;
use std::path::{Path, PathBuf};

use crate::domain::models::{ExecutionConfig, ExecutionSlot, SimulatorConfig, TestSpec, MAX_SEED};

/// A fully expanded simulator command for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatorInvocation {
    pub program: String,
    pub args: Vec<String>,
    /// Where the simulator is expected to write its log (inside the slot)
    pub log_path: PathBuf,
    pub seed: u32,
}

impl SimulatorInvocation {
    /// Build the invocation of `spec` in `slot`, drawing a seed if needed.
    pub fn new(
        simulator: &SimulatorConfig,
        execution: &ExecutionConfig,
        spec: &TestSpec,
        slot: &ExecutionSlot,
    ) -> Self {
        Self::with_seed(simulator, execution, spec, slot, resolve_seed(spec))
    }

    pub fn with_seed(
        simulator: &SimulatorConfig,
        execution: &ExecutionConfig,
        spec: &TestSpec,
        slot: &ExecutionSlot,
        seed: u32,
    ) -> Self {
        let seed_str = seed.to_string();
        let slot_str = slot.path().display().to_string();
        let extra = spec.extra_args.as_deref().unwrap_or("");

        let log_name = expand_template(
            &simulator.log_file,
            &[
                ("test", spec.base_name.as_str()),
                ("name", spec.name.as_str()),
                ("seed", seed_str.as_str()),
                ("slot", slot_str.as_str()),
            ],
        );
        let log_path = slot.path().join(&log_name);
        let log_str = log_path.display().to_string();

        let vars = [
            ("test", spec.base_name.as_str()),
            ("name", spec.name.as_str()),
            ("seed", seed_str.as_str()),
            ("log", log_str.as_str()),
            ("slot", slot_str.as_str()),
            ("extra_args", extra),
        ];

        let mut args: Vec<String> = simulator
            .args
            .iter()
            .map(|a| expand_template(a, &vars))
            .collect();
        if spec.extra_args.is_some() {
            args.push(expand_template(&simulator.extra_args_template, &vars));
        }
        if execution.waveform {
            args.extend(simulator.waveform_args.iter().map(|a| expand_template(a, &vars)));
        }
        if execution.coverage {
            args.extend(simulator.coverage_args.iter().map(|a| expand_template(a, &vars)));
        }

        Self {
            program: simulator.program.clone(),
            args,
            log_path,
            seed,
        }
    }

    /// The invocation as a single shell command line.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn log_file_name(&self) -> Option<&str> {
        self.log_path.file_name().and_then(|n| n.to_str())
    }

    pub fn log_in(&self, dir: &Path) -> Option<PathBuf> {
        self.log_file_name().map(|n| dir.join(n))
    }
}

/// The spec's fixed seed, or a random one in `1..=MAX_SEED`.
pub fn resolve_seed(spec: &TestSpec) -> u32 {
    spec.seed
        .unwrap_or_else(|| rand::thread_rng().gen_range(1..=MAX_SEED))
}

/// Replace every `{key}` occurrence. Unknown placeholders are left as is.
pub fn expand_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        let placeholder = format!("{{{key}}}");
        if out.contains(&placeholder) {
            out = out.replace(&placeholder, value);
        }
    }
    out
}

/// Quote a word for `sh` when it contains anything beyond a safe set.
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-+=/.,:@%".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::SlotId;

    fn slot() -> ExecutionSlot {
        ExecutionSlot::new(SlotId(2), Path::new("/work"))
    }

    #[test]
    fn test_default_make_invocation() {
        let spec = TestSpec::single("axi4_basic_test_1", 0).with_seed(7);
        let spec = TestSpec {
            base_name: "axi4_basic_test".into(),
            ..spec
        };
        let inv = SimulatorInvocation::new(
            &SimulatorConfig::default(),
            &ExecutionConfig::default(),
            &spec,
            &slot(),
        );
        assert_eq!(inv.program, "make");
        assert_eq!(
            inv.args,
            ["-f", "Makefile", "sim", "test=axi4_basic_test", "seed=7"]
        );
        assert_eq!(
            inv.log_path,
            PathBuf::from("/work/run_folder_02/axi4_basic_test.log")
        );
    }

    #[test]
    fn test_feature_flags_and_extra_args() {
        let spec = TestSpec::single("t1", 0).with_extra_args("+define+A +define+B");
        let execution = ExecutionConfig {
            waveform: true,
            coverage: true,
            ..ExecutionConfig::default()
        };
        let inv = SimulatorInvocation::with_seed(
            &SimulatorConfig::default(),
            &execution,
            &spec,
            &slot(),
            99,
        );
        assert_eq!(
            &inv.args[5..],
            ["command_add=+define+A +define+B", "FSDB_DUMP=1", "COVERAGE=1"]
        );
        assert!(inv
            .command_line()
            .contains("'command_add=+define+A +define+B'"));
    }

    #[test]
    fn test_all_placeholders() {
        let simulator = SimulatorConfig {
            program: "sim".into(),
            args: vec!["{name}".into(), "{slot}".into(), "{log}".into()],
            log_file: "logs/{name}_{seed}.log".into(),
            ..SimulatorConfig::default()
        };
        let spec = TestSpec::single("t1", 0);
        let inv = SimulatorInvocation::with_seed(
            &simulator,
            &ExecutionConfig::default(),
            &spec,
            &slot(),
            5,
        );
        assert_eq!(
            inv.args,
            [
                "t1",
                "/work/run_folder_02",
                "/work/run_folder_02/logs/t1_5.log"
            ]
        );
        assert_eq!(inv.log_file_name(), Some("t1_5.log"));
    }

    #[test]
    fn test_random_seed_in_range() {
        let spec = TestSpec::single("t1", 0);
        for _ in 0..100 {
            let seed = resolve_seed(&spec);
            assert!((1..=MAX_SEED).contains(&seed));
        }
        assert_eq!(resolve_seed(&spec.with_seed(0)), 0);
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("seed=5"), "seed=5");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }
}
