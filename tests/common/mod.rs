//! Common test utilities for integration tests
//!
//! Provides a scripted stand-in for the simulator and a configuration that
//! keeps every session artifact inside a temporary directory.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use simreg::domain::models::Config;

/// Create a temporary directory for test isolation
pub fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Setup test logging
///
/// Call this at the beginning of tests that need logging.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Write an executable shell script.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).expect("Failed to write script");
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

/// Fake simulator. Called as `sim.sh <test> <name> <seed>` from inside a
/// slot; writes `<test>.log` and decides the outcome from the run name.
///
/// * `t2_1` and `*fatal*` log a `UVM_FATAL`
/// * `t2_2` and `*hang*` log a start line and sleeps past any test timeout
/// * `*silent*` exits without writing a log
/// * anything else passes after a short sleep
pub const FAKE_SIMULATOR: &str = r#"test="$1"
name="$2"
seed="$3"
echo "running $name seed=$seed"
case "$name" in
  t2_1|*fatal*)
    echo "UVM_FATAL @ 100: [CFG] boom" > "$test.log"
    ;;
  t2_2|*hang*)
    echo "UVM_INFO @ 0: [TEST] started" > "$test.log"
    sleep 30
    ;;
  *silent*)
    ;;
  *)
    sleep 0.2
    echo "UVM_INFO @ 500: [TEST] TEST PASSED" > "$test.log"
    ;;
esac
"#;

/// Configuration running [`FAKE_SIMULATOR`] locally, with results and slots
/// under `root`.
pub fn local_config(root: &Path) -> Config {
    let script = write_script(root, "sim.sh", FAKE_SIMULATOR);

    let mut config = Config::default();
    config.simulator.program = "sh".into();
    config.simulator.args = vec![
        script.display().to_string(),
        "{test}".into(),
        "{name}".into(),
        "{seed}".into(),
    ];
    config.simulator.setup_files = Vec::new();
    config.execution.parallelism = 2;
    config.execution.timeout_secs = 2;
    config.execution.startup_window_secs = 1;
    config.execution.settle_delay_ms = 0;
    config.execution.log_wait_ms = 300;
    config.output.results_root = root.join("results").display().to_string();
    config.output.slot_root = root.join("slots").display().to_string();
    config.output.compress_logs = false;
    config
}

/// Non-comment lines of a report file.
pub fn report_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("cannot read {}: {e}", path.display()))
        .lines()
        .filter(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#'))
        .map(str::to_string)
        .collect()
}
