use serde::{Deserialize, Serialize};

/// Main configuration structure for simreg
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Worker pool, budgets and feature switches
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// How the simulator is invoked
    #[serde(default)]
    pub simulator: SimulatorConfig,

    /// Outcome classifier tuning
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Batch scheduler settings
    #[serde(default)]
    pub batch: BatchConfig,

    /// Coverage collection and merge
    #[serde(default)]
    pub coverage: CoverageConfig,

    /// Where session artifacts go
    #[serde(default)]
    pub output: OutputConfig,

    /// Retry policy for batch submission
    #[serde(default)]
    pub retry: RetryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExecutionConfig {
    /// Number of concurrent local workers (1-256)
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Per-job wall-clock budget in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Upper bound on how long one local start holds the startup lock
    #[serde(default = "default_startup_window_secs")]
    pub startup_window_secs: u64,

    /// Pause after resetting a previously used slot
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// How long to wait for a log to appear after the process exits
    #[serde(default = "default_log_wait_ms")]
    pub log_wait_ms: u64,

    /// Submit to the batch scheduler instead of running locally
    #[serde(default)]
    pub batch: bool,

    /// Enable waveform dumping
    #[serde(default)]
    pub waveform: bool,

    /// Enable coverage collection and merge
    #[serde(default)]
    pub coverage: bool,
}

const fn default_parallelism() -> usize {
    4
}

const fn default_timeout_secs() -> u64 {
    600
}

const fn default_startup_window_secs() -> u64 {
    30
}

const fn default_settle_delay_ms() -> u64 {
    2000
}

const fn default_log_wait_ms() -> u64 {
    2000
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            timeout_secs: default_timeout_secs(),
            startup_window_secs: default_startup_window_secs(),
            settle_delay_ms: default_settle_delay_ms(),
            log_wait_ms: default_log_wait_ms(),
            batch: false,
            waveform: false,
            coverage: false,
        }
    }
}

/// Simulator invocation configuration
///
/// Argument templates may use `{test}`, `{name}`, `{seed}`, `{log}`, `{slot}`
/// and `{extra_args}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SimulatorConfig {
    /// Program to execute (looked up on PATH)
    #[serde(default = "default_program")]
    pub program: String,

    /// Argument templates
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Appended only when the run carries extra arguments
    #[serde(default = "default_extra_args_template")]
    pub extra_args_template: String,

    /// Appended when waveform dumping is on
    #[serde(default = "default_waveform_args")]
    pub waveform_args: Vec<String>,

    /// Appended when coverage is on
    #[serde(default = "default_coverage_args")]
    pub coverage_args: Vec<String>,

    /// Log file template, relative to the slot directory
    #[serde(default = "default_log_file")]
    pub log_file: String,

    /// Secondary directory the simulator may write its log to
    #[serde(default)]
    pub alternate_log_dir: Option<String>,

    /// Files copied into every slot before a job starts
    #[serde(default = "default_setup_files")]
    pub setup_files: Vec<String>,

    /// Glob patterns of simulator artifacts wiped on slot reuse
    #[serde(default = "default_artifact_patterns")]
    pub artifact_patterns: Vec<String>,
}

fn default_program() -> String {
    "make".to_string()
}

fn default_args() -> Vec<String> {
    ["-f", "Makefile", "sim", "test={test}", "seed={seed}"]
        .iter()
        .map(ToString::to_string)
        .collect()
}

fn default_extra_args_template() -> String {
    "command_add={extra_args}".to_string()
}

fn default_waveform_args() -> Vec<String> {
    vec!["FSDB_DUMP=1".to_string()]
}

fn default_coverage_args() -> Vec<String> {
    vec!["COVERAGE=1".to_string()]
}

fn default_log_file() -> String {
    "{test}.log".to_string()
}

fn default_setup_files() -> Vec<String> {
    vec!["Makefile".to_string()]
}

fn default_artifact_patterns() -> Vec<String> {
    [
        "simv*", "*.daidir", "csrc*", "*.vdb*", "work*", "DVEfiles", "ucli.key", "*.fsdb",
        "*.vpd", "novas*", "verdiLog",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            extra_args_template: default_extra_args_template(),
            waveform_args: default_waveform_args(),
            coverage_args: default_coverage_args(),
            log_file: default_log_file(),
            alternate_log_dir: None,
            setup_files: default_setup_files(),
            artifact_patterns: default_artifact_patterns(),
        }
    }
}

/// Outcome classifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ClassifierConfig {
    /// A message repeated more often than this in the window means a hang
    #[serde(default = "default_repetition_threshold")]
    pub repetition_threshold: usize,

    /// Number of trailing informational lines inspected
    #[serde(default = "default_repetition_window")]
    pub repetition_window: usize,

    /// Repetition is only checked on outputs at least this long
    #[serde(default = "default_repetition_min_lines")]
    pub repetition_min_lines: usize,

    /// Longest failure message kept on a result
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,
}

const fn default_repetition_threshold() -> usize {
    20
}

const fn default_repetition_window() -> usize {
    100
}

const fn default_repetition_min_lines() -> usize {
    1000
}

const fn default_max_message_len() -> usize {
    200
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            repetition_threshold: default_repetition_threshold(),
            repetition_window: default_repetition_window(),
            repetition_min_lines: default_repetition_min_lines(),
            max_message_len: default_max_message_len(),
        }
    }
}

/// Batch scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BatchConfig {
    #[serde(default = "default_submit_program")]
    pub submit_program: String,

    #[serde(default = "default_query_program")]
    pub query_program: String,

    #[serde(default = "default_kill_program")]
    pub kill_program: String,

    /// Queue jobs are submitted to
    #[serde(default = "default_queue")]
    pub queue: String,

    #[serde(default = "default_cores")]
    pub cores: u32,

    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,

    /// Interval between status queries
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Minimum gap between two submissions
    #[serde(default = "default_submit_spacing_ms")]
    pub submit_spacing_ms: u64,

    /// Consecutive failed queries before outstanding jobs are resolved from disk
    #[serde(default = "default_max_query_failures")]
    pub max_query_failures: u32,
}

fn default_submit_program() -> String {
    "bsub".to_string()
}

fn default_query_program() -> String {
    "bjobs".to_string()
}

fn default_kill_program() -> String {
    "bkill".to_string()
}

fn default_queue() -> String {
    "normal".to_string()
}

const fn default_cores() -> u32 {
    1
}

const fn default_memory_mb() -> u64 {
    4000
}

const fn default_poll_interval_secs() -> u64 {
    5
}

const fn default_submit_spacing_ms() -> u64 {
    200
}

const fn default_max_query_failures() -> u32 {
    5
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            submit_program: default_submit_program(),
            query_program: default_query_program(),
            kill_program: default_kill_program(),
            queue: default_queue(),
            cores: default_cores(),
            memory_mb: default_memory_mb(),
            poll_interval_secs: default_poll_interval_secs(),
            submit_spacing_ms: default_submit_spacing_ms(),
            max_query_failures: default_max_query_failures(),
        }
    }
}

/// Coverage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CoverageConfig {
    /// Merge tool
    #[serde(default = "default_merge_program")]
    pub merge_program: String,

    /// Per-job coverage database, relative to the slot
    #[serde(default = "default_coverage_artifact")]
    pub artifact: String,

    /// Additional coverage files copied alongside the database
    #[serde(default = "default_extra_patterns")]
    pub extra_patterns: Vec<String>,

    #[serde(default = "default_merge_timeout_secs")]
    pub merge_timeout_secs: u64,
}

fn default_merge_program() -> String {
    "urg".to_string()
}

fn default_coverage_artifact() -> String {
    "{test}.vdb".to_string()
}

fn default_extra_patterns() -> Vec<String> {
    vec!["*.cm".to_string(), "*.ucm".to_string(), "*.ccf".to_string()]
}

const fn default_merge_timeout_secs() -> u64 {
    600
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            merge_program: default_merge_program(),
            artifact: default_coverage_artifact(),
            extra_patterns: default_extra_patterns(),
            merge_timeout_secs: default_merge_timeout_secs(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OutputConfig {
    /// Parent of `regression_result_<id>/`
    #[serde(default = "default_dot")]
    pub results_root: String,

    /// Parent of the `run_folder_NN` slot directories
    #[serde(default = "default_dot")]
    pub slot_root: String,

    /// Gzip archived logs
    #[serde(default = "default_compress_logs")]
    pub compress_logs: bool,

    /// Keep slot directories even after a fully passing session
    #[serde(default)]
    pub keep_slots: bool,
}

fn default_dot() -> String {
    ".".to_string()
}

const fn default_compress_logs() -> bool {
    true
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            results_root: default_dot(),
            slot_root: default_dot(),
            compress_logs: default_compress_logs(),
            keep_slots: false,
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff duration in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    500
}

const fn default_max_backoff_ms() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: pretty, json or compact
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for an additional JSON log file
    #[serde(default)]
    pub log_dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
        }
    }
}
