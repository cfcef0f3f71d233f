use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration validation errors
#[derive(Error, Debug)]
pub enum ConfigValidationError {
    #[error("Invalid parallelism: {0}. Must be between 1 and 256")]
    InvalidParallelism(usize),

    #[error("Invalid timeout_secs: {0}. Must be at least 1")]
    InvalidTimeout(u64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: pretty, json, compact")]
    InvalidLogFormat(String),

    #[error("{0} program cannot be empty")]
    EmptyProgram(&'static str),

    #[error("Simulator log_file template cannot be empty")]
    EmptyLogFile,

    #[error("Invalid classifier setting {0}: must be at least 1")]
    InvalidClassifier(&'static str),

    #[error("Invalid batch setting {0}: must be at least 1")]
    InvalidBatch(&'static str),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must not exceed max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .simreg/config.yaml (project config)
    /// 3. .simreg/local.yaml (local overrides, optional)
    /// 4. Environment variables (SIMREG_* prefix, `__` separates sections)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".simreg/config.yaml"))
            .merge(Yaml::file(".simreg/local.yaml"))
            .merge(Env::prefixed("SIMREG_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, still honouring the environment
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.is_file() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed("SIMREG_").split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigValidationError> {
        let execution = &config.execution;
        if execution.parallelism == 0 || execution.parallelism > 256 {
            return Err(ConfigValidationError::InvalidParallelism(
                execution.parallelism,
            ));
        }
        if execution.timeout_secs == 0 {
            return Err(ConfigValidationError::InvalidTimeout(execution.timeout_secs));
        }

        if config.simulator.program.trim().is_empty() {
            return Err(ConfigValidationError::EmptyProgram("Simulator"));
        }
        if config.simulator.log_file.trim().is_empty() {
            return Err(ConfigValidationError::EmptyLogFile);
        }

        let classifier = &config.classifier;
        if classifier.repetition_threshold == 0 {
            return Err(ConfigValidationError::InvalidClassifier("repetition_threshold"));
        }
        if classifier.repetition_window == 0 {
            return Err(ConfigValidationError::InvalidClassifier("repetition_window"));
        }
        if classifier.max_message_len == 0 {
            return Err(ConfigValidationError::InvalidClassifier("max_message_len"));
        }

        let batch = &config.batch;
        for (label, program) in [
            ("Submit", &batch.submit_program),
            ("Query", &batch.query_program),
            ("Kill", &batch.kill_program),
        ] {
            if program.trim().is_empty() {
                return Err(ConfigValidationError::EmptyProgram(label));
            }
        }
        if batch.cores == 0 {
            return Err(ConfigValidationError::InvalidBatch("cores"));
        }
        if batch.poll_interval_secs == 0 {
            return Err(ConfigValidationError::InvalidBatch("poll_interval_secs"));
        }
        if batch.max_query_failures == 0 {
            return Err(ConfigValidationError::InvalidBatch("max_query_failures"));
        }

        if config.coverage.merge_program.trim().is_empty() {
            return Err(ConfigValidationError::EmptyProgram("Coverage merge"));
        }

        if config.retry.initial_backoff_ms > config.retry.max_backoff_ms {
            return Err(ConfigValidationError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigValidationError::InvalidLogLevel(
                config.logging.level.clone(),
            ));
        }

        let valid_log_formats = ["pretty", "json", "compact"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigValidationError::InvalidLogFormat(
                config.logging.format.clone(),
            ));
        }

        Ok(())
    }
}
