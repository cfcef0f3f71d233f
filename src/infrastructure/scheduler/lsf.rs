//! LSF adapter for the batch scheduler port.

use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::process::{Output, Stdio};
use std::sync::OnceLock;
use tokio::process::Command;

use crate::domain::models::BatchConfig;
use crate::domain::ports::{BatchScheduler, JobId, RemoteState, SchedulerError, ScriptRequest};

/// Drives LSF through `bsub`, `bjobs` and `bkill`.
#[derive(Debug, Clone)]
pub struct LsfScheduler {
    submit_program: String,
    query_program: String,
    kill_program: String,
}

impl LsfScheduler {
    pub fn new(config: &BatchConfig) -> Self {
        Self {
            submit_program: config.submit_program.clone(),
            query_program: config.query_program.clone(),
            kill_program: config.kill_program.clone(),
        }
    }

    async fn run(program: &str, args: &[String]) -> Result<Output, SchedulerError> {
        Self::run_with_stdin(program, args, Stdio::null()).await
    }

    async fn run_with_stdin(
        program: &str,
        args: &[String],
        stdin: Stdio,
    ) -> Result<Output, SchedulerError> {
        Command::new(program)
            .args(args)
            .stdin(stdin)
            .output()
            .await
            .map_err(|source| SchedulerError::Spawn {
                program: program.to_string(),
                source,
            })
    }
}

#[async_trait]
impl BatchScheduler for LsfScheduler {
    fn name(&self) -> &'static str {
        "lsf"
    }

    async fn is_available(&self) -> bool {
        for program in [&self.submit_program, &self.query_program, &self.kill_program] {
            if Self::run(program, &["-V".to_string()]).await.is_err() {
                tracing::debug!(program = %program, "Scheduler command not found");
                return false;
            }
        }
        true
    }

    fn directives(&self, request: &ScriptRequest) -> Vec<String> {
        vec![
            format!("#BSUB -J {}", request.job_name),
            format!("#BSUB -o {}", request.stdout_path.display()),
            format!("#BSUB -e {}", request.stderr_path.display()),
            format!("#BSUB -cwd {}", request.working_directory.display()),
            format!("#BSUB -q {}", request.queue),
            format!("#BSUB -n {}", request.cores),
            format!("#BSUB -R \"rusage[mem={}]\"", request.memory_mb),
            format!("#BSUB -W {}", wall_clock_limit(request.wall_clock.as_secs())),
        ]
    }

    /// `bsub < script`, so the `#BSUB` directives are honoured.
    async fn submit(&self, script: &Path) -> Result<JobId, SchedulerError> {
        let file = std::fs::File::open(script).map_err(|source| SchedulerError::Spawn {
            program: self.submit_program.clone(),
            source,
        })?;
        let output = Self::run_with_stdin(&self.submit_program, &[], Stdio::from(file)).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            return Err(SchedulerError::CommandFailed {
                program: self.submit_program.clone(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        parse_job_id(&stdout)
            .ok_or_else(|| SchedulerError::Parse(format!("no job id in '{}'", stdout.trim())))
    }

    async fn query(&self, ids: &[JobId]) -> Result<HashMap<JobId, RemoteState>, SchedulerError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let mut args: Vec<String> = vec!["-o".into(), "jobid stat".into(), "-json".into()];
        args.extend(ids.iter().map(|id| id.0.clone()));

        let output = Self::run(&self.query_program, &args).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if let Some(states) = parse_json_states(&stdout) {
            return Ok(states);
        }

        // Older LSF releases do not know -json.
        tracing::debug!("bjobs -json unsupported, using tabular output");
        let args: Vec<String> = ids.iter().map(|id| id.0.clone()).collect();
        let output = Self::run(&self.query_program, &args).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let states = parse_table_states(&stdout);
        if states.is_empty() && !output.status.success() && !stderr.contains("not found") {
            return Err(SchedulerError::CommandFailed {
                program: self.query_program.clone(),
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(states)
    }

    async fn kill(&self, id: &JobId) -> Result<(), SchedulerError> {
        let output = Self::run(&self.kill_program, &[id.0.clone()]).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(SchedulerError::CommandFailed {
                program: self.kill_program.clone(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

/// Map an LSF `STAT` value.
pub fn map_stat(stat: &str) -> RemoteState {
    match stat.trim() {
        "PEND" | "PSUSP" => RemoteState::Pending,
        "RUN" | "USUSP" | "SSUSP" => RemoteState::Running,
        "DONE" => RemoteState::Done,
        "EXIT" => RemoteState::Exited,
        _ => RemoteState::Unknown,
    }
}

/// Extract the id from `Job <1234> is submitted to queue <normal>.`
pub fn parse_job_id(stdout: &str) -> Option<JobId> {
    static JOB_ID: OnceLock<Option<Regex>> = OnceLock::new();
    let re = JOB_ID.get_or_init(|| Regex::new(r"Job <(\d+)>").ok()).as_ref()?;
    re.captures(stdout)
        .and_then(|c| c.get(1))
        .map(|m| JobId(m.as_str().to_string()))
}

/// Parse `bjobs -json` output. Records carrying an `ERROR` (job not found)
/// are left out. Returns `None` when the output is not JSON.
pub fn parse_json_states(stdout: &str) -> Option<HashMap<JobId, RemoteState>> {
    let value: serde_json::Value = serde_json::from_str(stdout.trim()).ok()?;
    let records = value.get("RECORDS")?.as_array()?;
    Some(
        records
            .iter()
            .filter(|r| r.get("ERROR").is_none())
            .filter_map(|r| {
                let id = r.get("JOBID")?.as_str()?;
                let stat = r.get("STAT")?.as_str()?;
                Some((JobId(id.to_string()), map_stat(stat)))
            })
            .collect(),
    )
}

/// Parse tabular `bjobs` output:
/// `JOBID USER STAT QUEUE FROM_HOST EXEC_HOST JOB_NAME SUBMIT_TIME`.
pub fn parse_table_states(stdout: &str) -> HashMap<JobId, RemoteState> {
    stdout
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            let id = parts.first()?;
            if !id.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            Some((JobId((*id).to_string()), map_stat(parts.get(2)?)))
        })
        .collect()
}

/// `-W` value in `H:MM`, rounded up to whole minutes.
fn wall_clock_limit(secs: u64) -> String {
    let minutes = secs.div_ceil(60).max(1);
    format!("{}:{:02}", minutes / 60, minutes % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn test_parse_job_id() {
        let id = parse_job_id("Job <48213> is submitted to queue <normal>.\n").unwrap();
        assert_eq!(id, JobId("48213".into()));
        assert!(parse_job_id("Request aborted by esub").is_none());
    }

    #[test]
    fn test_stat_mapping() {
        assert_eq!(map_stat("PEND"), RemoteState::Pending);
        assert_eq!(map_stat("PSUSP"), RemoteState::Pending);
        assert_eq!(map_stat("RUN"), RemoteState::Running);
        assert_eq!(map_stat("SSUSP"), RemoteState::Running);
        assert_eq!(map_stat("DONE"), RemoteState::Done);
        assert_eq!(map_stat("EXIT"), RemoteState::Exited);
        assert_eq!(map_stat("ZOMBI"), RemoteState::Unknown);
    }

    #[test]
    fn test_parse_json_states() {
        let out = r#"{
            "COMMAND":"bjobs",
            "JOBS":3,
            "RECORDS":[
                {"JOBID":"101","STAT":"RUN"},
                {"JOBID":"102","STAT":"DONE"},
                {"JOBID":"103","ERROR":"Job <103> is not found"}
            ]
        }"#;
        let states = parse_json_states(out).unwrap();
        assert_eq!(states.len(), 2);
        assert_eq!(states[&JobId("101".into())], RemoteState::Running);
        assert_eq!(states[&JobId("102".into())], RemoteState::Done);
        assert!(parse_json_states("bjobs: illegal option -- json").is_none());
    }

    #[test]
    fn test_parse_table_states() {
        let out = "JOBID   USER    STAT  QUEUE      FROM_HOST   EXEC_HOST   JOB_NAME   SUBMIT_TIME\n\
                   201     alice   PEND  normal     login01                t1_1       Jul  9 14:48\n\
                   202     alice   EXIT  normal     login01     node07     t1_2       Jul  9 14:48\n";
        let states = parse_table_states(out);
        assert_eq!(states.len(), 2);
        assert_eq!(states[&JobId("201".into())], RemoteState::Pending);
        assert_eq!(states[&JobId("202".into())], RemoteState::Exited);
    }

    #[test]
    fn test_directives() {
        let lsf = LsfScheduler::new(&BatchConfig::default());
        let request = ScriptRequest {
            job_name: "t1_1".into(),
            working_directory: PathBuf::from("/w/run_folder_00"),
            stdout_path: PathBuf::from("/w/run_folder_00/t1_1_lsf.out"),
            stderr_path: PathBuf::from("/w/run_folder_00/t1_1_lsf.err"),
            queue: "normal".into(),
            cores: 1,
            memory_mb: 4000,
            wall_clock: Duration::from_secs(600),
        };
        let lines = lsf.directives(&request);
        assert!(lines.contains(&"#BSUB -J t1_1".to_string()));
        assert!(lines.contains(&"#BSUB -q normal".to_string()));
        assert!(lines.contains(&"#BSUB -R \"rusage[mem=4000]\"".to_string()));
        assert!(lines.contains(&"#BSUB -W 0:10".to_string()));
    }

    #[test]
    fn test_wall_clock_rounds_up() {
        assert_eq!(wall_clock_limit(0), "0:01");
        assert_eq!(wall_clock_limit(61), "0:02");
        assert_eq!(wall_clock_limit(7200), "2:00");
    }

    #[tokio::test]
    async fn test_submit_feeds_script_on_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("t1_job.sh");
        std::fs::write(&script, "#!/bin/bash\n# Job <77> echoed back\n").unwrap();
        let config = BatchConfig {
            submit_program: "cat".into(),
            ..BatchConfig::default()
        };
        let id = LsfScheduler::new(&config).submit(&script).await.unwrap();
        assert_eq!(id, JobId("77".into()));
    }

    #[tokio::test]
    async fn test_missing_commands_are_unavailable() {
        let config = BatchConfig {
            submit_program: "/nonexistent/bsub".into(),
            ..BatchConfig::default()
        };
        assert!(!LsfScheduler::new(&config).is_available().await);
    }
}
