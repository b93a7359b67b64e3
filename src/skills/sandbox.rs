//! Per-invocation skill sandbox.
//!
//! Skills are user-extensible; a hang, crash, or runaway allocation must
//! not take the backend down. Every invocation therefore runs in a fresh
//! `aist-skill-worker` child process that rebuilds the skill registry,
//! invokes one handler, and writes a single JSON result line to stdout.
//! The parent joins the child with a bounded timeout and kills it on
//! expiry. Stdout is reserved for the result protocol; worker diagnostics
//! go to the log file and stderr.

use super::builtins::register_builtin_skills;
use super::discovery::discover_skills;
use super::{SkillContext, SkillManager, SkillParams};
use crate::error::{AssistantError, Result};
use crate::memory::FactStore;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, warn};

/// How often the parent polls the child for exit.
const REAP_INTERVAL: Duration = Duration::from_millis(50);

/// Worker result statuses on the wire.
const STATUS_SUCCESS: &str = "success";
const STATUS_ERROR: &str = "error";

/// The single JSON line a worker writes to stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResult {
    pub status: String,
    pub output: String,
}

impl WorkerResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            status: STATUS_SUCCESS.to_owned(),
            output: output.into(),
        }
    }

    pub fn error(output: impl Into<String>) -> Self {
        Self {
            status: STATUS_ERROR.to_owned(),
            output: output.into(),
        }
    }
}

/// What invoking a sandboxed skill produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxOutcome {
    /// Handler returned normally.
    Success(String),
    /// Handler reported an error.
    Error(String),
    /// Child died without writing a result.
    Crashed,
    /// Child exceeded the timeout and was killed.
    TimedOut,
}

/// Spawns and reaps skill worker processes.
pub struct SkillSandbox {
    worker_bin: PathBuf,
    timeout: Duration,
    db_path: PathBuf,
    skills_dir: PathBuf,
    log_folder: PathBuf,
}

impl SkillSandbox {
    /// Build a sandbox using the sibling `aist-skill-worker` binary.
    pub fn new(timeout: Duration, db_path: PathBuf, skills_dir: PathBuf, log_folder: PathBuf) -> Self {
        Self {
            worker_bin: default_worker_bin(),
            timeout,
            db_path,
            skills_dir,
            log_folder,
        }
    }

    /// Override the worker binary (tests).
    pub fn with_worker_bin(mut self, worker_bin: PathBuf) -> Self {
        self.worker_bin = worker_bin;
        self
    }

    /// The configured timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one intent handler in a child process.
    pub fn invoke(&self, skill_id: &str, intent: &str, params: &SkillParams) -> SandboxOutcome {
        let params_json = serde_json::Value::Object(params.clone()).to_string();
        let spawned = Command::new(&self.worker_bin)
            .arg("--skill")
            .arg(skill_id)
            .arg("--intent")
            .arg(intent)
            .arg("--params")
            .arg(&params_json)
            .arg("--db")
            .arg(&self.db_path)
            .arg("--skills-dir")
            .arg(&self.skills_dir)
            .arg("--log-folder")
            .arg(&self.log_folder)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                error!("cannot spawn skill worker {}: {e}", self.worker_bin.display());
                return SandboxOutcome::Crashed;
            }
        };

        // Drain stdout on a side thread so a chatty child can't wedge on a
        // full pipe while we wait for it.
        let mut stdout = child.stdout.take();
        let reader = std::thread::spawn(move || {
            let mut buffer = String::new();
            if let Some(ref mut out) = stdout {
                let _ = out.read_to_string(&mut buffer);
            }
            buffer
        });

        let deadline = Instant::now() + self.timeout;
        let timed_out = loop {
            match child.try_wait() {
                Ok(Some(_status)) => break false,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        break true;
                    }
                    std::thread::sleep(REAP_INTERVAL);
                }
                Err(e) => {
                    error!("skill worker wait failed: {e}");
                    break false;
                }
            }
        };

        if timed_out {
            warn!("skill '{intent}' exceeded {:?}; killing worker", self.timeout);
            let _ = child.kill();
            let _ = child.wait();
            let _ = reader.join();
            return SandboxOutcome::TimedOut;
        }

        let output = reader.join().unwrap_or_default();
        match parse_result(&output) {
            Some(result) if result.status == STATUS_SUCCESS => {
                SandboxOutcome::Success(result.output)
            }
            Some(result) if result.status == STATUS_ERROR => SandboxOutcome::Error(result.output),
            _ => {
                warn!("skill worker for '{intent}' exited without a result");
                SandboxOutcome::Crashed
            }
        }
    }
}

/// Take the last parseable JSON line from the worker's stdout.
fn parse_result(output: &str) -> Option<WorkerResult> {
    output
        .lines()
        .rev()
        .find_map(|line| serde_json::from_str(line.trim()).ok())
}

/// Resolve the worker binary next to the running executable.
fn default_worker_bin() -> PathBuf {
    let name = if cfg!(windows) {
        "aist-skill-worker.exe"
    } else {
        "aist-skill-worker"
    };
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(name)))
        .unwrap_or_else(|| PathBuf::from(name))
}

/// Arguments a worker process receives.
#[derive(Debug, Clone)]
pub struct WorkerRequest {
    pub skill_id: String,
    pub intent: String,
    pub params: SkillParams,
    pub db_path: PathBuf,
    pub skills_dir: PathBuf,
}

/// Worker-side execution: rebuild the registry and run one handler.
///
/// Called by `aist-skill-worker` after it re-initializes logging. A handler
/// panic is deliberately not caught; the parent observes the dead child and
/// reports a crash.
///
/// # Errors
///
/// Returns an error only when the environment cannot be built (fact store
/// unreadable); handler failures are reported inside the [`WorkerResult`].
pub fn execute_worker(request: &WorkerRequest) -> Result<WorkerResult> {
    let fact_store = Arc::new(FactStore::open(&request.db_path)?);
    let ctx = SkillContext { fact_store };

    let mut manager = SkillManager::new();
    register_builtin_skills(&mut manager, &ctx)?;
    discover_skills(&request.skills_dir, &ctx, &mut manager);

    let Some(intent) = manager.find_intent(&request.intent) else {
        return Ok(WorkerResult::error(format!(
            "unknown intent '{}'",
            request.intent
        )));
    };
    if intent.skill_id != request.skill_id {
        return Ok(WorkerResult::error(format!(
            "intent '{}' belongs to '{}', not '{}'",
            request.intent, intent.skill_id, request.skill_id
        )));
    }

    match intent.invoke(&request.params) {
        Ok(output) => Ok(WorkerResult::success(output)),
        Err(e) => Ok(WorkerResult::error(e.to_string())),
    }
}

/// Parse worker command-line arguments.
///
/// # Errors
///
/// Returns an error when a required flag is missing or malformed.
pub fn parse_worker_args(args: &[String]) -> Result<WorkerRequest> {
    let mut skill_id = None;
    let mut intent = None;
    let mut params = None;
    let mut db_path = None;
    let mut skills_dir = None;

    let mut iter = args.iter();
    while let Some(flag) = iter.next() {
        let mut take = |name: &str| -> Result<String> {
            iter.next().cloned().ok_or_else(|| {
                AssistantError::Skill(format!("missing value for {name}"))
            })
        };
        match flag.as_str() {
            "--skill" => skill_id = Some(take("--skill")?),
            "--intent" => intent = Some(take("--intent")?),
            "--params" => params = Some(take("--params")?),
            "--db" => db_path = Some(take("--db")?),
            "--skills-dir" => skills_dir = Some(take("--skills-dir")?),
            "--log-folder" => {
                let _ = take("--log-folder")?;
            }
            other => {
                return Err(AssistantError::Skill(format!(
                    "unknown worker flag '{other}'"
                )));
            }
        }
    }

    let params_json = params.unwrap_or_else(|| "{}".to_owned());
    let params: SkillParams = serde_json::from_str::<serde_json::Value>(&params_json)
        .ok()
        .and_then(|v| v.as_object().cloned())
        .ok_or_else(|| AssistantError::Skill("worker params must be a JSON object".to_owned()))?;

    Ok(WorkerRequest {
        skill_id: skill_id
            .ok_or_else(|| AssistantError::Skill("missing --skill".to_owned()))?,
        intent: intent.ok_or_else(|| AssistantError::Skill("missing --intent".to_owned()))?,
        params,
        db_path: PathBuf::from(
            db_path.ok_or_else(|| AssistantError::Skill("missing --db".to_owned()))?,
        ),
        skills_dir: PathBuf::from(skills_dir.unwrap_or_default()),
    })
}

/// Extract the log folder from worker arguments, if present.
pub fn worker_log_folder(args: &[String]) -> Option<PathBuf> {
    args.iter()
        .position(|a| a == "--log-folder")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
}

/// Helper for the backend: the user-facing reply for each outcome.
pub fn outcome_message(outcome: &SandboxOutcome, skill_id: &str) -> Option<String> {
    match outcome {
        SandboxOutcome::Success(_) => None,
        SandboxOutcome::Error(_) => Some(format!(
            "The {skill_id} skill encountered an error."
        )),
        SandboxOutcome::Crashed => Some(format!("The {skill_id} skill crashed.")),
        SandboxOutcome::TimedOut => Some(format!(
            "The {skill_id} skill took too long to respond."
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_complete_worker_args() {
        let args: Vec<String> = [
            "--skill",
            "time_skill",
            "--intent",
            "get_current_time",
            "--params",
            "{\"a\":1}",
            "--db",
            "/tmp/m.db",
            "--skills-dir",
            "skills",
            "--log-folder",
            "logs",
        ]
        .iter()
        .map(|s| (*s).to_owned())
        .collect();
        let request = parse_worker_args(&args).expect("parse");
        assert_eq!(request.skill_id, "time_skill");
        assert_eq!(request.intent, "get_current_time");
        assert_eq!(request.params.get("a").and_then(serde_json::Value::as_i64), Some(1));
        assert_eq!(worker_log_folder(&args), Some(PathBuf::from("logs")));
    }

    #[test]
    fn missing_required_flags_error() {
        let args = vec!["--intent".to_owned(), "x".to_owned()];
        assert!(parse_worker_args(&args).is_err());
    }

    #[test]
    fn non_object_params_are_rejected() {
        let args: Vec<String> = [
            "--skill", "s", "--intent", "i", "--params", "[1,2]", "--db", "d",
        ]
        .iter()
        .map(|s| (*s).to_owned())
        .collect();
        assert!(parse_worker_args(&args).is_err());
    }

    #[test]
    fn result_parsing_takes_the_last_json_line() {
        let output = "noise\n{\"status\":\"success\",\"output\":\"first\"}\n\
                      {\"status\":\"error\",\"output\":\"second\"}\n";
        let result = parse_result(output).expect("parse");
        assert_eq!(result.status, "error");
        assert_eq!(result.output, "second");
        assert!(parse_result("just noise\n").is_none());
    }

    #[test]
    fn execute_worker_runs_a_builtin() {
        let dir = tempfile::tempdir().expect("tempdir");
        let request = WorkerRequest {
            skill_id: "time_skill".to_owned(),
            intent: "get_current_time".to_owned(),
            params: SkillParams::new(),
            db_path: dir.path().join("m.db"),
            skills_dir: dir.path().join("skills"),
        };
        let result = execute_worker(&request).expect("execute");
        assert_eq!(result.status, "success");
        assert!(result.output.starts_with("The current time is"));
    }

    #[test]
    fn execute_worker_reports_unknown_intents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let request = WorkerRequest {
            skill_id: "nope".to_owned(),
            intent: "nope_intent".to_owned(),
            params: SkillParams::new(),
            db_path: dir.path().join("m.db"),
            skills_dir: dir.path().join("skills"),
        };
        let result = execute_worker(&request).expect("execute");
        assert_eq!(result.status, "error");
        assert!(result.output.contains("unknown intent"));
    }

    #[test]
    fn outcome_messages_name_the_skill() {
        assert!(
            outcome_message(&SandboxOutcome::TimedOut, "weather")
                .expect("msg")
                .contains("took too long")
        );
        assert!(
            outcome_message(&SandboxOutcome::Crashed, "weather")
                .expect("msg")
                .contains("crashed")
        );
        assert!(outcome_message(&SandboxOutcome::Success("hi".into()), "weather").is_none());
    }
}
