//! Per-invocation skill worker.
//!
//! Spawned by the backend for each intent invocation. Rebuilds the skill
//! registry, runs one handler, and writes exactly one JSON result line to
//! stdout. Stdout is reserved for the result protocol; diagnostics go to
//! the log file. A handler panic kills this process, which the parent
//! reports as a crash.

use aist::config::LoggingConfig;
use aist::skills::sandbox::{self, WorkerResult};

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Logging re-initializes to the parent's configured folder; console
    // output stays off so stdout carries only the result line.
    let logging = LoggingConfig {
        folder: sandbox::worker_log_folder(&args)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "data/logs".to_owned()),
        console_enabled: false,
    };
    let _log_guard = aist::logging::init(&logging, None);

    let result = match sandbox::parse_worker_args(&args) {
        Ok(request) => {
            tracing::info!(
                "worker invoking {}::{}",
                request.skill_id,
                request.intent
            );
            match sandbox::execute_worker(&request) {
                Ok(result) => result,
                Err(e) => WorkerResult::error(e.to_string()),
            }
        }
        Err(e) => WorkerResult::error(e.to_string()),
    };

    match serde_json::to_string(&result) {
        Ok(line) => println!("{line}"),
        Err(e) => {
            tracing::error!("cannot serialize worker result: {e}");
            std::process::exit(1);
        }
    }
}
