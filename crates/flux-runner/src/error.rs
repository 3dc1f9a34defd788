//! Error types for the execution engine.
//!
//! Neither error escapes the pipeline: both are folded into the step log.

use std::path::PathBuf;
use thiserror::Error;

/// Environment bootstrap or dependency installation failed.
///
/// `log` holds everything the toolchain printed before the failure, with the
/// error itself appended as the final line.
#[derive(Debug, Error)]
#[error("Env setup failed: {detail}")]
pub struct EnvironmentSetupError {
    pub detail: String,
    pub log: String,
}

impl EnvironmentSetupError {
    pub fn new(detail: impl Into<String>, mut logs: Vec<String>) -> Self {
        let detail = detail.into();
        logs.push(format!("Error: {detail}"));
        Self {
            detail,
            log: logs.join("\n"),
        }
    }
}

/// The script process could not be run to completion.
///
/// A non-zero exit code is *not* an `ExecutionError`; it is an ordinary
/// failed run.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The interpreter could not be started at all.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Waiting on the child or collecting its output failed.
    #[error("failed to wait for process: {0}")]
    Wait(#[source] std::io::Error),

    /// The script exceeded its time budget and was killed.
    #[error("script timed out after {secs}s and was killed")]
    Timeout { secs: u64 },

    /// The script file could not be written.
    #[error("failed to write script {path}: {source}")]
    ScriptWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Secrets could not be loaded for injection.
    #[error("failed to load secrets: {0}")]
    Secrets(String),
}
