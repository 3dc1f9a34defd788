//! Launching scripts and toolchain commands as child processes.
//!
//! Everything here goes through `tokio::process`, so a running script only
//! parks its own task and never a scheduler worker thread.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::ExecutionError;
use crate::truncate::{clean_text, truncate_output};

/// Exit code and captured output of a script run.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Process exit code; -1 when the child was terminated by a signal.
    pub exit_code: i32,
    /// Trimmed stdout, a newline, then trimmed stderr.
    pub output: String,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs one script file under an interpreter with an explicit environment.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
    max_output_chars: usize,
}

impl ProcessRunner {
    pub fn new(timeout: Option<Duration>, max_output_chars: usize) -> Self {
        Self {
            timeout,
            max_output_chars,
        }
    }

    /// Run `program script` with exactly `env` as its environment.
    ///
    /// # Errors
    ///
    /// - `Spawn`: the program could not be started.
    /// - `Wait`: collecting the child's output failed.
    /// - `Timeout`: the configured time budget ran out; the child is killed.
    pub async fn run(
        &self,
        program: &OsStr,
        script: &Path,
        env: &HashMap<String, String>,
    ) -> Result<ProcessOutput, ExecutionError> {
        let started = Instant::now();
        debug!(program = %program.to_string_lossy(), script = %script.display(), "spawning script");

        let child = Command::new(program)
            .arg(script)
            .env_clear()
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the child on the timeout path kills it.
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecutionError::Spawn {
                program: program.to_string_lossy().into_owned(),
                source,
            })?;

        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result.map_err(ExecutionError::Wait)?,
                Err(_elapsed) => {
                    warn!(script = %script.display(), secs = limit.as_secs(), "script timed out");
                    return Err(ExecutionError::Timeout {
                        secs: limit.as_secs(),
                    });
                }
            },
            None => child.wait_with_output().await.map_err(ExecutionError::Wait)?,
        };

        let combined = format!(
            "{}\n{}",
            clean_text(&output.stdout).trim(),
            clean_text(&output.stderr).trim()
        );

        Ok(ProcessOutput {
            exit_code: output.status.code().unwrap_or(-1),
            output: truncate_output(&combined, self.max_output_chars),
            elapsed: started.elapsed(),
        })
    }
}

/// Cleaned output of a toolchain command.
#[derive(Debug)]
pub(crate) struct Captured {
    pub status: std::process::ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl Captured {
    /// Non-empty stdout and stderr, in that order, ready for a step log.
    pub fn chunks(self) -> Vec<String> {
        [self.stdout, self.stderr]
            .into_iter()
            .filter(|text| !text.trim().is_empty())
            .collect()
    }
}

/// Run a toolchain command to completion and collect its output.
pub(crate) async fn run_captured(cmd: &mut Command) -> std::io::Result<Captured> {
    let output = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await?;

    Ok(Captured {
        status: output.status,
        stdout: clean_text(&output.stdout),
        stderr: clean_text(&output.stderr),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn base_env() -> HashMap<String, String> {
        std::env::vars().collect()
    }

    async fn run_sh(runner: &ProcessRunner, body: &str, env: &HashMap<String, String>) -> ProcessOutput {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("s.sh");
        std::fs::write(&script, body).unwrap();
        runner.run(OsStr::new("/bin/sh"), &script, env).await.unwrap()
    }

    #[tokio::test]
    async fn stdout_comes_before_stderr() {
        let runner = ProcessRunner::new(None, 10_000);
        let out = run_sh(&runner, "echo err >&2\necho out\n", &base_env()).await;
        assert!(out.success());
        assert_eq!(out.output, "out\nerr");
    }

    #[tokio::test]
    async fn nonzero_exit_is_not_an_error() {
        let runner = ProcessRunner::new(None, 10_000);
        let out = run_sh(&runner, "echo failing\nexit 3\n", &base_env()).await;
        assert_eq!(out.exit_code, 3);
        assert!(!out.success());
        assert!(out.output.starts_with("failing"));
    }

    #[tokio::test]
    async fn environment_is_exactly_what_was_passed() {
        let runner = ProcessRunner::new(None, 10_000);
        let mut env = HashMap::new();
        env.insert("ONLY_ME".to_string(), "42".to_string());
        let out = run_sh(&runner, "echo \"$ONLY_ME:${HOME:-unset}\"\n", &env).await;
        assert_eq!(out.output.trim(), "42:unset");
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let runner = ProcessRunner::new(None, 10_000);
        let err = runner
            .run(
                OsStr::new("/definitely/not/here/python"),
                Path::new("/tmp/x.py"),
                &base_env(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Spawn { .. }));
    }

    #[tokio::test]
    async fn timeout_kills_the_script() {
        let runner = ProcessRunner::new(Some(Duration::from_millis(200)), 10_000);
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("slow.sh");
        std::fs::write(&script, "sleep 5\n").unwrap();
        let started = Instant::now();
        let err = runner
            .run(OsStr::new("/bin/sh"), &script, &base_env())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn run_captured_skips_empty_streams() {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg("echo installed");
        let captured = run_captured(&mut cmd).await.unwrap();
        assert!(captured.status.success());
        assert_eq!(captured.chunks(), vec!["installed\n".to_string()]);
    }

    #[tokio::test]
    async fn run_captured_keeps_streams_apart() {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg("echo out; echo err >&2; exit 3");
        let captured = run_captured(&mut cmd).await.unwrap();
        assert_eq!(captured.status.code(), Some(3));
        assert_eq!(captured.stdout, "out\n");
        assert_eq!(captured.stderr, "err\n");
    }
}
