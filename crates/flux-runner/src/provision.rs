//! Per-job execution environments.
//!
//! Every job owns `<envs_dir>/<job_id>/`:
//!
//! - Python: a virtualenv, created once. Its `bin/python` marks it as ready.
//! - Node: a directory with a `package.json`, created once; packages land in
//!   its `node_modules` and scripts find them through `NODE_PATH`.
//!
//! Declared dependencies are installed on every run whenever the manifest is
//! non-empty. The installer itself decides what is already satisfied.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use flux_core::config::{PathsConfig, RuntimeConfig};
use flux_core::types::{JobId, Runtime};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::EnvironmentSetupError;
use crate::process::run_captured;

/// How the Run step should launch the script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launcher {
    /// Run the script with this job-private interpreter.
    Interpreter(PathBuf),
    /// Run the script with the shared `node` binary, resolving packages from
    /// `node_path`.
    Node { node_path: PathBuf },
}

/// A ready environment plus what the toolchain printed while preparing it.
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub launcher: Launcher,
    pub log: String,
    pub elapsed: Duration,
}

/// Prepares and discards per-job environments.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Make sure the job's environment exists and `manifest` is installed.
    async fn provision(
        &self,
        job: JobId,
        manifest: &str,
        runtime: Runtime,
    ) -> Result<Provisioned, EnvironmentSetupError>;

    /// Directory owned by `job`.
    fn env_dir(&self, job: JobId) -> PathBuf;

    /// Delete the job's environment. A missing directory is not an error.
    async fn discard(&self, job: JobId) -> std::io::Result<()> {
        match tokio::fs::remove_dir_all(self.env_dir(job)).await {
            Ok(()) => {
                info!(job_id = %job, "environment discarded");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Provisioner backed by the real `python -m venv`, `pip` and `npm` tools.
#[derive(Debug, Clone)]
pub struct ToolchainProvisioner {
    envs_dir: PathBuf,
    python_bin: String,
    npm_bin: String,
    pip_index_url: Option<String>,
}

impl ToolchainProvisioner {
    pub fn new(
        envs_dir: impl Into<PathBuf>,
        python_bin: impl Into<String>,
        npm_bin: impl Into<String>,
        pip_index_url: Option<String>,
    ) -> Self {
        Self {
            envs_dir: envs_dir.into(),
            python_bin: python_bin.into(),
            npm_bin: npm_bin.into(),
            pip_index_url,
        }
    }

    pub fn from_config(paths: &PathsConfig, rt: &RuntimeConfig) -> Self {
        Self::new(
            paths.envs_dir.clone(),
            rt.python_bin.clone(),
            rt.npm_bin.clone(),
            rt.pip_index_url.clone(),
        )
    }

    async fn provision_python(
        &self,
        env_dir: &Path,
        manifest: &str,
        logs: &mut Vec<String>,
    ) -> Result<Launcher, String> {
        let python = venv_python(env_dir);
        if !python.exists() {
            logs.push("Creating Python venv...".to_string());
            let mut cmd = Command::new(&self.python_bin);
            cmd.arg("-m").arg("venv").arg(env_dir);
            run_step(&mut cmd, "venv creation", logs).await?;
        }

        if !manifest.trim().is_empty() {
            logs.push(format!("Installing Python deps: {manifest}"));
            let req_file = env_dir.join("requirements.txt");
            tokio::fs::write(&req_file, manifest)
                .await
                .map_err(|e| format!("cannot write {}: {e}", req_file.display()))?;

            let mut cmd = Command::new(env_dir.join("bin").join("pip"));
            cmd.arg("install").arg("-r").arg(&req_file);
            if let Some(index) = &self.pip_index_url {
                cmd.arg("-i").arg(index);
            }
            run_step(&mut cmd, "Pip install", logs).await?;
        }

        Ok(Launcher::Interpreter(python))
    }

    async fn provision_node(
        &self,
        env_dir: &Path,
        manifest: &str,
        logs: &mut Vec<String>,
    ) -> Result<Launcher, String> {
        logs.push(format!(
            "Preparing Node.js environment at {}...",
            env_dir.display()
        ));

        if !env_dir.join("package.json").exists() {
            let mut cmd = Command::new(&self.npm_bin);
            cmd.arg("init").arg("-y").current_dir(env_dir);
            let captured = run_captured(&mut cmd)
                .await
                .map_err(|e| format!("npm init failed to start: {e}"))?;
            // npm echoes the whole generated package.json on stdout; only
            // stderr goes to the log.
            if !captured.stderr.trim().is_empty() {
                logs.push(captured.stderr);
            }
            if !captured.status.success() {
                return Err(format!("npm init failed ({})", captured.status));
            }
        }

        let packages = split_packages(manifest);
        if !packages.is_empty() {
            logs.push(format!("Installing Node deps: {}", packages.join(", ")));
            let mut cmd = Command::new(&self.npm_bin);
            cmd.arg("install").args(&packages).current_dir(env_dir);
            run_step(&mut cmd, "Npm install", logs).await?;
        }

        Ok(Launcher::Node {
            node_path: env_dir.join("node_modules"),
        })
    }
}

#[async_trait]
impl Provisioner for ToolchainProvisioner {
    async fn provision(
        &self,
        job: JobId,
        manifest: &str,
        runtime: Runtime,
    ) -> Result<Provisioned, EnvironmentSetupError> {
        let started = Instant::now();
        let env_dir = self.env_dir(job);
        let mut logs = Vec::new();

        if let Err(e) = tokio::fs::create_dir_all(&env_dir).await {
            return Err(EnvironmentSetupError::new(
                format!("cannot create {}: {e}", env_dir.display()),
                logs,
            ));
        }

        let result = match runtime {
            Runtime::Python => self.provision_python(&env_dir, manifest, &mut logs).await,
            Runtime::Node => self.provision_node(&env_dir, manifest, &mut logs).await,
        };

        match result {
            Ok(launcher) => {
                debug!(job_id = %job, %runtime, "environment ready");
                Ok(Provisioned {
                    launcher,
                    log: logs.join("\n"),
                    elapsed: started.elapsed(),
                })
            }
            Err(detail) => {
                warn!(job_id = %job, %runtime, %detail, "environment setup failed");
                Err(EnvironmentSetupError::new(detail, logs))
            }
        }
    }

    fn env_dir(&self, job: JobId) -> PathBuf {
        self.envs_dir.join(job.to_string())
    }
}

/// Interpreter inside a virtualenv.
fn venv_python(env_dir: &Path) -> PathBuf {
    env_dir.join("bin").join("python")
}

/// Split a Node manifest on any whitespace into package specs.
pub fn split_packages(manifest: &str) -> Vec<String> {
    manifest.split_whitespace().map(str::to_string).collect()
}

/// Run one toolchain command, appending its output to `logs`.
/// A non-zero exit is reported as an error naming `what`.
async fn run_step(cmd: &mut Command, what: &str, logs: &mut Vec<String>) -> Result<(), String> {
    let captured = run_captured(cmd)
        .await
        .map_err(|e| format!("{what} failed to start: {e}"))?;
    let status = captured.status;
    logs.extend(captured.chunks());
    if status.success() {
        Ok(())
    } else {
        Err(format!("{what} failed ({status})"))
    }
}
