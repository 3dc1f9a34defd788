//! The execution state machine: Set up → Install → Run → Complete.
//!
//! Every transition rewrites the job's whole step log together with its
//! status and `last_run`, so a concurrent reader sees a log that only grows
//! and never shows a stale in-progress step once the run has moved on.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashSet;
use flux_core::token::TokenSigner;
use flux_core::types::{Job, JobId, RunStatus, Runtime, Step, StepName, StepStatus};
use flux_store::{JobStore, SecretStore};
use rand::Rng;
use tracing::{error, info, warn};

use crate::detect::detect;
use crate::error::ExecutionError;
use crate::process::{ProcessOutput, ProcessRunner};
use crate::provision::{Launcher, Provisioner};
use crate::script::{script_path, write_script};

/// Variable carrying the bearer token scripts use to call the API.
pub const TOKEN_VAR: &str = "FLUX_TOKEN";
/// Variable carrying the API base URL.
pub const API_URL_VAR: &str = "FLUX_API_URL";

const RUNNER_NAME: &str = "flux-runner";

/// How long to wait before the Install step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartDelay {
    /// Use the job's own random-delay bound (scheduled runs).
    JobPolicy,
    /// Wait exactly this many seconds (manual runs pass 0).
    Fixed(u64),
}

impl StartDelay {
    /// Resolve to a concrete number of seconds.
    pub fn resolve(self, random_bound: u32, rng: &mut impl Rng) -> u64 {
        match self {
            StartDelay::Fixed(secs) => secs,
            StartDelay::JobPolicy if random_bound > 0 => {
                rng.random_range(0..=u64::from(random_bound))
            }
            StartDelay::JobPolicy => 0,
        }
    }
}

/// Result of one `Pipeline::execute` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The run went through the step sequence and ended with this status.
    Finished(RunStatus),
    /// Another run of the same job was in flight; nothing was done.
    AlreadyRunning,
    /// The job no longer exists.
    JobNotFound,
}

/// Static inputs the pipeline needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Shared directory holding one script file per job.
    pub scripts_dir: PathBuf,
    /// Binary used for Node scripts.
    pub node_bin: String,
    /// Exposed to scripts as `FLUX_API_URL`.
    pub api_url: String,
    /// Subject of the token exposed as `FLUX_TOKEN`.
    pub admin_user: String,
}

pub struct Pipeline {
    jobs: Arc<JobStore>,
    secrets: Arc<SecretStore>,
    provisioner: Arc<dyn Provisioner>,
    runner: ProcessRunner,
    signer: TokenSigner,
    settings: PipelineSettings,
    /// Jobs with a run in flight. A second trigger for the same job is skipped.
    running: DashSet<JobId>,
}

impl Pipeline {
    pub fn new(
        jobs: Arc<JobStore>,
        secrets: Arc<SecretStore>,
        provisioner: Arc<dyn Provisioner>,
        runner: ProcessRunner,
        signer: TokenSigner,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            jobs,
            secrets,
            provisioner,
            runner,
            signer,
            settings,
            running: DashSet::new(),
        }
    }

    pub fn provisioner(&self) -> &Arc<dyn Provisioner> {
        &self.provisioner
    }

    pub fn is_running(&self, id: JobId) -> bool {
        self.running.contains(&id)
    }

    /// Run job `id` through every step, committing state after each one.
    pub async fn execute(&self, id: JobId, delay: StartDelay) -> ExecutionOutcome {
        if !self.running.insert(id) {
            info!(job_id = %id, "run already in progress; skipping trigger");
            return ExecutionOutcome::AlreadyRunning;
        }
        let _guard = RunningGuard {
            set: &self.running,
            id,
        };

        let job = match self.jobs.get(id) {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job_id = %id, "job vanished before it could run");
                return ExecutionOutcome::JobNotFound;
            }
            Err(e) => {
                error!(job_id = %id, "failed to load job: {e}");
                return ExecutionOutcome::JobNotFound;
            }
        };

        let mut log = StepLog::new(&self.jobs, id);
        log.commit();
        info!(job_id = %id, name = %job.name(), "job started");

        let runtime = detect(&job.spec.code);
        info!(job_id = %id, %runtime, "runtime detected");

        self.set_up(&mut log, &job, runtime, delay).await;

        let Some(launcher) = self.install(&mut log, &job, runtime).await else {
            info!(job_id = %id, status = %log.status, "job finished early");
            return ExecutionOutcome::Finished(log.status);
        };

        self.run_script(&mut log, &job, runtime, &launcher).await;
        if log.status == RunStatus::Error {
            info!(job_id = %id, status = %log.status, "job finished early");
            return ExecutionOutcome::Finished(log.status);
        }

        log.finish(Step {
            name: StepName::Complete,
            status: StepStatus::Success,
            duration: "0.1s".to_string(),
            output: "Done.".to_string(),
        });
        log.commit();

        info!(job_id = %id, status = %log.status, "job finished");
        ExecutionOutcome::Finished(log.status)
    }

    async fn set_up(&self, log: &mut StepLog<'_>, job: &Job, runtime: Runtime, delay: StartDelay) {
        let started = Instant::now();
        let mut output = format!(
            "Runner: {RUNNER_NAME}\nRuntime: {}\nTime: {}\n",
            runtime.as_str().to_uppercase(),
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f")
        );

        let secs = delay.resolve(job.spec.random_delay, &mut rand::rng());
        if secs > 0 {
            output.push_str(&format!("Anti-Bot: Sleeping {secs}s...\n"));
            log.begin(StepName::Setup, output.clone());
            log.commit();
            info!(job_id = %job.id, secs, "delaying start");
            tokio::time::sleep(Duration::from_secs(secs)).await;
        }

        log.finish(Step::finished(
            StepName::Setup,
            StepStatus::Success,
            started.elapsed(),
            output,
        ));
        log.commit();
    }

    /// Returns the launcher, or `None` once the run has been marked Failed.
    async fn install(&self, log: &mut StepLog<'_>, job: &Job, runtime: Runtime) -> Option<Launcher> {
        let started = Instant::now();
        log.begin(
            StepName::InstallDependencies,
            format!("Installing {runtime} packages..."),
        );
        log.commit();

        match self
            .provisioner
            .provision(job.id, &job.spec.requirements, runtime)
            .await
        {
            Ok(ready) => {
                log.finish(Step::finished(
                    StepName::InstallDependencies,
                    StepStatus::Success,
                    ready.elapsed,
                    ready.log,
                ));
                log.commit();
                Some(ready.launcher)
            }
            Err(e) => {
                warn!(job_id = %job.id, "dependency installation failed: {e}");
                log.finish(Step::finished(
                    StepName::InstallDependencies,
                    StepStatus::Failure,
                    started.elapsed(),
                    e.log,
                ));
                log.status = RunStatus::Failed;
                log.commit();
                None
            }
        }
    }

    async fn run_script(&self, log: &mut StepLog<'_>, job: &Job, runtime: Runtime, launcher: &Launcher) {
        let started = Instant::now();
        log.begin(StepName::RunScript, "Running...");
        log.commit();

        match self.launch(job, runtime, launcher).await {
            Ok(out) => {
                let (step_status, run_status) = if out.success() {
                    (StepStatus::Success, RunStatus::Success)
                } else {
                    (StepStatus::Failure, RunStatus::Failed)
                };
                info!(job_id = %job.id, exit_code = out.exit_code, "script exited");
                log.finish(Step::finished(
                    StepName::RunScript,
                    step_status,
                    started.elapsed(),
                    out.output,
                ));
                log.status = run_status;
            }
            Err(e) => {
                warn!(job_id = %job.id, "script could not run: {e}");
                log.finish(Step::finished(
                    StepName::RunScript,
                    StepStatus::Failure,
                    started.elapsed(),
                    e.to_string(),
                ));
                log.status = RunStatus::Error;
            }
        }
        log.commit();
    }

    async fn launch(
        &self,
        job: &Job,
        runtime: Runtime,
        launcher: &Launcher,
    ) -> Result<ProcessOutput, ExecutionError> {
        let path = script_path(&self.settings.scripts_dir, job.name(), job.id, runtime);
        write_script(&path, &job.spec.code)
            .await
            .map_err(|source| ExecutionError::ScriptWrite {
                path: path.clone(),
                source,
            })?;

        let env = self.process_env(job.id, launcher)?;
        let program = match launcher {
            Launcher::Interpreter(python) => python.as_os_str(),
            Launcher::Node { .. } => OsStr::new(&self.settings.node_bin),
        };
        self.runner.run(program, &path, &env).await
    }

    /// Inherited environment, then secrets, then the engine's own variables.
    fn process_env(&self, id: JobId, launcher: &Launcher) -> Result<HashMap<String, String>, ExecutionError> {
        let mut env: HashMap<String, String> = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();

        let secrets = self
            .secrets
            .all()
            .map_err(|e| ExecutionError::Secrets(e.to_string()))?;
        env.extend(secrets);

        match self.signer.mint(&self.settings.admin_user) {
            Ok(token) => {
                env.insert(TOKEN_VAR.to_string(), token);
            }
            Err(e) => warn!(job_id = %id, "could not mint script token: {e}"),
        }
        env.insert(API_URL_VAR.to_string(), self.settings.api_url.clone());

        match launcher {
            Launcher::Interpreter(_) => {
                env.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());
            }
            Launcher::Node { node_path } => {
                env.insert(
                    "NODE_PATH".to_string(),
                    node_path.to_string_lossy().into_owned(),
                );
            }
        }
        Ok(env)
    }
}

/// Clears a job's in-flight marker when its run ends, however it ends.
struct RunningGuard<'a> {
    set: &'a DashSet<JobId>,
    id: JobId,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.id);
    }
}

/// The step sequence of one run and the status that goes with it.
struct StepLog<'a> {
    store: &'a JobStore,
    id: JobId,
    steps: Vec<Step>,
    status: RunStatus,
}

impl<'a> StepLog<'a> {
    fn new(store: &'a JobStore, id: JobId) -> Self {
        Self {
            store,
            id,
            steps: Vec::new(),
            status: RunStatus::Running,
        }
    }

    /// Append an in-progress marker.
    fn begin(&mut self, name: StepName, output: impl Into<String>) {
        self.steps.push(Step::running(name, output));
    }

    /// Replace the in-progress marker for `step.name`, if any, with `step`.
    fn finish(&mut self, step: Step) {
        if self
            .steps
            .last()
            .is_some_and(|last| last.name == step.name && last.is_running())
        {
            self.steps.pop();
        }
        self.steps.push(step);
    }

    fn commit(&self) {
        if let Err(e) = self.store.save_run_state(self.id, self.status, &self.steps) {
            warn!(job_id = %self.id, "could not persist run state: {e}");
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::EnvironmentSetupError;
    use crate::provision::Provisioned;
    use async_trait::async_trait;
    use flux_core::types::JobSpec;
    use rusqlite::Connection;
    use tokio::sync::Notify;

    /// Provisioner that hands out a fixed launcher, or fails, without
    /// touching any toolchain. Optionally parks until released.
    struct StubProvisioner {
        envs_dir: PathBuf,
        outcome: Result<Launcher, String>,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl Provisioner for StubProvisioner {
        async fn provision(
            &self,
            _job: JobId,
            manifest: &str,
            _runtime: Runtime,
        ) -> Result<Provisioned, EnvironmentSetupError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            match &self.outcome {
                Ok(launcher) => Ok(Provisioned {
                    launcher: launcher.clone(),
                    log: format!("installed [{manifest}]"),
                    elapsed: Duration::from_millis(5),
                }),
                Err(detail) => Err(EnvironmentSetupError::new(
                    detail.clone(),
                    vec![format!("ERROR: No matching distribution found for {manifest}")],
                )),
            }
        }

        fn env_dir(&self, job: JobId) -> PathBuf {
            self.envs_dir.join(job.to_string())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        jobs: Arc<JobStore>,
        secrets: Arc<SecretStore>,
        pipeline: Arc<Pipeline>,
        scripts_dir: PathBuf,
    }

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        flux_store::db::init_db(&conn).unwrap();
        conn
    }

    fn fixture(outcome: Result<Launcher, String>, gate: Option<Arc<Notify>>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let scripts_dir = dir.path().join("scripts");
        let jobs = Arc::new(JobStore::new(memory_db()));
        let secrets = Arc::new(SecretStore::new(memory_db()));
        let provisioner = Arc::new(StubProvisioner {
            envs_dir: dir.path().join("envs"),
            outcome,
            gate,
        });
        let pipeline = Arc::new(Pipeline::new(
            Arc::clone(&jobs),
            Arc::clone(&secrets),
            provisioner,
            ProcessRunner::new(None, 10_000),
            TokenSigner::new("test-key", 60),
            PipelineSettings {
                scripts_dir: scripts_dir.clone(),
                node_bin: "/bin/sh".to_string(),
                api_url: "http://127.0.0.1:8000".to_string(),
                admin_user: "admin".to_string(),
            },
        ));
        Fixture {
            _dir: dir,
            jobs,
            secrets,
            pipeline,
            scripts_dir,
        }
    }

    fn shell() -> Result<Launcher, String> {
        Ok(Launcher::Interpreter(PathBuf::from("/bin/sh")))
    }

    fn create(f: &Fixture, name: &str, code: &str, requirements: &str) -> Job {
        f.jobs
            .create(&JobSpec {
                name: name.to_string(),
                code: code.to_string(),
                requirements: requirements.to_string(),
                cron: "*/5 * * * *".to_string(),
                random_delay: 0,
                enabled: true,
            })
            .unwrap()
    }

    fn names(job: &Job) -> Vec<StepName> {
        job.last_log.iter().map(|s| s.name).collect()
    }

    #[tokio::test]
    async fn successful_run_has_four_steps() {
        let f = fixture(shell(), None);
        let job = create(&f, "hello", "echo hi", "");

        let outcome = f.pipeline.execute(job.id, StartDelay::Fixed(0)).await;
        assert_eq!(outcome, ExecutionOutcome::Finished(RunStatus::Success));

        let job = f.jobs.get(job.id).unwrap().unwrap();
        assert_eq!(job.last_status, Some(RunStatus::Success));
        assert_eq!(
            names(&job),
            vec![
                StepName::Setup,
                StepName::InstallDependencies,
                StepName::RunScript,
                StepName::Complete
            ]
        );
        assert!(job.last_log.iter().all(|s| s.status == StepStatus::Success));
        assert!(job.last_log[2].output.contains("hi"));
        assert!(job.last_log[0].output.contains("Runtime: PYTHON"));
        assert!(!job.last_log[0].output.contains("Sleeping"));
        assert!(f.scripts_dir.join("hello_1.py").exists());
    }

    #[tokio::test]
    async fn nonzero_exit_fails_but_still_completes() {
        let f = fixture(shell(), None);
        let job = create(&f, "bad", "echo nope\nexit 2", "");

        let outcome = f.pipeline.execute(job.id, StartDelay::Fixed(0)).await;
        assert_eq!(outcome, ExecutionOutcome::Finished(RunStatus::Failed));

        let job = f.jobs.get(job.id).unwrap().unwrap();
        assert_eq!(job.last_status, Some(RunStatus::Failed));
        assert_eq!(job.last_log.len(), 4);
        assert_eq!(job.last_log[2].status, StepStatus::Failure);
        assert!(job.last_log[2].output.contains("nope"));
        assert_eq!(job.last_log[3].status, StepStatus::Success);
        assert_eq!(job.last_log[3].duration, "0.1s");
    }

    #[tokio::test]
    async fn install_failure_stops_after_two_steps() {
        let f = fixture(Err("Pip install failed".to_string()), None);
        let job = create(&f, "deps", "print('hi')", "not-a-real-package-xyz");

        let outcome = f.pipeline.execute(job.id, StartDelay::Fixed(0)).await;
        assert_eq!(outcome, ExecutionOutcome::Finished(RunStatus::Failed));

        let job = f.jobs.get(job.id).unwrap().unwrap();
        assert_eq!(job.last_status, Some(RunStatus::Failed));
        assert_eq!(
            names(&job),
            vec![StepName::Setup, StepName::InstallDependencies]
        );
        let install = &job.last_log[1];
        assert_eq!(install.status, StepStatus::Failure);
        assert!(install.output.contains("not-a-real-package-xyz"));
        assert!(install.output.contains("Error: Pip install failed"));
    }

    #[tokio::test]
    async fn spawn_failure_is_an_error_with_three_steps() {
        let f = fixture(
            Ok(Launcher::Interpreter(PathBuf::from("/no/such/python"))),
            None,
        );
        let job = create(&f, "nospawn", "print('hi')", "");

        let outcome = f.pipeline.execute(job.id, StartDelay::Fixed(0)).await;
        assert_eq!(outcome, ExecutionOutcome::Finished(RunStatus::Error));

        let job = f.jobs.get(job.id).unwrap().unwrap();
        assert_eq!(job.last_status, Some(RunStatus::Error));
        assert_eq!(
            names(&job),
            vec![StepName::Setup, StepName::InstallDependencies, StepName::RunScript]
        );
        assert_eq!(job.last_log[2].status, StepStatus::Failure);
        assert!(job.last_log[2].output.contains("failed to spawn"));
    }

    #[tokio::test]
    async fn secrets_token_and_runtime_vars_are_injected() {
        let f = fixture(shell(), None);
        f.secrets.upsert("API_KEY", "s3cret").unwrap();
        let job = create(
            &f,
            "env",
            "echo \"$API_KEY|$FLUX_API_URL|$PYTHONUNBUFFERED\"\necho \"$FLUX_TOKEN\"",
            "",
        );

        f.pipeline.execute(job.id, StartDelay::Fixed(0)).await;
        let job = f.jobs.get(job.id).unwrap().unwrap();
        let output = &job.last_log[2].output;
        let mut lines = output.lines();
        assert_eq!(lines.next(), Some("s3cret|http://127.0.0.1:8000|1"));
        let token = lines.next().unwrap();
        let claims = TokenSigner::new("test-key", 60).verify(token).unwrap();
        assert_eq!(claims.sub, "admin");
    }

    #[tokio::test]
    async fn node_runs_with_node_path() {
        let node_path = PathBuf::from("/envs/7/node_modules");
        let f = fixture(
            Ok(Launcher::Node {
                node_path: node_path.clone(),
            }),
            None,
        );
        let job = create(&f, "js job", "// runtime: node\necho \"NP=$NODE_PATH\"", "axios");

        let outcome = f.pipeline.execute(job.id, StartDelay::Fixed(0)).await;
        assert_eq!(outcome, ExecutionOutcome::Finished(RunStatus::Success));

        let job = f.jobs.get(job.id).unwrap().unwrap();
        assert!(job.last_log[0].output.contains("Runtime: NODE"));
        assert!(job.last_log[1].output.contains("installed [axios]"));
        assert!(job.last_log[2].output.contains("NP=/envs/7/node_modules"));
        assert!(f.scripts_dir.join("js job_1.js").exists());
    }

    #[tokio::test]
    async fn missing_job_is_reported() {
        let f = fixture(shell(), None);
        assert_eq!(
            f.pipeline.execute(JobId(99), StartDelay::Fixed(0)).await,
            ExecutionOutcome::JobNotFound
        );
        assert!(!f.pipeline.is_running(JobId(99)));
    }

    #[tokio::test]
    async fn observers_see_in_progress_install_and_overlap_is_skipped() {
        let gate = Arc::new(Notify::new());
        let f = fixture(shell(), Some(Arc::clone(&gate)));
        let job = create(&f, "slow", "echo done", "");

        let pipeline = Arc::clone(&f.pipeline);
        let id = job.id;
        let handle = tokio::spawn(async move { pipeline.execute(id, StartDelay::Fixed(0)).await });

        // Wait for the run to park inside the provisioner.
        let mut snapshot = None;
        for _ in 0..200 {
            let current = f.jobs.get(id).unwrap().unwrap();
            if current.last_log.len() == 2 {
                snapshot = Some(current);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let snapshot = snapshot.expect("install step never appeared");
        assert_eq!(snapshot.last_status, Some(RunStatus::Running));
        assert_eq!(snapshot.last_log[0].status, StepStatus::Success);
        assert!(snapshot.last_log[1].is_running());
        assert!(f.pipeline.is_running(id));

        assert_eq!(
            f.pipeline.execute(id, StartDelay::Fixed(0)).await,
            ExecutionOutcome::AlreadyRunning
        );

        gate.notify_one();
        assert_eq!(
            handle.await.unwrap(),
            ExecutionOutcome::Finished(RunStatus::Success)
        );
        assert!(!f.pipeline.is_running(id));
        let done = f.jobs.get(id).unwrap().unwrap();
        assert!(done.last_log.iter().all(|s| !s.is_running()));
    }

    #[tokio::test]
    async fn fixed_delay_is_recorded_in_setup() {
        let f = fixture(shell(), None);
        let job = create(&f, "delayed", "echo ok", "");

        f.pipeline.execute(job.id, StartDelay::Fixed(1)).await;
        let job = f.jobs.get(job.id).unwrap().unwrap();
        let setup = &job.last_log[0];
        assert_eq!(setup.status, StepStatus::Success);
        assert!(setup.output.contains("Anti-Bot: Sleeping 1s..."));
        let secs: f64 = setup.duration.trim_end_matches('s').parse().unwrap();
        assert!(secs >= 1.0);
        assert_eq!(names(&job).iter().filter(|n| **n == StepName::Setup).count(), 1);
    }

    #[test]
    fn delay_resolution() {
        let mut rng = rand::rng();
        assert_eq!(StartDelay::Fixed(0).resolve(100, &mut rng), 0);
        assert_eq!(StartDelay::Fixed(7).resolve(0, &mut rng), 7);
        assert_eq!(StartDelay::JobPolicy.resolve(0, &mut rng), 0);

        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..2_000 {
            let secs = StartDelay::JobPolicy.resolve(3, &mut rng);
            assert!(secs <= 3);
            seen.insert(secs);
        }
        assert_eq!(seen.into_iter().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    }
}
