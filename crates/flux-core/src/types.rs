use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

/// Database-assigned identifier of a job.
///
/// Also keys the job's environment directory and script file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl JobId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for JobId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

/// Interpreter family a script runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    #[default]
    Python,
    Node,
}

impl Runtime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Runtime::Python => "python",
            Runtime::Node => "node",
        }
    }

    /// File extension (with leading dot) used for the materialized script.
    pub fn script_extension(&self) -> &'static str {
        match self {
            Runtime::Python => ".py",
            Runtime::Node => ".js",
        }
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// The fixed, ordered stages of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepName {
    #[serde(rename = "Set up job")]
    Setup,
    #[serde(rename = "Install dependencies")]
    InstallDependencies,
    #[serde(rename = "Run script")]
    RunScript,
    #[serde(rename = "Complete job")]
    Complete,
}

impl StepName {
    pub fn label(&self) -> &'static str {
        match self {
            StepName::Setup => "Set up job",
            StepName::InstallDependencies => "Install dependencies",
            StepName::RunScript => "Run script",
            StepName::Complete => "Complete job",
        }
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Status of a single step. Serialized as the integer codes the log viewer
/// expects: 0 success, 1 failure, 2 in progress, 3 pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum StepStatus {
    Success,
    Failure,
    Running,
    Pending,
}

impl From<StepStatus> for u8 {
    fn from(status: StepStatus) -> u8 {
        match status {
            StepStatus::Success => 0,
            StepStatus::Failure => 1,
            StepStatus::Running => 2,
            StepStatus::Pending => 3,
        }
    }
}

impl TryFrom<u8> for StepStatus {
    type Error = String;

    fn try_from(code: u8) -> std::result::Result<Self, Self::Error> {
        match code {
            0 => Ok(StepStatus::Success),
            1 => Ok(StepStatus::Failure),
            2 => Ok(StepStatus::Running),
            3 => Ok(StepStatus::Pending),
            other => Err(format!("unknown step status code: {other}")),
        }
    }
}

/// One stage of an execution as persisted in the job's step log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub name: StepName,
    pub status: StepStatus,
    /// `"1.23s"` once finished, `"..."` while in progress.
    pub duration: String,
    pub output: String,
}

impl Step {
    /// An in-progress marker for `name`.
    pub fn running(name: StepName, output: impl Into<String>) -> Self {
        Self {
            name,
            status: StepStatus::Running,
            duration: "...".to_string(),
            output: output.into(),
        }
    }

    /// A finished step with its measured duration.
    pub fn finished(
        name: StepName,
        status: StepStatus,
        elapsed: Duration,
        output: impl Into<String>,
    ) -> Self {
        Self {
            name,
            status,
            duration: format_duration(elapsed),
            output: output.into(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == StepStatus::Running
    }
}

/// Render a duration the way step logs show it: seconds with two decimals.
pub fn format_duration(elapsed: Duration) -> String {
    format!("{:.2}s", elapsed.as_secs_f64())
}

// ---------------------------------------------------------------------------
// RunStatus
// ---------------------------------------------------------------------------

/// Terminal (or in-flight) status of a job's most recent execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Success,
    Failed,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "Running",
            RunStatus::Success => "Success",
            RunStatus::Failed => "Failed",
            RunStatus::Error => "Error",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Running" => Ok(RunStatus::Running),
            "Success" => Ok(RunStatus::Success),
            "Failed" => Ok(RunStatus::Failed),
            "Error" => Ok(RunStatus::Error),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// The user-editable part of a job. Create and update both take a full spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub code: String,
    /// Dependency manifest: a requirements file for Python, package names for Node.
    #[serde(default)]
    pub requirements: String,
    /// Five-field cron expression.
    pub cron: String,
    /// Upper bound (seconds) of the random start delay. 0 disables it.
    #[serde(default, rename = "delay")]
    pub random_delay: u32,
    #[serde(default = "bool_true")]
    pub enabled: bool,
}

fn bool_true() -> bool {
    true
}

/// A persisted job record, including the state of its most recent execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    #[serde(flatten)]
    pub spec: JobSpec,
    /// Local wall-clock time (`%Y-%m-%d %H:%M:%S`) of the last state commit.
    pub last_run: Option<String>,
    pub last_status: Option<RunStatus>,
    pub last_log: Vec<Step>,
}

impl Job {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn is_enabled(&self) -> bool {
        self.spec.enabled
    }
}

/// A secret as exposed to API listings. The value is never included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretEntry {
    pub id: i64,
    pub key: String,
}
