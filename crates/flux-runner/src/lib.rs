//! `flux-runner`: the job execution engine.
//!
//! An execution moves through four persisted steps:
//!
//! | Step                 | Work                                                    |
//! |----------------------|---------------------------------------------------------|
//! | Set up job           | detect the runtime, honour the random start delay       |
//! | Install dependencies | provision the per-job environment ([`Provisioner`])     |
//! | Run script           | materialize the script and launch it ([`ProcessRunner`]) |
//! | Complete job         | bookkeeping marker                                      |
//!
//! The step log is committed to the [`flux_store::JobStore`] after every
//! transition so observers can follow a run live.

pub mod detect;
pub mod error;
pub mod pipeline;
pub mod process;
pub mod provision;
pub mod script;
pub mod truncate;

pub use detect::detect;
pub use error::{EnvironmentSetupError, ExecutionError};
pub use pipeline::{ExecutionOutcome, Pipeline, PipelineSettings, StartDelay};
pub use process::{ProcessOutput, ProcessRunner};
pub use provision::{Launcher, Provisioned, Provisioner, ToolchainProvisioner};
