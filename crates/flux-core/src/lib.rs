//! `flux-core`: types, configuration and credentials shared by every flux crate.

pub mod config;
pub mod error;
pub mod token;
pub mod types;

pub use error::{FluxError, Result};
pub use types::{Job, JobId, JobSpec, RunStatus, Runtime, SecretEntry, Step, StepName, StepStatus};
