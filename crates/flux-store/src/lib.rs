//! `flux-store`: SQLite persistence for job definitions, their latest run
//! state, and the global secret table.

pub mod db;
pub mod error;
pub mod jobs;
pub mod secrets;

pub use error::{Result, StoreError};
pub use jobs::JobStore;
pub use secrets::SecretStore;
