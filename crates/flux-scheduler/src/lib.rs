//! `flux-scheduler`: cron triggers for the execution pipeline.
//!
//! Every enabled job with a valid five-field cron expression owns one tokio
//! task that sleeps until the next fire time (local time zone) and then
//! spawns [`flux_runner::Pipeline::execute`]. The table of those tasks lives
//! in a [`TriggerScheduler`] built once at startup and shared with the API.
//!
//! # Outcomes
//!
//! | Operation     | Outcomes                                      |
//! |---------------|-----------------------------------------------|
//! | `upsert`      | `Scheduled`, `Disabled`, `InvalidCron`        |
//! | `remove`      | `Removed`, `NotFound`                         |
//! | `trigger_now` | `Started`, `AlreadyRunning`                   |

pub mod cron_expr;
pub mod error;
pub mod scheduler;

pub use cron_expr::CronExpr;
pub use error::{Result, SchedulerError};
pub use scheduler::{RemoveOutcome, TriggerOutcome, TriggerScheduler, UpsertOutcome};
