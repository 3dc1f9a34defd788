use std::sync::Arc;

use chrono::{DateTime, Local};
use dashmap::DashMap;
use flux_core::types::{Job, JobId};
use flux_runner::{Pipeline, StartDelay};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cron_expr::CronExpr;

/// What `upsert` did with a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A trigger is installed and will fire at the next matching minute.
    Scheduled,
    /// The job is disabled; any previous trigger was removed.
    Disabled,
    /// The cron expression was unusable; the job is left unscheduled.
    InvalidCron,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// An execution was spawned; the caller does not wait for it.
    Started,
    /// The job is already executing; no new run was started.
    AlreadyRunning,
}

/// Table of cron triggers keyed by job id.
///
/// Constructed once at startup and shared (`Arc`) with the HTTP handlers and
/// the shutdown path.
pub struct TriggerScheduler {
    pipeline: Arc<Pipeline>,
    triggers: DashMap<JobId, JoinHandle<()>>,
}

impl TriggerScheduler {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            triggers: DashMap::new(),
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Install or replace the trigger for `job`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn upsert(&self, job: &Job) -> UpsertOutcome {
        self.abort(job.id);

        if !job.is_enabled() {
            debug!(job_id = %job.id, "job disabled; not scheduled");
            return UpsertOutcome::Disabled;
        }

        let cron = match CronExpr::parse(&job.spec.cron) {
            Ok(cron) => cron,
            Err(e) => {
                warn!(job_id = %job.id, "not scheduling job: {e}");
                return UpsertOutcome::InvalidCron;
            }
        };

        let Some(next) = cron.next_after(&Local::now()) else {
            warn!(job_id = %job.id, cron = %cron, "cron never fires; not scheduling job");
            return UpsertOutcome::InvalidCron;
        };
        info!(
            job_id = %job.id,
            name = %job.name(),
            cron = %cron,
            next = %next.to_rfc3339(),
            "job scheduled"
        );

        let handle = tokio::spawn(run_trigger(Arc::clone(&self.pipeline), job.id, cron));
        // A concurrent upsert for the same id may have raced us in.
        if let Some(previous) = self.triggers.insert(job.id, handle) {
            previous.abort();
        }
        UpsertOutcome::Scheduled
    }

    /// Uninstall the trigger for `id`. Runs already in flight are not touched.
    pub fn remove(&self, id: JobId) -> RemoveOutcome {
        if self.abort(id) {
            info!(job_id = %id, "job unscheduled");
            RemoveOutcome::Removed
        } else {
            RemoveOutcome::NotFound
        }
    }

    /// Start an execution of `id` now with no start delay, without waiting.
    pub fn trigger_now(&self, id: JobId) -> TriggerOutcome {
        if self.pipeline.is_running(id) {
            info!(job_id = %id, "manual run requested while running; ignored");
            return TriggerOutcome::AlreadyRunning;
        }
        let pipeline = Arc::clone(&self.pipeline);
        tokio::spawn(async move {
            pipeline.execute(id, StartDelay::Fixed(0)).await;
        });
        info!(job_id = %id, "manual run started");
        TriggerOutcome::Started
    }

    /// Schedule every job in `jobs` and return how many got a trigger.
    pub fn rebuild(&self, jobs: &[Job]) -> usize {
        let scheduled = jobs
            .iter()
            .filter(|job| self.upsert(job) == UpsertOutcome::Scheduled)
            .count();
        info!(scheduled, total = jobs.len(), "schedule rebuilt");
        scheduled
    }

    /// Abort every trigger.
    pub fn shutdown(&self) {
        let ids: Vec<JobId> = self.triggers.iter().map(|e| *e.key()).collect();
        for id in &ids {
            self.abort(*id);
        }
        info!(count = ids.len(), "scheduler stopped");
    }

    pub fn active_count(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_scheduled(&self, id: JobId) -> bool {
        self.triggers.contains_key(&id)
    }

    fn abort(&self, id: JobId) -> bool {
        match self.triggers.remove(&id) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

impl Drop for TriggerScheduler {
    fn drop(&mut self) {
        for entry in self.triggers.iter() {
            entry.value().abort();
        }
    }
}

/// Sleep until each fire time and spawn a run, forever.
async fn run_trigger(pipeline: Arc<Pipeline>, id: JobId, cron: CronExpr) {
    let mut cursor = Local::now();
    loop {
        let Some(next) = cron.next_after(&cursor) else {
            warn!(job_id = %id, cron = %cron, "no upcoming fire time; trigger stopped");
            return;
        };
        tokio::time::sleep(until(next, Local::now())).await;

        debug!(job_id = %id, "cron fired");
        let run = Arc::clone(&pipeline);
        tokio::spawn(async move {
            run.execute(id, StartDelay::JobPolicy).await;
        });

        // Never fire the same minute twice, and skip minutes missed while the
        // host was suspended.
        cursor = next.max(Local::now());
    }
}

fn until(target: DateTime<Local>, now: DateTime<Local>) -> std::time::Duration {
    (target - now).to_std().unwrap_or_default()
}
