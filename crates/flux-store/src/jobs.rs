use std::sync::{Mutex, MutexGuard};

use flux_core::types::{Job, JobId, JobSpec, RunStatus, Step};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, StoreError};

const JOB_COLUMNS: &str = "id, name, code, requirements, cron_exp, random_delay, is_active,
                           last_run, last_status, last_log";

/// Timestamp format of `last_run`, in the engine's local time zone.
pub const LAST_RUN_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Thread-safe store for job definitions and their latest run state.
///
/// Wraps a single SQLite connection in a `Mutex`; every call is one short
/// statement so the lock is never held across an await point.
pub struct JobStore {
    db: Mutex<Connection>,
}

impl JobStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave a half-applied statement
        // behind, so a poisoned guard is still usable.
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a new job. Names are unique.
    #[instrument(skip(self, spec), fields(name = %spec.name))]
    pub fn create(&self, spec: &JobSpec) -> Result<Job> {
        let db = self.conn();
        ensure_name_free(&db, &spec.name, None)?;
        db.execute(
            "INSERT INTO jobs (name, code, requirements, cron_exp, random_delay, is_active, last_log)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, '[]')",
            rusqlite::params![
                spec.name,
                spec.code,
                spec.requirements,
                spec.cron,
                spec.random_delay,
                spec.enabled
            ],
        )?;
        let id = JobId(db.last_insert_rowid());
        info!(job_id = %id, "job created");
        Ok(Job {
            id,
            spec: spec.clone(),
            last_run: None,
            last_status: None,
            last_log: Vec::new(),
        })
    }

    /// Replace every user-editable field. Run state is left untouched.
    #[instrument(skip(self, spec), fields(job_id = %id))]
    pub fn update(&self, id: JobId, spec: &JobSpec) -> Result<Job> {
        let db = self.conn();
        ensure_name_free(&db, &spec.name, Some(id))?;
        let n = db.execute(
            "UPDATE jobs SET name = ?1, code = ?2, requirements = ?3, cron_exp = ?4,
                             random_delay = ?5, is_active = ?6
             WHERE id = ?7",
            rusqlite::params![
                spec.name,
                spec.code,
                spec.requirements,
                spec.cron,
                spec.random_delay,
                spec.enabled,
                id.get()
            ],
        )?;
        if n == 0 {
            return Err(not_found(id));
        }
        info!("job updated");
        fetch(&db, id)?.ok_or_else(|| not_found(id))
    }

    /// Permanently delete a job record.
    ///
    /// Its trigger and environment directory are owned by other components
    /// and must be cleaned up by the caller first.
    #[instrument(skip(self), fields(job_id = %id))]
    pub fn delete(&self, id: JobId) -> Result<()> {
        let n = self
            .conn()
            .execute("DELETE FROM jobs WHERE id = ?1", [id.get()])?;
        if n == 0 {
            return Err(not_found(id));
        }
        info!("job deleted");
        Ok(())
    }

    /// Fetch one job, `None` if it does not exist.
    pub fn get(&self, id: JobId) -> Result<Option<Job>> {
        fetch(&self.conn(), id)
    }

    /// All jobs ordered by id.
    pub fn list(&self) -> Result<Vec<Job>> {
        self.query(&format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY id"))
    }

    /// Jobs whose schedule should be installed at startup.
    pub fn list_enabled(&self) -> Result<Vec<Job>> {
        self.query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE is_active = 1 ORDER BY id"
        ))
    }

    /// Commit the run state of an in-flight or finished execution.
    ///
    /// The step log is replaced wholesale together with the status and a
    /// fresh `last_run` stamp, in a single statement, so readers only ever see
    /// a coherent snapshot.
    pub fn save_run_state(&self, id: JobId, status: RunStatus, steps: &[Step]) -> Result<()> {
        let log = serde_json::to_string(steps)?;
        let now = chrono::Local::now().format(LAST_RUN_FORMAT).to_string();
        let n = self.conn().execute(
            "UPDATE jobs SET last_log = ?1, last_status = ?2, last_run = ?3 WHERE id = ?4",
            rusqlite::params![log, status.as_str(), now, id.get()],
        )?;
        if n == 0 {
            // The job was deleted mid-run; there is nothing left to update.
            debug!(job_id = %id, "run state dropped for missing job");
            return Err(not_found(id));
        }
        Ok(())
    }

    fn query(&self, sql: &str) -> Result<Vec<Job>> {
        let db = self.conn();
        let mut stmt = db.prepare(sql)?;
        let jobs = stmt
            .query_map([], row_to_job)?
            .filter_map(|r| match r {
                Ok(job) => Some(job),
                Err(e) => {
                    warn!("skipping unreadable job row: {e}");
                    None
                }
            })
            .collect();
        Ok(jobs)
    }
}

fn fetch(db: &Connection, id: JobId) -> Result<Option<Job>> {
    Ok(db
        .query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
            [id.get()],
            row_to_job,
        )
        .optional()?)
}

fn ensure_name_free(db: &Connection, name: &str, except: Option<JobId>) -> Result<()> {
    let existing: Option<i64> = db
        .query_row(
            "SELECT id FROM jobs WHERE name = ?1",
            [name],
            |row| row.get(0),
        )
        .optional()?;
    match existing {
        Some(other) if Some(JobId(other)) != except => Err(StoreError::NameTaken(name.to_string())),
        _ => Ok(()),
    }
}

fn not_found(id: JobId) -> StoreError {
    StoreError::NotFound {
        kind: "job",
        id: id.get(),
    }
}

/// Map a SQLite row (column order from `JOB_COLUMNS`) to a `Job`.
fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    let last_status: Option<String> = row.get(8)?;
    let last_log: String = row.get(9)?;
    Ok(Job {
        id: JobId(row.get(0)?),
        spec: JobSpec {
            name: row.get(1)?,
            code: row.get(2)?,
            requirements: row.get(3)?,
            cron: row.get(4)?,
            random_delay: row.get(5)?,
            enabled: row.get::<_, i64>(6)? != 0,
        },
        last_run: row.get(7)?,
        // Unknown or corrupt values degrade to "no information" rather than
        // hiding the whole job from listings.
        last_status: last_status.and_then(|s| s.parse().ok()),
        last_log: serde_json::from_str(&last_log).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use flux_core::types::{StepName, StepStatus};
    use std::time::Duration;

    fn store() -> JobStore {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        JobStore::new(conn)
    }

    fn spec(name: &str) -> JobSpec {
        JobSpec {
            name: name.to_string(),
            code: "print('hi')".to_string(),
            requirements: String::new(),
            cron: "*/5 * * * *".to_string(),
            random_delay: 0,
            enabled: true,
        }
    }

    #[test]
    fn create_then_get() {
        let store = store();
        let job = store.create(&spec("hello")).unwrap();
        let loaded = store.get(job.id).unwrap().unwrap();
        assert_eq!(loaded, job);
        assert!(loaded.last_log.is_empty());
        assert!(loaded.last_status.is_none());
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let store = store();
        store.create(&spec("hello")).unwrap();
        assert!(matches!(
            store.create(&spec("hello")),
            Err(StoreError::NameTaken(_))
        ));
    }

    #[test]
    fn update_keeps_own_name_and_run_state() {
        let store = store();
        let job = store.create(&spec("hello")).unwrap();
        store
            .save_run_state(job.id, RunStatus::Success, &[])
            .unwrap();

        let mut changed = spec("hello");
        changed.cron = "0 * * * *".to_string();
        changed.enabled = false;
        let updated = store.update(job.id, &changed).unwrap();

        assert_eq!(updated.spec.cron, "0 * * * *");
        assert!(!updated.is_enabled());
        assert_eq!(updated.last_status, Some(RunStatus::Success));
    }

    #[test]
    fn update_to_taken_name_fails() {
        let store = store();
        store.create(&spec("a")).unwrap();
        let b = store.create(&spec("b")).unwrap();
        assert!(matches!(
            store.update(b.id, &spec("a")),
            Err(StoreError::NameTaken(_))
        ));
    }

    #[test]
    fn update_and_delete_missing_job() {
        let store = store();
        assert!(matches!(
            store.update(JobId(42), &spec("x")),
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.delete(JobId(42)),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn list_enabled_skips_disabled_jobs() {
        let store = store();
        store.create(&spec("on")).unwrap();
        let mut off = spec("off");
        off.enabled = false;
        store.create(&off).unwrap();

        assert_eq!(store.list().unwrap().len(), 2);
        let enabled = store.list_enabled().unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].name(), "on");
    }

    #[test]
    fn save_run_state_replaces_log() {
        let store = store();
        let job = store.create(&spec("hello")).unwrap();
        let steps = vec![
            Step::finished(StepName::Setup, StepStatus::Success, Duration::ZERO, "ok"),
            Step::running(StepName::InstallDependencies, "Installing..."),
        ];
        store
            .save_run_state(job.id, RunStatus::Running, &steps)
            .unwrap();

        let loaded = store.get(job.id).unwrap().unwrap();
        assert_eq!(loaded.last_log, steps);
        assert_eq!(loaded.last_status, Some(RunStatus::Running));
        assert!(loaded.last_run.is_some());

        store
            .save_run_state(job.id, RunStatus::Failed, &steps[..1])
            .unwrap();
        let loaded = store.get(job.id).unwrap().unwrap();
        assert_eq!(loaded.last_log.len(), 1);
        assert_eq!(loaded.last_status, Some(RunStatus::Failed));
    }

    #[test]
    fn save_run_state_for_deleted_job_reports_not_found() {
        let store = store();
        let job = store.create(&spec("gone")).unwrap();
        store.delete(job.id).unwrap();
        assert!(store.get(job.id).unwrap().is_none());
        assert!(matches!(
            store.save_run_state(job.id, RunStatus::Running, &[]),
            Err(StoreError::NotFound { .. })
        ));
    }
}
