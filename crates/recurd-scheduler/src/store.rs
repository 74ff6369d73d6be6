//! SQLite-backed persistence for jobs and their execution history.
//!
//! The store is the source of truth for job configuration and counters; the
//! engine reads rows back whenever it needs the authoritative state.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;

use crate::db::init_db;
use crate::error::Result;
use crate::types::{Execution, ExecutionFilter, Job, JobStatus};

const JOB_COLUMNS: &str = "id, name, job_key, function_name, cron_expression, args, times,
     times_run, status, error_count, last_error, last_run_at, next_run_at,
     created_at, updated_at";

const EXECUTION_COLUMNS: &str =
    "id, recurring_job_id, started_at, finished_at, success, error, output, duration_ms";

/// Fields written when a job row is first created.
#[derive(Debug, Clone)]
pub struct NewJob<'a> {
    pub name: &'a str,
    pub job_key: &'a str,
    pub function_name: &'a str,
    pub cron_expression: &'a str,
    pub args: &'a str,
    pub times: u32,
}

/// Result of one invocation, folded into the job's counters by [`JobStore::record_run`].
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub started_at: DateTime<Utc>,
    /// `None` on success, the error text otherwise.
    pub error: Option<String>,
    pub next_run_at: Option<DateTime<Utc>>,
}

/// Persistent storage for recurring jobs.
#[derive(Clone)]
pub struct JobStore {
    conn: Arc<Mutex<Connection>>,
}

impl JobStore {
    /// Wrap an open connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open (or create) the database file at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = Self::new(conn)?;
        info!(path = %path.display(), "job store opened");
        Ok(store)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ─── Jobs ───────────────────────────────────────────────

    /// Whether `name` is used by a job other than `except`.
    pub fn name_taken(&self, name: &str, except: Option<i64>) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM recurring_jobs WHERE name = ?1 AND id != ?2",
            params![name, except.unwrap_or(-1)],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Insert a new job with `status = active` and zeroed counters.
    pub fn insert_job(&self, job: &NewJob<'_>) -> Result<Job> {
        let conn = self.conn();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO recurring_jobs
             (name, job_key, function_name, cron_expression, args, times,
              status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'active', ?7, ?7)",
            params![
                job.name,
                job.job_key,
                job.function_name,
                job.cron_expression,
                job.args,
                job.times,
                now
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(query_job(&conn, id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?)
    }

    pub fn get_job(&self, id: i64) -> Result<Option<Job>> {
        query_job(&self.conn(), id)
    }

    pub fn find_job(&self, name: &str) -> Result<Option<Job>> {
        let job = self
            .conn()
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM recurring_jobs WHERE name = ?1"),
                [name],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    /// All jobs ordered by name.
    pub fn list_jobs(&self) -> Result<Vec<Job>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare(&format!("SELECT {JOB_COLUMNS} FROM recurring_jobs ORDER BY name"))?;
        let jobs = stmt
            .query_map([], job_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    pub fn list_jobs_with_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM recurring_jobs WHERE status = ?1 ORDER BY id"
        ))?;
        let jobs = stmt
            .query_map([status.to_string()], job_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    /// Rewrite the configuration fields and status. Counters are left untouched.
    pub fn update_config(&self, job: &Job) -> Result<()> {
        self.conn().execute(
            "UPDATE recurring_jobs
             SET name = ?1, function_name = ?2, cron_expression = ?3, args = ?4,
                 times = ?5, status = ?6, next_run_at = ?7, updated_at = ?8
             WHERE id = ?9",
            params![
                job.name,
                job.function_name,
                job.cron_expression,
                job.args,
                job.times,
                job.status.to_string(),
                job.next_run_at,
                Utc::now(),
                job.id
            ],
        )?;
        Ok(())
    }

    /// Set the status; any status other than active also clears `next_run_at`.
    pub fn set_status(&self, id: i64, status: JobStatus) -> Result<()> {
        self.conn().execute(
            "UPDATE recurring_jobs
             SET status = ?1,
                 next_run_at = CASE WHEN ?1 = 'active' THEN next_run_at END,
                 updated_at = ?2
             WHERE id = ?3",
            params![status.to_string(), Utc::now(), id],
        )?;
        Ok(())
    }

    /// Record a scheduling failure: `status = error` plus the message.
    pub fn mark_error(&self, id: i64, message: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE recurring_jobs
             SET status = 'error', last_error = ?1, next_run_at = NULL, updated_at = ?2
             WHERE id = ?3",
            params![message, Utc::now(), id],
        )?;
        Ok(())
    }

    /// Persist the handle of a freshly created live timer.
    pub fn set_timer(&self, id: i64, job_key: &str, next_run_at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "UPDATE recurring_jobs SET job_key = ?1, next_run_at = ?2, updated_at = ?3
             WHERE id = ?4",
            params![job_key, next_run_at, Utc::now(), id],
        )?;
        Ok(())
    }

    /// Advance `next_run_at` without touching the timer key. Only applies to
    /// active rows.
    pub fn set_next_run_at(&self, id: i64, next_run_at: Option<DateTime<Utc>>) -> Result<()> {
        self.conn().execute(
            "UPDATE recurring_jobs SET next_run_at = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'active'",
            params![next_run_at, Utc::now(), id],
        )?;
        Ok(())
    }

    /// Hard delete. Execution history goes with the job.
    pub fn delete_job(&self, id: i64) -> Result<bool> {
        let n = self
            .conn()
            .execute("DELETE FROM recurring_jobs WHERE id = ?1", [id])?;
        Ok(n > 0)
    }

    /// Fold one finished invocation into the job's counters.
    ///
    /// Runs in a single transaction so concurrent invocations can't lose an
    /// increment. An active job that reaches its run budget becomes
    /// `completed`. Returns the updated row, or `None` if the job was deleted
    /// in the meantime.
    pub fn record_run(&self, id: i64, outcome: &RunOutcome) -> Result<Option<Job>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let Some(current) = query_job(&tx, id)? else {
            return Ok(None);
        };

        let times_run = current.times_run.saturating_add(1);
        let (error_count, last_error) = match &outcome.error {
            Some(e) => (current.error_count.saturating_add(1), e.as_str()),
            None => (current.error_count, current.last_error.as_str()),
        };
        let completes =
            current.status == JobStatus::Active && current.times > 0 && times_run >= current.times;
        let (status, next_run_at) = if completes {
            (JobStatus::Completed, None)
        } else {
            (current.status, outcome.next_run_at.or(current.next_run_at))
        };

        tx.execute(
            "UPDATE recurring_jobs
             SET times_run = ?1, error_count = ?2, last_error = ?3, last_run_at = ?4,
                 status = ?5, next_run_at = ?6, updated_at = ?7
             WHERE id = ?8",
            params![
                times_run,
                error_count,
                last_error,
                outcome.started_at,
                status.to_string(),
                next_run_at,
                Utc::now(),
                id
            ],
        )?;
        let updated = query_job(&tx, id)?;
        tx.commit()?;
        Ok(updated)
    }

    // ─── Executions ─────────────────────────────────────────

    /// Open an execution record (`finished_at` NULL).
    pub fn insert_execution(&self, job_id: i64, started_at: DateTime<Utc>) -> Result<Execution> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO recurring_job_executions (recurring_job_id, started_at)
             VALUES (?1, ?2)",
            params![job_id, started_at],
        )?;
        Ok(Execution {
            id: conn.last_insert_rowid(),
            job_id,
            started_at,
            finished_at: None,
            success: false,
            error: String::new(),
            output: String::new(),
            duration_ms: 0,
        })
    }

    /// Finalise an execution. Rows that are already finished are never touched again.
    pub fn finish_execution(&self, execution: &Execution) -> Result<bool> {
        let n = self.conn().execute(
            "UPDATE recurring_job_executions
             SET finished_at = ?1, success = ?2, error = ?3, output = ?4, duration_ms = ?5
             WHERE id = ?6 AND finished_at IS NULL",
            params![
                execution.finished_at,
                execution.success,
                execution.error,
                execution.output,
                execution.duration_ms,
                execution.id
            ],
        )?;
        Ok(n > 0)
    }

    pub fn get_execution(&self, id: i64) -> Result<Option<Execution>> {
        let execution = self
            .conn()
            .query_row(
                &format!("SELECT {EXECUTION_COLUMNS} FROM recurring_job_executions WHERE id = ?1"),
                [id],
                execution_from_row,
            )
            .optional()?;
        Ok(execution)
    }

    /// Execution history, newest first.
    pub fn list_executions(&self, filter: &ExecutionFilter) -> Result<Vec<Execution>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM recurring_job_executions
             WHERE (?1 IS NULL OR recurring_job_id = ?1)
               AND (?2 IS NULL OR success = ?2)
             ORDER BY id DESC
             LIMIT ?3"
        ))?;
        let limit = filter.limit.map(i64::from).unwrap_or(-1);
        let executions = stmt
            .query_map(params![filter.job_id, filter.success, limit], execution_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(executions)
    }
}

fn query_job(conn: &Connection, id: i64) -> Result<Option<Job>> {
    let job = conn
        .query_row(
            &format!("SELECT {JOB_COLUMNS} FROM recurring_jobs WHERE id = ?1"),
            [id],
            job_from_row,
        )
        .optional()?;
    Ok(job)
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    let status: String = row.get(8)?;
    let status = status.parse::<JobStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(Job {
        id: row.get(0)?,
        name: row.get(1)?,
        job_key: row.get(2)?,
        function_name: row.get(3)?,
        cron_expression: row.get(4)?,
        args: row.get(5)?,
        times: row.get(6)?,
        times_run: row.get(7)?,
        status,
        error_count: row.get(9)?,
        last_error: row.get(10)?,
        last_run_at: row.get(11)?,
        next_run_at: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

fn execution_from_row(row: &Row<'_>) -> rusqlite::Result<Execution> {
    Ok(Execution {
        id: row.get(0)?,
        job_id: row.get(1)?,
        started_at: row.get(2)?,
        finished_at: row.get(3)?,
        success: row.get(4)?,
        error: row.get(5)?,
        output: row.get(6)?,
        duration_ms: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_job<'a>(name: &'a str, times: u32) -> NewJob<'a> {
        NewJob {
            name,
            job_key: "key",
            function_name: "log",
            cron_expression: "* * * * *",
            args: "",
            times,
        }
    }

    fn outcome(error: Option<&str>) -> RunOutcome {
        RunOutcome {
            started_at: Utc::now(),
            error: error.map(String::from),
            next_run_at: None,
        }
    }

    #[test]
    fn insert_and_fetch() {
        let store = JobStore::open_in_memory().unwrap();
        let job = store.insert_job(&new_job("nightly", 0)).unwrap();

        assert_eq!(job.status, JobStatus::Active);
        assert_eq!(job.times_run, 0);
        assert_eq!(store.get_job(job.id).unwrap(), Some(job.clone()));
        assert_eq!(store.find_job("nightly").unwrap(), Some(job));
        assert_eq!(store.find_job("other").unwrap(), None);
    }

    #[test]
    fn names_are_unique() {
        let store = JobStore::open_in_memory().unwrap();
        let job = store.insert_job(&new_job("a", 0)).unwrap();

        assert!(store.name_taken("a", None).unwrap());
        assert!(!store.name_taken("a", Some(job.id)).unwrap());
        assert!(store.insert_job(&new_job("a", 0)).is_err());
        assert_eq!(store.list_jobs().unwrap().len(), 1);
    }

    #[test]
    fn record_run_counts_and_completes() {
        let store = JobStore::open_in_memory().unwrap();
        let job = store.insert_job(&new_job("twice", 2)).unwrap();

        let after_first = store.record_run(job.id, &outcome(None)).unwrap().unwrap();
        assert_eq!(after_first.times_run, 1);
        assert_eq!(after_first.status, JobStatus::Active);
        assert!(after_first.last_run_at.is_some());

        let after_second = store
            .record_run(job.id, &outcome(Some("disk full")))
            .unwrap()
            .unwrap();
        assert_eq!(after_second.times_run, 2);
        assert_eq!(after_second.error_count, 1);
        assert_eq!(after_second.last_error, "disk full");
        assert_eq!(after_second.status, JobStatus::Completed);
        assert_eq!(after_second.next_run_at, None);
    }

    #[test]
    fn record_run_keeps_last_error_on_success() {
        let store = JobStore::open_in_memory().unwrap();
        let job = store.insert_job(&new_job("flaky", 0)).unwrap();
        store.record_run(job.id, &outcome(Some("timeout"))).unwrap();
        let job = store.record_run(job.id, &outcome(None)).unwrap().unwrap();
        assert_eq!(job.error_count, 1);
        assert_eq!(job.last_error, "timeout");
        assert_eq!(job.times_run, 2);
    }

    #[test]
    fn paused_job_is_not_completed_by_a_late_run() {
        let store = JobStore::open_in_memory().unwrap();
        let job = store.insert_job(&new_job("once", 1)).unwrap();
        store.set_status(job.id, JobStatus::Paused).unwrap();

        let job = store.record_run(job.id, &outcome(None)).unwrap().unwrap();
        assert_eq!(job.times_run, 1);
        assert_eq!(job.status, JobStatus::Paused);
    }

    #[test]
    fn record_run_on_deleted_job() {
        let store = JobStore::open_in_memory().unwrap();
        let job = store.insert_job(&new_job("gone", 0)).unwrap();
        assert!(store.delete_job(job.id).unwrap());
        assert!(store.record_run(job.id, &outcome(None)).unwrap().is_none());
        assert!(!store.delete_job(job.id).unwrap());
    }

    #[test]
    fn executions_finalise_once_and_cascade() {
        let store = JobStore::open_in_memory().unwrap();
        let job = store.insert_job(&new_job("hist", 0)).unwrap();

        let mut exec = store.insert_execution(job.id, Utc::now()).unwrap();
        assert!(!store.get_execution(exec.id).unwrap().unwrap().is_finished());

        exec.finished_at = Some(Utc::now());
        exec.success = true;
        exec.output = "[2026-01-01 00:00:00.000] [INFO] ok".into();
        assert!(store.finish_execution(&exec).unwrap());

        exec.success = false;
        assert!(!store.finish_execution(&exec).unwrap());
        assert!(store.get_execution(exec.id).unwrap().unwrap().success);

        store.delete_job(job.id).unwrap();
        assert!(store.get_execution(exec.id).unwrap().is_none());
    }

    #[test]
    fn execution_filters() {
        let store = JobStore::open_in_memory().unwrap();
        let a = store.insert_job(&new_job("a", 0)).unwrap();
        let b = store.insert_job(&new_job("b", 0)).unwrap();
        for (job, success) in [(&a, true), (&a, false), (&a, true), (&b, true)] {
            let mut exec = store.insert_execution(job.id, Utc::now()).unwrap();
            exec.finished_at = Some(Utc::now());
            exec.success = success;
            store.finish_execution(&exec).unwrap();
        }

        let all_a = store.list_executions(&ExecutionFilter::for_job(a.id)).unwrap();
        assert_eq!(all_a.len(), 3);
        assert!(all_a[0].id > all_a[1].id);

        let failed = store
            .list_executions(&ExecutionFilter {
                success: Some(false),
                ..ExecutionFilter::default()
            })
            .unwrap();
        assert_eq!(failed.len(), 1);

        let limited = store
            .list_executions(&ExecutionFilter {
                limit: Some(2),
                ..ExecutionFilter::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn status_changes_clear_next_run() {
        let store = JobStore::open_in_memory().unwrap();
        let job = store.insert_job(&new_job("t", 0)).unwrap();
        store.set_timer(job.id, "t_new", Utc::now()).unwrap();
        assert!(store.get_job(job.id).unwrap().unwrap().next_run_at.is_some());

        store.set_status(job.id, JobStatus::Paused).unwrap();
        let paused = store.get_job(job.id).unwrap().unwrap();
        assert_eq!(paused.job_key, "t_new");
        assert_eq!(paused.next_run_at, None);

        store.mark_error(job.id, "bad").unwrap();
        let errored = store.get_job(job.id).unwrap().unwrap();
        assert_eq!(errored.status, JobStatus::Error);
        assert_eq!(errored.last_error, "bad");
        assert_eq!(store.list_jobs_with_status(JobStatus::Error).unwrap().len(), 1);
    }

    #[test]
    fn next_run_moves_only_on_active_rows() {
        use chrono::TimeZone;

        let store = JobStore::open_in_memory().unwrap();
        let job = store.insert_job(&new_job("t", 0)).unwrap();
        let first = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2026, 3, 1, 10, 1, 0).unwrap();
        store.set_timer(job.id, "t_key", first).unwrap();

        store.set_next_run_at(job.id, Some(second)).unwrap();
        let moved = store.get_job(job.id).unwrap().unwrap();
        assert_eq!(moved.next_run_at, Some(second));
        assert_eq!(moved.job_key, "t_key");

        store.set_status(job.id, JobStatus::Paused).unwrap();
        store.set_next_run_at(job.id, Some(first)).unwrap();
        assert_eq!(store.get_job(job.id).unwrap().unwrap().next_run_at, None);
    }
}
