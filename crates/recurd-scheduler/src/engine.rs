use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use recurd_core::config::SchedulerConfig;
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    error::{Result, SchedulerError},
    registry::{FunctionRegistry, JobFunction},
    schedule::CronSchedule,
    store::{JobStore, NewJob},
    types::{Execution, ExecutionFilter, Job, JobSpec, JobStatus},
};

/// In-memory timer for one active job. Holds the job id only; every firing
/// re-reads the row.
#[derive(Debug)]
pub(crate) struct LiveTimer {
    pub(crate) job_id: i64,
    pub(crate) name: String,
    pub(crate) schedule: CronSchedule,
    pub(crate) next_due: DateTime<Utc>,
}

/// Everything guarded by the engine's single lock.
#[derive(Default)]
pub(crate) struct State {
    pub(crate) running: bool,
    /// job_key → timer.
    pub(crate) timers: HashMap<String, LiveTimer>,
    /// Jobs with an invocation between precondition check and counter commit.
    pub(crate) in_flight: HashSet<i64>,
    /// Parent of every invocation's cancellation token; replaced on start.
    pub(crate) cancel: CancellationToken,
    shutdown: Option<watch::Sender<bool>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl State {
    /// Drop the live timer for `job_key`, if any.
    pub(crate) fn deschedule(&mut self, job_key: &str) -> bool {
        let removed = self.timers.remove(job_key);
        if let Some(timer) = &removed {
            debug!(job_id = timer.job_id, job = %timer.name, "live timer removed");
        }
        removed.is_some()
    }

    pub(crate) fn next_due_for(&self, job_id: i64) -> Option<DateTime<Utc>> {
        self.timers
            .values()
            .find(|t| t.job_id == job_id)
            .map(|t| t.next_due)
    }
}

pub(crate) struct Inner {
    pub(crate) store: JobStore,
    pub(crate) registry: FunctionRegistry,
    pub(crate) state: Mutex<State>,
    pub(crate) tick_interval: Duration,
    pub(crate) execution_timeout: Duration,
}

/// Owns the schedule: turns persisted job definitions into live timers,
/// dispatches due timers to the runner and applies administrative changes.
///
/// Cheap to clone; all clones drive the same engine.
#[derive(Clone)]
pub struct SchedulerEngine {
    pub(crate) inner: Arc<Inner>,
}

impl SchedulerEngine {
    pub fn new(store: JobStore, config: &SchedulerConfig) -> Self {
        Self::with_timings(store, config.tick_interval(), config.execution_timeout())
    }

    pub fn with_timings(store: JobStore, tick_interval: Duration, execution_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                registry: FunctionRegistry::new(),
                state: Mutex::new(State::default()),
                tick_interval,
                execution_timeout,
            }),
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.inner.store
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.inner.registry
    }

    /// Register (or replace) a job function.
    pub fn register(&self, name: impl Into<String>, function: impl JobFunction) {
        self.inner.registry.register(name, function);
    }

    pub fn registered_functions(&self) -> Vec<String> {
        self.inner.registry.names()
    }

    pub async fn is_running(&self) -> bool {
        self.inner.state.lock().await.running
    }

    // ─── Lifecycle ──────────────────────────────────────────

    /// Load every active job, schedule it and start the dispatch loop.
    ///
    /// A job that cannot be scheduled is marked `error` and logged; it does not
    /// fail the start. Calling start on a running engine does nothing.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if state.running {
            return Ok(());
        }

        let jobs = self.inner.store.list_jobs_with_status(JobStatus::Active)?;
        let now = Utc::now();
        let mut scheduled = 0usize;
        for mut job in jobs {
            match self.schedule_locked(&mut state, &mut job, now) {
                Ok(Some(_)) => scheduled += 1,
                Ok(None) => {}
                Err(e) => {
                    warn!(job_id = job.id, job = %job.name, error = %e, "failed to restore job");
                    if let Err(e) = self.inner.store.mark_error(job.id, &e.to_string()) {
                        error!(job_id = job.id, error = %e, "failed to record scheduling error");
                    }
                }
            }
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        state.running = true;
        state.cancel = CancellationToken::new();
        state.shutdown = Some(shutdown_tx);
        let engine = self.clone();
        state.dispatcher = Some(tokio::spawn(async move {
            engine.run_dispatcher(shutdown_rx).await
        }));

        info!(jobs = scheduled, "scheduler engine started");
        Ok(())
    }

    /// Halt the dispatch loop and release every live timer.
    ///
    /// In-flight invocations see their context cancelled and may still finish;
    /// no new invocation is admitted once stop begins.
    pub async fn stop(&self) {
        let dispatcher = {
            let mut state = self.inner.state.lock().await;
            if !state.running {
                return;
            }
            info!("scheduler engine shutting down");
            state.running = false;
            if let Some(tx) = state.shutdown.take() {
                let _ = tx.send(true);
            }
            state.cancel.cancel();
            state.timers.clear();
            state.dispatcher.take()
        };

        if let Some(handle) = dispatcher {
            if let Err(e) = handle.await {
                warn!(error = %e, "dispatch loop ended abnormally");
            }
        }
        info!("scheduler engine stopped");
    }

    async fn run_dispatcher(self, mut shutdown: watch::Receiver<bool>) {
        let period = self.inner.tick_interval;
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.dispatch_due(Utc::now()).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("dispatch loop exited");
    }

    /// Fire every live timer due at `now`.
    ///
    /// Each due timer advances to its first occurrence after `now` (missed
    /// occurrences collapse into this one firing) and one invocation is
    /// spawned for it. The dispatch loop calls this with the wall clock; tests
    /// drive it with a simulated one.
    ///
    /// A schedule with no occurrence after `now` (explicit past year) gets
    /// this last firing, after which the job is marked completed.
    pub async fn dispatch_due(&self, now: DateTime<Utc>) -> Vec<JoinHandle<()>> {
        let due: Vec<(i64, bool)> = {
            let mut state = self.inner.state.lock().await;
            if !state.running {
                return Vec::new();
            }
            let mut due = Vec::new();
            let mut exhausted = Vec::new();
            for (key, timer) in state.timers.iter_mut() {
                if timer.next_due > now {
                    continue;
                }
                match timer.schedule.next_after(now) {
                    Some(next) => {
                        timer.next_due = next;
                        due.push((timer.job_id, false));
                    }
                    None => {
                        exhausted.push(key.clone());
                        due.push((timer.job_id, true));
                    }
                }
            }
            for key in exhausted {
                state.deschedule(&key);
            }
            due
        };

        due.into_iter()
            .map(|(id, last)| {
                if last {
                    self.spawn_last_execution(id)
                } else {
                    self.spawn_execution(id)
                }
            })
            .collect()
    }

    pub(crate) fn spawn_execution(&self, job_id: i64) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move { engine.execute(job_id).await })
    }

    fn spawn_last_execution(&self, job_id: i64) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            engine.execute(job_id).await;
            engine.retire_exhausted(job_id).await;
        })
    }

    /// Mark a job completed once its schedule has run out of occurrences.
    ///
    /// Skipped when the engine stopped or the job was re-scheduled (update)
    /// or left `active` (pause, remove) in the meantime.
    async fn retire_exhausted(&self, job_id: i64) {
        let state = self.inner.state.lock().await;
        if !state.running || state.next_due_for(job_id).is_some() {
            return;
        }
        match self.inner.store.get_job(job_id) {
            Ok(Some(job)) if job.status == JobStatus::Active => {
                match self.inner.store.set_status(job_id, JobStatus::Completed) {
                    Ok(()) => {
                        info!(job_id, job = %job.name, "schedule has no further occurrences; job completed")
                    }
                    Err(e) => error!(job_id, error = %e, "failed to mark exhausted job completed"),
                }
            }
            Ok(_) => {}
            Err(e) => error!(job_id, error = %e, "failed to load exhausted job"),
        }
    }

    // ─── Administrative operations ──────────────────────────

    /// Validate, persist with `status = active`, then schedule.
    ///
    /// If scheduling fails after the row is written the row is kept with
    /// `status = error` and the error is returned.
    pub async fn add_job(&self, spec: JobSpec) -> Result<Job> {
        let mut state = self.inner.state.lock().await;
        let store = &self.inner.store;

        if store.name_taken(&spec.name, None)? {
            return Err(SchedulerError::DuplicateName { name: spec.name });
        }
        self.check_function(&spec.function_name)?;
        CronSchedule::parse(&spec.schedule)?;

        let args = spec.encoded_args()?;
        let mut job = store.insert_job(&NewJob {
            name: &spec.name,
            job_key: &new_job_key(&spec.name),
            function_name: &spec.function_name,
            cron_expression: spec.schedule.trim(),
            args: &args,
            times: spec.times,
        })?;
        info!(job_id = job.id, job = %job.name, function = %job.function_name, "job added");

        if state.running {
            if let Err(e) = self.schedule_locked(&mut state, &mut job, Utc::now()) {
                warn!(job_id = job.id, job = %job.name, error = %e, "job persisted but not scheduled");
                store.mark_error(job.id, &e.to_string())?;
                return Err(e);
            }
        }

        self.reload(job.id)
    }

    /// Rewrite a job's configuration, keeping its execution counters.
    ///
    /// A `completed` or `error` job goes back to `active` unless `keep_status`
    /// is set. The job is re-scheduled when the resulting status is active.
    pub async fn update_job(&self, id: i64, spec: JobSpec, keep_status: bool) -> Result<Job> {
        let mut state = self.inner.state.lock().await;
        let store = &self.inner.store;

        let mut job = store
            .get_job(id)?
            .ok_or_else(|| SchedulerError::not_found(format!("#{id}")))?;
        if job.name != spec.name && store.name_taken(&spec.name, Some(id))? {
            return Err(SchedulerError::DuplicateName { name: spec.name });
        }
        self.check_function(&spec.function_name)?;
        CronSchedule::parse(&spec.schedule)?;

        state.deschedule(&job.job_key);

        job.name = spec.name.clone();
        job.function_name = spec.function_name.clone();
        job.cron_expression = spec.schedule.trim().to_string();
        job.args = spec.encoded_args()?;
        job.times = spec.times;
        job.next_run_at = None;
        if !keep_status && matches!(job.status, JobStatus::Completed | JobStatus::Error) {
            job.status = JobStatus::Active;
        }
        store.update_config(&job)?;
        info!(job_id = job.id, job = %job.name, status = %job.status, "job updated");

        if job.status == JobStatus::Active && state.running {
            if let Err(e) = self.schedule_locked(&mut state, &mut job, Utc::now()) {
                warn!(job_id = job.id, job = %job.name, error = %e, "job updated but not scheduled");
                store.mark_error(job.id, &e.to_string())?;
                return Err(e);
            }
        }

        self.reload(id)
    }

    /// De-schedule and hard-delete a job together with its history.
    pub async fn remove_job(&self, name: &str) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let job = self.find(name)?;
        state.deschedule(&job.job_key);
        self.inner.store.delete_job(job.id)?;
        info!(job_id = job.id, job = %job.name, "job removed");
        Ok(())
    }

    /// Stop scheduling a job while keeping its configuration and counters.
    ///
    /// Pausing an already paused job is a no-op. Completed and errored jobs
    /// cannot be paused.
    pub async fn pause_job(&self, name: &str) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let job = self.find(name)?;
        match job.status {
            JobStatus::Paused => return Ok(()),
            JobStatus::Completed | JobStatus::Error => {
                return Err(SchedulerError::InvalidState(format!(
                    "cannot pause job {name:?} in status {}",
                    job.status
                )))
            }
            JobStatus::Active => {}
        }

        state.deschedule(&job.job_key);
        self.inner.store.set_status(job.id, JobStatus::Paused)?;
        info!(job_id = job.id, job = %job.name, "job paused");
        Ok(())
    }

    /// Put a paused job back on the schedule. Only valid from `paused`.
    pub async fn resume_job(&self, name: &str) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let mut job = self.find(name)?;
        if job.status != JobStatus::Paused {
            return Err(SchedulerError::InvalidState(format!(
                "only paused jobs can be resumed; {name:?} is {}",
                job.status
            )));
        }

        self.inner.store.set_status(job.id, JobStatus::Active)?;
        job.status = JobStatus::Active;
        info!(job_id = job.id, job = %job.name, "job resumed");

        if state.running {
            if let Err(e) = self.schedule_locked(&mut state, &mut job, Utc::now()) {
                self.inner.store.mark_error(job.id, &e.to_string())?;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Launch one out-of-band invocation. The regular timer is untouched and
    /// the runner's precondition checks still apply.
    pub async fn run_job_now(&self, name: &str) -> Result<JoinHandle<()>> {
        if !self.is_running().await {
            return Err(SchedulerError::InvalidState(
                "scheduler engine is not running".to_string(),
            ));
        }
        let job = self.find(name)?;
        info!(job_id = job.id, job = %job.name, "manual run requested");
        Ok(self.spawn_execution(job.id))
    }

    // ─── Read accessors ─────────────────────────────────────

    pub async fn get_job(&self, name: &str) -> Result<Job> {
        self.find(name)
    }

    pub async fn get_job_by_id(&self, id: i64) -> Result<Job> {
        self.reload(id)
    }

    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        self.inner.store.list_jobs()
    }

    pub async fn list_executions(&self, filter: &ExecutionFilter) -> Result<Vec<Execution>> {
        self.inner.store.list_executions(filter)
    }

    pub async fn get_execution(&self, id: i64) -> Result<Option<Execution>> {
        self.inner.store.get_execution(id)
    }

    /// Ids of jobs that currently own a live timer.
    pub async fn scheduled_job_ids(&self) -> Vec<i64> {
        let state = self.inner.state.lock().await;
        let mut ids: Vec<i64> = state.timers.values().map(|t| t.job_id).collect();
        ids.sort_unstable();
        ids
    }

    // ─── Internals ──────────────────────────────────────────

    pub(crate) async fn lock_state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().await
    }

    /// Turn `job` into a live timer. Caller holds the state lock.
    ///
    /// Returns `Ok(None)` when the run budget is already spent; the job is
    /// then marked completed instead of scheduled.
    fn schedule_locked(
        &self,
        state: &mut State,
        job: &mut Job,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        self.check_function(&job.function_name)?;
        let schedule = CronSchedule::parse(&job.cron_expression)?;

        if job.budget_exhausted() {
            info!(job_id = job.id, job = %job.name, "run budget already spent; marking completed");
            state.deschedule(&job.job_key);
            self.inner.store.set_status(job.id, JobStatus::Completed)?;
            job.status = JobStatus::Completed;
            job.next_run_at = None;
            return Ok(None);
        }

        let next_due = schedule.next_after(now).ok_or_else(|| {
            SchedulerError::InvalidSchedule(format!(
                "{:?} has no upcoming occurrence",
                job.cron_expression
            ))
        })?;

        state.deschedule(&job.job_key);
        let job_key = new_job_key(&job.name);
        self.inner.store.set_timer(job.id, &job_key, next_due)?;
        state.timers.insert(
            job_key.clone(),
            LiveTimer {
                job_id: job.id,
                name: job.name.clone(),
                schedule,
                next_due,
            },
        );
        job.job_key = job_key;
        job.next_run_at = Some(next_due);
        debug!(job_id = job.id, job = %job.name, next_run_at = %next_due, "job scheduled");
        Ok(Some(next_due))
    }

    fn check_function(&self, name: &str) -> Result<()> {
        if self.inner.registry.contains(name) {
            Ok(())
        } else {
            Err(SchedulerError::InvalidFunction {
                name: name.to_string(),
            })
        }
    }

    fn find(&self, name: &str) -> Result<Job> {
        self.inner
            .store
            .find_job(name)?
            .ok_or_else(|| SchedulerError::not_found(name))
    }

    fn reload(&self, id: i64) -> Result<Job> {
        self.inner
            .store
            .get_job(id)?
            .ok_or_else(|| SchedulerError::not_found(format!("#{id}")))
    }
}

fn new_job_key(name: &str) -> String {
    format!("{name}_{}", Uuid::new_v4().simple())
}
