//! One invocation of a job: precondition checks, the function call under a
//! timeout, and reconciliation of the outcome back into the store.

use std::any::Any;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    engine::SchedulerEngine,
    execution::ExecutionLog,
    registry::JobContext,
    store::RunOutcome,
    types::{Execution, Job, JobStatus},
};

impl SchedulerEngine {
    /// Execute job `job_id` once.
    ///
    /// Preconditions are checked under the engine lock; the function body runs
    /// without it. Nothing here ever propagates an error to the caller: every
    /// failure ends up in the execution record, the job counters or the log.
    pub(crate) async fn execute(&self, job_id: i64) {
        let Some((job, cancel)) = self.admit(job_id).await else {
            return;
        };

        self.invoke_and_record(&job, cancel).await;

        self.lock_state().await.in_flight.remove(&job.id);
    }

    /// Steps 1–3: re-read the row and decide whether this invocation may run.
    async fn admit(&self, job_id: i64) -> Option<(Job, CancellationToken)> {
        let mut state = self.lock_state().await;
        if !state.running {
            debug!(job_id, "engine stopped; invocation dropped");
            return None;
        }

        let job = match self.inner.store.get_job(job_id) {
            Ok(Some(job)) => job,
            Ok(None) => {
                info!(job_id, "job no longer exists; skipping");
                return None;
            }
            Err(e) => {
                error!(job_id, error = %e, "failed to load job before execution");
                return None;
            }
        };

        if job.status != JobStatus::Active {
            info!(job_id, job = %job.name, status = %job.status, "job not active; skipping");
            return None;
        }

        if job.budget_exhausted() {
            info!(
                job_id,
                job = %job.name,
                times_run = job.times_run,
                times = job.times,
                "run budget reached; marking completed"
            );
            if let Err(e) = self.inner.store.set_status(job.id, JobStatus::Completed) {
                error!(job_id, error = %e, "failed to mark job completed");
            }
            state.deschedule(&job.job_key);
            return None;
        }

        if !state.in_flight.insert(job.id) {
            warn!(job_id, job = %job.name, "previous invocation still running; skipping");
            // The skipped firing still moved the timer on.
            if let Some(next) = state.next_due_for(job.id) {
                if let Err(e) = self.inner.store.set_next_run_at(job.id, Some(next)) {
                    error!(job_id, error = %e, "failed to persist next run after skip");
                }
            }
            return None;
        }

        let cancel = state.cancel.child_token();
        Some((job, cancel))
    }

    /// Steps 5–9.
    async fn invoke_and_record(&self, job: &Job, cancel: CancellationToken) {
        let store = &self.inner.store;

        let mut execution = match store.insert_execution(job.id, Utc::now()) {
            Ok(execution) => execution,
            Err(e) => {
                error!(job_id = job.id, job = %job.name, error = %e, "failed to open execution record");
                return;
            }
        };
        debug!(job_id = job.id, execution_id = execution.id, "execution started");

        let log = ExecutionLog::new();
        let result = self.invoke(job, cancel, log.clone()).await;
        finalize(&mut execution, &result, log.contents());
        if let Err(e) = store.finish_execution(&execution) {
            error!(execution_id = execution.id, error = %e, "failed to finalise execution record");
        }

        let next_run_at = self.lock_state().await.next_due_for(job.id);
        let outcome = RunOutcome {
            started_at: execution.started_at,
            error: result.err(),
            next_run_at,
        };
        let updated = match store.record_run(job.id, &outcome) {
            Ok(Some(updated)) => updated,
            Ok(None) => {
                info!(job_id = job.id, job = %job.name, "job deleted while running; counters dropped");
                return;
            }
            Err(e) => {
                error!(job_id = job.id, job = %job.name, error = %e, "failed to update job counters");
                return;
            }
        };

        match &outcome.error {
            None => info!(
                job_id = job.id,
                job = %job.name,
                run = updated.times_run,
                duration_ms = execution.duration_ms,
                "execution succeeded"
            ),
            Some(e) => warn!(
                job_id = job.id,
                job = %job.name,
                run = updated.times_run,
                error = %e,
                "execution failed"
            ),
        }

        if updated.status == JobStatus::Completed {
            info!(job_id = job.id, job = %job.name, "run budget reached; job completed");
            self.lock_state().await.deschedule(&updated.job_key);
        }
    }

    /// Step 6: call the registered function on its own task, bounded by the
    /// execution timeout. Panics and timeouts become errors.
    async fn invoke(
        &self,
        job: &Job,
        cancel: CancellationToken,
        log: ExecutionLog,
    ) -> Result<(), String> {
        let Some(function) = self.inner.registry.get(&job.function_name) else {
            return Err(format!("Function is not registered: {}", job.function_name));
        };

        let ctx = JobContext::new(job.id, job.name.clone(), cancel.clone());
        let args = job.args.clone().into_bytes();
        let mut task = tokio::spawn(async move { function.call(ctx, args, log).await });

        let timeout = self.inner.execution_timeout;
        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(format!("{e:#}")),
            Ok(Err(join_err)) if join_err.is_panic() => Err(format!(
                "job function panicked: {}",
                panic_message(join_err.into_panic())
            )),
            Ok(Err(join_err)) => Err(format!("job function aborted: {join_err}")),
            Err(_) => {
                cancel.cancel();
                task.abort();
                Err(format!(
                    "execution timed out after {}s",
                    timeout.as_secs_f64()
                ))
            }
        }
    }
}

/// Step 7: stamp the outcome onto the execution record.
fn finalize(execution: &mut Execution, result: &Result<(), String>, output: String) {
    let finished_at = Utc::now();
    execution.finished_at = Some(finished_at);
    execution.duration_ms = (finished_at - execution.started_at).num_milliseconds();
    execution.success = result.is_ok();
    execution.error = result.as_ref().err().cloned().unwrap_or_default();
    execution.output = output;
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
