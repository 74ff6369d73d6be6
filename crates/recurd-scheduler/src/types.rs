use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Lifecycle state of a recurring job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Scheduled; owns a live timer while the engine runs.
    Active,
    /// Held by an operator; configuration and counters are kept.
    Paused,
    /// Run budget exhausted. Only an update brings it back.
    Completed,
    /// Scheduling failed after the row was persisted.
    Error,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Active => "active",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(JobStatus::Active),
            "paused" => Ok(JobStatus::Paused),
            "completed" => Ok(JobStatus::Completed),
            "error" => Ok(JobStatus::Error),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// A persisted recurring job definition together with its run counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    /// Unique, operator-assigned label.
    pub name: String,
    /// Correlates the row with its live timer. Regenerated on every (re)schedule.
    pub job_key: String,
    pub function_name: String,
    pub cron_expression: String,
    /// JSON text handed verbatim to the job function. Empty when no args.
    pub args: String,
    /// Maximum number of executions, 0 for unbounded.
    pub times: u32,
    pub times_run: u32,
    pub status: JobStatus,
    pub error_count: u32,
    pub last_error: String,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// True when a bounded job has used up its run budget.
    pub fn budget_exhausted(&self) -> bool {
        self.times > 0 && self.times_run >= self.times
    }

    /// Executions left before the job completes; `None` for unbounded jobs.
    pub fn remaining_runs(&self) -> Option<u32> {
        (self.times > 0).then(|| self.times.saturating_sub(self.times_run))
    }

    /// Decode the stored argument blob. Returns `None` when the job has no args.
    pub fn args_as<T: DeserializeOwned>(&self) -> serde_json::Result<Option<T>> {
        if self.args.is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&self.args).map(Some)
    }
}

/// Configuration accepted by `add_job` / `update_job`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub function_name: String,
    /// Any JSON value; `null` is stored as "no args".
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default)]
    pub times: u32,
    /// Cron expression (5, 6 or 7 fields).
    pub schedule: String,
}

impl JobSpec {
    pub fn new(
        name: impl Into<String>,
        function_name: impl Into<String>,
        schedule: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            function_name: function_name.into(),
            args: serde_json::Value::Null,
            times: 0,
            schedule: schedule.into(),
        }
    }

    pub fn with_args(mut self, args: impl Serialize) -> serde_json::Result<Self> {
        self.args = serde_json::to_value(args)?;
        Ok(self)
    }

    pub fn with_times(mut self, times: u32) -> Self {
        self.times = times;
        self
    }

    /// Serialised form stored in `recurring_jobs.args`.
    pub(crate) fn encoded_args(&self) -> serde_json::Result<String> {
        if self.args.is_null() {
            return Ok(String::new());
        }
        serde_json::to_string(&self.args)
    }
}

/// One invocation attempt of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: i64,
    pub job_id: i64,
    pub started_at: DateTime<Utc>,
    /// `None` while the job function is still running.
    pub finished_at: Option<DateTime<Utc>>,
    pub success: bool,
    pub error: String,
    /// Leveled log lines written through [`crate::ExecutionLog`].
    pub output: String,
    pub duration_ms: i64,
}

impl Execution {
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

/// Query for execution history, newest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionFilter {
    pub job_id: Option<i64>,
    pub success: Option<bool>,
    pub limit: Option<u32>,
}

impl ExecutionFilter {
    pub fn for_job(job_id: i64) -> Self {
        Self {
            job_id: Some(job_id),
            ..Self::default()
        }
    }
}
