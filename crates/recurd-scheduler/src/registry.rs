use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::execution::ExecutionLog;

/// Per-invocation context handed to a job function.
///
/// The token is cancelled when the execution timeout elapses or the engine
/// stops; long-running functions should check it between steps.
#[derive(Debug, Clone)]
pub struct JobContext {
    job_id: i64,
    job_name: String,
    cancel: CancellationToken,
}

impl JobContext {
    pub fn new(job_id: i64, job_name: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            job_id,
            job_name: job_name.into(),
            cancel,
        }
    }

    pub fn job_id(&self) -> i64 {
        self.job_id
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the invocation is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Executable job logic. `args` is the raw JSON text stored on the job;
/// each function owns its own decoding of it.
///
/// Any `async fn(JobContext, Vec<u8>, ExecutionLog) -> anyhow::Result<()>`
/// (or closure returning such a future) implements this trait.
#[async_trait]
pub trait JobFunction: Send + Sync + 'static {
    async fn call(&self, ctx: JobContext, args: Vec<u8>, log: ExecutionLog) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> JobFunction for F
where
    F: Fn(JobContext, Vec<u8>, ExecutionLog) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn call(&self, ctx: JobContext, args: Vec<u8>, log: ExecutionLog) -> anyhow::Result<()> {
        (self)(ctx, args, log).await
    }
}

/// Name → function mapping. Last registration for a name wins; there is no removal.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: RwLock<HashMap<String, Arc<dyn JobFunction>>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, function: impl JobFunction) {
        let name = name.into();
        let previous = self
            .functions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), Arc::new(function));
        if previous.is_some() {
            tracing::debug!(function = %name, "job function re-registered");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn JobFunction>> {
        self.functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}
