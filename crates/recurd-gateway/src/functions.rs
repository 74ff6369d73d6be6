//! Built-in job functions, registered at boot when
//! `scheduler.sample_functions` is enabled.

use std::time::Duration;

use anyhow::bail;
use recurd_scheduler::{ExecutionLog, JobContext, SchedulerEngine};
use tracing::info;

const DEFAULT_LOG_MESSAGE: &str = "scheduled log job";
const LONG_MESSAGE_CHARS: usize = 100;
const TEST_JOB_DURATION: Duration = Duration::from_secs(2);

pub fn register_builtin(engine: &SchedulerEngine) {
    engine.register("log", log_message);
    engine.register("test", test_wait);
    engine.register("fail", always_fail);
}

/// Writes its argument (a JSON string, or raw text) to the execution log.
pub async fn log_message(ctx: JobContext, args: Vec<u8>, log: ExecutionLog) -> anyhow::Result<()> {
    let message = decode_message(&args);
    log.info("job started");
    log.info(format!("logging message: {message}"));

    pause(&ctx, Duration::from_millis(100)).await?;
    log.debug("step 1: prepared data");
    pause(&ctx, Duration::from_millis(200)).await?;
    log.debug("step 2: processed data");

    let len = message.chars().count();
    if len > LONG_MESSAGE_CHARS {
        log.warn(format!("message is long: {len} characters"));
    }

    info!(job = ctx.job_name(), message = %message, "log job ran");
    log.info("job finished");
    Ok(())
}

/// Simulates two seconds of work. Cancellation fails the run.
pub async fn test_wait(ctx: JobContext, _args: Vec<u8>, log: ExecutionLog) -> anyhow::Result<()> {
    info!(job = ctx.job_name(), "running test job");
    pause(&ctx, TEST_JOB_DURATION).await?;
    log.info("test job finished");
    Ok(())
}

pub async fn always_fail(ctx: JobContext, _args: Vec<u8>, log: ExecutionLog) -> anyhow::Result<()> {
    info!(job = ctx.job_name(), "running fail job");
    log.error("this job always fails");
    bail!("this job always fails")
}

fn decode_message(args: &[u8]) -> String {
    if args.is_empty() {
        return DEFAULT_LOG_MESSAGE.to_string();
    }
    serde_json::from_slice::<String>(args)
        .unwrap_or_else(|_| String::from_utf8_lossy(args).into_owned())
}

async fn pause(ctx: &JobContext, duration: Duration) -> anyhow::Result<()> {
    tokio::select! {
        _ = ctx.cancelled() => bail!("job {} cancelled", ctx.job_name()),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn ctx(token: CancellationToken) -> JobContext {
        JobContext::new(1, "sample", token)
    }

    #[test]
    fn messages_decode_from_json_or_raw_text() {
        assert_eq!(decode_message(br#""hi there""#), "hi there");
        assert_eq!(decode_message(b"plain"), "plain");
        assert_eq!(decode_message(b"{\"a\":1}"), "{\"a\":1}");
        assert_eq!(decode_message(b""), DEFAULT_LOG_MESSAGE);
    }

    #[tokio::test]
    async fn log_writes_leveled_lines() {
        let log = ExecutionLog::new();
        log_message(ctx(CancellationToken::new()), br#""hello""#.to_vec(), log.clone())
            .await
            .unwrap();

        let out = log.contents();
        assert!(out.contains("[INFO] logging message: hello"));
        assert!(out.contains("[DEBUG] step 2: processed data"));
        assert!(!out.contains("[WARN]"));
    }

    #[tokio::test]
    async fn long_messages_are_flagged() {
        let log = ExecutionLog::new();
        let long = serde_json::to_vec(&"x".repeat(150)).unwrap();
        log_message(ctx(CancellationToken::new()), long, log.clone())
            .await
            .unwrap();
        assert!(log.contents().contains("[WARN] message is long: 150 characters"));
    }

    #[tokio::test]
    async fn cancellation_stops_the_sample_jobs() {
        let token = CancellationToken::new();
        token.cancel();

        let err = test_wait(ctx(token.clone()), Vec::new(), ExecutionLog::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cancelled"));

        let log = ExecutionLog::new();
        assert!(log_message(ctx(token), Vec::new(), log.clone()).await.is_err());
        assert!(!log.contents().contains("job finished"));
    }

    #[tokio::test]
    async fn fail_always_fails() {
        let log = ExecutionLog::new();
        let err = always_fail(ctx(CancellationToken::new()), Vec::new(), log.clone())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "this job always fails");
        assert!(log.contents().contains("[ERROR] this job always fails"));
    }
}
