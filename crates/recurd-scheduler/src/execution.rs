//! Execution output helpers.
//!
//! Job functions append timestamped, leveled lines to their execution's
//! `output` through [`ExecutionLog`]. Viewers split the stored text back into
//! lines with [`parse_output`] and style them by level. The line format is
//! `[YYYY-MM-DD HH:MM:SS.mmm] [LEVEL] message`.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Debug => "DEBUG",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "INFO" => Some(LogLevel::Info),
            "WARN" => Some(LogLevel::Warn),
            "ERROR" => Some(LogLevel::Error),
            "DEBUG" => Some(LogLevel::Debug),
            _ => None,
        }
    }
}

/// Cloneable handle a job function writes its output through.
///
/// The runner owns the buffer and copies it into the execution record once
/// the function returns, times out or panics.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog {
    buf: Arc<Mutex<String>>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&self, message: impl std::fmt::Display) {
        self.append(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl std::fmt::Display) {
        self.append(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl std::fmt::Display) {
        self.append(LogLevel::Error, message);
    }

    pub fn debug(&self, message: impl std::fmt::Display) {
        self.append(LogLevel::Debug, message);
    }

    pub fn append(&self, level: LogLevel, message: impl std::fmt::Display) {
        let line = format!(
            "[{}] [{}] {}",
            Utc::now().format(TIMESTAMP_FORMAT),
            level.as_str(),
            message
        );
        let mut buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        if !buf.is_empty() {
            buf.push('\n');
        }
        buf.push_str(&line);
    }

    /// Everything written so far.
    pub fn contents(&self) -> String {
        self.buf
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// One line of execution output as rendered by a viewer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputLine {
    pub timestamp: Option<NaiveDateTime>,
    /// `None` for free-form lines that don't follow the leveled format.
    pub level: Option<LogLevel>,
    pub message: String,
}

/// Split stored output into lines, recognising the leveled format.
pub fn parse_output(output: &str) -> Vec<OutputLine> {
    if output.is_empty() {
        return Vec::new();
    }
    output.lines().map(parse_line).collect()
}

fn parse_line(line: &str) -> OutputLine {
    let leveled = line
        .strip_prefix('[')
        .and_then(|rest| rest.split_once("] ["))
        .and_then(|(ts, rest)| {
            let (tag, message) = rest.split_once(']')?;
            let level = LogLevel::from_tag(tag)?;
            let timestamp = NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT).ok()?;
            Some(OutputLine {
                timestamp: Some(timestamp),
                level: Some(level),
                message: message.strip_prefix(' ').unwrap_or(message).to_string(),
            })
        });

    leveled.unwrap_or_else(|| OutputLine {
        timestamp: None,
        level: None,
        message: line.to_string(),
    })
}

/// Human-readable duration: `850ms`, `12.50s`, `3m4s`.
pub fn format_duration_ms(ms: i64) -> String {
    let ms = ms.max(0);
    if ms < 1_000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.2}s", ms as f64 / 1_000.0)
    } else {
        format!("{}m{}s", ms / 60_000, (ms % 60_000) / 1_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_newline_separated_and_leveled() {
        let log = ExecutionLog::new();
        log.info("starting");
        log.warn(format_args!("{} items skipped", 3));
        log.error("boom");
        log.debug("details");

        let contents = log.contents();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].ends_with("[INFO] starting"));
        assert!(lines[1].ends_with("[WARN] 3 items skipped"));
        assert!(lines[2].ends_with("[ERROR] boom"));
        assert!(lines[3].ends_with("[DEBUG] details"));
        assert!(!contents.ends_with('\n'));
    }

    #[test]
    fn clones_share_one_buffer() {
        let log = ExecutionLog::new();
        let clone = log.clone();
        clone.info("from clone");
        assert!(log.contents().contains("from clone"));
    }

    #[test]
    fn parse_recovers_what_the_log_wrote() {
        let log = ExecutionLog::new();
        log.info("hello world");
        log.error("bad [thing] happened");

        let parsed = parse_output(&log.contents());
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].level, Some(LogLevel::Info));
        assert_eq!(parsed[0].message, "hello world");
        assert!(parsed[0].timestamp.is_some());
        assert_eq!(parsed[1].level, Some(LogLevel::Error));
        assert_eq!(parsed[1].message, "bad [thing] happened");
    }

    #[test]
    fn free_form_lines_pass_through() {
        let parsed = parse_output("plain text\n[not a timestamp] [INFO] x");
        assert_eq!(parsed.len(), 2);
        assert!(parsed.iter().all(|l| l.level.is_none()));
        assert_eq!(parsed[0].message, "plain text");
        assert!(parse_output("").is_empty());
    }

    #[test]
    fn durations_scale_units() {
        assert_eq!(format_duration_ms(850), "850ms");
        assert_eq!(format_duration_ms(12_500), "12.50s");
        assert_eq!(format_duration_ms(184_000), "3m4s");
        assert_eq!(format_duration_ms(-5), "0ms");
    }
}
