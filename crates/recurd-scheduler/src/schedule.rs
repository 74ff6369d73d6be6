use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::{Result, SchedulerError};

/// A parsed cron expression. All arithmetic happens in UTC.
///
/// Accepts the standard 5-field Unix form (`minute hour dom month dow`) as
/// well as the 6/7-field form with leading seconds and optional year.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    inner: cron::Schedule,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let normalized = normalize(expression)?;
        let inner = cron::Schedule::from_str(&normalized)
            .map_err(|e| SchedulerError::InvalidSchedule(format!("{expression:?}: {e}")))?;
        Ok(Self {
            expression: expression.trim().to_string(),
            inner,
        })
    }

    /// First occurrence strictly after `after`, or `None` if the schedule is exhausted
    /// (only possible with an explicit year field).
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.inner.after(&after).next()
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }
}

/// Syntax-only check used by admin surfaces before persisting anything.
pub fn validate(expression: &str) -> Result<()> {
    CronSchedule::parse(expression).map(|_| ())
}

/// The `cron` crate wants seconds (and optionally years); 5-field input fires at :00.
///
/// 5-field input uses Unix day-of-week numbers (0-7, Sunday = 0 or 7), which
/// are renumbered to the crate's 1-7 with Sunday = 1.
fn normalize(expression: &str) -> Result<String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.len() {
        5 => {
            let dow = unix_day_of_week(fields[4], expression)?;
            Ok(format!("0 {} {dow} *", fields[..4].join(" ")))
        }
        6 | 7 => Ok(fields.join(" ")),
        0 => Err(SchedulerError::InvalidSchedule(
            "cron expression must not be empty".to_string(),
        )),
        n => Err(SchedulerError::InvalidSchedule(format!(
            "{expression:?}: expected 5 fields, got {n}"
        ))),
    }
}

/// Rewrite a Unix day-of-week field for the `cron` crate.
///
/// Numeric elements (single days, ranges, `a/step` and `a-b/step`) are
/// expanded to an explicit list so ranges ending on Sunday (7) stay valid.
/// `*`-based elements and day names mean the same thing in both numberings
/// and pass through untouched.
fn unix_day_of_week(field: &str, expression: &str) -> Result<String> {
    let invalid = |reason: &str| {
        SchedulerError::InvalidSchedule(format!("{expression:?}: day-of-week {field:?} {reason}"))
    };
    let day = |s: &str| match s.parse::<u32>() {
        Ok(d) if d <= 7 => Ok(d),
        _ => Err(invalid("must use days 0-7")),
    };

    let mut out: Vec<String> = Vec::new();
    let mut push = |item: String| {
        if !out.contains(&item) {
            out.push(item);
        }
    };
    for part in field.split(',') {
        if part.starts_with('*') || part == "?" || part.chars().any(|c| c.is_ascii_alphabetic()) {
            push(part.to_string());
            continue;
        }

        let (range, step) = match part.split_once('/') {
            Some((range, step)) => match step.parse::<usize>() {
                Ok(step) if step > 0 => (range, Some(step)),
                _ => return Err(invalid("has a bad step")),
            },
            None => (part, None),
        };
        let (lo, hi) = match range.split_once('-') {
            Some((lo, hi)) => (day(lo)?, day(hi)?),
            // `a/step` runs to the end of the week.
            None if step.is_some() => (day(range)?, 6),
            None => {
                let d = day(range)?;
                (d, d)
            }
        };
        if lo > hi {
            return Err(invalid("has a reversed range"));
        }
        for d in (lo..=hi).step_by(step.unwrap_or(1)) {
            push(((d % 7) + 1).to_string());
        }
    }
    Ok(out.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Weekday};

    #[test]
    fn every_minute_fires_on_the_next_minute_boundary() {
        let schedule = CronSchedule::parse("*/1 * * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 3, 1, 10, 30, 15).unwrap();
        assert_eq!(
            schedule.next_after(after),
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 10, 31, 0).unwrap())
        );
    }

    #[test]
    fn next_is_strictly_after_a_matching_instant() {
        let schedule = CronSchedule::parse("0 * * * *").unwrap();
        let on_the_hour = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        assert_eq!(
            schedule.next_after(on_the_hour),
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 0).unwrap())
        );
    }

    #[test]
    fn daily_midnight_rolls_to_next_day() {
        let schedule = CronSchedule::parse("0 0 * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 1, 19, 10, 30, 0).unwrap();
        let next = schedule.next_after(after).unwrap();
        assert_eq!(next.date_naive().to_string(), "2026-01-20");
        assert_eq!(next.time().to_string(), "00:00:00");
    }

    #[test]
    fn six_field_expressions_keep_their_seconds() {
        let schedule = CronSchedule::parse("*/30 * * * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 5).unwrap();
        assert_eq!(
            schedule.next_after(after),
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 30).unwrap())
        );
    }

    #[test]
    fn expression_is_kept_as_written() {
        let schedule = CronSchedule::parse("  */5 * * * *  ").unwrap();
        assert_eq!(schedule.expression(), "*/5 * * * *");
    }

    fn weekdays_fired(expression: &str, after: DateTime<Utc>, count: usize) -> Vec<Weekday> {
        let schedule = CronSchedule::parse(expression).unwrap();
        let mut at = after;
        let mut days = Vec::new();
        for _ in 0..count {
            at = schedule.next_after(at).unwrap();
            days.push(at.weekday());
        }
        days
    }

    #[test]
    fn day_of_week_uses_unix_numbering() {
        // Monday.
        let monday = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();

        assert_eq!(
            CronSchedule::parse("0 9 * * 1").unwrap().next_after(monday),
            Some(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap())
        );
        assert_eq!(weekdays_fired("* * * * 0", monday, 1), vec![Weekday::Sun]);
        assert_eq!(weekdays_fired("0 9 * * 7", monday, 1), vec![Weekday::Sun]);
        assert_eq!(
            weekdays_fired("0 9 * * 1-5", monday, 6),
            vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
                Weekday::Mon
            ]
        );
    }

    #[test]
    fn day_of_week_lists_steps_and_sunday_ranges() {
        let monday = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
        assert_eq!(
            weekdays_fired("0 9 * * 0,3", monday, 2),
            vec![Weekday::Wed, Weekday::Sun]
        );
        assert_eq!(
            weekdays_fired("0 9 * * 5-7", monday, 3),
            vec![Weekday::Fri, Weekday::Sat, Weekday::Sun]
        );
        assert_eq!(
            weekdays_fired("0 9 * * 1-5/2", monday, 3),
            vec![Weekday::Mon, Weekday::Wed, Weekday::Fri]
        );
        assert_eq!(
            weekdays_fired("0 9 * * */2", monday, 4),
            vec![Weekday::Tue, Weekday::Thu, Weekday::Sat, Weekday::Sun]
        );
        assert_eq!(
            weekdays_fired("0 9 * * MON-FRI", monday, 2),
            vec![Weekday::Mon, Weekday::Tue]
        );
    }

    #[test]
    fn day_of_week_rewrite() {
        assert_eq!(unix_day_of_week("0", "").unwrap(), "1");
        assert_eq!(unix_day_of_week("1-5", "").unwrap(), "2,3,4,5,6");
        assert_eq!(unix_day_of_week("0,7", "").unwrap(), "1");
        assert_eq!(unix_day_of_week("4/2", "").unwrap(), "5,7");
        assert_eq!(unix_day_of_week("*/2", "").unwrap(), "*/2");
        assert_eq!(unix_day_of_week("SUN,MON", "").unwrap(), "SUN,MON");
        for bad in ["8", "5-2", "1/0", "1-9"] {
            assert!(unix_day_of_week(bad, "").is_err(), "{bad:?}");
        }
    }

    #[test]
    fn rejects_malformed_expressions() {
        for bad in [
            "",
            "   ",
            "not a cron",
            "* * * *",
            "61 * * * *",
            "* 25 * * *",
            "0 9 * * 8",
        ] {
            let err = validate(bad).unwrap_err();
            assert!(
                matches!(err, SchedulerError::InvalidSchedule(_)),
                "{bad:?} should be rejected, got {err:?}"
            );
        }
    }
}
