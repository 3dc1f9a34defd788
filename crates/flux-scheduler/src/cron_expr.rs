//! Five-field crontab expressions on top of the `cron` crate.
//!
//! The `cron` crate wants `sec min hour dom month dow [year]` and numbers
//! weekdays from 1 = Sunday. Stored jobs number weekdays from 0 = Monday to
//! 6 = Sunday, so numeric weekdays are rewritten to names before the
//! expression is padded and parsed. A 7 is out of range.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local};
use cron::Schedule;

use crate::error::{Result, SchedulerError};

const FIELD_COUNT: usize = 5;
const DAY_NAMES: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// A parsed crontab expression, evaluated in the local time zone.
#[derive(Debug, Clone)]
pub struct CronExpr {
    source: String,
    schedule: Schedule,
}

impl CronExpr {
    /// Parse a five-field crontab expression.
    pub fn parse(expr: &str) -> Result<Self> {
        let normalized = normalize(expr)?;
        let schedule = Schedule::from_str(&normalized).map_err(|e| SchedulerError::InvalidCron {
            expr: expr.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            source: expr.trim().to_string(),
            schedule,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: &DateTime<Local>) -> Option<DateTime<Local>> {
        self.schedule.after(after).next()
    }
}

impl FromStr for CronExpr {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Turn `min hour dom month dow` into the seven-field form the `cron` crate
/// parses: seconds `0` in front, year `*` at the end, weekdays by name.
pub fn normalize(expr: &str) -> Result<String> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != FIELD_COUNT {
        return Err(SchedulerError::FieldCount {
            expr: expr.to_string(),
            got: fields.len(),
        });
    }
    let dow = weekday_names(fields[4]).map_err(|reason| SchedulerError::InvalidCron {
        expr: expr.to_string(),
        reason,
    })?;
    Ok(format!(
        "0 {} {} {} {} {dow} *",
        fields[0], fields[1], fields[2], fields[3]
    ))
}

/// Rewrite a numeric day-of-week field to day names.
///
/// Fields that are `*`, `?` or already use names are returned unchanged.
fn weekday_names(field: &str) -> std::result::Result<String, String> {
    if field == "*" || field == "?" || field.chars().any(|c| c.is_ascii_alphabetic()) {
        return Ok(field.to_string());
    }

    let mut days = [false; 7];
    for item in field.split(',') {
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => {
                let step: usize = step
                    .parse()
                    .map_err(|_| format!("bad day-of-week step {step:?}"))?;
                if step == 0 {
                    return Err("day-of-week step must be positive".to_string());
                }
                (base, step)
            }
            None => (item, 1),
        };

        let (start, end) = match base {
            "*" => (0, 6),
            _ => match base.split_once('-') {
                Some((a, b)) => (weekday(a)?, weekday(b)?),
                // `n/step` runs from n to the end of the week.
                None if step > 1 => (weekday(base)?, 6),
                None => {
                    let day = weekday(base)?;
                    (day, day)
                }
            },
        };
        if start > end {
            return Err(format!("day-of-week range {base:?} runs backwards"));
        }
        for day in (start..=end).step_by(step) {
            days[day] = true;
        }
    }

    Ok(days
        .iter()
        .enumerate()
        .filter(|(_, on)| **on)
        .map(|(i, _)| DAY_NAMES[i])
        .collect::<Vec<_>>()
        .join(","))
}

/// Weekday number, 0 = Monday through 6 = Sunday.
fn weekday(s: &str) -> std::result::Result<usize, String> {
    match s.parse::<usize>() {
        Ok(n) if n <= 6 => Ok(n),
        _ => Err(format!("bad day-of-week value {s:?}")),
    }
}
