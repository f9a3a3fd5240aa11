//! Cron schedule evaluation.
//!
//! Expressions use the standard five-field form
//! `minute hour day-of-month month day-of-week`, evaluated in UTC. The
//! `@hourly`, `@daily`, `@weekly`, `@monthly` and `@yearly` macros are also
//! accepted.
//!
//! Internally the expression is rewritten for the `cron` crate: a seconds
//! field of `0` is prepended and numeric days of the week (`0`-`7`, where
//! both `0` and `7` are Sunday) are replaced by their names, because the
//! crate numbers days from `1` = Sunday.
//!
//! When both day-of-month and day-of-week are restricted, an occurrence must
//! satisfy both.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::{SchedulerError, SchedulerResult};

const MACROS: [&str; 5] = ["@yearly", "@monthly", "@weekly", "@daily", "@hourly"];

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// A parsed, validated cron schedule.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: ::cron::Schedule,
}

impl CronSchedule {
    /// Parse a five-field expression or macro. Expressions that can never
    /// fire, such as `0 0 30 2 *`, are rejected.
    pub fn parse(expression: &str) -> SchedulerResult<Self> {
        let trimmed = expression.trim();
        let normalized = normalize(trimmed)?;
        let schedule = ::cron::Schedule::from_str(&normalized)
            .map_err(|e| SchedulerError::invalid_schedule(trimmed, e.to_string()))?;
        if schedule.upcoming(Utc).next().is_none() {
            return Err(SchedulerError::invalid_schedule(trimmed, "never fires"));
        }
        Ok(Self {
            expression: trimmed.to_string(),
            schedule,
        })
    }

    /// The expression as written.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First occurrence strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> SchedulerResult<DateTime<Utc>> {
        self.schedule
            .after(&after)
            .next()
            .ok_or_else(|| SchedulerError::invalid_schedule(&self.expression, "never fires"))
    }

    /// Up to `count` occurrences strictly after `after`.
    pub fn upcoming(&self, after: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&after).take(count).collect()
    }
}

impl FromStr for CronSchedule {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

impl PartialEq for CronSchedule {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

/// Parse `expression` and return its first occurrence strictly after
/// `after`. Fails for malformed expressions and for expressions that never
/// fire.
pub fn next_fire_time(expression: &str, after: DateTime<Utc>) -> SchedulerResult<DateTime<Utc>> {
    CronSchedule::parse(expression)?.next_after(after)
}

fn normalize(expression: &str) -> SchedulerResult<String> {
    if expression.starts_with('@') {
        let lower = expression.to_ascii_lowercase();
        if MACROS.contains(&lower.as_str()) {
            return Ok(lower);
        }
        return Err(SchedulerError::invalid_schedule(expression, "unknown macro"));
    }

    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(SchedulerError::invalid_schedule(
            expression,
            format!("expected 5 fields, found {}", fields.len()),
        ));
    }

    let day_of_week = normalize_day_of_week(expression, fields[4])?;
    Ok(format!(
        "0 {} {} {} {} {}",
        fields[0], fields[1], fields[2], fields[3], day_of_week
    ))
}

fn normalize_day_of_week(expression: &str, field: &str) -> SchedulerResult<String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let mut names = Vec::new();
    for token in field.split(',') {
        if token.chars().any(|c| c.is_ascii_alphabetic()) {
            names.push(token.to_string());
            continue;
        }
        let days = expand_day_token(token).ok_or_else(|| {
            SchedulerError::invalid_schedule(expression, format!("invalid day-of-week '{token}'"))
        })?;
        names.extend(days.into_iter().map(|d| DAY_NAMES[d].to_string()));
    }

    let mut seen = BTreeSet::new();
    names.retain(|name| seen.insert(name.clone()));
    Ok(names.join(","))
}

/// Expand one numeric day-of-week token (`n`, `a-b`, `*/s`, `a-b/s`, `a/s`)
/// into day indexes where 0 is Sunday.
fn expand_day_token(token: &str) -> Option<BTreeSet<usize>> {
    let (range, step) = match token.split_once('/') {
        Some((range, step)) => (range, step.parse::<usize>().ok().filter(|s| *s > 0)?),
        None => (token, 1),
    };

    let (start, end) = if range == "*" {
        (0, 6)
    } else if let Some((a, b)) = range.split_once('-') {
        (a.parse::<usize>().ok()?, b.parse::<usize>().ok()?)
    } else {
        let day = range.parse::<usize>().ok()?;
        // `a/s` runs to the end of the week.
        if token.contains('/') { (day, day.max(6)) } else { (day, day) }
    };

    if start > 7 || end > 7 || start > end {
        return None;
    }

    Some((start..=end).step_by(step).map(|d| d % 7).collect())
}

#[cfg(test)]
#[path = "schedule_tests.rs"]
mod tests;
