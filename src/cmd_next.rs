//! `cadence next`: preview a cron expression.

use anyhow::Context;
use chrono::{DateTime, Utc};

use cadence_scheduler::CronSchedule;

/// Print the next `count` fire times of `expression`.
pub(crate) fn next(expression: &str, count: usize, after: Option<&str>) -> anyhow::Result<()> {
    for time in upcoming(expression, count, after)? {
        println!("{}", time.to_rfc3339());
    }
    Ok(())
}

fn upcoming(
    expression: &str,
    count: usize,
    after: Option<&str>,
) -> anyhow::Result<Vec<DateTime<Utc>>> {
    let after = match after {
        Some(s) => DateTime::parse_from_rfc3339(s)
            .with_context(|| format!("invalid --after instant '{}'", s))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };
    let schedule = CronSchedule::parse(expression)?;
    let times = schedule.upcoming(after, count);
    if times.is_empty() && count > 0 {
        anyhow::bail!("'{}' never fires after {}", expression, after.to_rfc3339());
    }
    Ok(times)
}
