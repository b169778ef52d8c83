use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;

use crate::errors::ScheduleError;

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

fn invalid(expression: &str, reason: impl Into<String>) -> ScheduleError {
    ScheduleError::InvalidCron {
        expression: expression.to_string(),
        reason: reason.into(),
    }
}

fn is_restricted(field: &str) -> bool {
    field != "*" && field != "?"
}

/// Rewrites numeric days (0-7, Sunday = 0 or 7) as explicit day names so they
/// are read the way classic crontab reads them. Ranges and steps are expanded
/// into lists; named days pass through unchanged.
fn day_of_week_names(field: &str, expression: &str) -> Result<String, ScheduleError> {
    let day = |token: &str| -> Result<Option<u32>, ScheduleError> {
        if token.is_empty() || !token.chars().all(|c| c.is_ascii_digit()) {
            return Ok(None);
        }
        let day: u32 = token
            .parse()
            .map_err(|_| invalid(expression, format!("bad day of week {}", token)))?;
        if day > 7 {
            return Err(invalid(expression, format!("day of week {} out of range 0-7", day)));
        }
        Ok(Some(day))
    };

    let mut parts = Vec::new();
    for part in field.split(',') {
        let (base, step) = match part.split_once('/') {
            Some((base, step)) => {
                let step: u32 = step
                    .parse()
                    .ok()
                    .filter(|s| *s > 0)
                    .ok_or_else(|| invalid(expression, format!("bad day of week step {}", step)))?;
                (base, Some(step))
            }
            None => (part, None),
        };
        let bounds = match base.split_once('-') {
            _ if base == "*" || base == "?" => step.map(|_| (0, 6)),
            Some((from, to)) => match (day(from)?, day(to)?) {
                (Some(from), Some(to)) => Some((from, to)),
                _ => None,
            },
            None => day(base)?.map(|from| (from, if step.is_some() { 7 } else { from })),
        };
        let Some((from, to)) = bounds else {
            parts.push(part.to_string());
            continue;
        };
        if from > to {
            return Err(invalid(expression, format!("day of week range {} is reversed", base)));
        }
        for d in (from..=to).step_by(step.unwrap_or(1) as usize) {
            let name = DAY_NAMES[(d % 7) as usize].to_string();
            if !parts.contains(&name) {
                parts.push(name);
            }
        }
    }
    Ok(parts.join(","))
}

/// A parsed cron expression. Classic crontab fires when either the
/// day-of-month or the day-of-week matches if both are restricted, which is
/// kept as two schedules whose earliest fire wins.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    primary: Schedule,
    either_day: Option<Schedule>,
}

impl CronSchedule {
    fn single(schedule: Schedule) -> Self {
        Self {
            primary: schedule,
            either_day: None,
        }
    }
}

fn compile(expression: &str, normalized: &str) -> Result<Schedule, ScheduleError> {
    Schedule::from_str(normalized).map_err(|e| invalid(expression, e.to_string()))
}

/// Accepts classic 5-field crontab syntax (seconds implied as 0) or the
/// 6/7-field form with leading seconds and optional year.
pub fn parse_cron(expression: &str) -> Result<CronSchedule, ScheduleError> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.len() {
        5 => {
            let (minute, hour, dom, month) = (fields[0], fields[1], fields[2], fields[3]);
            let dow = day_of_week_names(fields[4], expression)?;
            if is_restricted(dom) && is_restricted(&dow) {
                let by_date = compile(expression, &format!("0 {} {} {} {} *", minute, hour, dom, month))?;
                let by_weekday = compile(expression, &format!("0 {} {} * {} {}", minute, hour, month, dow))?;
                Ok(CronSchedule {
                    primary: by_date,
                    either_day: Some(by_weekday),
                })
            } else {
                compile(expression, &format!("0 {} {} {} {} {}", minute, hour, dom, month, dow))
                    .map(CronSchedule::single)
            }
        }
        6 | 7 => compile(expression, &fields.join(" ")).map(CronSchedule::single),
        n => Err(invalid(expression, format!("expected 5, 6 or 7 fields, got {}", n))),
    }
}

pub fn parse_timezone(name: &str) -> Result<Tz, ScheduleError> {
    name.parse::<Tz>()
        .map_err(|_| ScheduleError::InvalidTimezone(name.to_string()))
}

fn next_of(schedule: &Schedule, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule
        .after(&after.with_timezone(&tz))
        .next()
        .map(|at| at.with_timezone(&Utc))
}

/// First fire time strictly after `after`, evaluated in `tz`.
pub fn next_run(schedule: &CronSchedule, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let primary = next_of(&schedule.primary, tz, after);
    let either = schedule
        .either_day
        .as_ref()
        .and_then(|s| next_of(s, tz, after));
    match (primary, either) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}
