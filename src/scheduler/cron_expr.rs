//! Five-field cron matching for agent schedules
//!
//! Fields are `minute hour day-of-month month day-of-week`, evaluated in UTC,
//! with day-of-week 0 = Sunday. Each field accepts `*`, `N`, `A-B`, `*/S`,
//! `N/S` and comma-separated lists of those. Matching never panics: a part
//! that does not parse simply does not match. `validate` is the strict check
//! applied when a schedule is stored.

use chrono::{DateTime, Datelike, Duration, DurationRound, Timelike, Utc};

use crate::agents::types::{Agent, AgentStatus};
use crate::error::{AppError, AppResult};

/// How far ahead `next_due_after` looks before giving up
const LOOKAHEAD_DAYS: i64 = 366;

const FIELD_NAMES: [&str; 5] = ["minute", "hour", "day-of-month", "month", "day-of-week"];

const FIELD_BOUNDS: [(u32, u32); 5] = [(0, 59), (0, 23), (1, 31), (1, 12), (0, 6)];

/// Whether a single cron field matches `value`
pub fn matches_field(spec: &str, value: u32) -> bool {
    if spec == "*" {
        return true;
    }

    spec.split(',').any(|part| matches_part(part, value))
}

fn matches_part(part: &str, value: u32) -> bool {
    if part.contains('-') {
        let mut bounds = part.splitn(2, '-');
        return match (parse_num(bounds.next()), parse_num(bounds.next())) {
            (Some(start), Some(end)) => value >= start && value <= end,
            _ => false,
        };
    }

    if let Some((base, step)) = part.split_once('/') {
        let base = if base == "*" { Some(0) } else { parse_num(Some(base)) };
        return match (base, parse_num(Some(step))) {
            (Some(base), Some(step)) if step > 0 => value >= base && (value - base) % step == 0,
            _ => false,
        };
    }

    parse_num(Some(part)) == Some(value)
}

fn parse_num(text: Option<&str>) -> Option<u32> {
    text.map(str::trim)
        .filter(|t| !t.is_empty())
        .and_then(|t| t.parse().ok())
}

/// Split an expression into exactly five fields
fn fields(expr: &str) -> Option<[&str; 5]> {
    let parts: Vec<&str> = expr.split_whitespace().collect();
    parts.try_into().ok()
}

/// Whether `expr` matches the UTC minute containing `now`
pub fn is_due(expr: &str, now: DateTime<Utc>) -> bool {
    let Some([minute, hour, dom, month, dow]) = fields(expr) else {
        return false;
    };

    matches_field(minute, now.minute())
        && matches_field(hour, now.hour())
        && matches_field(dom, now.day())
        && matches_field(month, now.month())
        && matches_field(dow, now.weekday().num_days_from_sunday())
}

/// An agent is due when it is active, scheduled, and its schedule matches `now`
pub fn is_agent_due(agent: &Agent, now: DateTime<Utc>) -> bool {
    if agent.status != AgentStatus::Active {
        return false;
    }
    match agent.schedule_cron.as_deref() {
        Some(expr) => is_due(expr, now),
        None => false,
    }
}

/// Strict syntax and range check
pub fn validate(expr: &str) -> AppResult<()> {
    let Some(parts) = fields(expr) else {
        return Err(AppError::invalid_schedule(
            expr,
            format!("expected 5 fields, found {}", expr.split_whitespace().count()),
        ));
    };

    for (idx, spec) in parts.iter().enumerate() {
        let (min, max) = FIELD_BOUNDS[idx];
        validate_field(spec, min, max)
            .map_err(|reason| AppError::invalid_schedule(expr, format!("{}: {}", FIELD_NAMES[idx], reason)))?;
    }
    Ok(())
}

fn validate_field(spec: &str, min: u32, max: u32) -> Result<(), String> {
    if spec == "*" {
        return Ok(());
    }

    let in_range = |n: u32| {
        if n < min || n > max {
            Err(format!("{} is outside {}-{}", n, min, max))
        } else {
            Ok(())
        }
    };
    let number = |text: &str| -> Result<u32, String> {
        text.parse::<u32>()
            .map_err(|_| format!("\"{}\" is not a number", text))
    };

    for part in spec.split(',') {
        if part.is_empty() {
            return Err("empty list element".to_string());
        }

        if let Some((start, end)) = part.split_once('-') {
            let (start, end) = (number(start)?, number(end)?);
            in_range(start)?;
            in_range(end)?;
            if start > end {
                return Err(format!("range {}-{} is reversed", start, end));
            }
        } else if let Some((base, step)) = part.split_once('/') {
            if base != "*" {
                in_range(number(base)?)?;
            }
            if number(step)? == 0 {
                return Err("step must be greater than zero".to_string());
            }
        } else {
            in_range(number(part)?)?;
        }
    }
    Ok(())
}

/// First whole minute strictly after `after` at which `expr` is due
pub fn next_due_after(expr: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let [minute, hour, dom, month, dow] = fields(expr)?;

    let start = after.duration_trunc(Duration::minutes(1)).ok()? + Duration::minutes(1);
    let limit = start + Duration::days(LOOKAHEAD_DAYS);
    let mut candidate = start;

    while candidate <= limit {
        let day_matches = matches_field(dom, candidate.day())
            && matches_field(month, candidate.month())
            && matches_field(dow, candidate.weekday().num_days_from_sunday());

        if !day_matches {
            // Jump to midnight of the following day
            let midnight = candidate.duration_trunc(Duration::days(1)).ok()?;
            candidate = midnight + Duration::days(1);
            continue;
        }

        if matches_field(hour, candidate.hour()) && matches_field(minute, candidate.minute()) {
            return Some(candidate);
        }
        candidate += Duration::minutes(1);
    }
    None
}
