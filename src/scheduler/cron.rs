// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cron expressions.
//!
//! Quartz layout: `sec min hour day-of-month month day-of-week [year]`, with
//! day-of-week numbered `1` (Sunday) to `7` (Saturday). `?` ("no specific
//! value") is accepted in the day fields, along with the Quartz day tokens:
//!
//! | Field | Token | Meaning |
//! |---|---|---|
//! | day-of-month | `L` | last day of the month |
//! | day-of-month | `L-3` | third-to-last day of the month |
//! | day-of-month | `LW` | last weekday of the month |
//! | day-of-month | `15W` | weekday nearest the 15th, within the month |
//! | day-of-week | `L` | Saturday |
//! | day-of-week | `6L` / `FRIL` | last Friday of the month |
//! | day-of-week | `6#3` / `FRI#3` | third Friday of the month |
//!
//! A day token must be the whole field, and only one of the two day fields
//! may carry one.
//!
//! Classic 5-field Unix expressions (`min hour dom month dow`) are accepted
//! too. They fire at second 0 and keep Unix day-of-week numbering: `0` and `7`
//! are Sunday, `1` is Monday.
//!
//! ```
//! use lookup_cache::scheduler::CronSchedule;
//!
//! // Every day at 02:30:00 UTC
//! let schedule = CronSchedule::parse("0 30 2 * * ?").unwrap();
//! assert_eq!(schedule.expression(), "0 30 2 * * ?");
//!
//! // Midnight on the last day of every month
//! assert!(CronSchedule::parse("0 0 0 L * ?").is_ok());
//!
//! // Unix form: every 5 minutes
//! assert!(CronSchedule::parse("*/5 * * * *").is_ok());
//! assert!(CronSchedule::parse("every tuesday").is_err());
//! ```

use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, TimeZone, Utc, Weekday};
use cron::Schedule;

use super::SchedulerError;

/// Days scanned for a match of a day token before giving up. Covers
/// `2#5`-style rules that only match a few times per decade.
const MAX_DAYS_SCANNED: usize = 20_000;

#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: Schedule,
    day_rule: Option<DayRule>,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, SchedulerError> {
        let invalid = |reason: String| SchedulerError::InvalidCron {
            expression: expression.to_string(),
            reason,
        };

        let mut fields = normalize(expression);
        let day_rule = extract_day_rule(&mut fields).map_err(invalid)?;
        let schedule = Schedule::from_str(&fields.join(" ")).map_err(|e| invalid(e.to_string()))?;
        Ok(Self {
            expression: expression.to_string(),
            schedule,
            day_rule,
        })
    }

    /// The expression as configured.
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire instant strictly after `after`.
    #[must_use]
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        let Some(rule) = &self.day_rule else {
            return self.schedule.after(after).next();
        };

        let mut from = *after;
        for _ in 0..MAX_DAYS_SCANNED {
            let candidate = self.schedule.after(&from).next()?;
            let day = candidate.date_naive();
            if rule.matches(day) {
                return Some(candidate);
            }
            // Skip the rest of a day the rule rejects
            let midnight = day.succ_opt()?.and_hms_opt(0, 0, 0)?;
            from = Utc.from_utc_datetime(&midnight) - Duration::seconds(1);
        }
        None
    }

    /// Fire instants in `(from, to]`.
    #[must_use]
    pub fn fires_between(&self, from: &DateTime<Utc>, to: &DateTime<Utc>) -> usize {
        let mut count = 0;
        let mut cursor = *from;
        while let Some(next) = self.next_after(&cursor) {
            if next > *to {
                break;
            }
            count += 1;
            cursor = next;
        }
        count
    }
}

/// Split into fields, turn `?` into `*`, and widen Unix 5-field input to the
/// 6-field layout with Quartz day-of-week numbering.
fn normalize(expression: &str) -> Vec<String> {
    let mut fields: Vec<String> = expression
        .split_whitespace()
        .map(|f| if f == "?" { "*".to_string() } else { f.to_string() })
        .collect();
    if fields.len() == 5 {
        fields[4] = unix_day_of_week(&fields[4]);
        fields.insert(0, "0".to_string());
    }
    fields
}

/// Renumber a Unix day-of-week field (`0`/`7` = Sunday) to Quartz
/// (`1` = Sunday). Numeric ranges and steps are expanded to explicit lists
/// so wrap-arounds like `5-7` stay valid. Names pass through unchanged.
fn unix_day_of_week(field: &str) -> String {
    if field == "*" {
        return field.to_string();
    }
    field.split(',').map(unix_day_part).collect::<Vec<_>>().join(",")
}

fn unix_day_part(part: &str) -> String {
    let (range, step) = match part.split_once('/') {
        Some((range, step)) => (range, Some(step)),
        None => (part, None),
    };
    let bounds: Option<(u32, u32)> = if range == "*" {
        Some((0, 6))
    } else {
        match range.split_once('-') {
            Some((lo, hi)) => lo.parse().ok().zip(hi.parse().ok()),
            None => range
                .parse()
                .ok()
                .map(|day| (day, if step.is_some() { 6 } else { day })),
        }
    };
    let step = match step {
        Some(step) => step.parse::<usize>().ok().filter(|s| *s > 0),
        None => Some(1),
    };

    match (bounds, step) {
        (Some((lo, hi)), Some(step)) if lo <= hi && hi <= 7 => {
            let mut days: Vec<u32> = (lo..=hi).step_by(step).map(|d| d % 7 + 1).collect();
            days.sort_unstable();
            days.dedup();
            days.iter().map(u32::to_string).collect::<Vec<_>>().join(",")
        }
        // Let the parser reject it with its own message
        _ => part.to_string(),
    }
}

/// A Quartz day token the `cron` crate cannot express, checked per date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DayRule {
    /// `L` / `L-n`
    LastDayOfMonth { offset: u32 },
    /// `LW`
    LastWeekdayOfMonth,
    /// `nW`
    NearestWeekday { day: u32 },
    /// `nL` in day-of-week
    LastOfMonth { weekday: Weekday },
    /// `n#k`
    NthOfMonth { weekday: Weekday, nth: u32 },
}

impl DayRule {
    fn matches(&self, date: NaiveDate) -> bool {
        let Some(last) = last_day_of_month(date) else {
            return false;
        };
        match *self {
            Self::LastDayOfMonth { offset } => last.day().checked_sub(offset) == Some(date.day()),
            Self::LastWeekdayOfMonth => {
                let back = match last.weekday() {
                    Weekday::Sat => 1,
                    Weekday::Sun => 2,
                    _ => 0,
                };
                date.day() == last.day() - back
            }
            Self::NearestWeekday { day } => {
                let target = day.min(last.day());
                let nearest = match date.with_day(target).map(|d| d.weekday()) {
                    Some(Weekday::Sat) if target == 1 => target + 2,
                    Some(Weekday::Sat) => target - 1,
                    Some(Weekday::Sun) if target == last.day() => target - 2,
                    Some(Weekday::Sun) => target + 1,
                    _ => target,
                };
                date.day() == nearest
            }
            Self::LastOfMonth { weekday } => date.weekday() == weekday && date.day() + 7 > last.day(),
            Self::NthOfMonth { weekday, nth } => {
                date.weekday() == weekday && (date.day() - 1) / 7 + 1 == nth
            }
        }
    }
}

fn last_day_of_month(date: NaiveDate) -> Option<NaiveDate> {
    date.with_day(1)?
        .checked_add_months(Months::new(1))?
        .pred_opt()
}

/// Pull a Quartz day token out of the day fields, leaving `*` in its place
/// for the `cron` crate.
fn extract_day_rule(fields: &mut [String]) -> Result<Option<DayRule>, String> {
    if fields.len() < 6 {
        return Ok(None);
    }
    if fields[5].eq_ignore_ascii_case("L") {
        fields[5] = "7".to_string();
    }

    let month_rule = parse_day_of_month(&fields[3])?;
    let week_rule = parse_day_of_week(&fields[5])?;
    match (month_rule, week_rule) {
        (Some(_), Some(_)) => Err("day tokens (L, W, #) can only appear in one day field".into()),
        (Some(rule), None) => {
            fields[3] = "*".to_string();
            Ok(Some(rule))
        }
        (None, Some(rule)) => {
            fields[5] = "*".to_string();
            Ok(Some(rule))
        }
        (None, None) => Ok(None),
    }
}

fn parse_day_of_month(field: &str) -> Result<Option<DayRule>, String> {
    let token = field.to_ascii_uppercase();
    if !token.contains('L') && !token.contains('W') {
        return Ok(None);
    }
    let bad = || format!("unsupported day-of-month token '{}'", field);

    let rule = match token.as_str() {
        "L" => DayRule::LastDayOfMonth { offset: 0 },
        "LW" => DayRule::LastWeekdayOfMonth,
        _ => {
            if let Some(offset) = token.strip_prefix("L-") {
                let offset = offset.parse::<u32>().ok().filter(|n| (1..=30).contains(n)).ok_or_else(bad)?;
                DayRule::LastDayOfMonth { offset }
            } else if let Some(day) = token.strip_suffix('W') {
                let day = day.parse::<u32>().ok().filter(|n| (1..=31).contains(n)).ok_or_else(bad)?;
                DayRule::NearestWeekday { day }
            } else {
                return Err(bad());
            }
        }
    };
    Ok(Some(rule))
}

fn parse_day_of_week(field: &str) -> Result<Option<DayRule>, String> {
    let token = field.to_ascii_uppercase();
    let bad = || format!("unsupported day-of-week token '{}'", field);

    if let Some((day, nth)) = token.split_once('#') {
        let weekday = quartz_weekday(day).ok_or_else(bad)?;
        let nth = nth.parse::<u32>().ok().filter(|n| (1..=5).contains(n)).ok_or_else(bad)?;
        return Ok(Some(DayRule::NthOfMonth { weekday, nth }));
    }
    if let Some(day) = token.strip_suffix('L') {
        let weekday = quartz_weekday(day).ok_or_else(bad)?;
        return Ok(Some(DayRule::LastOfMonth { weekday }));
    }
    Ok(None)
}

/// `1`..`7` (Sunday first) or a three-letter English name.
fn quartz_weekday(token: &str) -> Option<Weekday> {
    let by_number = match token {
        "1" | "SUN" => Weekday::Sun,
        "2" | "MON" => Weekday::Mon,
        "3" | "TUE" => Weekday::Tue,
        "4" | "WED" => Weekday::Wed,
        "5" | "THU" => Weekday::Thu,
        "6" | "FRI" => Weekday::Fri,
        "7" | "SAT" => Weekday::Sat,
        _ => return None,
    };
    Some(by_number)
}
