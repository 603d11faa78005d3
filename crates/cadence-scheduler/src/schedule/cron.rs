//! Vixie-cron compatible schedule.
//!
//! ```text
//! schedule_config := ( minute hour day month weekday ) | special
//! special         := @reboot | @yearly | @annually | @monthly | @weekly
//!                  | @daily | @midnight | @hourly
//! value_spec      := "*" [ "/" step ] | value_or_range ( "," value_or_range )*
//! value_or_range  := value | value "-" value [ "/" step ]
//! ```
//!
//! Months accept `jan`..`dec`, weekdays `sun`..`sat` (`0` and `7` are both
//! Sunday). When both day-of-month and day-of-week are restricted a day
//! matches if *either* field matches.

use std::collections::BTreeSet;

use cadence_core::Zone;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};

use super::Schedule;
use crate::error::{Result, SchedulerError};

pub const TYPE: &str = "cron";

/// Search horizon for the next matching minute. Long enough to reach the
/// next February 29th across a skipped leap year.
const MAX_YEARS_AHEAD: i32 = 8;

#[derive(Debug, Clone, Copy)]
struct FieldKind {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
}

const MINUTE: FieldKind = FieldKind { name: "minute", min: 0, max: 59, names: &[] };
const HOUR: FieldKind = FieldKind { name: "hour", min: 0, max: 23, names: &[] };
const DAY: FieldKind = FieldKind { name: "day", min: 1, max: 31, names: &[] };
const MONTH: FieldKind = FieldKind {
    name: "month",
    min: 1,
    max: 12,
    names: &[
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ],
};
const WEEKDAY: FieldKind = FieldKind {
    name: "weekday",
    min: 0,
    max: 7,
    names: &["sun", "mon", "tue", "wed", "thu", "fri", "sat"],
};

/// Parsed calendar constraints. An empty list leaves the field unrestricted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CronFields {
    pub minute: Vec<u32>,
    pub hour: Vec<u32>,
    pub day: Vec<u32>,
    pub month: Vec<u32>,
    /// `0` = Sunday.
    pub weekday: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CronSpec {
    /// `@reboot`: fire once at startup, never on the clock.
    Reboot,
    Fields(CronFields),
}

#[derive(Debug, Clone)]
pub struct CronSchedule {
    config: String,
    spec: CronSpec,
    zone: Zone,
}

impl CronSchedule {
    pub fn new(config: &str, zone: Zone) -> Result<Self> {
        Ok(Self {
            config: config.to_string(),
            spec: parse(config)?,
            zone,
        })
    }

    /// Parsed fields, or `None` for `@reboot`.
    pub fn fields(&self) -> Option<&CronFields> {
        match &self.spec {
            CronSpec::Reboot => None,
            CronSpec::Fields(fields) => Some(fields),
        }
    }
}

impl Schedule for CronSchedule {
    fn schedule_type(&self) -> &'static str {
        TYPE
    }

    fn config(&self) -> &str {
        &self.config
    }

    fn set_config(&mut self, config: &str) -> Result<()> {
        self.spec = parse(config)?;
        self.config = config.to_string();
        Ok(())
    }

    fn at_startup(&self) -> bool {
        matches!(self.spec, CronSpec::Reboot)
    }

    fn next_run_time(
        &self,
        now: DateTime<Utc>,
        _last_run: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        let CronSpec::Fields(fields) = &self.spec else {
            return None;
        };
        let mut wall = self.zone.to_wall_clock(now);
        // a repeated wall-clock hour (DST fall-back) can map a match back
        // before `now`; keep searching past it
        for _ in 0..120 {
            let next = fields.next_after(wall)?;
            let instant = self.zone.from_wall_clock(next);
            if instant > now {
                return Some(instant);
            }
            wall = next;
        }
        None
    }
}

impl CronFields {
    /// First wall-clock minute strictly after `after` matching every field.
    pub fn next_after(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        let mut t = truncate_to_minute(after) + Duration::minutes(1);
        let horizon = t.year() + MAX_YEARS_AHEAD;
        // each resolver either accepts `t` or moves it forward to the start of
        // the next candidate unit; moving restarts the coarser checks
        loop {
            if t.year() > horizon {
                return None;
            }
            if let Some(moved) = self.resolve_month(t) {
                t = moved;
                continue;
            }
            if let Some(moved) = self.resolve_day(t) {
                t = moved;
                continue;
            }
            if let Some(moved) = self.resolve_hour(t) {
                t = moved;
                continue;
            }
            if let Some(moved) = self.resolve_minute(t) {
                t = moved;
                continue;
            }
            return Some(t);
        }
    }

    fn resolve_month(&self, t: NaiveDateTime) -> Option<NaiveDateTime> {
        if self.month.is_empty() || self.month.contains(&t.month()) {
            return None;
        }
        let (year, month) = match self.month.iter().find(|m| **m > t.month()) {
            Some(m) => (t.year(), *m),
            None => (t.year() + 1, self.month[0]),
        };
        Some(start_of_day(NaiveDate::from_ymd_opt(year, month, 1)?))
    }

    /// Day-of-month and day-of-week each yield a candidate date in the
    /// current month; the earlier one wins.
    fn resolve_day(&self, t: NaiveDateTime) -> Option<NaiveDateTime> {
        let today = t.date();
        let by_month_day = (!self.day.is_empty()).then(|| self.next_month_day(today));
        let by_weekday = (!self.weekday.is_empty()).then(|| self.next_weekday(today));
        let candidate = match (by_month_day, by_weekday) {
            (None, None) => return None,
            (Some(a), None) | (None, Some(a)) => a,
            (Some(a), Some(b)) => match (a, b) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            },
        };
        match candidate {
            Some(date) if date == today => None,
            Some(date) => Some(start_of_day(date)),
            None => Some(start_of_day(first_of_next_month(today)?)),
        }
    }

    fn next_month_day(&self, today: NaiveDate) -> Option<NaiveDate> {
        let last = last_day_of_month(today)?;
        self.day
            .iter()
            .find(|d| **d >= today.day() && **d <= last)
            .and_then(|d| today.with_day(*d))
    }

    fn next_weekday(&self, today: NaiveDate) -> Option<NaiveDate> {
        let current = today.weekday().num_days_from_sunday();
        let delta = self
            .weekday
            .iter()
            .map(|w| (w + 7 - current) % 7)
            .min()?;
        let date = today + Duration::days(i64::from(delta));
        (date.month() == today.month()).then_some(date)
    }

    fn resolve_hour(&self, t: NaiveDateTime) -> Option<NaiveDateTime> {
        if self.hour.is_empty() || self.hour.contains(&t.hour()) {
            return None;
        }
        match self.hour.iter().find(|h| **h > t.hour()) {
            Some(h) => t.date().and_hms_opt(*h, 0, 0),
            None => t.date().succ_opt().map(start_of_day),
        }
    }

    fn resolve_minute(&self, t: NaiveDateTime) -> Option<NaiveDateTime> {
        if self.minute.is_empty() || self.minute.contains(&t.minute()) {
            return None;
        }
        match self.minute.iter().find(|m| **m > t.minute()) {
            Some(m) => t.with_minute(*m),
            None => t.with_minute(0).map(|top| top + Duration::hours(1)),
        }
    }
}

fn truncate_to_minute(t: NaiveDateTime) -> NaiveDateTime {
    t.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}

fn start_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDate> {
    if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
    }
}

fn last_day_of_month(date: NaiveDate) -> Option<u32> {
    first_of_next_month(date)?.pred_opt().map(|d| d.day())
}

// --- parsing ---------------------------------------------------------------

fn parse(config: &str) -> Result<CronSpec> {
    let trimmed = config.trim();
    if let Some(special) = trimmed.strip_prefix('@') {
        let expanded = match special.to_ascii_lowercase().as_str() {
            "reboot" => return Ok(CronSpec::Reboot),
            "yearly" | "annually" => "0 0 1 1 *",
            "monthly" => "0 0 1 * *",
            "weekly" => "0 0 * * 0",
            "daily" | "midnight" => "0 0 * * *",
            "hourly" => "0 * * * *",
            _ => {
                return Err(SchedulerError::InvalidSchedule(format!(
                    "unknown special schedule '{trimmed}'"
                )))
            }
        };
        return parse_fields(expanded).map(CronSpec::Fields);
    }
    parse_fields(trimmed).map(CronSpec::Fields)
}

fn parse_fields(text: &str) -> Result<CronFields> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let [minute, hour, day, month, weekday] = tokens.as_slice() else {
        return Err(SchedulerError::InvalidSchedule(format!(
            "expected 5 fields (minute hour day month weekday), found {} in '{text}'",
            tokens.len()
        )));
    };
    let mut weekday = parse_field(weekday, &WEEKDAY)?;
    if weekday.contains(&7) {
        weekday.retain(|w| *w != 7);
        if !weekday.contains(&0) {
            weekday.insert(0, 0);
        }
    }
    Ok(CronFields {
        minute: parse_field(minute, &MINUTE)?,
        hour: parse_field(hour, &HOUR)?,
        day: parse_field(day, &DAY)?,
        month: parse_field(month, &MONTH)?,
        weekday,
    })
}

/// Sorted, de-duplicated values of one field; empty for a bare `*`.
fn parse_field(token: &str, kind: &FieldKind) -> Result<Vec<u32>> {
    let mut values = BTreeSet::new();
    for item in token.split(',') {
        if item == "*" {
            return Ok(Vec::new());
        }
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, Some(parse_step(step, kind)?)),
            None => (item, None),
        };
        let (lo, hi) = if range == "*" {
            (kind.min, kind.max)
        } else if let Some((lo, hi)) = range.split_once('-') {
            (parse_value(lo, kind)?, parse_value(hi, kind)?)
        } else if step.is_some() {
            return Err(SchedulerError::InvalidSchedule(format!(
                "step in '{item}' requires a range in {} field",
                kind.name
            )));
        } else {
            let value = parse_value(range, kind)?;
            (value, value)
        };
        if lo > hi {
            return Err(SchedulerError::InvalidSchedule(format!(
                "range '{range}' is reversed in {} field",
                kind.name
            )));
        }
        values.extend((lo..=hi).step_by(step.unwrap_or(1)));
    }
    Ok(values.into_iter().collect())
}

fn parse_value(text: &str, kind: &FieldKind) -> Result<u32> {
    let value = if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
        text.parse::<u32>().map_err(|_| out_of_range(text, kind))?
    } else {
        let lower = text.to_ascii_lowercase();
        let index = kind.names.iter().position(|n| *n == lower).ok_or_else(|| {
            SchedulerError::InvalidSchedule(format!(
                "unexpected token '{text}' in {} field",
                kind.name
            ))
        })?;
        kind.min + index as u32
    };
    if value < kind.min || value > kind.max {
        return Err(out_of_range(text, kind));
    }
    Ok(value)
}

fn parse_step(text: &str, kind: &FieldKind) -> Result<usize> {
    match text.parse::<usize>() {
        Ok(step) if step > 0 => Ok(step),
        _ => Err(SchedulerError::InvalidSchedule(format!(
            "invalid step '{text}' in {} field",
            kind.name
        ))),
    }
}

fn out_of_range(text: &str, kind: &FieldKind) -> SchedulerError {
    SchedulerError::InvalidSchedule(format!(
        "value {text} out of range [{}-{}] in {} field",
        kind.min, kind.max, kind.name
    ))
}
