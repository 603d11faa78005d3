use chrono::{
    DateTime, Duration, Local, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc,
};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Time zone in which calendar fields (cron fields, at-schedule timestamps,
/// run-time limits) are interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    /// The host's local time zone.
    #[default]
    Local,
    Utc,
}

impl Zone {
    /// Wall-clock reading of `instant` in this zone.
    pub fn to_wall_clock(self, instant: DateTime<Utc>) -> NaiveDateTime {
        match self {
            Zone::Local => instant.with_timezone(&Local).naive_local(),
            Zone::Utc => instant.naive_utc(),
        }
    }

    /// Instant denoted by the wall-clock time `wall` in this zone.
    ///
    /// Times skipped by a DST transition resolve to the first valid minute
    /// after the gap; repeated times resolve to the earlier instant.
    pub fn from_wall_clock(self, wall: NaiveDateTime) -> DateTime<Utc> {
        match self {
            Zone::Utc => Utc.from_utc_datetime(&wall),
            Zone::Local => resolve_in(&Local, wall),
        }
    }
}

fn resolve_in<Tz: TimeZone>(tz: &Tz, wall: NaiveDateTime) -> DateTime<Utc> {
    let mut candidate = wall;
    // no real-world gap is wider than a few hours
    for _ in 0..=240 {
        match tz.from_local_datetime(&candidate) {
            LocalResult::Single(t) => return t.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => return earliest.with_timezone(&Utc),
            LocalResult::None => candidate += Duration::minutes(1),
        }
    }
    Utc.from_utc_datetime(&wall)
}

/// A `yyyy-MM-dd HH:mm` style date pattern bound to a [`Zone`].
///
/// Supported pattern letters: `yyyy`, `yy`, `MM`, `dd`, `HH`, `mm`, `ss`.
/// Every other non-letter character is copied literally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateFormat {
    pattern: String,
    chrono_format: String,
    zone: Zone,
}

impl DateFormat {
    pub const DEFAULT_PATTERN: &'static str = "yyyy-MM-dd HH:mm";

    pub fn new(pattern: &str, zone: Zone) -> Result<Self> {
        Ok(Self {
            pattern: pattern.to_string(),
            chrono_format: translate_pattern(pattern)?,
            zone,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn zone(&self) -> Zone {
        self.zone
    }

    /// Parse `text` as a wall-clock time in the configured zone.
    pub fn parse(&self, text: &str) -> Result<DateTime<Utc>> {
        let text = text.trim();
        let wall = match NaiveDateTime::parse_from_str(text, &self.chrono_format) {
            Ok(wall) => wall,
            // date-only patterns carry no time fields
            Err(_) => NaiveDate::parse_from_str(text, &self.chrono_format)
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .ok_or_else(|| {
                    CoreError::DateFormat(format!(
                        "'{text}' does not match pattern '{}'",
                        self.pattern
                    ))
                })?,
        };
        Ok(self.zone.from_wall_clock(wall))
    }

    pub fn format(&self, instant: DateTime<Utc>) -> String {
        self.zone
            .to_wall_clock(instant)
            .format(&self.chrono_format)
            .to_string()
    }
}

impl Default for DateFormat {
    fn default() -> Self {
        Self {
            pattern: Self::DEFAULT_PATTERN.to_string(),
            chrono_format: "%Y-%m-%d %H:%M".to_string(),
            zone: Zone::default(),
        }
    }
}

fn translate_pattern(pattern: &str) -> Result<String> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let mut run = 1;
        while i + run < chars.len() && chars[i + run] == c {
            run += 1;
        }
        if c.is_ascii_alphabetic() {
            let spec = match (c, run) {
                ('y', 4) => "%Y",
                ('y', 2) => "%y",
                ('M', 2) => "%m",
                ('d', 2) => "%d",
                ('H', 2) => "%H",
                ('m', 2) => "%M",
                ('s', 2) => "%S",
                _ => {
                    let field: String = std::iter::repeat(c).take(run).collect();
                    return Err(CoreError::DateFormat(format!(
                        "unsupported field '{field}' in pattern '{pattern}'"
                    )));
                }
            };
            out.push_str(spec);
        } else {
            for _ in 0..run {
                if c == '%' {
                    out.push_str("%%");
                } else {
                    out.push(c);
                }
            }
        }
        i += run;
    }
    Ok(out)
}
