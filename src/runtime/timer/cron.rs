//! Calendar schedule evaluation
//!
//! `CronSchedule` understands the classic five-field crontab syntax, an
//! optional leading seconds field, and the `@` descriptors:
//!
//! ```text
//! ┌───────────── second (0-59, optional)
//! │ ┌─────────── minute (0-59)
//! │ │ ┌───────── hour (0-23)
//! │ │ │ ┌─────── day of month (1-31)
//! │ │ │ │ ┌───── month (1-12 or JAN-DEC)
//! │ │ │ │ │ ┌─── day of week (0-7 or SUN-SAT, 0 and 7 are Sunday)
//! * * * * * *
//! ```
//!
//! All times are evaluated in UTC.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};

/// Anything that can produce the next firing time of a recurring schedule.
pub trait CalendarSchedule: Send {
    /// First firing time strictly after `after`, or `None` if there is none.
    fn next_after(
        &self,
        after: DateTime<Utc>,
    ) -> Option<DateTime<Utc>>;
}

/// Schedule expression parse errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CronError {
    #[error("empty schedule expression")]
    Empty,

    #[error("expected 5 or 6 fields, found {0}")]
    FieldCount(usize),

    #[error("invalid {field} value '{value}'")]
    InvalidValue { field: &'static str, value: String },

    #[error("{field} value {value} out of range {min}-{max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("invalid step '{step}' in {field} field")]
    InvalidStep { field: &'static str, step: String },

    #[error("unknown descriptor '{0}'")]
    UnknownDescriptor(String),

    #[error("invalid duration '{0}'")]
    InvalidDuration(String),
}

// ============================================================================
// Fields
// ============================================================================

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    /// Value of `names[0]`
    name_base: u32,
}

const SECONDS: FieldSpec = FieldSpec {
    name: "second",
    min: 0,
    max: 59,
    names: &[],
    name_base: 0,
};

const MINUTES: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
    names: &[],
    name_base: 0,
};

const HOURS: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
    names: &[],
    name_base: 0,
};

const DAYS_OF_MONTH: FieldSpec = FieldSpec {
    name: "day-of-month",
    min: 1,
    max: 31,
    names: &[],
    name_base: 0,
};

const MONTHS: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: &[
        "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
    ],
    name_base: 1,
};

// 7 is accepted and folded onto Sunday after parsing
const DAYS_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 7,
    names: &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"],
    name_base: 0,
};

/// Set of allowed values for one field, as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Field {
    bits: u64,
    /// Field was `*` or `?` (affects day matching)
    star: bool,
}

impl Field {
    #[inline]
    fn matches(
        &self,
        value: u32,
    ) -> bool {
        self.bits & (1 << value) != 0
    }

    fn parse(
        expr: &str,
        spec: &FieldSpec,
    ) -> Result<Self, CronError> {
        let mut field = Field {
            bits: 0,
            star: false,
        };
        for part in expr.split(',') {
            let (bits, star) = parse_part(part, spec)?;
            field.bits |= bits;
            field.star |= star;
        }
        Ok(field)
    }
}

fn parse_part(
    part: &str,
    spec: &FieldSpec,
) -> Result<(u64, bool), CronError> {
    let (range, step) = match part.split_once('/') {
        Some((range, step)) => {
            let parsed = step
                .parse::<u32>()
                .ok()
                .filter(|&n| n > 0)
                .ok_or_else(|| CronError::InvalidStep {
                    field: spec.name,
                    step: step.to_string(),
                })?;
            (range, Some(parsed))
        }
        None => (part, None),
    };

    let (start, end, star) = if range == "*" || range == "?" {
        (spec.min, spec.max, true)
    } else if let Some((low, high)) = range.split_once('-') {
        (parse_value(low, spec)?, parse_value(high, spec)?, false)
    } else {
        let value = parse_value(range, spec)?;
        match step {
            Some(_) => (value, spec.max, false),
            None => (value, value, false),
        }
    };

    for value in [start, end] {
        if value < spec.min || value > spec.max {
            return Err(CronError::OutOfRange {
                field: spec.name,
                value,
                min: spec.min,
                max: spec.max,
            });
        }
    }
    if start > end {
        return Err(CronError::InvalidValue {
            field: spec.name,
            value: part.to_string(),
        });
    }

    let step = step.unwrap_or(1);
    let bits = (start..=end)
        .step_by(step as usize)
        .fold(0u64, |bits, value| bits | (1 << value));
    Ok((bits, star && step == 1))
}

fn parse_value(
    text: &str,
    spec: &FieldSpec,
) -> Result<u32, CronError> {
    if let Ok(value) = text.parse::<u32>() {
        return Ok(value);
    }
    spec.names
        .iter()
        .position(|name| name.eq_ignore_ascii_case(text))
        .map(|index| index as u32 + spec.name_base)
        .ok_or_else(|| CronError::InvalidValue {
            field: spec.name,
            value: text.to_string(),
        })
}

/// Parse a duration such as `500ms`, `10s` or `1h30m`.
pub fn parse_duration(text: &str) -> Result<Duration, CronError> {
    let invalid = || CronError::InvalidDuration(text.to_string());
    let mut total = Duration::ZERO;
    let mut rest = text.trim();
    if rest.is_empty() {
        return Err(invalid());
    }

    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?;
        if digits == 0 {
            return Err(invalid());
        }
        let amount: u64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let unit = match &rest[..unit_len] {
            "ms" => Duration::from_millis(amount),
            "s" => Duration::from_secs(amount),
            "m" => Duration::from_secs(amount.saturating_mul(60)),
            "h" => Duration::from_secs(amount.saturating_mul(3600)),
            _ => return Err(invalid()),
        };
        total = total.saturating_add(unit);
        rest = &rest[unit_len..];
    }

    if total.is_zero() {
        return Err(invalid());
    }
    Ok(total)
}

// ============================================================================
// Schedule
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Spec {
    Fields {
        second: Field,
        minute: Field,
        hour: Field,
        day_of_month: Field,
        month: Field,
        day_of_week: Field,
    },
    Every(Duration),
}

/// A parsed calendar schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    source: String,
    spec: Spec,
}

impl CronSchedule {
    /// Parse a schedule expression.
    ///
    /// ```
    /// use yaoxiang_flow::runtime::timer::CronSchedule;
    ///
    /// assert!(CronSchedule::parse("*/5 * * * *").is_ok());
    /// assert!(CronSchedule::parse("@every 1h30m").is_ok());
    /// assert!(CronSchedule::parse("61 * * * *").is_err());
    /// ```
    pub fn parse(expr: &str) -> Result<Self, CronError> {
        let source = expr.trim();
        if source.is_empty() {
            return Err(CronError::Empty);
        }

        let spec = match source.strip_prefix('@') {
            Some(descriptor) => Self::parse_descriptor(descriptor)?,
            None => Self::parse_fields(source)?,
        };
        Ok(Self {
            source: source.to_string(),
            spec,
        })
    }

    fn parse_descriptor(descriptor: &str) -> Result<Spec, CronError> {
        if let Some(duration) = descriptor.strip_prefix("every ") {
            return Ok(Spec::Every(parse_duration(duration)?));
        }
        let fields = match descriptor {
            "yearly" | "annually" => "0 0 0 1 1 *",
            "monthly" => "0 0 0 1 * *",
            "weekly" => "0 0 0 * * 0",
            "daily" | "midnight" => "0 0 0 * * *",
            "hourly" => "0 0 * * * *",
            _ => return Err(CronError::UnknownDescriptor(format!("@{}", descriptor))),
        };
        Self::parse_fields(fields)
    }

    fn parse_fields(expr: &str) -> Result<Spec, CronError> {
        let mut fields: Vec<&str> = expr.split_whitespace().collect();
        match fields.len() {
            5 => fields.insert(0, "0"),
            6 => {}
            n => return Err(CronError::FieldCount(n)),
        }

        let mut day_of_week = Field::parse(fields[5], &DAYS_OF_WEEK)?;
        if day_of_week.matches(7) {
            day_of_week.bits = (day_of_week.bits & !(1 << 7)) | 1;
        }

        Ok(Spec::Fields {
            second: Field::parse(fields[0], &SECONDS)?,
            minute: Field::parse(fields[1], &MINUTES)?,
            hour: Field::parse(fields[2], &HOURS)?,
            day_of_month: Field::parse(fields[3], &DAYS_OF_MONTH)?,
            month: Field::parse(fields[4], &MONTHS)?,
            day_of_week,
        })
    }

    /// The expression this schedule was parsed from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Fixed interval for `@every` schedules.
    pub fn interval(&self) -> Option<Duration> {
        match self.spec {
            Spec::Every(interval) => Some(interval),
            Spec::Fields { .. } => None,
        }
    }

    /// The next `count` firing times after `from`.
    pub fn upcoming(
        &self,
        from: DateTime<Utc>,
        count: usize,
    ) -> Vec<DateTime<Utc>> {
        let mut times = Vec::with_capacity(count);
        let mut cursor = from;
        while times.len() < count {
            match self.next_after(cursor) {
                Some(next) => {
                    times.push(next);
                    cursor = next;
                }
                None => break,
            }
        }
        times
    }
}

/// Give up after this many years without a match (e.g. `0 0 30 2 *`).
const SEARCH_YEARS: i32 = 5;

impl CalendarSchedule for CronSchedule {
    fn next_after(
        &self,
        after: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let (second, minute, hour, day_of_month, month, day_of_week) = match &self.spec {
            Spec::Every(interval) => {
                return chrono::Duration::from_std(*interval)
                    .ok()
                    .and_then(|delta| after.checked_add_signed(delta));
            }
            Spec::Fields {
                second,
                minute,
                hour,
                day_of_month,
                month,
                day_of_week,
            } => (second, minute, hour, day_of_month, month, day_of_week),
        };

        let day_matches = |t: &DateTime<Utc>| {
            let dom = day_of_month.matches(t.day());
            let dow = day_of_week.matches(t.weekday().num_days_from_sunday());
            if day_of_month.star || day_of_week.star {
                dom && dow
            } else {
                dom || dow
            }
        };

        let mut t = after.with_nanosecond(0)? + chrono::Duration::seconds(1);
        let limit = t.year() + SEARCH_YEARS;

        while t.year() <= limit {
            if !month.matches(t.month()) {
                t = start_of_next_month(&t)?;
            } else if !day_matches(&t) {
                t = t.date_naive().succ_opt()?.and_hms_opt(0, 0, 0)?.and_utc();
            } else if !hour.matches(t.hour()) {
                t = t.with_minute(0)?.with_second(0)? + chrono::Duration::hours(1);
            } else if !minute.matches(t.minute()) {
                t = t.with_second(0)? + chrono::Duration::minutes(1);
            } else if !second.matches(t.second()) {
                t += chrono::Duration::seconds(1);
            } else {
                return Some(t);
            }
        }
        None
    }
}

fn start_of_next_month(t: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()
}

impl FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.source)
    }
}
