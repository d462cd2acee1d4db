use std::str::FromStr;

use chrono::{DateTime, Duration, TimeZone, Weekday};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("invalid report day: {0}")]
    InvalidDay(String),

    #[error("invalid time format (expected HH:MM): {0}")]
    InvalidTime(String),

    #[error("interval must be greater than zero")]
    InvalidInterval,

    #[error("invalid cron expression {expression}: {reason}")]
    InvalidCron { expression: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockTime {
    pub hour: u32,
    pub minute: u32,
}

const WEEKDAYS: &[(&str, Weekday)] = &[
    ("sunday", Weekday::Sun),
    ("monday", Weekday::Mon),
    ("tuesday", Weekday::Tue),
    ("wednesday", Weekday::Wed),
    ("thursday", Weekday::Thu),
    ("friday", Weekday::Fri),
    ("saturday", Weekday::Sat),
];

pub fn parse_weekday(name: &str) -> Result<Weekday, ScheduleError> {
    let lowered = name.trim().to_lowercase();
    WEEKDAYS
        .iter()
        .find(|(n, _)| *n == lowered)
        .map(|(_, d)| *d)
        .ok_or_else(|| ScheduleError::InvalidDay(name.to_string()))
}

/// Cron ordinal: Sunday=0 ... Saturday=6.
pub fn weekday_ordinal(day: Weekday) -> u32 {
    day.num_days_from_sunday()
}

/// Parse strict two-field `HH:MM`. A single-digit hour is accepted.
pub fn parse_clock_time(s: &str) -> Result<ClockTime, ScheduleError> {
    let invalid = || ScheduleError::InvalidTime(s.to_string());

    let mut parts = s.split(':');
    let (hour, minute) = match (parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(m), None) => (h, m),
        _ => return Err(invalid()),
    };

    let field = |v: &str, max: u32| -> Option<u32> {
        if v.is_empty() || v.len() > 2 || !v.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        v.parse::<u32>().ok().filter(|n| *n <= max)
    };

    // Minutes always need both digits
    if minute.len() != 2 {
        return Err(invalid());
    }

    Ok(ClockTime {
        hour: field(hour, 23).ok_or_else(invalid)?,
        minute: field(minute, 59).ok_or_else(invalid)?,
    })
}

/// Calendar triggers carry the parsed cron table they fire on.
#[derive(Debug, Clone)]
pub enum Schedule {
    /// Fires every `Duration`, first firing one period after arming.
    Interval(std::time::Duration),
    Weekly { day: Weekday, time: ClockTime, cron: cron::Schedule },
    Daily { time: ClockTime, cron: cron::Schedule },
}

impl PartialEq for Schedule {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Schedule::Interval(a), Schedule::Interval(b)) => a == b,
            (Schedule::Weekly { day: d1, time: t1, .. }, Schedule::Weekly { day: d2, time: t2, .. }) => {
                d1 == d2 && t1 == t2
            }
            (Schedule::Daily { time: a, .. }, Schedule::Daily { time: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl Eq for Schedule {}

impl Schedule {
    pub fn interval(every: std::time::Duration) -> Result<Self, ScheduleError> {
        if every.is_zero() {
            return Err(ScheduleError::InvalidInterval);
        }
        Ok(Schedule::Interval(every))
    }

    pub fn weekly(day: &str, time: &str) -> Result<Self, ScheduleError> {
        let day = parse_weekday(day)?;
        let time = parse_clock_time(time)?;
        let cron = cron_table(&format!("0 {} {} * * {}", time.minute, time.hour, day))?;
        Ok(Schedule::Weekly { day, time, cron })
    }

    pub fn daily(time: &str) -> Result<Self, ScheduleError> {
        let time = parse_clock_time(time)?;
        let cron = cron_table(&format!("0 {} {} * * *", time.minute, time.hour))?;
        Ok(Schedule::Daily { time, cron })
    }

    /// Next firing strictly after `now`, in `now`'s timezone.
    ///
    /// Calendar slots that do not exist locally (DST gaps) are skipped.
    pub fn next_after<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        match self {
            Schedule::Interval(every) => {
                let step = Duration::from_std(*every).ok()?;
                now.clone().checked_add_signed(step)
            }
            Schedule::Weekly { cron, .. } | Schedule::Daily { cron, .. } => cron.after(now).next(),
        }
    }

    pub fn cron_expression(&self) -> String {
        match self {
            Schedule::Interval(every) => format!("@every {}", format_every(*every)),
            Schedule::Weekly { day, time, .. } => {
                format!("{} {} * * {}", time.minute, time.hour, weekday_ordinal(*day))
            }
            Schedule::Daily { time, .. } => format!("{} {} * * *", time.minute, time.hour),
        }
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.cron_expression())
    }
}

fn cron_table(expression: &str) -> Result<cron::Schedule, ScheduleError> {
    cron::Schedule::from_str(expression).map_err(|e| ScheduleError::InvalidCron {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

fn format_every(every: std::time::Duration) -> String {
    let secs = every.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    let mut out = String::new();
    if h > 0 {
        out.push_str(&format!("{}h", h));
    }
    if m > 0 {
        out.push_str(&format!("{}m", m));
    }
    if s > 0 || out.is_empty() {
        if every.subsec_millis() > 0 && secs == 0 {
            out.push_str(&format!("{}ms", every.subsec_millis()));
        } else {
            out.push_str(&format!("{}s", s));
        }
    }
    out
}
