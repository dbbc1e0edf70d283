//! Time-of-day triggers.
//! Entries are "HH:MM" (minute granularity), read in a fixed UTC offset.
//! Example: ["09:00", "15:00", "21:00"] = three checks a day.

use chrono::{DateTime, Days, Duration, NaiveTime, Utc};
use pricewatch_core::config::ScheduleConfig;
use pricewatch_core::error::{PriceWatchError, Result};
use std::fmt;

/// Sorted, de-duplicated, non-empty set of trigger times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerSet {
    times: Vec<NaiveTime>,
    offset_minutes: i32,
}

impl TriggerSet {
    pub fn new<S: AsRef<str>>(entries: &[S], utc_offset_minutes: i32) -> Result<Self> {
        let mut times = entries
            .iter()
            .map(|e| parse_time_of_day(e.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        if times.is_empty() {
            return Err(PriceWatchError::Config("no trigger times configured".into()));
        }
        times.sort();
        times.dedup();
        Ok(Self {
            times,
            offset_minutes: utc_offset_minutes,
        })
    }

    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        Self::new(&config.trigger_times, config.utc_offset_minutes)
    }

    /// First trigger instant strictly after `after`, wrapping to the next day.
    pub fn next_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        let offset = Duration::minutes(i64::from(self.offset_minutes));
        let local = after.naive_utc() + offset;
        let today = local.date();

        let next_local = self
            .times
            .iter()
            .map(|t| today.and_time(*t))
            .find(|candidate| *candidate > local)
            .unwrap_or_else(|| (today + Days::new(1)).and_time(self.times[0]));

        (next_local - offset).and_utc()
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

impl fmt::Display for TriggerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .times
            .iter()
            .map(|t| t.format("%H:%M").to_string())
            .collect();
        let sign = if self.offset_minutes < 0 { '-' } else { '+' };
        let abs = self.offset_minutes.unsigned_abs();
        write!(f, "{} (UTC{sign}{:02}:{:02})", rendered.join(", "), abs / 60, abs % 60)
    }
}

/// Parse "HH:MM". Seconds are refused: sub-minute schedules are not supported.
fn parse_time_of_day(entry: &str) -> Result<NaiveTime> {
    let invalid = || {
        PriceWatchError::Config(format!("invalid trigger time '{entry}' (expected HH:MM)"))
    };

    let (hour, minute) = entry.trim().split_once(':').ok_or_else(invalid)?;
    let digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    let well_formed = (1..=2).contains(&hour.len()) && minute.len() == 2;
    if !well_formed || !digits(hour) || !digits(minute) {
        return Err(invalid());
    }
    let hour: u32 = hour.parse().map_err(|_| invalid())?;
    let minute: u32 = minute.parse().map_err(|_| invalid())?;
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(invalid)
}
