use std::{fmt, str::FromStr};

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, TimeZone, Weekday};
use serde::{Deserialize, Serialize};

use crate::{config::UserPrefs, error::ConfigError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DayOfWeek {
    #[serde(alias = "Mon", alias = "MON", alias = "monday")]
    Monday,
    #[serde(alias = "Tue", alias = "TUE", alias = "tuesday")]
    Tuesday,
    #[serde(alias = "Wed", alias = "WED", alias = "wednesday")]
    Wednesday,
    #[serde(alias = "Thu", alias = "THU", alias = "thursday")]
    Thursday,
    #[serde(alias = "Fri", alias = "FRI", alias = "friday")]
    Friday,
    #[serde(alias = "Sat", alias = "SAT", alias = "saturday")]
    Saturday,
    #[serde(alias = "Sun", alias = "SUN", alias = "sunday")]
    Sunday,
}

impl DayOfWeek {
    pub const ALL: [Self; 7] = [
        Self::Monday,
        Self::Tuesday,
        Self::Wednesday,
        Self::Thursday,
        Self::Friday,
        Self::Saturday,
        Self::Sunday,
    ];

    pub fn index(self) -> usize {
        match self {
            Self::Monday => 0,
            Self::Tuesday => 1,
            Self::Wednesday => 2,
            Self::Thursday => 3,
            Self::Friday => 4,
            Self::Saturday => 5,
            Self::Sunday => 6,
        }
    }

    pub fn from_chrono(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Mon => Self::Monday,
            Weekday::Tue => Self::Tuesday,
            Weekday::Wed => Self::Wednesday,
            Weekday::Thu => Self::Thursday,
            Weekday::Fri => Self::Friday,
            Weekday::Sat => Self::Saturday,
            Weekday::Sun => Self::Sunday,
        }
    }
}

/// One flag per weekday. Serialized as the list of skipped day names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<DayOfWeek>", into = "Vec<DayOfWeek>")]
pub struct SkipDays([bool; 7]);

impl SkipDays {
    pub fn contains(&self, day: DayOfWeek) -> bool {
        self.0[day.index()]
    }

    pub fn insert(&mut self, day: DayOfWeek) {
        self.0[day.index()] = true;
    }
}

impl From<Vec<DayOfWeek>> for SkipDays {
    fn from(days: Vec<DayOfWeek>) -> Self {
        let mut skip = Self::default();
        for day in days {
            skip.insert(day);
        }
        skip
    }
}

impl From<SkipDays> for Vec<DayOfWeek> {
    fn from(skip: SkipDays) -> Self {
        DayOfWeek::ALL
            .into_iter()
            .filter(|day| skip.contains(*day))
            .collect()
    }
}

/// A wall-clock time of day with minute precision, written as `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
    minutes: u16,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        if hour >= 24 || minute >= 60 {
            return None;
        }
        Some(Self {
            minutes: (hour * 60 + minute) as u16,
        })
    }

    pub fn hour(self) -> u32 {
        u32::from(self.minutes / 60)
    }

    pub fn minute(self) -> u32 {
        u32::from(self.minutes % 60)
    }

    /// This time of day on the same calendar date as `now`.
    pub fn on_day_of(self, now: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        local_at(now, now.date_naive(), self.hour(), self.minute())
    }
}

impl FromStr for TimeOfDay {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidTimeOfDay(value.to_string());
        let (hour, minute) = value.trim().split_once(':').ok_or_else(invalid)?;
        let hour = hour.parse::<u32>().map_err(|_| invalid())?;
        let minute = minute.parse::<u32>().map_err(|_| invalid())?;
        Self::new(hour, minute).ok_or_else(invalid)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(time: TimeOfDay) -> Self {
        time.to_string()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    SkipDay,
    BeforeStart,
    AfterEnd,
}

impl SuppressReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SkipDay => "skip day",
            Self::BeforeStart => "before start time",
            Self::AfterEnd => "after end time",
        }
    }
}

/// The light is forced off until `resume_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Suppression {
    pub reason: SuppressReason,
    pub resume_at: DateTime<FixedOffset>,
}

/// Checks the suppression windows in fixed order: skip day, then start time,
/// then end time. The first match wins.
pub fn suppression(now: DateTime<FixedOffset>, prefs: &UserPrefs) -> Option<Suppression> {
    if prefs.skip_days.contains(DayOfWeek::from_chrono(now.weekday())) {
        return Some(Suppression {
            reason: SuppressReason::SkipDay,
            resume_at: start_of_tomorrow(now),
        });
    }

    if let Some(start) = prefs.start_time {
        let start = start.on_day_of(now);
        if now < start {
            return Some(Suppression {
                reason: SuppressReason::BeforeStart,
                resume_at: start,
            });
        }
    }

    if let Some(end) = prefs.end_time {
        let end = end.on_day_of(now);
        if now > end {
            return Some(Suppression {
                reason: SuppressReason::AfterEnd,
                resume_at: start_of_tomorrow(now),
            });
        }
    }

    None
}

pub fn start_of_tomorrow(now: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    let tomorrow = now.date_naive() + Duration::days(1);
    local_at(now, tomorrow, 0, 0)
}

fn local_at(
    now: DateTime<FixedOffset>,
    date: NaiveDate,
    hour: u32,
    minute: u32,
) -> DateTime<FixedOffset> {
    let Some(naive) = date.and_hms_opt(hour, minute, 0) else {
        return now;
    };
    // A fixed offset maps every local time to exactly one instant.
    now.offset()
        .from_local_datetime(&naive)
        .single()
        .unwrap_or(now)
}
