use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError,
    scheduler::MAX_POLL_INTERVAL_SECS,
    schedule::{SkipDays, TimeOfDay},
    types::{FlashSide, ResponseState},
};

pub const DEFAULT_CALENDAR: &str = "primary";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserPrefs {
    pub calendars: Vec<String>,
    pub poll_interval: u64,
    pub response_state: ResponseState,
    pub skip_days: SkipDays,
    pub start_time: Option<TimeOfDay>,
    pub end_time: Option<TimeOfDay>,
    pub device_failure_retries: u32,
    pub show_dots: bool,
    pub priority_flash_side: FlashSide,
    /// Event titles that never affect the light.
    pub excludes: Vec<String>,
    pub timezone: Option<String>,
    pub lookahead_minutes: u32,
}

impl Default for UserPrefs {
    fn default() -> Self {
        Self {
            calendars: vec![DEFAULT_CALENDAR.to_string()],
            poll_interval: 30,
            response_state: ResponseState::NotRejected,
            skip_days: SkipDays::default(),
            start_time: None,
            end_time: None,
            device_failure_retries: 10,
            show_dots: true,
            priority_flash_side: FlashSide::First,
            excludes: Vec::new(),
            timezone: None,
            lookahead_minutes: 60,
        }
    }
}

/// Values given on the command line. Each one set here replaces the value
/// from the preferences file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrefsOverrides {
    pub calendar: Option<String>,
    pub poll_interval: Option<u64>,
    pub response_state: Option<ResponseState>,
    pub device_failure_retries: Option<u32>,
    pub show_dots: Option<bool>,
}

impl UserPrefs {
    pub fn from_json(raw: &[u8]) -> Result<Self, ConfigError> {
        let mut prefs: Self = serde_json::from_slice(raw)?;
        prefs.sanitize();
        Ok(prefs)
    }

    pub fn apply_overrides(&mut self, overrides: &PrefsOverrides) {
        if let Some(calendar) = &overrides.calendar {
            self.calendars = vec![calendar.clone()];
        }
        if let Some(poll_interval) = overrides.poll_interval {
            self.poll_interval = poll_interval;
        }
        if let Some(response_state) = overrides.response_state {
            self.response_state = response_state;
        }
        if let Some(retries) = overrides.device_failure_retries {
            self.device_failure_retries = retries;
        }
        if let Some(show_dots) = overrides.show_dots {
            self.show_dots = show_dots;
        }
    }

    pub fn sanitize(&mut self) {
        self.poll_interval = self.poll_interval.clamp(1, MAX_POLL_INTERVAL_SECS);
        self.lookahead_minutes = self.lookahead_minutes.clamp(1, 24 * 60);

        self.calendars.retain(|calendar| !calendar.trim().is_empty());
        self.calendars.sort();
        self.calendars.dedup();
        if self.calendars.is_empty() {
            self.calendars.push(DEFAULT_CALENDAR.to_string());
        }
    }

    pub fn watches_calendar(&self, calendar: &str) -> bool {
        self.calendars.iter().any(|watched| watched == calendar)
    }

    pub fn is_excluded(&self, summary: &str) -> bool {
        self.excludes.iter().any(|title| title == summary)
    }
}
