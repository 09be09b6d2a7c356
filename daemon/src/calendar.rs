use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use tracing::debug;

use calblink_common::{select_events, CalendarEvent, FetchError, UserPrefs};

/// Source of the event window. Implementations apply the calendar,
/// response-state, exclusion and lookahead filters from `prefs`.
#[async_trait]
pub trait CalendarSource: Send + Sync {
    async fn fetch_events(
        &self,
        now: DateTime<FixedOffset>,
        prefs: &UserPrefs,
    ) -> Result<Vec<CalendarEvent>, FetchError>;
}

/// Reads events from a JSON array on disk, re-read on every fetch so an
/// external sync job can keep the file fresh.
#[derive(Debug, Clone)]
pub struct JsonFileCalendar {
    path: PathBuf,
}

impl JsonFileCalendar {
    pub async fn connect(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Self { path }),
            Ok(_) => anyhow::bail!("{} is not a file", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                anyhow::bail!("calendar file {} does not exist", path.display())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CalendarSource for JsonFileCalendar {
    async fn fetch_events(
        &self,
        now: DateTime<FixedOffset>,
        prefs: &UserPrefs,
    ) -> Result<Vec<CalendarEvent>, FetchError> {
        let raw = tokio::fs::read(&self.path).await?;
        let events: Vec<CalendarEvent> = serde_json::from_slice(&raw)?;
        let total = events.len();
        let selected = select_events(events, now, prefs);
        debug!(total, selected = selected.len(), "calendar events loaded");
        for event in &selected {
            debug!(
                summary = %event.summary,
                start = %event.start,
                response = event.response.as_str(),
                "event in window"
            );
        }
        Ok(selected)
    }
}
