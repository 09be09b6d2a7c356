use chrono::{DateTime, Duration, FixedOffset};

use crate::{
    config::UserPrefs,
    events::{pattern_for_events, CalendarEvent},
    pattern::Pattern,
    schedule::{suppression, SuppressReason, Suppression},
};

/// Consecutive fetch failures tolerated before the light shows the error
/// pattern.
pub const FETCH_FAILURE_THRESHOLD: u32 = 10;

pub const MAX_POLL_INTERVAL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Suppressed(SuppressReason),
    Polling,
    Degraded,
    Exit,
}

impl SchedulerState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Suppressed(_) => "SUPPRESSED",
            Self::Polling => "POLLING",
            Self::Degraded => "DEGRADED",
            Self::Exit => "EXIT",
        }
    }
}

/// What the caller should do for this tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickPlan {
    Exit,
    Wait,
    Suppress(Suppression),
    Fetch,
}

/// One symbol of operator feedback per tick that did work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Success,
    FetchError,
    Suppressed(SuppressReason),
}

impl Progress {
    pub fn symbol(self) -> char {
        match self {
            Self::Success => '.',
            Self::FetchError => ',',
            Self::Suppressed(SuppressReason::SkipDay) => '~',
            Self::Suppressed(SuppressReason::BeforeStart) => '>',
            Self::Suppressed(SuppressReason::AfterEnd) => '<',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    /// `None` keeps whatever the light is currently showing.
    pub pattern: Option<Pattern>,
    pub progress: Progress,
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    state: SchedulerState,
    next_check: Option<DateTime<FixedOffset>>,
    failures: u32,
    failure_threshold: u32,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_failure_threshold(FETCH_FAILURE_THRESHOLD)
    }

    pub fn with_failure_threshold(failure_threshold: u32) -> Self {
        Self {
            state: SchedulerState::Idle,
            next_check: None,
            failures: 0,
            failure_threshold,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn next_check(&self) -> Option<DateTime<FixedOffset>> {
        self.next_check
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn request_exit(&mut self) {
        self.state = SchedulerState::Exit;
    }

    pub fn tick(&mut self, now: DateTime<FixedOffset>, prefs: &UserPrefs) -> TickPlan {
        if self.state == SchedulerState::Exit {
            return TickPlan::Exit;
        }

        if self.next_check.is_some_and(|next| now < next) {
            return TickPlan::Wait;
        }

        if let Some(hit) = suppression(now, prefs) {
            self.state = SchedulerState::Suppressed(hit.reason);
            self.next_check = Some(hit.resume_at);
            return TickPlan::Suppress(hit);
        }

        self.state = SchedulerState::Polling;
        TickPlan::Fetch
    }

    /// Records the result of the fetch started by the last [`TickPlan::Fetch`].
    pub fn record_fetch<E>(
        &mut self,
        now: DateTime<FixedOffset>,
        result: Result<&[CalendarEvent], E>,
        prefs: &UserPrefs,
    ) -> FetchOutcome {
        if self.state == SchedulerState::Exit {
            return FetchOutcome {
                pattern: None,
                progress: Progress::Success,
            };
        }

        let poll_interval = prefs.poll_interval.min(MAX_POLL_INTERVAL_SECS) as i64;
        self.next_check = Some(now + Duration::seconds(poll_interval));

        match result {
            Ok(events) => {
                self.failures = 0;
                self.state = SchedulerState::Idle;
                FetchOutcome {
                    pattern: Some(pattern_for_events(
                        events,
                        now,
                        prefs.priority_flash_side,
                        prefs.lookahead_minutes,
                    )),
                    progress: Progress::Success,
                }
            }
            Err(_) => {
                self.failures = self.failures.saturating_add(1);
                let degraded = self.failures > self.failure_threshold;
                self.state = if degraded {
                    SchedulerState::Degraded
                } else {
                    SchedulerState::Idle
                };
                FetchOutcome {
                    pattern: degraded.then_some(Pattern::ERROR),
                    progress: Progress::FetchError,
                }
            }
        }
    }
}
