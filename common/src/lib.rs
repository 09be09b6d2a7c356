pub mod blinker;
pub mod config;
pub mod error;
pub mod events;
pub mod pattern;
pub mod schedule;
pub mod scheduler;
pub mod types;

pub use blinker::{BlinkerState, Light, RenderOutcome};
pub use config::{PrefsOverrides, UserPrefs};
pub use error::{BlinkerError, ConfigError, DeviceError, FetchError};
pub use events::{pattern_for_events, select_events, CalendarEvent, Urgency};
pub use pattern::Pattern;
pub use schedule::{DayOfWeek, SkipDays, SuppressReason, Suppression, TimeOfDay};
pub use scheduler::{FetchOutcome, Progress, Scheduler, SchedulerState, TickPlan};
pub use types::{Color, FlashSide, ResponseState, ResponseStatus};
