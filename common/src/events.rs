use std::cmp::Ordering;

use chrono::{DateTime, Duration, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::{
    config::{UserPrefs, DEFAULT_CALENDAR},
    pattern::{Pattern, COMBINED_STEP_MS},
    types::{FlashSide, ResponseStatus},
};

pub const IMMINENT_MINUTES: i64 = 2;
pub const SOON_MINUTES: i64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default = "default_calendar")]
    pub calendar: String,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    #[serde(default)]
    pub response: ResponseStatus,
}

fn default_calendar() -> String {
    DEFAULT_CALENDAR.to_string()
}

/// How pressing an event is right now. Later variants outrank earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Urgency {
    Upcoming,
    Soon,
    Imminent,
    InProgress,
}

impl Urgency {
    pub fn classify(
        event: &CalendarEvent,
        now: DateTime<FixedOffset>,
        lookahead_minutes: u32,
    ) -> Option<Self> {
        if event.end <= now {
            return None;
        }
        if event.start <= now {
            return Some(Self::InProgress);
        }

        let until_start = event.start - now;
        if until_start < Duration::minutes(IMMINENT_MINUTES) {
            Some(Self::Imminent)
        } else if until_start < Duration::minutes(SOON_MINUTES) {
            Some(Self::Soon)
        } else if until_start < Duration::minutes(i64::from(lookahead_minutes)) {
            Some(Self::Upcoming)
        } else {
            None
        }
    }

    pub fn pattern(self) -> Pattern {
        match self {
            Self::Upcoming => Pattern::FREE,
            Self::Soon => Pattern::SOON,
            Self::Imminent => Pattern::IMMINENT,
            Self::InProgress => Pattern::BUSY,
        }
    }

    fn needs_attention(self) -> bool {
        self >= Self::Soon
    }
}

/// Keeps the events the user asked to watch that overlap the lookahead
/// window, sorted by start time.
pub fn select_events(
    events: Vec<CalendarEvent>,
    now: DateTime<FixedOffset>,
    prefs: &UserPrefs,
) -> Vec<CalendarEvent> {
    let horizon = now + Duration::minutes(i64::from(prefs.lookahead_minutes));
    let mut selected: Vec<CalendarEvent> = events
        .into_iter()
        .filter(|event| prefs.watches_calendar(&event.calendar))
        .filter(|event| prefs.response_state.matches(event.response))
        .filter(|event| !prefs.is_excluded(&event.summary))
        .filter(|event| event.end > now && event.start < horizon)
        .collect();
    selected.sort_by_key(|event| event.start);
    selected
}

/// Maps an event window to the pattern the light should show.
///
/// The most urgent event decides. When two events that both need attention
/// want different colors, the light alternates between them and `side`
/// picks which one leads.
pub fn pattern_for_events(
    events: &[CalendarEvent],
    now: DateTime<FixedOffset>,
    side: FlashSide,
    lookahead_minutes: u32,
) -> Pattern {
    let mut ranked: Vec<(Urgency, &CalendarEvent)> = events
        .iter()
        .filter_map(|event| {
            Urgency::classify(event, now, lookahead_minutes).map(|urgency| (urgency, event))
        })
        .collect();
    ranked.sort_by(|a, b| rank(*a, *b));

    let Some(&(best, _)) = ranked.first() else {
        return Pattern::BLACK;
    };

    let best_pattern = best.pattern();
    if !best.needs_attention() {
        return best_pattern;
    }

    let lead = best_pattern.lead_color();
    let rival = ranked
        .iter()
        .map(|(urgency, _)| *urgency)
        .find(|urgency| urgency.needs_attention() && urgency.pattern().lead_color() != lead);

    match rival {
        Some(rival) => {
            let other = rival.pattern().lead_color();
            let colors = match side {
                FlashSide::First => vec![lead, other],
                FlashSide::Second => vec![other, lead],
            };
            Pattern::flash(colors, COMBINED_STEP_MS)
        }
        None => best_pattern,
    }
}

fn rank(a: (Urgency, &CalendarEvent), b: (Urgency, &CalendarEvent)) -> Ordering {
    let accepted = |event: &CalendarEvent| event.response == ResponseStatus::Accepted;
    b.0.cmp(&a.0)
        .then_with(|| accepted(b.1).cmp(&accepted(a.1)))
        .then_with(|| a.1.start.cmp(&b.1.start))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Color, ResponseState};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn now() -> DateTime<FixedOffset> {
        FixedOffset::west_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 1, 5, 10, 0, 0)
            .unwrap()
    }

    fn event(summary: &str, start_min: i64, len_min: i64) -> CalendarEvent {
        let start = now() + Duration::minutes(start_min);
        CalendarEvent {
            id: summary.to_lowercase(),
            summary: summary.to_string(),
            calendar: DEFAULT_CALENDAR.to_string(),
            start,
            end: start + Duration::minutes(len_min),
            response: ResponseStatus::Accepted,
        }
    }

    fn pattern(events: &[CalendarEvent]) -> Pattern {
        pattern_for_events(events, now(), FlashSide::First, 60)
    }

    #[test]
    fn no_events_turns_light_off() {
        assert_eq!(pattern(&[]), Pattern::BLACK);
    }

    #[test]
    fn event_starting_now_is_busy() {
        assert_eq!(pattern(&[event("Standup", 0, 30)]), Pattern::BUSY);
    }

    #[test]
    fn tiers_follow_time_until_start() {
        assert_eq!(pattern(&[event("A", 1, 30)]), Pattern::IMMINENT);
        assert_eq!(pattern(&[event("A", 2, 30)]), Pattern::SOON);
        assert_eq!(pattern(&[event("A", 9, 30)]), Pattern::SOON);
        assert_eq!(pattern(&[event("A", 10, 30)]), Pattern::FREE);
        assert_eq!(pattern(&[event("A", 59, 30)]), Pattern::FREE);
        assert_eq!(pattern(&[event("A", 60, 30)]), Pattern::BLACK);
    }

    #[test]
    fn finished_event_is_ignored() {
        assert_eq!(pattern(&[event("Done", -30, 30)]), Pattern::BLACK);
    }

    #[test]
    fn busy_outranks_upcoming() {
        let events = [event("Later", 20, 30), event("Now", -5, 30)];
        assert_eq!(pattern(&events), Pattern::BUSY);
    }

    #[test]
    fn disagreeing_events_alternate() {
        let events = [event("Now", -5, 30), event("Next", 5, 30)];

        assert_eq!(
            pattern_for_events(&events, now(), FlashSide::First, 60),
            Pattern::flash(vec![Color::RED, Color::YELLOW], COMBINED_STEP_MS)
        );
        assert_eq!(
            pattern_for_events(&events, now(), FlashSide::Second, 60),
            Pattern::flash(vec![Color::YELLOW, Color::RED], COMBINED_STEP_MS)
        );
    }

    #[test]
    fn same_color_events_do_not_flash() {
        let events = [event("One", -5, 30), event("Two", -1, 30)];
        assert_eq!(pattern(&events), Pattern::BUSY);
    }

    #[test]
    fn accepted_event_ranks_first_within_tier() {
        let mut tentative = event("Maybe", 3, 30);
        tentative.response = ResponseStatus::Tentative;
        let accepted = event("Sure", 4, 30);

        let mut events = vec![tentative, accepted];
        let ranked = {
            let mut ranked: Vec<(Urgency, &CalendarEvent)> = events
                .iter()
                .map(|event| (Urgency::classify(event, now(), 60).unwrap(), event))
                .collect();
            ranked.sort_by(|a, b| rank(*a, *b));
            ranked.iter().map(|(_, event)| event.summary.clone()).collect::<Vec<_>>()
        };
        assert_eq!(ranked, vec!["Sure", "Maybe"]);

        events.reverse();
        assert_eq!(pattern(&events), Pattern::SOON);
    }

    #[test]
    fn select_events_filters_and_sorts() {
        let mut prefs = UserPrefs {
            calendars: vec!["primary".to_string(), "team".to_string()],
            response_state: ResponseState::NotRejected,
            excludes: vec!["Focus time".to_string()],
            ..UserPrefs::default()
        };
        prefs.sanitize();

        let mut declined = event("Declined", 5, 30);
        declined.response = ResponseStatus::Declined;
        let mut other_calendar = event("Elsewhere", 5, 30);
        other_calendar.calendar = "personal".to_string();
        let mut team = event("Team sync", 15, 30);
        team.calendar = "team".to_string();

        let selected = select_events(
            vec![
                team,
                event("Focus time", 1, 60),
                declined,
                other_calendar,
                event("Far away", 120, 30),
                event("Over", -60, 30),
                event("Review", 3, 30),
            ],
            now(),
            &prefs,
        );

        let titles: Vec<&str> = selected.iter().map(|event| event.summary.as_str()).collect();
        assert_eq!(titles, vec!["Review", "Team sync"]);
    }

    #[test]
    fn accepted_filter_drops_tentative() {
        let prefs = UserPrefs {
            response_state: ResponseState::Accepted,
            ..UserPrefs::default()
        };
        let mut tentative = event("Maybe", 3, 30);
        tentative.response = ResponseStatus::Tentative;

        assert!(select_events(vec![tentative], now(), &prefs).is_empty());
    }

    #[test]
    fn parses_event_json() {
        let raw = r#"{
            "summary": "Planning",
            "start": "2026-01-05T10:00:00-08:00",
            "end": "2026-01-05T11:00:00-08:00",
            "response": "needsAction"
        }"#;
        let event: CalendarEvent = serde_json::from_str(raw).unwrap();

        assert_eq!(event.calendar, DEFAULT_CALENDAR);
        assert_eq!(event.response, ResponseStatus::NeedsAction);
        assert_eq!(event.start, now());
    }
}
