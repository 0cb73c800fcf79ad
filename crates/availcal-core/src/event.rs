use std::io::BufReader;

use ical::IcalParser;
use ical::parser::ical::component::IcalEvent;
use ical::property::Property;
use thiserror::Error;
use tracing::debug;

use crate::datetime::{EventTime, ValueError, parse_ical_value};

/// One VEVENT reduced to what availability needs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CalendarEvent {
    pub uid: Option<String>,
    pub summary: Option<String>,
    pub start: Option<EventTime>,
    pub end: Option<EventTime>,
    /// Raw RRULE. Recurrences are not expanded; only the first
    /// occurrence is ever counted.
    pub recurrence: Option<String>,
}

/// A VEVENT whose DTSTART or DTEND could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {property} {value:?}: {source}")]
pub struct EventError {
    pub uid: Option<String>,
    pub property: String,
    pub value: String,
    pub source: ValueError,
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("payload is not an iCalendar document")]
    NotCalendar,

    #[error("failed parsing iCalendar payload: {0}")]
    Parse(String),
}

pub type DecodedEvent = Result<CalendarEvent, EventError>;

impl CalendarEvent {
    pub fn new(start: EventTime, end: EventTime) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
            ..Self::default()
        }
    }

    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    pub fn from_ical(event: &IcalEvent) -> Result<Self, EventError> {
        let uid = property_value(&event.properties, "UID");
        let start = decode_time(&event.properties, "DTSTART", uid.as_deref())?;
        let end = decode_time(&event.properties, "DTEND", uid.as_deref())?;

        Ok(Self {
            summary: property_value(&event.properties, "SUMMARY"),
            recurrence: property_value(&event.properties, "RRULE"),
            uid,
            start,
            end,
        })
    }
}

/// True when the text opens with a VCALENDAR block. Relays and captive
/// portals happily answer 200 with HTML, so bodies are checked before parsing.
pub fn looks_like_calendar(text: &str) -> bool {
    calendar_body(text)
        .get(..15)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("BEGIN:VCALENDAR"))
}

/// Decodes every VEVENT in `text`. A broken document fails as a whole; a
/// broken event only fails its own entry.
#[tracing::instrument(skip_all, fields(bytes = text.len()))]
pub fn parse_feed(text: &str) -> Result<Vec<DecodedEvent>, FeedError> {
    if !looks_like_calendar(text) {
        return Err(FeedError::NotCalendar);
    }

    let reader = BufReader::new(calendar_body(text).as_bytes());
    let parser = IcalParser::new(reader);

    let mut out = Vec::new();
    for calendar in parser {
        let calendar = calendar.map_err(|err| FeedError::Parse(err.to_string()))?;
        for event in &calendar.events {
            out.push(CalendarEvent::from_ical(event));
        }
    }

    debug!(events = out.len(), "decoded feed events");
    Ok(out)
}

/// The text with any byte-order mark and leading blank lines removed.
fn calendar_body(text: &str) -> &str {
    text.trim_start_matches('\u{feff}').trim_start()
}

fn decode_time(
    properties: &[Property],
    name: &str,
    uid: Option<&str>,
) -> Result<Option<EventTime>, EventError> {
    let Some(property) = find_property(properties, name) else {
        return Ok(None);
    };
    let raw = property.value.as_deref().unwrap_or_default();

    parse_ical_value(
        raw,
        param_value(property, "VALUE"),
        param_value(property, "TZID"),
    )
    .map(Some)
    .map_err(|source| EventError {
        uid: uid.map(str::to_string),
        property: name.to_string(),
        value: raw.to_string(),
        source,
    })
}

fn find_property<'a>(properties: &'a [Property], name: &str) -> Option<&'a Property> {
    properties
        .iter()
        .find(|property| property.name.eq_ignore_ascii_case(name))
}

fn property_value(properties: &[Property], name: &str) -> Option<String> {
    find_property(properties, name)?
        .value
        .as_ref()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn param_value<'a>(property: &'a Property, key: &str) -> Option<&'a str> {
    property
        .params
        .as_ref()?
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(key))?
        .1
        .first()
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::datetime::Zone;

    const FEED: &str = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:-//test//EN\r\n\
BEGIN:VEVENT\r\n\
UID:all-day@test\r\n\
SUMMARY:Booked\r\n\
DTSTART;VALUE=DATE:20240301\r\n\
DTEND;VALUE=DATE:20240303\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:zoned@test\r\n\
DTSTART;TZID=Europe/Berlin:20240308T230000\r\n\
DTEND;TZID=Europe/Berlin:20240309T010000\r\n\
RRULE:FREQ=WEEKLY;COUNT=3\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:open-ended@test\r\n\
DTSTART:20240315T100000Z\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:broken@test\r\n\
DTSTART:soon\r\n\
DTEND:20240320T100000Z\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn decodes_each_vevent() {
        let events = parse_feed(FEED).expect("parse feed");
        assert_eq!(events.len(), 4);

        let all_day = events[0].as_ref().expect("all-day event");
        assert_eq!(all_day.uid.as_deref(), Some("all-day@test"));
        assert_eq!(all_day.summary.as_deref(), Some("Booked"));
        assert_eq!(all_day.start, Some(EventTime::Date(date(2024, 3, 1))));
        assert_eq!(all_day.end, Some(EventTime::Date(date(2024, 3, 3))));

        let zoned = events[1].as_ref().expect("zoned event");
        assert_eq!(zoned.recurrence.as_deref(), Some("FREQ=WEEKLY;COUNT=3"));
        match &zoned.start {
            Some(EventTime::DateTime(instant)) => {
                assert_eq!(instant.zone, Zone::Named(chrono_tz::Europe::Berlin));
                assert_eq!(instant.wall_clock.date(), date(2024, 3, 8));
            }
            other => panic!("unexpected start: {other:?}"),
        }

        let open_ended = events[2].as_ref().expect("open-ended event");
        assert!(open_ended.start.is_some());
        assert!(open_ended.end.is_none());
    }

    #[test]
    fn bad_value_fails_only_its_event() {
        let events = parse_feed(FEED).expect("parse feed");
        let err = events[3].as_ref().expect_err("broken event");
        assert_eq!(err.uid.as_deref(), Some("broken@test"));
        assert_eq!(err.property, "DTSTART");
        assert_eq!(err.value, "soon");
        assert!(matches!(err.source, ValueError::Unrecognized(_)));
    }

    #[test]
    fn rejects_non_calendar_payloads() {
        assert!(matches!(
            parse_feed("<html><body>Access denied</body></html>"),
            Err(FeedError::NotCalendar)
        ));
        assert!(matches!(parse_feed(""), Err(FeedError::NotCalendar)));
        assert!(looks_like_calendar("\u{feff}\r\nbegin:vcalendar\r\n"));
    }

    #[test]
    fn bom_and_leading_blank_lines_are_ignored() {
        let text = format!("\u{feff}\r\n  {FEED}");
        let events = parse_feed(&text).expect("parse feed");
        assert_eq!(events.len(), 4);
        assert_eq!(
            events[0].as_ref().expect("all-day event").uid.as_deref(),
            Some("all-day@test")
        );
    }

    #[test]
    fn zoned_end_on_the_next_date_marks_it_busy() {
        let events = parse_feed(FEED).expect("parse feed");
        let zoned = events[1].as_ref().expect("zoned event");
        let busy = crate::extract::extract_events([zoned]).busy;
        assert_eq!(busy.to_strings(), vec!["2024-03-08", "2024-03-09"]);
    }

    #[test]
    fn empty_calendar_has_no_events() {
        let events = parse_feed("BEGIN:VCALENDAR\r\nVERSION:2.0\r\nEND:VCALENDAR\r\n")
            .expect("parse feed");
        assert!(events.is_empty());
    }
}
