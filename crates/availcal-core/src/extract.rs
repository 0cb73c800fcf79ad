//! Busy-day extraction.
//!
//! Every event covers the half-open day range `[start_day, end_day)`, where
//! both bounds are the event's own wall-clock dates. A timed end that falls
//! after midnight of a later day also makes that day busy. Zones are
//! discarded, never converted: a 23:30 start in Los Angeles is busy on that
//! calendar day even though it is already the next day in UTC.

use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;
use tracing::{debug, warn};

use crate::busy::BusyDaySet;
use crate::datetime::EventTime;
use crate::event::{CalendarEvent, DecodedEvent};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    MissingStart,
    MissingEnd,
    Invalid {
        property: String,
        value: String,
        message: String,
    },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingStart => f.write_str("missing DTSTART"),
            Self::MissingEnd => f.write_str("missing DTEND"),
            Self::Invalid {
                property,
                value,
                message,
            } => write!(f, "invalid {property} {value:?}: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EventStatus {
    /// `days` counts the days this event covered, including days other
    /// events had already marked.
    Expanded { days: usize },
    Skipped { reason: SkipReason },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventOutcome {
    pub index: usize,
    pub uid: Option<String>,
    #[serde(flatten)]
    pub status: EventStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub busy: BusyDaySet,
    pub outcomes: Vec<EventOutcome>,
}

impl Extraction {
    pub fn skipped(&self) -> impl Iterator<Item = &EventOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome.status, EventStatus::Skipped { .. }))
    }

    /// Events that decoded fine but covered no day at all, e.g. a meeting
    /// that starts and ends on the same date.
    pub fn empty(&self) -> impl Iterator<Item = &EventOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == EventStatus::Expanded { days: 0 })
    }
}

/// Extracts busy days from decoded feed entries. Entries that failed to
/// decode are recorded as skipped; nothing here aborts the run.
#[tracing::instrument(skip_all)]
pub fn extract<I>(entries: I) -> Extraction
where
    I: IntoIterator<Item = DecodedEvent>,
{
    let mut out = Extraction::default();

    for (index, entry) in entries.into_iter().enumerate() {
        let outcome = match entry {
            Ok(event) => expand_event(&mut out.busy, index, &event),
            Err(err) => {
                warn!(index, uid = ?err.uid, error = %err, "skipping undecodable event");
                EventOutcome {
                    index,
                    uid: err.uid.clone(),
                    status: EventStatus::Skipped {
                        reason: SkipReason::Invalid {
                            property: err.property.clone(),
                            value: err.value.clone(),
                            message: err.source.to_string(),
                        },
                    },
                }
            }
        };
        out.outcomes.push(outcome);
    }

    debug!(
        events = out.outcomes.len(),
        busy_days = out.busy.len(),
        skipped = out.skipped().count(),
        "extraction finished"
    );
    out
}

/// Same as [`extract`] for events that are already decoded.
pub fn extract_events<'a, I>(events: I) -> Extraction
where
    I: IntoIterator<Item = &'a CalendarEvent>,
{
    extract(events.into_iter().cloned().map(Ok))
}

fn expand_event(busy: &mut BusyDaySet, index: usize, event: &CalendarEvent) -> EventOutcome {
    let uid = event.uid.clone();

    let (start, end, end_time) = match (&event.start, &event.end) {
        (None, _) => return skipped(index, uid, SkipReason::MissingStart),
        (_, None) => return skipped(index, uid, SkipReason::MissingEnd),
        (Some(start), Some(end)) => (start.civil_date(), end.civil_date(), end),
    };

    if event.recurrence.is_some() {
        debug!(index, uid = ?uid, "recurrence not expanded; counting first occurrence only");
    }

    let mut days = mark_days(busy, start, end);
    if end > start && ends_after_midnight(end_time) {
        busy.insert(end);
        days += 1;
    }
    if days == 0 {
        debug!(
            index,
            uid = ?uid,
            start = %start,
            end = %end,
            "event covers no whole day; not marked busy"
        );
    }

    EventOutcome {
        index,
        uid,
        status: EventStatus::Expanded { days },
    }
}

fn skipped(index: usize, uid: Option<String>, reason: SkipReason) -> EventOutcome {
    debug!(index, uid = ?uid, reason = %reason, "skipping event");
    EventOutcome {
        index,
        uid,
        status: EventStatus::Skipped { reason },
    }
}

fn ends_after_midnight(end: &EventTime) -> bool {
    match end {
        EventTime::Date(_) => false,
        EventTime::DateTime(instant) => instant.wall_clock.time() > NaiveTime::MIN,
    }
}

fn mark_days(busy: &mut BusyDaySet, start: NaiveDate, end: NaiveDate) -> usize {
    let mut days = 0;
    let mut current = start;
    while current < end {
        busy.insert(current);
        days += 1;
        match current.succ_opt() {
            Some(next) => current = next,
            None => break,
        }
    }
    days
}
