use std::fs;
use std::path::{
  Path,
  PathBuf
};

use chrono::{
  DateTime,
  NaiveDate,
  NaiveDateTime,
  Offset,
  Utc
};
use chrono_tz::Tz;
use serde::Deserialize;
use thiserror::Error;

const TIMEZONE_CONFIG_FILE: &str =
  "availcal-time.toml";
const TIMEZONE_ENV_VAR: &str =
  "AVAILCAL_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str =
  "AVAILCAL_TIME_CONFIG";

/// Zone attribution carried by an iCal
/// date-time. Only ever recorded, never
/// used to convert the wall clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Zone {
  Floating,
  Utc,
  Offset(chrono::FixedOffset),
  Named(Tz),
  Unrecognized(String)
}

/// A date-time exactly as written in the
/// feed: wall-clock components plus the
/// zone they were written in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instant {
  pub wall_clock: NaiveDateTime,
  pub zone:       Zone
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventTime {
  Date(NaiveDate),
  DateTime(Instant)
}

impl EventTime {
  pub fn floating(
    wall_clock: NaiveDateTime
  ) -> Self {
    EventTime::DateTime(Instant {
      wall_clock,
      zone: Zone::Floating
    })
  }

  /// Calendar day of the value in its
  /// own frame. Date-times are truncated
  /// to their wall-clock date; the zone
  /// is dropped, not applied.
  #[must_use]
  pub fn civil_date(&self) -> NaiveDate {
    match self {
      | EventTime::Date(date) => *date,
      | EventTime::DateTime(instant) => {
        instant.wall_clock.date()
      }
    }
  }

  pub fn is_all_day(&self) -> bool {
    matches!(self, EventTime::Date(_))
  }
}

#[derive(
  Debug, Clone, PartialEq, Eq, Error,
)]
pub enum ValueError {
  #[error("value is empty")]
  Empty,
  #[error(
    "VALUE=DATE but {0:?} is not \
     YYYYMMDD"
  )]
  NotADate(String),
  #[error(
    "unrecognized date or date-time \
     {0:?}"
  )]
  Unrecognized(String)
}

/// Decodes an iCal DATE or DATE-TIME
/// value. `value_type` is the `VALUE`
/// parameter and `tzid` the `TZID`
/// parameter, when present.
pub fn parse_ical_value(
  raw: &str,
  value_type: Option<&str>,
  tzid: Option<&str>
) -> Result<EventTime, ValueError> {
  let raw = raw.trim();
  if raw.is_empty() {
    return Err(ValueError::Empty);
  }

  if value_type.is_some_and(|kind| {
    kind.trim().eq_ignore_ascii_case(
      "DATE"
    )
  }) {
    return parse_basic_date(raw)
      .map(EventTime::Date)
      .ok_or_else(|| {
        ValueError::NotADate(
          raw.to_string()
        )
      });
  }

  if raw.len() == 8
    && let Some(date) =
      parse_basic_date(raw)
  {
    return Ok(EventTime::Date(date));
  }

  if raw.ends_with('Z')
    && let Ok(naive) =
      NaiveDateTime::parse_from_str(
        raw,
        "%Y%m%dT%H%M%SZ"
      )
  {
    return Ok(EventTime::DateTime(
      Instant {
        wall_clock: naive,
        zone:       Zone::Utc
      }
    ));
  }

  if let Ok(naive) =
    NaiveDateTime::parse_from_str(
      raw,
      "%Y%m%dT%H%M%S"
    )
  {
    let zone = match tzid {
      | Some(tzid) => zone_from_tzid(tzid),
      | None => Zone::Floating
    };
    return Ok(EventTime::DateTime(
      Instant {
        wall_clock: naive,
        zone
      }
    ));
  }

  if let Ok(parsed) =
    DateTime::parse_from_rfc3339(raw)
  {
    return Ok(EventTime::DateTime(
      Instant {
        wall_clock: parsed
          .naive_local(),
        zone:       Zone::Offset(
          parsed.offset().fix()
        )
      }
    ));
  }

  if raw.len() == 10
    && let Ok(date) =
      NaiveDate::parse_from_str(
        raw, "%Y-%m-%d"
      )
  {
    return Ok(EventTime::Date(date));
  }

  Err(ValueError::Unrecognized(
    raw.to_string()
  ))
}

fn parse_basic_date(
  raw: &str
) -> Option<NaiveDate> {
  if raw.len() != 8
    || !raw
      .bytes()
      .all(|b| b.is_ascii_digit())
  {
    return None;
  }
  NaiveDate::parse_from_str(
    raw, "%Y%m%d"
  )
  .ok()
}

fn zone_from_tzid(tzid: &str) -> Zone {
  let trimmed =
    tzid.trim().trim_matches('"');
  match trimmed.parse::<Tz>() {
    | Ok(tz) => Zone::Named(tz),
    | Err(error) => {
      tracing::warn!(
        tzid = %trimmed,
        error = %error,
        "unrecognized TZID; keeping wall clock as written"
      );
      Zone::Unrecognized(
        trimmed.to_string()
      )
    }
  }
}

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
  timezone: Option<String>,
  time:     Option<TimezoneSection>
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
  timezone: Option<String>
}

/// Timezone used to decide what "today"
/// is when rendering. Sources in order:
/// the configured value, the
/// `AVAILCAL_TIMEZONE` env var, the
/// TOML timezone file, then UTC.
pub fn resolve_display_timezone(
  configured: Option<&str>
) -> Tz {
  if let Some(raw) = configured
    && let Some(tz) = parse_timezone(
      raw,
      "render.timezone"
    )
  {
    return tz;
  }

  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) = parse_timezone(
      &raw,
      TIMEZONE_ENV_VAR
    )
  {
    return tz;
  }

  if let Some(path) =
    timezone_config_path()
    && let Some(tz) =
      load_timezone_from_file(&path)
  {
    return tz;
  }

  tracing::debug!(
    "no display timezone configured; \
     using UTC"
  );
  chrono_tz::UTC
}

#[must_use]
pub fn today_in(tz: Tz) -> NaiveDate {
  Utc::now()
    .with_timezone(&tz)
    .date_naive()
}

fn timezone_config_path()
-> Option<PathBuf> {
  if let Ok(raw) = std::env::var(
    TIMEZONE_CONFIG_ENV_VAR
  ) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
      return Some(PathBuf::from(
        trimmed
      ));
    }
  }

  std::env::current_dir().ok().map(
    |dir| {
      dir.join(TIMEZONE_CONFIG_FILE)
    }
  )
}

fn load_timezone_from_file(
  path: &Path
) -> Option<Tz> {
  if !path.exists() {
    tracing::debug!(
      file = %path.display(),
      "timezone config file not found"
    );
    return None;
  }

  let raw = match fs::read_to_string(
    path
  ) {
    | Ok(raw) => raw,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed reading timezone config file"
      );
      return None;
    }
  };

  let parsed = match toml::from_str::<
    TimezoneConfig
  >(&raw)
  {
    | Ok(parsed) => parsed,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed parsing timezone config file"
      );
      return None;
    }
  };

  let timezone =
    parsed.timezone.or_else(|| {
      parsed.time.and_then(|section| {
        section.timezone
      })
    });
  let Some(timezone) = timezone else {
    tracing::warn!(
      file = %path.display(),
      "timezone config had no timezone field"
    );
    return None;
  };

  parse_timezone(
    timezone.as_str(),
    &format!("file:{}", path.display())
  )
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::debug!(
        source,
        timezone = %trimmed,
        "resolved display timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::warn!(
        source,
        timezone = %trimmed,
        error = %err,
        "invalid timezone; trying next source"
      );
      None
    }
  }
}
