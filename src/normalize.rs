//! Canonical forms for the human-entered fields of an event.
//!
//! Titles become URL slugs, free-text dates become `YYYY-MM-DD` and 12-hour
//! times become zero-padded 24-hour `HH:MM`. Everything here is pure; the
//! persistence layer decides when to call it.

use chrono::{
    DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc,
};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::utils::clean_text;

static SLUG_STRIP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_\s-]").expect("valid slug strip regex"));
static SLUG_SEPARATOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\s_-]+").expect("valid slug separator regex"));
static MERIDIEM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*(am|pm)\s*").expect("valid meridiem regex"));

const DATE_TIME_FORMATS: [&str; 9] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M %p",
    "%B %d, %Y %H:%M",
    "%B %d, %Y %I:%M %p",
    "%B %d %Y %I:%M %p",
];

// `%y` must precede `%Y`, otherwise "3/5/24" parses as the year 24.
const DATE_FORMATS: [&str; 10] = [
    "%m/%d/%y",
    "%m/%d/%Y",
    "%Y/%m/%d",
    "%B %d, %Y",
    "%B %d %Y",
    "%d %B %Y",
    "%d %B, %Y",
    "%A, %B %d, %Y",
    "%A %B %d %Y",
    "%a %b %d %Y",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("invalid date format: {0:?}")]
    InvalidDate(String),
    #[error("invalid time format: {0:?}")]
    InvalidTime(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Meridiem {
    Am,
    Pm,
}

/// Derive a URL slug from a free-text title.
///
/// Characters outside the ASCII word class are dropped rather than
/// transliterated, so a title made only of symbols yields an empty slug.
/// Rejecting that is left to the caller.
pub fn derive_slug(title: &str) -> String {
    let lowered = title.to_lowercase();
    let stripped = SLUG_STRIP_RE.replace_all(lowered.trim(), "");
    let joined = SLUG_SEPARATOR_RE.replace_all(&stripped, "-");
    joined.trim_matches('-').to_string()
}

/// Normalize a free-text date to `YYYY-MM-DD`, reading zone-less input as UTC.
pub fn normalize_date(raw: &str) -> Result<String, NormalizeError> {
    normalize_date_in(raw, Tz::UTC)
}

/// Normalize a free-text date to `YYYY-MM-DD`.
///
/// Inputs without an explicit offset are read as local time in `tz`; the
/// result is the UTC calendar date of that instant. Date-only ISO input
/// (`2024-03-05`) is always UTC, which keeps the function idempotent.
pub fn normalize_date_in(raw: &str, tz: Tz) -> Result<String, NormalizeError> {
    parse_calendar_date(raw, tz)
        .map(|date| date.format("%Y-%m-%d").to_string())
        .ok_or_else(|| NormalizeError::InvalidDate(raw.to_string()))
}

/// Normalize a 12-hour time with an `AM`/`PM` marker to 24-hour `HH:MM`.
///
/// Without a marker the input is taken as 24-hour and only re-padded. A
/// missing minute reads as `00`; an empty or non-numeric component is an
/// error. Ranges are not checked, so `13:00 PM` becomes `25:00`.
pub fn normalize_time(raw: &str) -> Result<String, NormalizeError> {
    let invalid = || NormalizeError::InvalidTime(raw.to_string());

    let (meridiem, remainder) = match MERIDIEM_RE.captures(raw) {
        Some(caps) => {
            let marker = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let meridiem = if marker.eq_ignore_ascii_case("pm") {
                Meridiem::Pm
            } else {
                Meridiem::Am
            };
            (Some(meridiem), MERIDIEM_RE.replace(raw, "").into_owned())
        }
        None => (None, raw.to_string()),
    };

    let mut parts = remainder.split(':');
    let mut hour = parts
        .next()
        .and_then(parse_component)
        .ok_or_else(invalid)?;
    let minute = match parts.next() {
        Some(text) => parse_component(text).ok_or_else(invalid)?,
        None => 0,
    };

    match meridiem {
        Some(Meridiem::Pm) if hour != 12 => hour = hour.saturating_add(12),
        Some(Meridiem::Am) if hour == 12 => hour = 0,
        _ => {}
    }

    Ok(format!("{hour:02}:{minute:02}"))
}

fn parse_component(text: &str) -> Option<u32> {
    let text = text.trim();
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

fn parse_calendar_date(raw: &str, tz: Tz) -> Option<NaiveDate> {
    let cleaned = clean_text(raw);
    if cleaned.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(&cleaned) {
        return Some(dt.with_timezone(&Utc).date_naive());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(&cleaned) {
        return Some(dt.with_timezone(&Utc).date_naive());
    }
    if let Ok(date) = NaiveDate::parse_from_str(&cleaned, "%Y-%m-%d") {
        return Some(date);
    }

    let naive = DATE_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&cleaned, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(&cleaned, fmt).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })?;

    to_utc(naive, tz).map(|dt| dt.date_naive())
}

fn to_utc(naive: NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    let local = match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(dt, _) => dt,
        // Wall-clock time skipped by a DST jump; move past the gap.
        LocalResult::None => tz.from_local_datetime(&(naive + Duration::hours(1))).earliest()?,
    };
    Some(local.with_timezone(&Utc))
}
