use std::{collections::BTreeSet, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::normalize::{self, NormalizeError};

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("valid email regex")
});

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventMode {
    Online,
    Offline,
    Hybrid,
}

impl FromStr for EventMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "online" => Ok(Self::Online),
            "offline" => Ok(Self::Offline),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(format!(
                "Mode must be one of online, offline, hybrid (got {other:?})"
            )),
        }
    }
}

// Same leniency as form input: case and surrounding whitespace are ignored.
impl<'de> Deserialize<'de> for EventMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for EventMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Hybrid => "hybrid",
        };
        f.write_str(label)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub slug: String,
    pub description: String,
    pub overview: String,
    pub image: String,
    pub venue: String,
    pub location: String,
    pub date: String, // YYYY-MM-DD once stored
    pub time: String, // HH:MM once stored
    pub mode: EventMode,
    pub audience: String,
    pub agenda: Vec<String>,
    pub organizer: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    pub fn shares_tag_with(&self, other: &Event) -> bool {
        self.tags.iter().any(|tag| other.tags.contains(tag))
    }
}

/// Fields supplied when an event is first created.
#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    pub title: String,
    pub description: String,
    pub overview: String,
    pub image: String,
    pub venue: String,
    pub location: String,
    pub date: String,
    pub time: String,
    pub mode: EventMode,
    pub audience: String,
    pub agenda: Vec<String>,
    pub organizer: String,
    pub tags: Vec<String>,
}

/// Partial update; absent fields are left alone.
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct EventUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub overview: Option<String>,
    pub image: Option<String>,
    pub venue: Option<String>,
    pub location: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub mode: Option<EventMode>,
    pub audience: Option<String>,
    pub agenda: Option<Vec<String>>,
    pub organizer: Option<String>,
    pub tags: Option<Vec<String>>,
}

/// Fields whose writes trigger normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventField {
    Title,
    Date,
    Time,
}

/// An event plus the set of normalized fields changed since it was loaded.
#[derive(Debug, Clone)]
pub struct EventRecord {
    event: Event,
    dirty: BTreeSet<EventField>,
}

impl EventRecord {
    pub fn create(input: NewEvent) -> Self {
        let now = Utc::now();
        let event = Event {
            id: Uuid::new_v4().to_string(),
            title: input.title.trim().to_string(),
            slug: String::new(),
            description: input.description.trim().to_string(),
            overview: input.overview.trim().to_string(),
            image: input.image.trim().to_string(),
            venue: input.venue.trim().to_string(),
            location: input.location.trim().to_string(),
            date: input.date,
            time: input.time,
            mode: input.mode,
            audience: input.audience.trim().to_string(),
            agenda: input.agenda,
            organizer: input.organizer.trim().to_string(),
            tags: input.tags,
            created_at: now,
            updated_at: now,
        };
        Self {
            event,
            dirty: BTreeSet::from([EventField::Title, EventField::Date, EventField::Time]),
        }
    }

    pub fn loaded(event: Event) -> Self {
        Self {
            event,
            dirty: BTreeSet::new(),
        }
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn is_dirty(&self, field: EventField) -> bool {
        self.dirty.contains(&field)
    }

    pub fn set_title(&mut self, title: &str) {
        let title = title.trim();
        if self.event.title != title {
            self.event.title = title.to_string();
            self.dirty.insert(EventField::Title);
        }
    }

    pub fn set_date(&mut self, date: &str) {
        if self.event.date != date {
            self.event.date = date.to_string();
            self.dirty.insert(EventField::Date);
        }
    }

    pub fn set_time(&mut self, time: &str) {
        if self.event.time != time {
            self.event.time = time.to_string();
            self.dirty.insert(EventField::Time);
        }
    }

    pub fn apply(&mut self, update: EventUpdate) {
        if let Some(title) = update.title {
            self.set_title(&title);
        }
        if let Some(date) = update.date {
            self.set_date(&date);
        }
        if let Some(time) = update.time {
            self.set_time(&time);
        }

        let event = &mut self.event;
        let trimmed = |value: String| value.trim().to_string();
        if let Some(value) = update.description {
            event.description = trimmed(value);
        }
        if let Some(value) = update.overview {
            event.overview = trimmed(value);
        }
        if let Some(value) = update.image {
            event.image = trimmed(value);
        }
        if let Some(value) = update.venue {
            event.venue = trimmed(value);
        }
        if let Some(value) = update.location {
            event.location = trimmed(value);
        }
        if let Some(value) = update.mode {
            event.mode = value;
        }
        if let Some(value) = update.audience {
            event.audience = trimmed(value);
        }
        if let Some(value) = update.agenda {
            event.agenda = value;
        }
        if let Some(value) = update.organizer {
            event.organizer = trimmed(value);
        }
        if let Some(value) = update.tags {
            event.tags = value;
        }
    }

    /// Rewrite slug, date and time for the dirty fields.
    ///
    /// All-or-nothing: on error the record keeps its previous values and its
    /// dirty set.
    pub fn normalize(&mut self, tz: Tz) -> Result<(), NormalizeError> {
        let slug = self
            .is_dirty(EventField::Title)
            .then(|| normalize::derive_slug(&self.event.title));
        let date = match self.is_dirty(EventField::Date) {
            true => Some(normalize::normalize_date_in(&self.event.date, tz)?),
            false => None,
        };
        let time = match self.is_dirty(EventField::Time) {
            true => Some(normalize::normalize_time(&self.event.time)?),
            false => None,
        };

        if let Some(slug) = slug {
            self.event.slug = slug;
        }
        if let Some(date) = date {
            self.event.date = date;
        }
        if let Some(time) = time {
            self.event.time = time;
        }
        self.dirty.clear();
        Ok(())
    }

    pub fn validate(&self) -> Result<(), String> {
        let event = &self.event;
        let required = [
            ("Title", &event.title),
            ("Description", &event.description),
            ("Overview", &event.overview),
            ("Image", &event.image),
            ("Venue", &event.venue),
            ("Location", &event.location),
            ("Date", &event.date),
            ("Time", &event.time),
            ("Audience", &event.audience),
            ("Organizer", &event.organizer),
        ];
        for (label, value) in required {
            if value.trim().is_empty() {
                return Err(format!("{label} is required"));
            }
        }
        if event.agenda.iter().all(|item| item.trim().is_empty()) {
            return Err("Agenda must have at least one item".to_string());
        }
        if event.tags.iter().all(|tag| tag.trim().is_empty()) {
            return Err("Tags must have at least one item".to_string());
        }
        if event.slug.is_empty() {
            return Err("Title must contain at least one letter or digit".to_string());
        }
        Ok(())
    }

    /// Normalized, validated event ready to be written.
    pub fn into_event(mut self) -> Event {
        self.event.updated_at = Utc::now();
        self.event
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    #[serde(rename = "_id")]
    pub id: String,
    pub event_id: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct NewBooking {
    pub event_id: String,
    pub email: String,
    #[serde(default)]
    pub slug: Option<String>,
}

impl Booking {
    pub fn create(input: &NewBooking) -> Result<Self, String> {
        let event_id = input.event_id.trim();
        if event_id.is_empty() {
            return Err("Event ID is required".to_string());
        }
        let email = normalize_email(&input.email);
        if email.is_empty() {
            return Err("Email is required".to_string());
        }
        if !is_valid_email(&email) {
            return Err("Invalid email format".to_string());
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            event_id: event_id.to_string(),
            email,
            created_at: now,
            updated_at: now,
        })
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}
