use std::{
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use chrono_tz::Tz;
use rusqlite::{params, types::Type, Connection, ErrorCode, OptionalExtension};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info};

use crate::connection::{ConnectionError, Connector};
use crate::models::{Booking, Event, EventRecord, EventUpdate, NewBooking, NewEvent};
use crate::normalize::NormalizeError;
use crate::utils;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error("{0}")]
    Validation(String),
    #[error("an event with slug {0:?} already exists")]
    DuplicateSlug(String),
    #[error("no event found with slug: {0}")]
    EventNotFound(String),
    #[error("database task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    Memory,
    File(PathBuf),
}

impl DatabaseTarget {
    /// Accepts `sqlite::memory:`, `sqlite://path`, `sqlite:path` or a bare path.
    pub fn parse(url: &str) -> Result<Self, String> {
        let url = url.trim();
        if matches!(url, ":memory:" | "sqlite::memory:" | "sqlite://:memory:") {
            return Ok(Self::Memory);
        }
        if let Some((scheme, _)) = url.split_once("://") {
            if scheme != "sqlite" {
                return Err(format!("unsupported database scheme {scheme:?}"));
            }
        }
        let path = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url);
        if path.is_empty() {
            return Err(format!("no database path in {url:?}"));
        }
        Ok(Self::File(PathBuf::from(path)))
    }
}

/// Live handle to the document store. Clones share one SQLite connection.
#[derive(Debug, Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(target: &DatabaseTarget) -> rusqlite::Result<Self> {
        let conn = match target {
            DatabaseTarget::Memory => Connection::open_in_memory()?,
            DatabaseTarget::File(path) => {
                utils::ensure_parent(path);
                Connection::open(path)?
            }
        };
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn same_as(&self, other: &Database) -> bool {
        Arc::ptr_eq(&self.conn, &other.conn)
    }

    /// Run blocking SQLite work off the async runtime.
    pub async fn run<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            op(&guard)
        })
        .await
        .map_err(|err| StoreError::Task(err.to_string()))?
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS events(
            id TEXT PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            payload TEXT NOT NULL,
            created_at_utc TEXT NOT NULL,
            updated_at_utc TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS bookings(
            id TEXT PRIMARY KEY,
            event_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at_utc TEXT NOT NULL,
            updated_at_utc TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS bookings_event_id ON bookings(event_id);",
    )
}

pub struct SqliteConnector {
    target: DatabaseTarget,
}

impl SqliteConnector {
    pub fn new(target: DatabaseTarget) -> Self {
        Self { target }
    }
}

#[async_trait]
impl Connector for SqliteConnector {
    type Handle = Database;

    async fn connect(&self) -> Result<Database, ConnectionError> {
        let target = self.target.clone();
        debug!(?target, "opening sqlite database");
        tokio::task::spawn_blocking(move || Database::open(&target))
            .await
            .map_err(|err| ConnectionError::Failed(err.to_string()))?
            .map_err(|err| ConnectionError::Failed(err.to_string()))
    }
}

/// Event and booking operations over one acquired [`Database`] handle.
pub struct Store {
    db: Database,
    timezone: Tz,
}

impl Store {
    pub fn new(db: Database, timezone: Tz) -> Self {
        Self { db, timezone }
    }

    pub async fn create_event(&self, input: NewEvent) -> Result<Event, StoreError> {
        let mut record = EventRecord::create(input);
        record.normalize(self.timezone)?;
        record.validate().map_err(StoreError::Validation)?;
        let event = record.into_event();

        let stored = event.clone();
        self.db.run(move |conn| insert_event(conn, &stored)).await?;
        info!(slug = %event.slug, "event created");
        Ok(event)
    }

    pub async fn update_event(&self, slug: &str, update: EventUpdate) -> Result<Event, StoreError> {
        let slug = slug.to_string();
        let timezone = self.timezone;
        let event = self
            .db
            .run(move |conn| {
                let current = load_event(conn, "slug", &slug)?
                    .ok_or_else(|| StoreError::EventNotFound(slug.clone()))?;
                let mut record = EventRecord::loaded(current);
                record.apply(update);
                record.normalize(timezone)?;
                record.validate().map_err(StoreError::Validation)?;
                let event = record.into_event();

                let payload = serde_json::to_string(&event)?;
                conn.execute(
                    "UPDATE events SET slug = ?2, payload = ?3, updated_at_utc = ?4 WHERE id = ?1",
                    params![event.id, event.slug, payload, event.updated_at],
                )
                .map_err(|err| slug_conflict(err, &event.slug))?;
                Ok(event)
            })
            .await?;
        info!(slug = %event.slug, "event updated");
        Ok(event)
    }

    pub async fn find_event_by_slug(&self, slug: &str) -> Result<Option<Event>, StoreError> {
        let slug = slug.to_string();
        self.db.run(move |conn| load_event(conn, "slug", &slug)).await
    }

    pub async fn find_event_by_id(&self, id: &str) -> Result<Option<Event>, StoreError> {
        let id = id.to_string();
        self.db.run(move |conn| load_event(conn, "id", &id)).await
    }

    /// All events, newest first.
    pub async fn list_events(&self) -> Result<Vec<Event>, StoreError> {
        self.db.run(load_all_events).await
    }

    /// Events sharing at least one tag with `slug`, excluding the event itself.
    pub async fn similar_events(&self, slug: &str) -> Result<Vec<Event>, StoreError> {
        let slug = slug.to_string();
        self.db
            .run(move |conn| {
                let Some(event) = load_event(conn, "slug", &slug)? else {
                    return Ok(Vec::new());
                };
                Ok(load_all_events(conn)?
                    .into_iter()
                    .filter(|other| other.id != event.id && other.shares_tag_with(&event))
                    .collect())
            })
            .await
    }

    pub async fn create_booking(&self, input: NewBooking) -> Result<Booking, StoreError> {
        let booking = Booking::create(&input).map_err(StoreError::Validation)?;
        let stored = booking.clone();
        self.db
            .run(move |conn| {
                let exists = conn
                    .query_row(
                        "SELECT 1 FROM events WHERE id = ?1",
                        params![stored.event_id],
                        |_| Ok(()),
                    )
                    .optional()?
                    .is_some();
                if !exists {
                    return Err(StoreError::Validation(
                        "Referenced event does not exist".to_string(),
                    ));
                }

                let payload = serde_json::to_string(&stored)?;
                conn.execute(
                    "INSERT INTO bookings (id, event_id, payload, created_at_utc, updated_at_utc)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        stored.id,
                        stored.event_id,
                        payload,
                        stored.created_at,
                        stored.updated_at
                    ],
                )?;
                Ok(())
            })
            .await?;
        info!(event_id = %booking.event_id, "booking created");
        Ok(booking)
    }

    pub async fn bookings_for_event(&self, event_id: &str) -> Result<Vec<Booking>, StoreError> {
        let event_id = event_id.to_string();
        self.db
            .run(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT payload FROM bookings WHERE event_id = ?1 ORDER BY created_at_utc, rowid",
                )?;
                let rows = stmt.query_map(params![event_id], |row| decode(row.get(0)?))?;

                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            })
            .await
    }

    pub async fn count_bookings(&self, event_id: &str) -> Result<u64, StoreError> {
        let event_id = event_id.to_string();
        self.db
            .run(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM bookings WHERE event_id = ?1",
                    params![event_id],
                    |row| row.get(0),
                )?;
                Ok(u64::try_from(count).unwrap_or_default())
            })
            .await
    }
}

fn insert_event(conn: &Connection, event: &Event) -> Result<(), StoreError> {
    let payload = serde_json::to_string(event)?;
    conn.execute(
        "INSERT INTO events (id, slug, payload, created_at_utc, updated_at_utc)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            event.id,
            event.slug,
            payload,
            event.created_at,
            event.updated_at
        ],
    )
    .map_err(|err| slug_conflict(err, &event.slug))?;
    Ok(())
}

// `column` is always one of our own literals, never caller input.
fn load_event(conn: &Connection, column: &str, value: &str) -> Result<Option<Event>, StoreError> {
    let sql = format!("SELECT payload FROM events WHERE {column} = ?1");
    let event = conn
        .query_row(&sql, params![value], |row| decode(row.get(0)?))
        .optional()?;
    Ok(event)
}

fn load_all_events(conn: &Connection) -> Result<Vec<Event>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT payload FROM events ORDER BY created_at_utc DESC, rowid DESC")?;
    let rows = stmt.query_map([], |row| decode(row.get(0)?))?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn decode<T: DeserializeOwned>(payload: String) -> rusqlite::Result<T> {
    serde_json::from_str(&payload)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(err)))
}

fn slug_conflict(err: rusqlite::Error, slug: &str) -> StoreError {
    match err.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => StoreError::DuplicateSlug(slug.to_string()),
        _ => StoreError::Sqlite(err),
    }
}
