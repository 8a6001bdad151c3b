use std::{fmt::Display, str::FromStr, time::Duration};

use chrono_tz::Tz;
use thiserror::Error;
use tracing::info;

use crate::db::DatabaseTarget;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_MEDIA_FOLDER: &str = "DevEvent";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("DATABASE_URL environment variable is required")]
    MissingDatabaseUrl,
    #[error("invalid {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaConfig {
    pub cloud_name: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub folder: String,
}

impl MediaConfig {
    pub fn is_configured(&self) -> bool {
        [&self.cloud_name, &self.api_key, &self.api_secret]
            .iter()
            .all(|value| value.as_deref().is_some_and(|s| !s.trim().is_empty()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub database: DatabaseTarget,
    pub port: u16,
    pub connect_timeout: Duration,
    pub timezone: Tz,
    pub media: MediaConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let database_url = var("DATABASE_URL").ok_or(ConfigError::MissingDatabaseUrl)?;
        let database =
            DatabaseTarget::parse(&database_url).map_err(|message| ConfigError::Invalid {
                key: "DATABASE_URL",
                message,
            })?;

        let port = parse_or("PORT", var("PORT"), DEFAULT_PORT)?;
        let timeout_ms = parse_or(
            "DATABASE_CONNECT_TIMEOUT_MS",
            var("DATABASE_CONNECT_TIMEOUT_MS"),
            DEFAULT_CONNECT_TIMEOUT_MS,
        )?;
        let timezone = parse_or("EVENTS_TIMEZONE", var("EVENTS_TIMEZONE"), Tz::UTC)?;

        let media = MediaConfig {
            cloud_name: var("CLOUDINARY_CLOUD_NAME"),
            api_key: var("CLOUDINARY_API_KEY"),
            api_secret: var("CLOUDINARY_API_SECRET"),
            folder: var("CLOUDINARY_FOLDER").unwrap_or_else(|| DEFAULT_MEDIA_FOLDER.to_string()),
        };

        Ok(Self {
            database,
            port,
            connect_timeout: Duration::from_millis(timeout_ms),
            timezone,
            media,
        })
    }
}

fn parse_or<T>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr + Display,
    T::Err: Display,
{
    match raw {
        Some(value) => value.parse().map_err(|err: T::Err| ConfigError::Invalid {
            key,
            message: err.to_string(),
        }),
        None => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}
