use std::sync::Arc;

use tracing::warn;

use crate::{
    config::AppConfig,
    connection::ConnectionCache,
    db::{SqliteConnector, Store},
    error::AppError,
    media::{CloudinaryUploader, DisabledMedia, MediaHost},
};

pub struct AppState {
    pub config: AppConfig,
    pub connections: ConnectionCache<SqliteConnector>,
    pub media: Arc<dyn MediaHost>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Arc<Self> {
        let media: Arc<dyn MediaHost> = match CloudinaryUploader::from_config(&config.media) {
            Ok(uploader) => Arc::new(uploader),
            Err(err) => {
                warn!("image uploads disabled: {err}");
                Arc::new(DisabledMedia)
            }
        };
        Self::with_media(config, media)
    }

    pub fn with_media(config: AppConfig, media: Arc<dyn MediaHost>) -> Arc<Self> {
        let connections = ConnectionCache::new(
            SqliteConnector::new(config.database.clone()),
            config.connect_timeout,
        );
        Arc::new(Self {
            config,
            connections,
            media,
        })
    }

    /// A store over the shared connection, connecting first if needed.
    pub async fn store(&self) -> Result<Store, AppError> {
        let db = self.connections.acquire().await?;
        Ok(Store::new(db, self.config.timezone))
    }
}
