mod config;
mod connection;
mod db;
mod error;
mod media;
mod models;
mod normalize;
mod routes;
mod state;
mod utils;

use std::time::Duration;

use anyhow::Context;
use axum::http::{header::CONTENT_TYPE, Method};
use tokio::{net::TcpListener, signal};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

pub use config::{AppConfig, ConfigError};
pub use connection::{ConnectionCache, ConnectionError, ConnectionState, Connector};
pub use db::{Database, DatabaseTarget, SqliteConnector, Store, StoreError};
pub use error::AppError;
pub use media::{CloudinaryUploader, DisabledMedia, MediaError, MediaHost};
pub use models::{Booking, Event, EventMode, EventRecord, EventUpdate, NewBooking, NewEvent};
pub use normalize::{derive_slug, normalize_date, normalize_date_in, normalize_time, NormalizeError};
pub use routes::router;
pub use state::AppState;

pub async fn run() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env().context("loading configuration")?;
    let port = config.port;
    let state = AppState::new(config);

    // First requests still connect lazily if this fails.
    if let Err(err) = state.connections.acquire().await {
        warn!("database not reachable at startup: {err}");
    }

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    let app = router(state.clone())
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let address = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {address}"))?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving http")?;

    info!("Server shutting down...");
    if let Err(err) = state.connections.release().await {
        warn!("failed to close database connection: {err}");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(err) => {
                warn!("failed to install terminate handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
