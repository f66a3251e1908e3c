use anyhow::Result;
use axum::Router;
use std::{fs, io::ErrorKind, path::PathBuf, sync::Arc};
use tokio::{net::TcpListener, sync::broadcast::error::RecvError};
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod errors;
mod handlers;
mod models;
mod providers;
mod routes;
mod services;

use handlers::AppState;
use services::{
    events::{EventHub, MediaEvent},
    persistence::SqliteFileRepository,
    registry::{ProviderContext, ProviderRegistry},
    settings_store::SqliteSettingsStore,
    upload_service::UploadService,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!(
        host = %cfg.host,
        port = cfg.port,
        environment = %cfg.environment,
        provider = %cfg.provider,
        "Starting media-upload"
    );

    // --- Ensure public and spool directories exist ---
    for dir in [&cfg.public_dir, &cfg.tmp_dir] {
        if !PathBuf::from(dir).exists() {
            fs::create_dir_all(dir)?;
            tracing::info!("Created directory {}", dir);
        }
    }

    // --- Initialize SQLite connection ---
    let db = db::connect(&cfg.database_url).await?;

    // --- Handle migration mode ---
    if migrate {
        db::run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize core services ---
    let registry = Arc::new(ProviderRegistry::installed());
    tracing::info!(
        providers = ?registry.list().iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
        "Installed storage providers"
    );

    let events = EventHub::new();
    spawn_event_log(&events);

    let uploads = UploadService::new(
        registry,
        ProviderContext {
            public_dir: PathBuf::from(&cfg.public_dir),
        },
        Arc::new(SqliteFileRepository::new(db.clone())),
        Arc::new(SqliteSettingsStore::new(db.clone())),
        events,
        cfg.environment.clone(),
        cfg.default_settings(),
    )?;

    let state = AppState {
        uploads,
        db,
        public_dir: PathBuf::from(&cfg.public_dir),
        tmp_dir: PathBuf::from(&cfg.tmp_dir),
    };

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Log every media event until the hub is dropped.
fn spawn_event_log(events: &EventHub) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(MediaEvent { event, media }) => tracing::info!(
                    event = event.as_str(),
                    id = %media.id,
                    name = %media.name,
                    provider = %media.provider,
                    "media event"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "media event log fell behind")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}
