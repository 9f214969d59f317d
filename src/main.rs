use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sharex_server::{
    api,
    config::{Config, StorageBackend},
    object_store as obj,
    storage::Database,
    store::{ContentStore, EntryRepository},
    users::UserManager,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "gcp" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_stackdriver::layer())
                .init();
        }
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    info!(version = env!("CARGO_PKG_VERSION"), "sharex-server starting");

    let config = Config::load()?;

    // Metadata database and blob backend
    let (db, objects): (Database, Arc<dyn obj::ObjectStore>) = match config.storage.backend {
        StorageBackend::Local => {
            let db = Database::open(&config.server.data_dir)?;
            info!("Database opened at: {}", config.server.data_dir);
            let store = obj::LocalStore::new(&config.storage.local_storage_path)?;
            info!(
                "Using local storage backend at: {}",
                config.storage.local_storage_path
            );
            (db, Arc::new(store))
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage backend. Nothing survives a restart.");
            (Database::in_memory()?, Arc::new(obj::MemoryStore::new()))
        }
    };

    let store = Arc::new(EntryRepository::new(
        db.clone(),
        objects,
        config.store_settings(),
    ));
    store.initialize().await?;

    let users = UserManager::new(db);
    users.initialize()?;

    let state = Arc::new(AppState {
        config: config.clone(),
        store: store.clone(),
        users,
    });

    // Build and start the HTTP server
    let app = api::create_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    info!("Listening on: {}", config.server.bind_address);
    if let Some(header) = &config.server.reverse_proxy_header {
        info!(header = %header, "Taking client addresses from reverse proxy header");
    }

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Drop every other database handle so closing the store releases the file
    drop(state);

    info!("Closing content store");
    if let Err(e) = store.close().await {
        tracing::error!(error = %e, "Failed to close content store during shutdown");
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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

    info!("Shutdown signal received, draining connections");
}
