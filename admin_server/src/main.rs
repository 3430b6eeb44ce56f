//! Senior-care administration API server.
//!
//! Run from repo root: `cargo run -p admin-server`
//! `STORAGE=memory` runs without PostgreSQL.

use seniorcare_admin::{
    app, apply_migrations, builtin_catalog, ensure_database_exists, load_from_dir, resolve, AppState, MemoryStore,
    PgStore, ResourceStore, Settings, StorageBackend,
};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Reads `.env` first, so RUST_LOG set there reaches the filter below.
    let settings = Settings::from_env()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("seniorcare_admin=info,admin_server=info,tower_http=info")),
        )
        .init();

    let config = match &settings.catalog_path {
        Some(dir) => load_from_dir(dir).await?,
        None => builtin_catalog()?,
    };
    let model = resolve(&config)?;
    tracing::info!(resources = model.resources.len(), "catalog resolved");

    let store: Arc<dyn ResourceStore> = match settings.storage {
        StorageBackend::Postgres => {
            ensure_database_exists(&settings.database_url).await?;
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(settings.db_max_connections)
                .connect(&settings.database_url)
                .await?;
            if settings.run_migrations {
                apply_migrations(&pool, &config).await?;
            }
            Arc::new(PgStore::new(pool))
        }
        StorageBackend::Memory => {
            tracing::warn!("using in-memory storage; data is lost on exit");
            Arc::new(MemoryStore::new())
        }
    };

    let listener = TcpListener::bind(&settings.bind_addr).await?;
    let addr = listener.local_addr()?;
    let state = AppState::new(store, model, settings);
    tracing::info!("admin API listening on http://{}", addr);
    axum::serve(listener, app(state)).await?;
    Ok(())
}
