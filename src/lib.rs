//! Senior-care administration API: catalog-driven REST resources over PostgreSQL.

pub mod auth;
pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod migration;
pub mod openapi;
pub mod query;
pub mod response;
pub mod routes;
pub mod service;
pub mod settings;
pub mod sql;
pub mod state;
pub mod store;

pub use config::{builtin_catalog, load_from_dir, resolve, FullConfig, ResolvedModel, ResolvedResource};
pub use error::{AppError, ConfigError};
pub use migration::apply_migrations;
pub use routes::{admin_routes, common_routes, ADMIN_PREFIX};
pub use service::ResourceService;
pub use settings::{Settings, StorageBackend};
pub use state::AppState;
pub use store::{ensure_database_exists, MemoryStore, PgStore, ResourceStore};

use axum::Router;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

/// Full application router: common routes plus the admin API, with body limit and request tracing.
pub fn app(state: AppState) -> Router {
    let body_limit = state.settings.body_limit_bytes;
    common_routes(state.clone())
        .merge(admin_routes(state))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
}
