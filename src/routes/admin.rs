//! Resource routes. Paths are parameterized by the catalog path segment; handlers resolve the resource.

use crate::handlers::resource::{
    add, delete_bulk, delete_one, edit, get_one, grid, grid_options, list, related_info, reorder, run_action,
};
use crate::state::AppState;
use axum::{
    routing::{get, post, put},
    Router,
};

pub const ADMIN_PREFIX: &str = "/api/v1.0/admin";

pub fn admin_routes(state: AppState) -> Router {
    let routes = Router::new()
        .route("/:resource", get(list).post(add).delete(delete_bulk))
        .route("/:resource/grid", get(grid).options(grid_options))
        .route("/:resource/related/info", post(related_info))
        .route("/:resource/reorder", put(reorder))
        .route("/:resource/:id", get(get_one).put(edit).delete(delete_one))
        .route("/:resource/:id/:action", put(run_action))
        .with_state(state);
    Router::new().nest(ADMIN_PREFIX, routes)
}
