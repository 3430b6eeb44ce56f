//! Routers per concern.

mod admin;
mod common;

pub use admin::{admin_routes, ADMIN_PREFIX};
pub use common::common_routes;
