pub mod dto;
pub mod handlers;
pub mod lifecycle;
pub mod repo;
pub mod repo_types;
pub mod services;

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::booking_routes())
        .merge(handlers::lifecycle_routes())
}
