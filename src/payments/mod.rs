pub mod dto;
pub mod gateway;
pub mod handlers;
pub mod invoice;
pub mod repo;
pub mod repo_types;
pub mod services;
pub mod stripe;

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::webhook_routes())
        .merge(handlers::checkout_routes())
}
