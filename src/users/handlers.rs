use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::dto::{UpdateMeRequest, UserResponse};
use crate::{auth::extractors::Caller, error::AppResult, state::AppState};

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me).put(update_me))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/users/:id/activate", post(activate_user))
        .route("/admin/users/:id/deactivate", post(deactivate_user))
}

#[instrument(skip(state))]
pub async fn get_me(State(state): State<AppState>, caller: Caller) -> AppResult<Json<UserResponse>> {
    let user = state.accounts.me(&caller).await?;
    Ok(Json(UserResponse { user }))
}

#[instrument(skip(state, body))]
pub async fn update_me(
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<UpdateMeRequest>,
) -> AppResult<Json<UserResponse>> {
    let user = state.accounts.update_me(&caller, body).await?;
    Ok(Json(UserResponse { user }))
}

#[instrument(skip(state))]
pub async fn activate_user(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> AppResult<Json<UserResponse>> {
    let user = state.accounts.set_active(&caller, id, true).await?;
    Ok(Json(UserResponse { user }))
}

#[instrument(skip(state))]
pub async fn deactivate_user(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> AppResult<Json<UserResponse>> {
    let user = state.accounts.set_active(&caller, id, false).await?;
    Ok(Json(UserResponse { user }))
}
