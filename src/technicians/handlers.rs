use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::dto::{
    AvailabilityRequest, CreateProfileRequest, ListTechniciansQuery, TechnicianListingResponse,
    TechnicianPage, TechnicianResponse, UpdateProfileRequest,
};
use crate::{auth::extractors::Caller, error::AppResult, state::AppState};

// --- routers ---

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/technicians", get(list_technicians))
        .route("/technicians/:id", get(get_technician))
}

pub fn self_service_routes() -> Router<AppState> {
    Router::new()
        .route("/technicians/profile", post(create_profile))
        .route("/technicians/me/profile", put(update_profile))
        .route("/technicians/me/availability", put(update_availability))
}

// --- handlers ---

#[instrument(skip(state))]
pub async fn list_technicians(
    State(state): State<AppState>,
    Query(query): Query<ListTechniciansQuery>,
) -> AppResult<Json<TechnicianPage>> {
    Ok(Json(state.technicians.list(query).await?))
}

#[instrument(skip(state))]
pub async fn get_technician(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<TechnicianListingResponse>> {
    let technician = state.technicians.get(id).await?;
    Ok(Json(TechnicianListingResponse { technician }))
}

#[instrument(skip(state, body))]
pub async fn create_profile(
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<CreateProfileRequest>,
) -> AppResult<(StatusCode, Json<TechnicianResponse>)> {
    let technician = state.technicians.create_profile(&caller, body).await?;
    Ok((StatusCode::CREATED, Json(TechnicianResponse { technician })))
}

#[instrument(skip(state, body))]
pub async fn update_profile(
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<UpdateProfileRequest>,
) -> AppResult<Json<TechnicianResponse>> {
    let technician = state.technicians.update_profile(&caller, body).await?;
    Ok(Json(TechnicianResponse { technician }))
}

#[instrument(skip(state))]
pub async fn update_availability(
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<AvailabilityRequest>,
) -> AppResult<Json<TechnicianResponse>> {
    let technician = state
        .technicians
        .update_availability(&caller, body.is_available)
        .await?;
    Ok(Json(TechnicianResponse { technician }))
}
