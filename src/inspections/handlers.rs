use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::dto::{
    AssignTechnicianRequest, CreateInspectionRequest, InspectionListResponse, InspectionResponse,
    ListInspectionsQuery, RateInspectionRequest, UpdateInspectionRequest,
};
use crate::{auth::extractors::Caller, error::AppResult, state::AppState};

pub fn booking_routes() -> Router<AppState> {
    Router::new()
        .route("/inspections", post(create_inspection).get(list_inspections))
        .route(
            "/inspections/:id",
            get(get_inspection)
                .put(update_inspection)
                .delete(delete_inspection),
        )
}

pub fn lifecycle_routes() -> Router<AppState> {
    Router::new()
        .route("/inspections/:id/assign-technician", post(assign_technician))
        .route("/inspections/:id/start", post(start_inspection))
        .route("/inspections/:id/complete", post(complete_inspection))
        .route("/inspections/:id/cancel", post(cancel_inspection))
        .route("/inspections/:id/rate", post(rate_inspection))
}

fn wrap(inspection: super::repo_types::Inspection) -> Json<InspectionResponse> {
    Json(InspectionResponse { inspection })
}

#[instrument(skip(state, body))]
pub async fn create_inspection(
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<CreateInspectionRequest>,
) -> AppResult<(StatusCode, Json<InspectionResponse>)> {
    let inspection = state.inspections.create(&caller, body).await?;
    Ok((StatusCode::CREATED, wrap(inspection)))
}

#[instrument(skip(state))]
pub async fn list_inspections(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<ListInspectionsQuery>,
) -> AppResult<Json<InspectionListResponse>> {
    let (inspections, pagination) = state.inspections.list(&caller, query).await?;
    Ok(Json(InspectionListResponse {
        inspections,
        pagination,
    }))
}

#[instrument(skip(state))]
pub async fn get_inspection(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> AppResult<Json<InspectionResponse>> {
    Ok(wrap(state.inspections.get(&caller, id).await?))
}

#[instrument(skip(state, body))]
pub async fn update_inspection(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateInspectionRequest>,
) -> AppResult<Json<InspectionResponse>> {
    Ok(wrap(state.inspections.update(&caller, id, body).await?))
}

#[instrument(skip(state))]
pub async fn delete_inspection(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.inspections.delete(&caller, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn assign_technician(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(body): Json<AssignTechnicianRequest>,
) -> AppResult<Json<InspectionResponse>> {
    Ok(wrap(
        state
            .inspections
            .assign_technician(&caller, id, body.technician_id)
            .await?,
    ))
}

#[instrument(skip(state))]
pub async fn start_inspection(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> AppResult<Json<InspectionResponse>> {
    Ok(wrap(state.inspections.start(&caller, id).await?))
}

#[instrument(skip(state))]
pub async fn complete_inspection(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> AppResult<Json<InspectionResponse>> {
    Ok(wrap(state.inspections.complete(&caller, id).await?))
}

#[instrument(skip(state))]
pub async fn cancel_inspection(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> AppResult<Json<InspectionResponse>> {
    Ok(wrap(state.inspections.cancel(&caller, id).await?))
}

#[instrument(skip(state, body))]
pub async fn rate_inspection(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(body): Json<RateInspectionRequest>,
) -> AppResult<Json<InspectionResponse>> {
    Ok(wrap(state.inspections.rate(&caller, id, body).await?))
}
