use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::dto::{
        AuthResponse, LoginRequest, MessageResponse, OAuthLoginRequest, RefreshRequest,
        RegisterRequest, ResendVerificationRequest,
    },
    error::AppResult,
    state::AppState,
};

const BROKER_SECRET_HEADER: &str = "x-oauth-broker-secret";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/oauth", post(oauth_login))
}

pub fn verification_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/verify-email/:token", get(verify_email))
        .route("/auth/resend-verification", post(resend_verification))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    let res = state.auth.register(payload).await?;
    Ok((StatusCode::CREATED, Json(res)))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    Ok(Json(state.auth.login(payload).await?))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> AppResult<Json<AuthResponse>> {
    Ok(Json(state.auth.refresh(&payload.refresh_token).await?))
}

#[instrument(skip(state, headers, payload))]
pub async fn oauth_login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<OAuthLoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let secret = headers
        .get(BROKER_SECRET_HEADER)
        .and_then(|v| v.to_str().ok());
    Ok(Json(state.auth.oauth_login(secret, payload).await?))
}

#[instrument(skip(state, token))]
pub async fn verify_email(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> AppResult<Json<MessageResponse>> {
    state.auth.verify_email(&token).await?;
    Ok(Json(MessageResponse {
        message: "Email verified".into(),
    }))
}

#[instrument(skip(state, payload))]
pub async fn resend_verification(
    State(state): State<AppState>,
    Json(payload): Json<ResendVerificationRequest>,
) -> AppResult<Json<MessageResponse>> {
    state.auth.resend_verification(&payload.email).await?;
    Ok(Json(MessageResponse {
        message: "If the address is registered, a verification email has been sent".into(),
    }))
}
