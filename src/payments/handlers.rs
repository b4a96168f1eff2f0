use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use tracing::{instrument, warn};
use uuid::Uuid;

use super::dto::{
    ConfirmPaymentRequest, ConfirmPaymentResponse, CreateIntentRequest, HistoryQuery,
    IntentResponse, PaymentHistoryResponse, PaymentResponse, WebhookAck,
};
use crate::{
    auth::extractors::Caller,
    error::{AppError, AppResult},
    state::AppState,
};

const SIGNATURE_HEADER: &str = "stripe-signature";

pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/payments/create-intent", post(create_intent))
        .route("/payments/confirm", post(confirm_payment))
        .route("/payments/history", get(payment_history))
        .route("/payments/:id", get(get_payment))
        .route("/payments/:id/refund", post(refund_payment))
}

/// Unauthenticated: the processor proves itself with the signature header.
pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/payments/webhook", post(webhook))
}

#[instrument(skip(state, body))]
pub async fn create_intent(
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<CreateIntentRequest>,
) -> AppResult<Json<IntentResponse>> {
    let (client_secret, payment) = state.payments.create_intent(&caller, body).await?;
    Ok(Json(IntentResponse {
        client_secret,
        payment,
    }))
}

#[instrument(skip(state, body))]
pub async fn confirm_payment(
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<ConfirmPaymentRequest>,
) -> AppResult<Json<ConfirmPaymentResponse>> {
    let payment = state.payments.confirm(&caller, &body.intent_id).await?;
    Ok(Json(ConfirmPaymentResponse {
        invoice_url: payment.invoice_url.clone(),
        payment,
    }))
}

#[instrument(skip(state))]
pub async fn refund_payment(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> AppResult<Json<PaymentResponse>> {
    let payment = state.payments.refund(&caller, id).await?;
    Ok(Json(PaymentResponse { payment }))
}

#[instrument(skip(state))]
pub async fn payment_history(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<PaymentHistoryResponse>> {
    let (payments, pagination) = state.payments.history(&caller, query).await?;
    Ok(Json(PaymentHistoryResponse {
        payments,
        pagination,
    }))
}

#[instrument(skip(state))]
pub async fn get_payment(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> AppResult<Json<PaymentResponse>> {
    let payment = state.payments.get(&caller, id).await?;
    Ok(Json(PaymentResponse { payment }))
}

#[instrument(skip(state, headers, body))]
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<WebhookAck>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            warn!("webhook without signature");
            AppError::validation("Missing Stripe-Signature header")
        })?;
    state.payments.handle_webhook(&body, signature).await?;
    Ok(Json(WebhookAck { received: true }))
}
