//! Payment processor seam. The concrete processor is picked once at startup:
//! `StripeGateway` when credentials are configured, `DisabledGateway` otherwise.

use async_trait::async_trait;
use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use uuid::Uuid;

use crate::error::AppError;

/// Seconds a signed webhook stays acceptable.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("payment processor is not configured")]
    Unconfigured,
    #[error("invalid webhook signature")]
    Signature,
    #[error("payment processor rejected the request: {0}")]
    Rejected(String),
    #[error("payment processor unavailable: {0}")]
    Transport(String),
}

impl From<GatewayError> for AppError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Unconfigured | GatewayError::Transport(_) => {
                AppError::ServiceUnavailable(e.to_string())
            }
            GatewayError::Signature | GatewayError::Rejected(_) => AppError::Validation(e.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IntentRequest {
    pub amount_cents: i64,
    pub currency: String,
    pub inspection_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: Option<String>,
    pub status: String,
}

impl PaymentIntent {
    pub fn succeeded(&self) -> bool {
        self.status == "succeeded"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    IntentSucceeded { intent_id: String },
    IntentFailed { intent_id: String },
    Other(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(&self, req: &IntentRequest) -> Result<PaymentIntent, GatewayError>;
    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError>;
    /// Returns the processor's refund id.
    async fn refund(&self, intent_id: &str) -> Result<String, GatewayError>;
    fn verify_webhook(&self, payload: &[u8], signature: &str) -> Result<WebhookEvent, GatewayError>;
}

/// Stand-in used when no processor credentials are configured.
pub struct DisabledGateway;

#[async_trait]
impl PaymentGateway for DisabledGateway {
    async fn create_intent(&self, _req: &IntentRequest) -> Result<PaymentIntent, GatewayError> {
        Err(GatewayError::Unconfigured)
    }

    async fn retrieve_intent(&self, _intent_id: &str) -> Result<PaymentIntent, GatewayError> {
        Err(GatewayError::Unconfigured)
    }

    async fn refund(&self, _intent_id: &str) -> Result<String, GatewayError> {
        Err(GatewayError::Unconfigured)
    }

    fn verify_webhook(&self, _payload: &[u8], _signature: &str) -> Result<WebhookEvent, GatewayError> {
        Err(GatewayError::Unconfigured)
    }
}

type HmacSha256 = Hmac<Sha256>;

pub fn sign(payload: &[u8], timestamp: i64, secret: &str) -> String {
    // new_from_slice accepts keys of any length for HMAC
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return String::new(),
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Checks a `t=<unix>,v1=<hex>` header against the raw body.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
    tolerance: i64,
) -> Result<(), GatewayError> {
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = v.parse::<i64>().ok(),
            Some(("v1", v)) => candidates.push(v),
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or(GatewayError::Signature)?;
    if (now - timestamp).abs() > tolerance {
        return Err(GatewayError::Signature);
    }
    let expected = sign(payload, timestamp, secret);
    if candidates
        .iter()
        .any(|c| constant_time_eq(c.as_bytes(), expected.as_bytes()))
    {
        Ok(())
    } else {
        Err(GatewayError::Signature)
    }
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    data: RawEventData,
}

#[derive(Deserialize)]
struct RawEventData {
    object: RawObject,
}

#[derive(Deserialize)]
struct RawObject {
    id: String,
}

pub fn parse_event(payload: &[u8]) -> Result<WebhookEvent, GatewayError> {
    let raw: RawEvent = serde_json::from_slice(payload)
        .map_err(|e| GatewayError::Rejected(format!("malformed event: {e}")))?;
    Ok(match raw.kind.as_str() {
        "payment_intent.succeeded" => WebhookEvent::IntentSucceeded {
            intent_id: raw.data.object.id,
        },
        "payment_intent.payment_failed" => WebhookEvent::IntentFailed {
            intent_id: raw.data.object.id,
        },
        _ => WebhookEvent::Other(raw.kind),
    })
}
