use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{error, info};

use super::gateway::{
    parse_event, verify_signature, GatewayError, IntentRequest, PaymentGateway, PaymentIntent,
    WebhookEvent, SIGNATURE_TOLERANCE_SECS,
};
use crate::config::StripeConfig;

/// Stripe REST client. Form-encoded requests, bearer secret key.
pub struct StripeGateway {
    http: Client,
    api_base: String,
    secret_key: String,
    webhook_secret: String,
}

#[derive(Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
}

#[derive(Deserialize)]
struct Refund {
    id: String,
}

impl StripeGateway {
    pub fn new(cfg: &StripeConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            secret_key: cfg.secret_key.clone(),
            webhook_secret: cfg.webhook_secret.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    async fn decode<T: for<'de> Deserialize<'de>>(resp: Response) -> Result<T, GatewayError> {
        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<T>()
                .await
                .map_err(|e| GatewayError::Transport(e.to_string()));
        }
        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<StripeErrorBody>(&body)
            .ok()
            .and_then(|b| b.error.message)
            .unwrap_or_else(|| format!("status {status}"));
        if status.is_server_error() {
            error!(%status, "stripe server error");
            Err(GatewayError::Transport(message))
        } else {
            Err(GatewayError::Rejected(message))
        }
    }
}

fn transport(e: reqwest::Error) -> GatewayError {
    GatewayError::Transport(e.to_string())
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_intent(&self, req: &IntentRequest) -> Result<PaymentIntent, GatewayError> {
        let amount = req.amount_cents.to_string();
        let currency = req.currency.to_lowercase();
        let inspection_id = req.inspection_id.to_string();
        let user_id = req.user_id.to_string();
        let params = [
            ("amount", amount.as_str()),
            ("currency", currency.as_str()),
            ("automatic_payment_methods[enabled]", "true"),
            ("metadata[inspection_id]", inspection_id.as_str()),
            ("metadata[user_id]", user_id.as_str()),
        ];
        let resp = self
            .http
            .post(self.url("/v1/payment_intents"))
            .bearer_auth(&self.secret_key)
            .form(&params)
            .send()
            .await
            .map_err(transport)?;
        let intent: PaymentIntent = Self::decode(resp).await?;
        info!(intent_id = %intent.id, "stripe intent created");
        Ok(intent)
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError> {
        let resp = self
            .http
            .get(self.url(&format!("/v1/payment_intents/{intent_id}")))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(transport)?;
        Self::decode(resp).await
    }

    async fn refund(&self, intent_id: &str) -> Result<String, GatewayError> {
        let resp = self
            .http
            .post(self.url("/v1/refunds"))
            .bearer_auth(&self.secret_key)
            .form(&[("payment_intent", intent_id)])
            .send()
            .await
            .map_err(transport)?;
        let refund: Refund = Self::decode(resp).await?;
        Ok(refund.id)
    }

    fn verify_webhook(&self, payload: &[u8], signature: &str) -> Result<WebhookEvent, GatewayError> {
        if self.webhook_secret.is_empty() {
            return Err(GatewayError::Unconfigured);
        }
        let now = OffsetDateTime::now_utc().unix_timestamp();
        verify_signature(
            payload,
            signature,
            &self.webhook_secret,
            now,
            SIGNATURE_TOLERANCE_SECS,
        )?;
        parse_event(payload)
    }
}
