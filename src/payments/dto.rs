use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::repo_types::{Payment, PaymentStatus};
use crate::pagination::Pagination;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentRequest {
    #[serde(alias = "inspection_id")]
    pub inspection_id: Uuid,
    /// Dollars, as the checkout form sends them.
    pub amount: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentResponse {
    pub client_secret: Option<String>,
    pub payment: Payment,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPaymentRequest {
    #[serde(alias = "intent_id", alias = "paymentIntentId")]
    pub intent_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPaymentResponse {
    pub invoice_url: Option<String>,
    pub payment: Payment,
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub payment: Payment,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub status: Option<PaymentStatus>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PaymentHistoryResponse {
    pub payments: Vec<Payment>,
    pub pagination: Pagination,
}
