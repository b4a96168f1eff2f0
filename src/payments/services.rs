use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::dto::{CreateIntentRequest, HistoryQuery};
use super::gateway::{IntentRequest, PaymentGateway, WebhookEvent};
use super::invoice;
use super::repo::{is_unique_violation, PaymentRepo};
use super::repo_types::{Payment, PaymentStatus};
use crate::auth::{extractors::Caller, repo::UserRepo};
use crate::error::{AppError, AppResult};
use crate::inspections::{repo::InspectionRepo, repo_types::InspectionStatus};
use crate::money::to_cents;
use crate::pagination::{Page, Pagination};
use crate::policy::{authorize, Operation, Subject};
use crate::storage::StorageClient;
use crate::store::Store;

const CURRENCY: &str = "USD";
const INVOICE_NUMBER_ATTEMPTS: usize = 3;

fn raced() -> AppError {
    AppError::conflict("payment was modified concurrently, retry")
}

/// Reconciles our payment rows with the processor: intents, confirmation,
/// refunds and webhook-driven status sync.
pub struct PaymentService {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    storage: Arc<dyn StorageClient>,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        storage: Arc<dyn StorageClient>,
    ) -> Self {
        Self {
            store,
            gateway,
            storage,
        }
    }

    async fn load(&self, id: Uuid) -> AppResult<Payment> {
        self.store
            .get_payment(id)
            .await?
            .ok_or_else(|| AppError::not_found("Payment not found"))
    }

    pub async fn create_intent(
        &self,
        caller: &Caller,
        req: CreateIntentRequest,
    ) -> AppResult<(Option<String>, Payment)> {
        let amount_cents = req
            .amount
            .and_then(to_cents)
            .filter(|c| *c > 0)
            .ok_or_else(|| AppError::validation("Amount must be greater than zero"))?;
        let inspection = self
            .store
            .get_inspection(req.inspection_id)
            .await?
            .ok_or_else(|| AppError::not_found("Inspection not found"))?;
        authorize(
            Operation::CreatePaymentIntent,
            caller,
            Subject::owned_by(inspection.client_id),
        )?;
        if inspection.status == InspectionStatus::Cancelled {
            return Err(AppError::conflict("Inspection has been cancelled"));
        }
        // Retries are allowed until one attempt completes.
        let settled = self
            .store
            .list_payments_for_inspection(inspection.id)
            .await?
            .iter()
            .any(|p| p.status == PaymentStatus::Completed);
        if settled {
            return Err(AppError::conflict("Inspection is already paid"));
        }

        let intent = self
            .gateway
            .create_intent(&IntentRequest {
                amount_cents,
                currency: CURRENCY.into(),
                inspection_id: inspection.id,
                user_id: caller.user_id,
            })
            .await?;

        let now = OffsetDateTime::now_utc();
        let payment = Payment {
            id: Uuid::new_v4(),
            inspection_id: inspection.id,
            user_id: caller.user_id,
            amount_cents,
            currency: CURRENCY.into(),
            external_intent_id: intent.id,
            status: PaymentStatus::Processing,
            invoice_number: None,
            invoice_key: None,
            invoice_url: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_payment(&payment).await?;
        info!(payment_id = %payment.id, inspection_id = %inspection.id, amount_cents, "payment intent created");
        Ok((intent.client_secret, payment))
    }

    /// Marks the payment completed once the processor reports success and
    /// issues its invoice. Already invoiced payments come back unchanged.
    pub async fn confirm(&self, caller: &Caller, intent_id: &str) -> AppResult<Payment> {
        let cur = self
            .store
            .find_payment_by_intent(intent_id)
            .await?
            .ok_or_else(|| AppError::not_found("Payment not found"))?;
        authorize(Operation::ConfirmPayment, caller, Subject::owned_by(cur.user_id))?;

        match cur.status {
            PaymentStatus::Completed if cur.invoice_key.is_some() => return self.present(cur).await,
            PaymentStatus::Completed => {}
            PaymentStatus::Refunded => return Err(AppError::conflict("Payment has been refunded")),
            _ => {
                let intent = self.gateway.retrieve_intent(intent_id).await?;
                if !intent.succeeded() {
                    return Err(AppError::validation("Payment not successful"));
                }
            }
        }

        let next = self.record_completion(&cur).await?;
        // Upload only after the guarded write went through.
        if let Err(e) = self.issue_invoice(&next).await {
            let mut reverted = next.clone();
            reverted.invoice_number = None;
            reverted.invoice_key = None;
            if !self.store.update_payment(&reverted, PaymentStatus::Completed).await? {
                warn!(payment_id = %next.id, "invoice fields left on payment after failed upload");
            }
            return Err(e);
        }
        info!(payment_id = %next.id, invoice = ?next.invoice_number, "payment confirmed");
        self.present(next).await
    }

    /// Guarded write of the completed row with a fresh invoice number. A
    /// number collision draws a new one.
    async fn record_completion(&self, cur: &Payment) -> AppResult<Payment> {
        let now = OffsetDateTime::now_utc();
        let mut next = cur.clone();
        next.status = PaymentStatus::Completed;
        next.paid_at = cur.paid_at.or(Some(now));
        next.updated_at = now;
        next.invoice_url = None;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let number = invoice::invoice_number(now, rand::random());
            next.invoice_key = Some(invoice::object_key(&number));
            next.invoice_number = Some(number);

            // A webhook may have completed the row already; then only the invoice is added.
            let written = if cur.status == PaymentStatus::Completed {
                self.store.update_payment(&next, PaymentStatus::Completed).await
            } else {
                self.store.complete_payment(&next, cur.status).await
            };
            match written {
                Ok(true) => return Ok(next),
                Ok(false) => return Err(raced()),
                Err(e) if is_unique_violation(&e) && attempt < INVOICE_NUMBER_ATTEMPTS => {
                    debug!(payment_id = %cur.id, "invoice number taken, drawing another");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn issue_invoice(&self, payment: &Payment) -> AppResult<()> {
        let (Some(number), Some(key)) = (&payment.invoice_number, &payment.invoice_key) else {
            return Ok(());
        };
        let inspection = self
            .store
            .get_inspection(payment.inspection_id)
            .await?
            .ok_or_else(|| AppError::not_found("Inspection not found"))?;
        let payer = self
            .store
            .find_user(payment.user_id)
            .await?
            .map(|u| u.email)
            .unwrap_or_default();
        let html = invoice::render(number, payment, &inspection, &payer);
        Ok(invoice::upload(self.storage.as_ref(), key, html).await?)
    }

    /// Fills in a fresh download link for the stored invoice.
    async fn present(&self, mut payment: Payment) -> AppResult<Payment> {
        payment.invoice_url = match &payment.invoice_key {
            Some(key) => Some(invoice::link(self.storage.as_ref(), key).await?),
            None => None,
        };
        Ok(payment)
    }

    pub async fn refund(&self, caller: &Caller, id: Uuid) -> AppResult<Payment> {
        authorize(Operation::RefundPayment, caller, Subject::none())?;
        let cur = self.load(id).await?;
        if cur.status != PaymentStatus::Completed {
            return Err(AppError::conflict("Only completed payments can be refunded"));
        }

        let refund_id = self.gateway.refund(&cur.external_intent_id).await?;

        let mut next = cur.clone();
        next.status = PaymentStatus::Refunded;
        next.updated_at = OffsetDateTime::now_utc();
        if !self.store.update_payment(&next, PaymentStatus::Completed).await? {
            return Err(raced());
        }
        info!(payment_id = %id, %refund_id, "payment refunded");
        self.present(next).await
    }

    /// Applies a processor event. Replays and unknown intents are acknowledged
    /// without touching any row.
    pub async fn handle_webhook(&self, payload: &[u8], signature: &str) -> AppResult<()> {
        let event = self.gateway.verify_webhook(payload, signature)?;
        match event {
            WebhookEvent::IntentSucceeded { intent_id } => self.mark_succeeded(&intent_id).await,
            WebhookEvent::IntentFailed { intent_id } => self.mark_failed(&intent_id).await,
            WebhookEvent::Other(kind) => {
                debug!(%kind, "webhook event ignored");
                Ok(())
            }
        }
    }

    async fn mark_succeeded(&self, intent_id: &str) -> AppResult<()> {
        let Some(cur) = self.store.find_payment_by_intent(intent_id).await? else {
            warn!(%intent_id, "webhook for unknown intent");
            return Ok(());
        };
        if matches!(cur.status, PaymentStatus::Completed | PaymentStatus::Refunded) {
            debug!(payment_id = %cur.id, "succeeded webhook replay ignored");
            return Ok(());
        }
        let now = OffsetDateTime::now_utc();
        let mut next = cur.clone();
        next.status = PaymentStatus::Completed;
        next.paid_at = Some(now);
        next.updated_at = now;
        if self.store.complete_payment(&next, cur.status).await? {
            info!(payment_id = %cur.id, "payment completed by webhook");
        } else {
            debug!(payment_id = %cur.id, "payment changed concurrently, webhook skipped");
        }
        Ok(())
    }

    async fn mark_failed(&self, intent_id: &str) -> AppResult<()> {
        let Some(cur) = self.store.find_payment_by_intent(intent_id).await? else {
            warn!(%intent_id, "webhook for unknown intent");
            return Ok(());
        };
        if matches!(
            cur.status,
            PaymentStatus::Completed | PaymentStatus::Refunded | PaymentStatus::Failed
        ) {
            return Ok(());
        }
        let mut next = cur.clone();
        next.status = PaymentStatus::Failed;
        next.updated_at = OffsetDateTime::now_utc();
        if self.store.update_payment(&next, cur.status).await? {
            info!(payment_id = %cur.id, "payment failed");
        }
        Ok(())
    }

    pub async fn history(
        &self,
        caller: &Caller,
        query: HistoryQuery,
    ) -> AppResult<(Vec<Payment>, Pagination)> {
        let page = Page::new(query.page, query.limit);
        let (rows, total) = self
            .store
            .list_payments_for_user(caller.user_id, query.status, page.limit, page.offset())
            .await?;
        let mut payments = Vec::with_capacity(rows.len());
        for row in rows {
            payments.push(self.present(row).await?);
        }
        Ok((payments, Pagination::new(total, page)))
    }

    pub async fn get(&self, caller: &Caller, id: Uuid) -> AppResult<Payment> {
        let payment = self.load(id).await?;
        authorize(Operation::ViewPayment, caller, Subject::owned_by(payment.user_id))?;
        self.present(payment).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::auth::repo_types::Role;
    use crate::inspections::lifecycle::sample;
    use crate::payments::gateway::{
        testing::{signed_header, FakeGateway},
        DisabledGateway,
    };
    use crate::storage::testing::FakeStorage;
    use crate::store::MemoryStore;
    use crate::testing::seed_user;

    struct Fixture {
        store: Arc<dyn Store>,
        gateway: Arc<FakeGateway>,
        storage: Arc<FakeStorage>,
        service: PaymentService,
        client: Caller,
        inspection_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
        let gateway = Arc::new(FakeGateway::default());
        let storage = Arc::new(FakeStorage::default());
        let client = seed_user(&store, "owner@example.com", Role::Client).await;
        let inspection = sample(client.user_id);
        store.insert_inspection(&inspection).await.unwrap();
        let service = PaymentService::new(store.clone(), gateway.clone(), storage.clone());
        Fixture {
            store,
            gateway,
            storage,
            service,
            client,
            inspection_id: inspection.id,
        }
    }

    fn intent_req(inspection_id: Uuid, amount: f64) -> CreateIntentRequest {
        CreateIntentRequest {
            inspection_id,
            amount: Some(amount),
        }
    }

    fn event(kind: &str, intent_id: &str) -> Vec<u8> {
        serde_json::json!({ "type": kind, "data": { "object": { "id": intent_id } } })
            .to_string()
            .into_bytes()
    }

    #[tokio::test]
    async fn intent_confirm_issues_invoice_and_confirms_booking() {
        let f = fixture().await;
        let (secret, payment) = f
            .service
            .create_intent(&f.client, intent_req(f.inspection_id, 450.0))
            .await
            .unwrap();
        assert!(secret.is_some());
        assert_eq!(payment.amount_cents, 45000);
        assert_eq!(payment.status, PaymentStatus::Processing);

        let err = f
            .service
            .confirm(&f.client, &payment.external_intent_id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        f.gateway.mark(&payment.external_intent_id, "succeeded");
        let done = f
            .service
            .confirm(&f.client, &payment.external_intent_id)
            .await
            .unwrap();
        assert_eq!(done.status, PaymentStatus::Completed);
        assert!(done.paid_at.is_some());
        let number = done.invoice_number.clone().unwrap();
        assert!(number.starts_with("INV-"));
        assert!(number[4..].chars().all(|c| c.is_ascii_digit()));
        assert!(done.invoice_url.as_deref().unwrap().contains(&number));
        assert_eq!(f.storage.objects.lock().unwrap().len(), 1);

        let inspection = f.store.get_inspection(f.inspection_id).await.unwrap().unwrap();
        assert_eq!(inspection.status, InspectionStatus::Confirmed);

        let again = f
            .service
            .confirm(&f.client, &payment.external_intent_id)
            .await
            .unwrap();
        assert_eq!(again, done);
    }

    #[tokio::test]
    async fn intent_rules() {
        let f = fixture().await;
        let err = f
            .service
            .create_intent(&f.client, intent_req(f.inspection_id, 0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = f
            .service
            .create_intent(&f.client, intent_req(Uuid::new_v4(), 10.0))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let stranger = seed_user(&f.store, "other@example.com", Role::Client).await;
        let err = f
            .service
            .create_intent(&stranger, intent_req(f.inspection_id, 10.0))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Authorization(_)));
    }

    #[tokio::test]
    async fn paid_inspection_rejects_new_intents() {
        let f = fixture().await;
        let (_, first) = f
            .service
            .create_intent(&f.client, intent_req(f.inspection_id, 50.0))
            .await
            .unwrap();
        // an abandoned attempt does not block a retry
        let (_, retry) = f
            .service
            .create_intent(&f.client, intent_req(f.inspection_id, 50.0))
            .await
            .unwrap();
        assert_ne!(first.external_intent_id, retry.external_intent_id);

        f.gateway.mark(&retry.external_intent_id, "succeeded");
        f.service
            .confirm(&f.client, &retry.external_intent_id)
            .await
            .unwrap();
        let err = f
            .service
            .create_intent(&f.client, intent_req(f.inspection_id, 50.0))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn cancelled_inspection_rejects_intents() {
        let f = fixture().await;
        let mut inspection = f.store.get_inspection(f.inspection_id).await.unwrap().unwrap();
        inspection.status = InspectionStatus::Cancelled;
        inspection.version += 1;
        assert!(f.store.update_inspection(&inspection).await.unwrap());

        let err = f
            .service
            .create_intent(&f.client, intent_req(f.inspection_id, 50.0))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(f
            .store
            .list_payments_for_inspection(f.inspection_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn invoice_link_is_presigned_per_read() {
        let f = fixture().await;
        let (_, payment) = f
            .service
            .create_intent(&f.client, intent_req(f.inspection_id, 75.0))
            .await
            .unwrap();
        f.gateway.mark(&payment.external_intent_id, "succeeded");
        let done = f
            .service
            .confirm(&f.client, &payment.external_intent_id)
            .await
            .unwrap();

        let stored = f.store.get_payment(payment.id).await.unwrap().unwrap();
        let key = stored.invoice_key.clone().unwrap();
        assert_eq!(key, format!("invoices/{}.html", done.invoice_number.as_deref().unwrap()));
        assert!(stored.invoice_url.is_none());
        assert!(f.storage.objects.lock().unwrap().contains_key(&key));

        let fetched = f.service.get(&f.client, payment.id).await.unwrap();
        assert_eq!(fetched.invoice_url, done.invoice_url);
        let (rows, _) = f
            .service
            .history(&f.client, HistoryQuery::default())
            .await
            .unwrap();
        assert!(rows[0].invoice_url.as_deref().unwrap().ends_with(&key));
        let body = serde_json::to_value(&fetched).unwrap();
        assert!(body.get("invoiceKey").is_none());
        assert!(body["invoiceUrl"].is_string());
    }

    #[tokio::test]
    async fn failed_upload_leaves_payment_without_invoice() {
        let f = fixture().await;
        let (_, payment) = f
            .service
            .create_intent(&f.client, intent_req(f.inspection_id, 75.0))
            .await
            .unwrap();
        f.gateway.mark(&payment.external_intent_id, "succeeded");
        f.storage.fail_uploads.store(true, Ordering::SeqCst);

        let err = f
            .service
            .confirm(&f.client, &payment.external_intent_id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
        let stored = f.store.get_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Completed);
        assert!(stored.invoice_number.is_none());
        assert!(stored.invoice_key.is_none());
        assert!(f.storage.objects.lock().unwrap().is_empty());

        f.storage.fail_uploads.store(false, Ordering::SeqCst);
        let done = f
            .service
            .confirm(&f.client, &payment.external_intent_id)
            .await
            .unwrap();
        assert!(done.invoice_url.is_some());
        assert_eq!(done.paid_at, stored.paid_at);
        assert_eq!(f.storage.objects.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn webhook_replay_keeps_paid_at() {
        let f = fixture().await;
        let (_, payment) = f
            .service
            .create_intent(&f.client, intent_req(f.inspection_id, 120.0))
            .await
            .unwrap();
        let body = event("payment_intent.succeeded", &payment.external_intent_id);

        f.service
            .handle_webhook(&body, &signed_header(&body))
            .await
            .unwrap();
        let first = f.store.get_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(first.status, PaymentStatus::Completed);
        assert!(first.paid_at.is_some());

        f.service
            .handle_webhook(&body, &signed_header(&body))
            .await
            .unwrap();
        let second = f.store.get_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(second.paid_at, first.paid_at);
        assert_eq!(second.status, PaymentStatus::Completed);

        // a late failure does not undo a completed payment
        let failed = event("payment_intent.payment_failed", &payment.external_intent_id);
        f.service
            .handle_webhook(&failed, &signed_header(&failed))
            .await
            .unwrap();
        let third = f.store.get_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(third.status, PaymentStatus::Completed);

        // confirm after a webhook still issues the invoice
        let done = f
            .service
            .confirm(&f.client, &payment.external_intent_id)
            .await
            .unwrap();
        assert!(done.invoice_number.is_some());
        assert_eq!(done.paid_at, first.paid_at);
    }

    #[tokio::test]
    async fn webhook_rejects_bad_signature_and_acks_unknown() {
        let f = fixture().await;
        let body = event("payment_intent.succeeded", "pi_missing");
        let err = f
            .service
            .handle_webhook(&body, "t=1,v1=deadbeef")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        f.service
            .handle_webhook(&body, &signed_header(&body))
            .await
            .unwrap();
        let other = event("customer.created", "cus_1");
        f.service
            .handle_webhook(&other, &signed_header(&other))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn refund_requires_completed_payment() {
        let f = fixture().await;
        let admin = seed_user(&f.store, "admin@example.com", Role::Admin).await;
        let (_, payment) = f
            .service
            .create_intent(&f.client, intent_req(f.inspection_id, 80.0))
            .await
            .unwrap();

        let err = f.service.refund(&admin, payment.id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        let unchanged = f.store.get_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, PaymentStatus::Processing);
        assert!(f.gateway.refunds.lock().unwrap().is_empty());

        f.gateway.mark(&payment.external_intent_id, "succeeded");
        f.service
            .confirm(&f.client, &payment.external_intent_id)
            .await
            .unwrap();

        let err = f.service.refund(&f.client, payment.id).await.unwrap_err();
        assert!(matches!(err, AppError::Authorization(_)));

        let refunded = f.service.refund(&admin, payment.id).await.unwrap();
        assert_eq!(refunded.status, PaymentStatus::Refunded);
        let inspection = f.store.get_inspection(f.inspection_id).await.unwrap().unwrap();
        assert_eq!(inspection.status, InspectionStatus::Confirmed);
    }

    #[tokio::test]
    async fn history_and_get_are_scoped_to_payer() {
        let f = fixture().await;
        let (_, payment) = f
            .service
            .create_intent(&f.client, intent_req(f.inspection_id, 30.0))
            .await
            .unwrap();
        let (rows, pagination) = f
            .service
            .history(&f.client, HistoryQuery::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(pagination.total, 1);

        let stranger = seed_user(&f.store, "x@example.com", Role::Technician).await;
        let (rows, _) = f
            .service
            .history(&stranger, HistoryQuery::default())
            .await
            .unwrap();
        assert!(rows.is_empty());
        let err = f.service.get(&stranger, payment.id).await.unwrap_err();
        assert!(matches!(err, AppError::Authorization(_)));
        assert_eq!(f.service.get(&f.client, payment.id).await.unwrap().id, payment.id);
    }

    #[tokio::test]
    async fn disabled_processor_is_unavailable() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
        let client = seed_user(&store, "c@example.com", Role::Client).await;
        let inspection = sample(client.user_id);
        store.insert_inspection(&inspection).await.unwrap();
        let service = PaymentService::new(
            store,
            Arc::new(DisabledGateway),
            Arc::new(FakeStorage::default()),
        );
        let err = service
            .create_intent(&client, intent_req(inspection.id, 10.0))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ServiceUnavailable(_)));
    }
}
