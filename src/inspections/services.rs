use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use super::dto::{CreateInspectionRequest, ListInspectionsQuery, RateInspectionRequest, UpdateInspectionRequest};
use super::lifecycle;
use super::repo::InspectionRepo;
use super::repo_types::{Inspection, InspectionFilter, InspectionStatus};
use crate::auth::{extractors::Caller, repo::UserRepo, repo_types::Role};
use crate::error::{AppError, AppResult};
use crate::mailer::{self, Mailer};
use crate::money::to_cents;
use crate::payments::repo::PaymentRepo;
use crate::pagination::{Page, Pagination};
use crate::policy::{authorize, Operation, Subject};
use crate::store::Store;

fn subject(i: &Inspection) -> Subject {
    Subject {
        owner_id: Some(i.client_id),
        assigned_id: i.technician_id,
    }
}

fn non_blank(value: &str, field: &str) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

fn price_cents(price: f64) -> AppResult<i64> {
    to_cents(price).ok_or_else(|| AppError::validation("price must be a non-negative amount"))
}

/// Booking lifecycle: create → assign → start → complete / cancel → rate.
pub struct InspectionService {
    store: Arc<dyn Store>,
    mailer: Arc<dyn Mailer>,
}

impl InspectionService {
    pub fn new(store: Arc<dyn Store>, mailer: Arc<dyn Mailer>) -> Self {
        Self { store, mailer }
    }

    async fn load(&self, id: Uuid) -> AppResult<Inspection> {
        self.store
            .get_inspection(id)
            .await?
            .ok_or_else(|| AppError::not_found("Inspection not found"))
    }

    async fn commit(&self, next: &Inspection) -> AppResult<()> {
        if !self.store.update_inspection(next).await? {
            return Err(AppError::conflict("inspection was modified concurrently, retry"));
        }
        Ok(())
    }

    async fn commit_with_stats(&self, next: &Inspection) -> AppResult<()> {
        if !self.store.update_inspection_with_stats(next).await? {
            return Err(AppError::conflict("inspection was modified concurrently, retry"));
        }
        Ok(())
    }

    pub async fn create(&self, caller: &Caller, req: CreateInspectionRequest) -> AppResult<Inspection> {
        authorize(Operation::CreateInspection, caller, Subject::none())?;

        let boat_name = non_blank(&req.boat_name, "boatName")?;
        let location = non_blank(&req.location, "location")?;
        let scheduled_date = req
            .preferred_date
            .ok_or_else(|| AppError::validation("preferredDate is required"))?;
        let price_cents = req.price.map(price_cents).transpose()?.unwrap_or(0);

        let now = OffsetDateTime::now_utc();
        let inspection = Inspection {
            id: Uuid::new_v4(),
            client_id: caller.user_id,
            technician_id: None,
            boat_name,
            boat_model: req.boat_model,
            boat_year: req.boat_year,
            boat_length: req.boat_length,
            listing_url: req.listing_url,
            inspection_type: req.inspection_type,
            status: InspectionStatus::Pending,
            location,
            scheduled_date: Some(scheduled_date),
            completed_date: None,
            price_cents,
            rating: None,
            comment: None,
            notes: req.notes,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_inspection(&inspection).await?;
        info!(inspection_id = %inspection.id, client_id = %caller.user_id, "inspection requested");
        Ok(inspection)
    }

    /// Clients see their own requests, technicians their assignments, admins everything.
    pub async fn list(
        &self,
        caller: &Caller,
        query: ListInspectionsQuery,
    ) -> AppResult<(Vec<Inspection>, Pagination)> {
        let mut filter = InspectionFilter {
            status: query.status,
            inspection_type: query.inspection_type,
            ..Default::default()
        };
        match caller.role {
            Role::Client => filter.client_id = Some(caller.user_id),
            Role::Technician => filter.technician_id = Some(caller.user_id),
            Role::Admin => {}
        }
        let page = Page::new(query.page, query.limit);
        let (rows, total) = self
            .store
            .list_inspections(&filter, page.limit, page.offset())
            .await?;
        Ok((rows, Pagination::new(total, page)))
    }

    pub async fn get(&self, caller: &Caller, id: Uuid) -> AppResult<Inspection> {
        let inspection = self.load(id).await?;
        authorize(Operation::ViewInspection, caller, subject(&inspection))?;
        Ok(inspection)
    }

    pub async fn update(
        &self,
        caller: &Caller,
        id: Uuid,
        patch: UpdateInspectionRequest,
    ) -> AppResult<Inspection> {
        let cur = self.load(id).await?;
        authorize(Operation::UpdateInspection, caller, subject(&cur))?;
        lifecycle::ensure_editable(&cur)?;

        let mut next = cur.clone();
        if let Some(name) = patch.boat_name {
            next.boat_name = non_blank(&name, "boatName")?;
        }
        if let Some(location) = patch.location {
            next.location = non_blank(&location, "location")?;
        }
        if let Some(t) = patch.inspection_type {
            next.inspection_type = t;
        }
        if let Some(date) = patch.preferred_date {
            next.scheduled_date = Some(date);
        }
        if let Some(price) = patch.price {
            next.price_cents = price_cents(price)?;
        }
        next.boat_model = patch.boat_model.or(next.boat_model);
        next.boat_year = patch.boat_year.or(next.boat_year);
        next.boat_length = patch.boat_length.or(next.boat_length);
        next.listing_url = patch.listing_url.or(next.listing_url);
        next.notes = patch.notes.or(next.notes);
        next.version = cur.version + 1;
        next.updated_at = OffsetDateTime::now_utc();

        self.commit(&next).await?;
        Ok(next)
    }

    pub async fn assign_technician(
        &self,
        caller: &Caller,
        id: Uuid,
        technician_id: Uuid,
    ) -> AppResult<Inspection> {
        authorize(Operation::AssignTechnician, caller, Subject::none())?;
        let cur = self.load(id).await?;

        let technician = self
            .store
            .find_user(technician_id)
            .await?
            .filter(|u| u.role == Role::Technician && u.is_active)
            .ok_or_else(|| AppError::validation("Invalid technician"))?;

        let next = lifecycle::assign(&cur, technician.id, OffsetDateTime::now_utc())?;
        self.commit(&next).await?;
        info!(inspection_id = %id, technician_id = %technician.id, "technician assigned");

        if let Some(client) = self.store.find_user(next.client_id).await? {
            mailer::dispatch(
                &self.mailer,
                mailer::assignment_email(&client.email, &next.boat_name, &technician.name),
            );
        }
        Ok(next)
    }

    pub async fn start(&self, caller: &Caller, id: Uuid) -> AppResult<Inspection> {
        let cur = self.load(id).await?;
        authorize(Operation::StartInspection, caller, subject(&cur))?;
        let next = lifecycle::start(&cur, OffsetDateTime::now_utc())?;
        self.commit(&next).await?;
        info!(inspection_id = %id, "inspection started");
        Ok(next)
    }

    pub async fn complete(&self, caller: &Caller, id: Uuid) -> AppResult<Inspection> {
        let cur = self.load(id).await?;
        authorize(Operation::CompleteInspection, caller, subject(&cur))?;
        let next = lifecycle::complete(&cur, OffsetDateTime::now_utc())?;
        self.commit_with_stats(&next).await?;
        info!(inspection_id = %id, "inspection completed");

        match self.store.find_user(next.client_id).await {
            Ok(Some(client)) => mailer::dispatch(
                &self.mailer,
                mailer::completion_email(&client.email, &next.boat_name),
            ),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "completion notice skipped"),
        }
        Ok(next)
    }

    pub async fn cancel(&self, caller: &Caller, id: Uuid) -> AppResult<Inspection> {
        authorize(Operation::CancelInspection, caller, Subject::none())?;
        let cur = self.load(id).await?;
        let next = lifecycle::cancel(&cur, OffsetDateTime::now_utc())?;
        self.commit(&next).await?;
        info!(inspection_id = %id, "inspection cancelled");
        Ok(next)
    }

    /// Stores the rating and recomputes the technician's average in the same write.
    pub async fn rate(
        &self,
        caller: &Caller,
        id: Uuid,
        req: RateInspectionRequest,
    ) -> AppResult<Inspection> {
        let rating = req
            .rating
            .filter(|r| (1..=5).contains(r))
            .ok_or_else(|| AppError::validation("Rating must be between 1 and 5"))?;
        let cur = self.load(id).await?;
        authorize(Operation::RateInspection, caller, Subject::owned_by(cur.client_id))?;

        let next = lifecycle::rate(&cur, rating as i16, req.comment, OffsetDateTime::now_utc())?;
        self.commit_with_stats(&next).await?;
        info!(inspection_id = %id, rating, "inspection rated");
        Ok(next)
    }

    pub async fn delete(&self, caller: &Caller, id: Uuid) -> AppResult<()> {
        let cur = self.load(id).await?;
        authorize(Operation::DeleteInspection, caller, subject(&cur))?;
        lifecycle::ensure_deletable(&cur)?;
        let settled = self
            .store
            .list_payments_for_inspection(id)
            .await?
            .iter()
            .any(|p| p.status.is_settled());
        if settled {
            return Err(AppError::conflict("Inspection has been paid and cannot be deleted"));
        }
        if !self.store.delete_inspection(id, cur.version).await? {
            return Err(AppError::conflict("inspection was modified concurrently, retry"));
        }
        info!(inspection_id = %id, "inspection deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspections::repo_types::InspectionType;
    use crate::mailer::testing::RecordingMailer;
    use crate::payments::repo_types::{Payment, PaymentStatus};
    use crate::store::MemoryStore;
    use crate::technicians::repo::TechnicianRepo;
    use crate::testing::{seed_technician, seed_user};

    struct Fixture {
        store: Arc<dyn Store>,
        service: InspectionService,
        client: Caller,
        admin: Caller,
        tech: Caller,
    }

    async fn fixture() -> Fixture {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
        let service = InspectionService::new(store.clone(), Arc::new(RecordingMailer::default()));
        let client = seed_user(&store, "client@example.com", Role::Client).await;
        let admin = seed_user(&store, "admin@example.com", Role::Admin).await;
        let tech = seed_technician(&store, "tech@example.com", "LIC-1").await;
        Fixture {
            store,
            service,
            client,
            admin,
            tech,
        }
    }

    fn request() -> CreateInspectionRequest {
        CreateInspectionRequest {
            boat_name: "Sea Breeze".into(),
            inspection_type: InspectionType::PrePurchase,
            location: "Port Vell".into(),
            preferred_date: Some(OffsetDateTime::now_utc()),
            boat_model: None,
            boat_year: Some(2015),
            boat_length: None,
            listing_url: None,
            notes: None,
            price: None,
        }
    }

    fn rating(r: i64) -> RateInspectionRequest {
        RateInspectionRequest {
            rating: Some(r),
            comment: None,
        }
    }

    async fn completed(f: &Fixture) -> Inspection {
        let i = f.service.create(&f.client, request()).await.unwrap();
        f.service
            .assign_technician(&f.admin, i.id, f.tech.user_id)
            .await
            .unwrap();
        f.service.complete(&f.tech, i.id).await.unwrap()
    }

    #[tokio::test]
    async fn full_lifecycle_updates_technician_rating() {
        let f = fixture().await;
        let created = f.service.create(&f.client, request()).await.unwrap();
        assert_eq!(created.status, InspectionStatus::Pending);
        assert_eq!(created.technician_id, None);

        let assigned = f
            .service
            .assign_technician(&f.admin, created.id, f.tech.user_id)
            .await
            .unwrap();
        assert_eq!(assigned.status, InspectionStatus::Confirmed);
        assert_eq!(assigned.technician_id, Some(f.tech.user_id));

        let done = f.service.complete(&f.tech, created.id).await.unwrap();
        assert_eq!(done.status, InspectionStatus::Completed);
        assert!(done.completed_date.is_some());

        let rated = f.service.rate(&f.client, created.id, rating(5)).await.unwrap();
        assert_eq!(rated.rating, Some(5));

        let profile = f.store.get_profile_by_user(f.tech.user_id).await.unwrap().unwrap();
        assert_eq!(profile.average_rating, 5.0);
        assert_eq!(profile.total_reviews, 1);
        assert_eq!(profile.total_inspections, 1);
    }

    #[tokio::test]
    async fn average_rating_is_the_mean_of_all_ratings() {
        let f = fixture().await;
        let mut ratings = Vec::new();
        for r in [5, 3, 4, 2] {
            let i = completed(&f).await;
            f.service.rate(&f.client, i.id, rating(r)).await.unwrap();
            ratings.push(r as f64);

            let profile = f.store.get_profile_by_user(f.tech.user_id).await.unwrap().unwrap();
            let mean = ratings.iter().sum::<f64>() / ratings.len() as f64;
            assert!((profile.average_rating - mean).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn only_the_owning_client_may_rate() {
        let f = fixture().await;
        let i = completed(&f).await;
        let stranger = seed_user(&f.store, "other@example.com", Role::Client).await;
        for caller in [stranger, f.admin, f.tech] {
            let err = f.service.rate(&caller, i.id, rating(4)).await.unwrap_err();
            assert!(matches!(err, AppError::Authorization(_)), "{err:?}");
        }
    }

    #[tokio::test]
    async fn rating_before_completion_is_a_conflict() {
        let f = fixture().await;
        let i = f.service.create(&f.client, request()).await.unwrap();
        let err = f.service.rate(&f.client, i.id, rating(4)).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        f.service
            .assign_technician(&f.admin, i.id, f.tech.user_id)
            .await
            .unwrap();
        let err = f.service.rate(&f.client, i.id, rating(4)).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn double_rating_is_rejected() {
        let f = fixture().await;
        let i = completed(&f).await;
        f.service.rate(&f.client, i.id, rating(4)).await.unwrap();
        let err = f.service.rate(&f.client, i.id, rating(1)).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn assigning_a_non_technician_is_a_validation_error() {
        let f = fixture().await;
        let i = f.service.create(&f.client, request()).await.unwrap();
        let err = f
            .service
            .assign_technician(&f.admin, i.id, f.client.user_id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        let err = f
            .service
            .assign_technician(&f.admin, i.id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn only_admins_assign_and_cancel() {
        let f = fixture().await;
        let i = f.service.create(&f.client, request()).await.unwrap();
        let err = f
            .service
            .assign_technician(&f.client, i.id, f.tech.user_id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Authorization(_)));
        let err = f.service.cancel(&f.tech, i.id).await.unwrap_err();
        assert!(matches!(err, AppError::Authorization(_)));
    }

    #[tokio::test]
    async fn unassigned_technician_cannot_complete() {
        let f = fixture().await;
        let other = seed_technician(&f.store, "other-tech@example.com", "LIC-2").await;
        let i = f.service.create(&f.client, request()).await.unwrap();
        f.service
            .assign_technician(&f.admin, i.id, f.tech.user_id)
            .await
            .unwrap();
        let err = f.service.complete(&other, i.id).await.unwrap_err();
        assert!(matches!(err, AppError::Authorization(_)));
        assert!(f.service.complete(&f.admin, i.id).await.is_ok());
    }

    #[tokio::test]
    async fn delete_rules() {
        let f = fixture().await;
        let done = completed(&f).await;
        let err = f.service.delete(&f.client, done.id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let pending = f.service.create(&f.client, request()).await.unwrap();
        f.service.delete(&f.client, pending.id).await.unwrap();
        let err = f.service.get(&f.client, pending.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn paid_booking_cannot_be_deleted() {
        let f = fixture().await;
        let i = f.service.create(&f.client, request()).await.unwrap();
        let now = OffsetDateTime::now_utc();
        let mut payment = Payment {
            id: Uuid::new_v4(),
            inspection_id: i.id,
            user_id: f.client.user_id,
            amount_cents: 45000,
            currency: "USD".into(),
            external_intent_id: "pi_paid".into(),
            status: PaymentStatus::Processing,
            invoice_number: None,
            invoice_key: None,
            invoice_url: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
        };
        f.store.insert_payment(&payment).await.unwrap();
        payment.status = PaymentStatus::Completed;
        payment.paid_at = Some(now);
        assert!(f
            .store
            .complete_payment(&payment, PaymentStatus::Processing)
            .await
            .unwrap());

        let confirmed = f.service.get(&f.client, i.id).await.unwrap();
        assert_eq!(confirmed.status, InspectionStatus::Confirmed);
        let err = f.service.delete(&f.client, i.id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        let stored = f.store.get_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Completed);
        assert!(f.service.get(&f.client, i.id).await.is_ok());
    }

    #[tokio::test]
    async fn abandoned_checkout_does_not_block_delete() {
        let f = fixture().await;
        let i = f.service.create(&f.client, request()).await.unwrap();
        let now = OffsetDateTime::now_utc();
        let payment = Payment {
            id: Uuid::new_v4(),
            inspection_id: i.id,
            user_id: f.client.user_id,
            amount_cents: 45000,
            currency: "USD".into(),
            external_intent_id: "pi_abandoned".into(),
            status: PaymentStatus::Failed,
            invoice_number: None,
            invoice_key: None,
            invoice_url: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
        };
        f.store.insert_payment(&payment).await.unwrap();
        f.service.delete(&f.client, i.id).await.unwrap();
        assert!(f.store.get_payment(payment.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn technician_is_null_iff_pending_across_the_lifecycle() {
        let f = fixture().await;
        let a = f.service.create(&f.client, request()).await.unwrap();
        let b = completed(&f).await;
        let c = f.service.create(&f.client, request()).await.unwrap();
        f.service
            .assign_technician(&f.admin, c.id, f.tech.user_id)
            .await
            .unwrap();
        f.service.start(&f.tech, c.id).await.unwrap();

        for id in [a.id, b.id, c.id] {
            let i = f.service.get(&f.admin, id).await.unwrap();
            assert_eq!(i.technician_id.is_none(), i.status == InspectionStatus::Pending);
            assert!(lifecycle::invariants_hold(&i));
        }
    }

    #[tokio::test]
    async fn listing_is_scoped_by_role() {
        let f = fixture().await;
        let other = seed_user(&f.store, "other@example.com", Role::Client).await;
        f.service.create(&f.client, request()).await.unwrap();
        f.service.create(&other, request()).await.unwrap();
        completed(&f).await;

        let (mine, page) = f
            .service
            .list(&f.client, ListInspectionsQuery::default())
            .await
            .unwrap();
        assert_eq!(mine.len(), 2);
        assert_eq!(page.total, 2);

        let (assigned, _) = f
            .service
            .list(&f.tech, ListInspectionsQuery::default())
            .await
            .unwrap();
        assert_eq!(assigned.len(), 1);

        let (all, page) = f
            .service
            .list(
                &f.admin,
                ListInspectionsQuery {
                    limit: Some(2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(page.total, 3);
        assert_eq!(page.pages, 2);
    }

    #[tokio::test]
    async fn edits_only_while_pending() {
        let f = fixture().await;
        let i = f.service.create(&f.client, request()).await.unwrap();
        let edited = f
            .service
            .update(
                &f.client,
                i.id,
                UpdateInspectionRequest {
                    boat_name: Some("Blue Horizon".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.boat_name, "Blue Horizon");
        assert_eq!(edited.location, "Port Vell");

        f.service
            .assign_technician(&f.admin, i.id, f.tech.user_id)
            .await
            .unwrap();
        let err = f
            .service
            .update(&f.client, i.id, UpdateInspectionRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn create_validates_required_fields() {
        let f = fixture().await;
        let mut req = request();
        req.boat_name = "  ".into();
        assert!(matches!(
            f.service.create(&f.client, req).await,
            Err(AppError::Validation(_))
        ));
        let mut req = request();
        req.preferred_date = None;
        assert!(matches!(
            f.service.create(&f.client, req).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            f.service.create(&f.tech, request()).await,
            Err(AppError::Authorization(_))
        ));
    }
}
