use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::auth::{repo::UserRepo, repo_types::User};
use crate::inspections::{
    repo::InspectionRepo,
    repo_types::{Inspection, InspectionFilter, InspectionStatus},
};
use crate::payments::{
    repo::PaymentRepo,
    repo_types::{Payment, PaymentStatus},
};
use crate::technicians::{
    repo::TechnicianRepo,
    repo_types::{TechnicianFilter, TechnicianListing, TechnicianProfile},
    services::aggregate_stats,
};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    inspections: HashMap<Uuid, Inspection>,
    technicians: HashMap<Uuid, TechnicianProfile>, // keyed by user_id
    payments: HashMap<Uuid, Payment>,
}

impl Tables {
    fn recompute(&mut self, user_id: Uuid) -> Option<TechnicianProfile> {
        let stats = aggregate_stats(
            self.inspections
                .values()
                .filter(|i| i.technician_id == Some(user_id)),
        );
        let profile = self.technicians.get_mut(&user_id)?;
        profile.average_rating = stats.average_rating;
        profile.total_inspections = stats.total_inspections;
        profile.total_reviews = stats.total_reviews;
        profile.updated_at = OffsetDateTime::now_utc();
        Some(profile.clone())
    }

    fn write_inspection(&mut self, next: &Inspection) -> bool {
        match self.inspections.get_mut(&next.id) {
            Some(current) if current.version + 1 == next.version => {
                *current = next.clone();
                true
            }
            _ => false,
        }
    }

    fn write_payment(&mut self, next: &Payment, expected: PaymentStatus) -> bool {
        match self.payments.get_mut(&next.id) {
            Some(current) if current.status == expected => {
                current.status = next.status;
                current.invoice_number = next.invoice_number.clone();
                current.invoice_key = next.invoice_key.clone();
                current.paid_at = next.paid_at;
                current.updated_at = next.updated_at;
                true
            }
            _ => false,
        }
    }
}

/// Process-local store. One lock over all tables, so every operation is
/// atomic the way a single database transaction would be.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

fn page<T: Clone>(rows: Vec<T>, limit: i64, offset: i64) -> (Vec<T>, i64) {
    let total = rows.len() as i64;
    let items = rows
        .into_iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect();
    (items, total)
}

#[async_trait]
impl UserRepo for MemoryStore {
    async fn find_user(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let t = self.tables.lock().await;
        Ok(t.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_user_by_verification_token(&self, token: &str) -> anyhow::Result<Option<User>> {
        let t = self.tables.lock().await;
        Ok(t.users
            .values()
            .find(|u| u.verification_token.as_deref() == Some(token))
            .cloned())
    }

    async fn insert_user(&self, user: &User) -> anyhow::Result<()> {
        let mut t = self.tables.lock().await;
        anyhow::ensure!(
            !t.users.values().any(|u| u.email == user.email),
            "duplicate email {}",
            user.email
        );
        t.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn update_user(&self, user: &User) -> anyhow::Result<()> {
        let mut t = self.tables.lock().await;
        if let Some(current) = t.users.get_mut(&user.id) {
            *current = user.clone();
        }
        Ok(())
    }
}

#[async_trait]
impl InspectionRepo for MemoryStore {
    async fn insert_inspection(&self, inspection: &Inspection) -> anyhow::Result<()> {
        let mut t = self.tables.lock().await;
        t.inspections.insert(inspection.id, inspection.clone());
        Ok(())
    }

    async fn get_inspection(&self, id: Uuid) -> anyhow::Result<Option<Inspection>> {
        Ok(self.tables.lock().await.inspections.get(&id).cloned())
    }

    async fn list_inspections(
        &self,
        filter: &InspectionFilter,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<(Vec<Inspection>, i64)> {
        let t = self.tables.lock().await;
        let mut rows: Vec<Inspection> = t
            .inspections
            .values()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(rows, limit, offset))
    }

    async fn update_inspection(&self, next: &Inspection) -> anyhow::Result<bool> {
        Ok(self.tables.lock().await.write_inspection(next))
    }

    async fn update_inspection_with_stats(&self, next: &Inspection) -> anyhow::Result<bool> {
        let mut t = self.tables.lock().await;
        if !t.write_inspection(next) {
            return Ok(false);
        }
        if let Some(technician_id) = next.technician_id {
            t.recompute(technician_id);
        }
        Ok(true)
    }

    async fn delete_inspection(&self, id: Uuid, version: i64) -> anyhow::Result<bool> {
        let mut t = self.tables.lock().await;
        match t.inspections.get(&id) {
            Some(current) if current.version == version => {
                anyhow::ensure!(
                    !t.payments.values().any(|p| p.inspection_id == id && p.status.is_settled()),
                    "inspection {id} has settled payments"
                );
                t.inspections.remove(&id);
                t.payments.retain(|_, p| p.inspection_id != id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl TechnicianRepo for MemoryStore {
    async fn insert_profile(&self, profile: &TechnicianProfile) -> anyhow::Result<()> {
        let mut t = self.tables.lock().await;
        anyhow::ensure!(
            !t.technicians.contains_key(&profile.user_id),
            "profile already exists for {}",
            profile.user_id
        );
        t.technicians.insert(profile.user_id, profile.clone());
        Ok(())
    }

    async fn get_profile_by_user(&self, user_id: Uuid) -> anyhow::Result<Option<TechnicianProfile>> {
        Ok(self.tables.lock().await.technicians.get(&user_id).cloned())
    }

    async fn find_profile_by_license(
        &self,
        license_number: &str,
    ) -> anyhow::Result<Option<TechnicianProfile>> {
        let t = self.tables.lock().await;
        Ok(t.technicians
            .values()
            .find(|p| p.license_number == license_number)
            .cloned())
    }

    async fn update_profile(&self, profile: &TechnicianProfile) -> anyhow::Result<()> {
        let mut t = self.tables.lock().await;
        if let Some(current) = t.technicians.get_mut(&profile.user_id) {
            current.license_number = profile.license_number.clone();
            current.specialization = profile.specialization.clone();
            current.years_of_experience = profile.years_of_experience;
            current.bio = profile.bio.clone();
            current.hourly_rate_cents = profile.hourly_rate_cents;
            current.is_available = profile.is_available;
            current.updated_at = profile.updated_at;
        }
        Ok(())
    }

    async fn list_technicians(
        &self,
        filter: &TechnicianFilter,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<(Vec<TechnicianListing>, i64)> {
        let t = self.tables.lock().await;
        let search = filter.search.as_ref().map(|s| s.to_lowercase());
        let mut rows: Vec<TechnicianListing> = t
            .technicians
            .values()
            .filter_map(|p| {
                let user = t.users.get(&p.user_id).filter(|u| u.is_active)?;
                let keep = filter
                    .specialization
                    .as_ref()
                    .map_or(true, |s| p.specialization.as_ref() == Some(s))
                    && filter.min_rating.map_or(true, |m| p.average_rating >= m)
                    && search
                        .as_ref()
                        .map_or(true, |s| user.name.to_lowercase().contains(s))
                    && filter.available.map_or(true, |a| p.is_available == a);
                keep.then(|| TechnicianListing {
                    profile: p.clone(),
                    name: user.name.clone(),
                    email: user.email.clone(),
                })
            })
            .collect();
        rows.sort_by(|a, b| {
            b.profile
                .average_rating
                .total_cmp(&a.profile.average_rating)
                .then(a.profile.created_at.cmp(&b.profile.created_at))
        });
        Ok(page(rows, limit, offset))
    }

    async fn recompute_stats(&self, user_id: Uuid) -> anyhow::Result<Option<TechnicianProfile>> {
        Ok(self.tables.lock().await.recompute(user_id))
    }
}

#[async_trait]
impl PaymentRepo for MemoryStore {
    async fn insert_payment(&self, payment: &Payment) -> anyhow::Result<()> {
        let mut t = self.tables.lock().await;
        anyhow::ensure!(
            !t.payments
                .values()
                .any(|p| p.external_intent_id == payment.external_intent_id),
            "duplicate intent {}",
            payment.external_intent_id
        );
        let mut row = payment.clone();
        row.invoice_url = None;
        t.payments.insert(row.id, row);
        Ok(())
    }

    async fn get_payment(&self, id: Uuid) -> anyhow::Result<Option<Payment>> {
        Ok(self.tables.lock().await.payments.get(&id).cloned())
    }

    async fn find_payment_by_intent(&self, intent_id: &str) -> anyhow::Result<Option<Payment>> {
        let t = self.tables.lock().await;
        Ok(t.payments
            .values()
            .find(|p| p.external_intent_id == intent_id)
            .cloned())
    }

    async fn list_payments_for_inspection(&self, inspection_id: Uuid) -> anyhow::Result<Vec<Payment>> {
        let t = self.tables.lock().await;
        let mut rows: Vec<Payment> = t
            .payments
            .values()
            .filter(|p| p.inspection_id == inspection_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }

    async fn list_payments_for_user(
        &self,
        user_id: Uuid,
        status: Option<PaymentStatus>,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<(Vec<Payment>, i64)> {
        let t = self.tables.lock().await;
        let mut rows: Vec<Payment> = t
            .payments
            .values()
            .filter(|p| p.user_id == user_id && status.map_or(true, |s| p.status == s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(rows, limit, offset))
    }

    async fn update_payment(&self, next: &Payment, expected: PaymentStatus) -> anyhow::Result<bool> {
        Ok(self.tables.lock().await.write_payment(next, expected))
    }

    async fn complete_payment(&self, next: &Payment, expected: PaymentStatus) -> anyhow::Result<bool> {
        let mut t = self.tables.lock().await;
        if !t.write_payment(next, expected) {
            return Ok(false);
        }
        if let Some(inspection) = t.inspections.get_mut(&next.inspection_id) {
            if inspection.status == InspectionStatus::Pending {
                inspection.status = InspectionStatus::Confirmed;
                inspection.version += 1;
                inspection.updated_at = OffsetDateTime::now_utc();
            }
        }
        Ok(true)
    }
}
