use std::sync::Arc;

use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use super::dto::{CreateProfileRequest, ListTechniciansQuery, TechnicianPage, UpdateProfileRequest};
use super::repo::TechnicianRepo;
use super::repo_types::{TechnicianFilter, TechnicianListing, TechnicianProfile, TechnicianStats};
use crate::auth::{extractors::Caller, repo::UserRepo};
use crate::error::{AppError, AppResult};
use crate::inspections::repo_types::{Inspection, InspectionStatus};
use crate::money::to_cents;
use crate::pagination::{Page, Pagination};
use crate::policy::{authorize, Operation, Subject};
use crate::store::Store;

/// Derives rating aggregates from a technician's inspections. Always a full
/// pass over the rows, never an incremental patch of the stored mean.
pub fn aggregate_stats<'a>(inspections: impl IntoIterator<Item = &'a Inspection>) -> TechnicianStats {
    let mut sum = 0i64;
    let mut reviews = 0i32;
    let mut completed = 0i32;
    for i in inspections {
        if i.status == InspectionStatus::Completed {
            completed += 1;
        }
        if let Some(r) = i.rating {
            sum += i64::from(r);
            reviews += 1;
        }
    }
    TechnicianStats {
        average_rating: if reviews == 0 {
            0.0
        } else {
            sum as f64 / f64::from(reviews)
        },
        total_inspections: completed,
        total_reviews: reviews,
    }
}

fn optional_text(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn hourly_rate(rate: f64) -> AppResult<i64> {
    to_cents(rate).ok_or_else(|| AppError::validation("hourlyRate must be a non-negative amount"))
}

pub struct TechnicianDirectory {
    store: Arc<dyn Store>,
}

impl TechnicianDirectory {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn list(&self, query: ListTechniciansQuery) -> AppResult<TechnicianPage> {
        let filter = TechnicianFilter {
            specialization: optional_text(query.specialization),
            min_rating: query.min_rating,
            search: optional_text(query.search),
            available: Some(query.available.unwrap_or(true)),
        };
        let page = Page::new(query.page, query.limit);
        let (items, total) = self
            .store
            .list_technicians(&filter, page.limit, page.offset())
            .await?;
        let meta = Pagination::new(total, page);
        Ok(TechnicianPage {
            items,
            total: meta.total,
            page: meta.page,
            limit: meta.limit,
            pages: meta.pages,
        })
    }

    pub async fn get(&self, user_id: Uuid) -> AppResult<TechnicianListing> {
        let profile = self
            .store
            .get_profile_by_user(user_id)
            .await?
            .ok_or_else(|| AppError::not_found("Technician not found"))?;
        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or_else(|| AppError::not_found("Technician not found"))?;
        Ok(TechnicianListing {
            profile,
            name: user.name,
            email: user.email,
        })
    }

    pub async fn create_profile(
        &self,
        caller: &Caller,
        req: CreateProfileRequest,
    ) -> AppResult<TechnicianProfile> {
        authorize(Operation::ManageTechnicianProfile, caller, Subject::none())?;

        let license_number = req.license_number.trim().to_string();
        if license_number.is_empty() {
            return Err(AppError::validation("licenseNumber is required"));
        }
        if self.store.get_profile_by_user(caller.user_id).await?.is_some() {
            return Err(AppError::conflict("Technician profile already exists"));
        }
        if self.store.find_profile_by_license(&license_number).await?.is_some() {
            return Err(AppError::conflict("License number already registered"));
        }

        let now = OffsetDateTime::now_utc();
        let profile = TechnicianProfile {
            id: Uuid::new_v4(),
            user_id: caller.user_id,
            license_number,
            specialization: optional_text(req.specialization),
            years_of_experience: req.years_of_experience,
            bio: req.bio,
            hourly_rate_cents: req.hourly_rate.map(hourly_rate).transpose()?,
            average_rating: 0.0,
            total_inspections: 0,
            total_reviews: 0,
            is_available: true,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_profile(&profile).await?;
        info!(user_id = %caller.user_id, "technician profile created");
        Ok(profile)
    }

    async fn own_profile(&self, caller: &Caller) -> AppResult<TechnicianProfile> {
        authorize(Operation::ManageTechnicianProfile, caller, Subject::none())?;
        self.store
            .get_profile_by_user(caller.user_id)
            .await?
            .ok_or_else(|| AppError::not_found("Technician profile not found"))
    }

    pub async fn update_profile(
        &self,
        caller: &Caller,
        req: UpdateProfileRequest,
    ) -> AppResult<TechnicianProfile> {
        let mut profile = self.own_profile(caller).await?;

        if let Some(license) = optional_text(req.license_number) {
            if license != profile.license_number {
                if self.store.find_profile_by_license(&license).await?.is_some() {
                    return Err(AppError::conflict("License number already registered"));
                }
                profile.license_number = license;
            }
        }
        if let Some(s) = optional_text(req.specialization) {
            profile.specialization = Some(s);
        }
        if let Some(years) = req.years_of_experience {
            profile.years_of_experience = Some(years);
        }
        if let Some(bio) = req.bio {
            profile.bio = Some(bio);
        }
        if let Some(rate) = req.hourly_rate {
            profile.hourly_rate_cents = Some(hourly_rate(rate)?);
        }
        if let Some(available) = req.is_available {
            profile.is_available = available;
        }
        profile.updated_at = OffsetDateTime::now_utc();

        self.store.update_profile(&profile).await?;
        Ok(profile)
    }

    pub async fn update_availability(
        &self,
        caller: &Caller,
        is_available: bool,
    ) -> AppResult<TechnicianProfile> {
        let mut profile = self.own_profile(caller).await?;
        profile.is_available = is_available;
        profile.updated_at = OffsetDateTime::now_utc();
        self.store.update_profile(&profile).await?;
        info!(user_id = %caller.user_id, is_available, "availability updated");
        Ok(profile)
    }

    /// Recomputes the aggregates from scratch. The booking service gets the
    /// same recomputation inside its rating write.
    pub async fn recompute_rating(&self, technician_id: Uuid) -> AppResult<TechnicianProfile> {
        self.store
            .recompute_stats(technician_id)
            .await?
            .ok_or_else(|| AppError::not_found("Technician profile not found"))
    }
}
