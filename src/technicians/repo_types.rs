use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Technician profile, 1:1 with a technician-role user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TechnicianProfile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub license_number: String,
    pub specialization: Option<String>,
    pub years_of_experience: Option<i32>,
    pub bio: Option<String>,
    pub hourly_rate_cents: Option<i64>,
    pub average_rating: f64,    // derived: mean of all ratings
    pub total_inspections: i32, // derived: completed inspections
    pub total_reviews: i32,     // derived: rated inspections
    pub is_available: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Directory row: the profile plus the public identity of its user.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TechnicianListing {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub profile: TechnicianProfile,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Default)]
pub struct TechnicianFilter {
    pub specialization: Option<String>,
    pub min_rating: Option<f64>,
    pub search: Option<String>,
    pub available: Option<bool>,
}

/// Aggregates derived from a technician's inspections.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TechnicianStats {
    pub average_rating: f64,
    pub total_inspections: i32,
    pub total_reviews: i32,
}
