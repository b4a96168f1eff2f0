use serde::{Deserialize, Serialize};

use super::repo_types::{TechnicianListing, TechnicianProfile};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTechniciansQuery {
    pub specialization: Option<String>,
    pub min_rating: Option<f64>,
    pub search: Option<String>,
    /// Defaults to only available technicians.
    pub available: Option<bool>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProfileRequest {
    pub license_number: String,
    pub specialization: Option<String>,
    pub years_of_experience: Option<i32>,
    pub bio: Option<String>,
    pub hourly_rate: Option<f64>,
}

/// Partial update: absent fields keep their value.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub license_number: Option<String>,
    pub specialization: Option<String>,
    pub years_of_experience: Option<i32>,
    pub bio: Option<String>,
    pub hourly_rate: Option<f64>,
    pub is_available: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityRequest {
    pub is_available: bool,
}

#[derive(Debug, Serialize)]
pub struct TechnicianResponse {
    pub technician: TechnicianProfile,
}

#[derive(Debug, Serialize)]
pub struct TechnicianListingResponse {
    pub technician: TechnicianListing,
}

#[derive(Debug, Serialize)]
pub struct TechnicianPage {
    pub items: Vec<TechnicianListing>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub pages: i64,
}
