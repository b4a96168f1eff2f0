use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{Inspection, InspectionStatus, InspectionType};
use crate::pagination::Pagination;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInspectionRequest {
    pub boat_name: String,
    pub inspection_type: InspectionType,
    pub location: String,
    #[serde(default, alias = "scheduledDate", with = "time::serde::rfc3339::option")]
    pub preferred_date: Option<OffsetDateTime>,
    pub boat_model: Option<String>,
    pub boat_year: Option<i32>,
    pub boat_length: Option<f64>,
    pub listing_url: Option<String>,
    pub notes: Option<String>,
    pub price: Option<f64>,
}

/// Partial edit: only provided fields overwrite.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInspectionRequest {
    pub boat_name: Option<String>,
    pub inspection_type: Option<InspectionType>,
    pub location: Option<String>,
    #[serde(default, alias = "scheduledDate", with = "time::serde::rfc3339::option")]
    pub preferred_date: Option<OffsetDateTime>,
    pub boat_model: Option<String>,
    pub boat_year: Option<i32>,
    pub boat_length: Option<f64>,
    pub listing_url: Option<String>,
    pub notes: Option<String>,
    pub price: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignTechnicianRequest {
    pub technician_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct RateInspectionRequest {
    pub rating: Option<i64>,
    pub comment: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListInspectionsQuery {
    pub status: Option<InspectionStatus>,
    pub inspection_type: Option<InspectionType>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct InspectionResponse {
    pub inspection: Inspection,
}

#[derive(Debug, Serialize)]
pub struct InspectionListResponse {
    pub inspections: Vec<Inspection>,
    pub pagination: Pagination,
}
