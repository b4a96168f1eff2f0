use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "inspection_type", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum InspectionType {
    PrePurchase,
    Maintenance,
    Safety,
    Annual,
    Other,
}

impl InspectionType {
    pub fn label(self) -> &'static str {
        match self {
            Self::PrePurchase => "Pre-purchase",
            Self::Maintenance => "Maintenance",
            Self::Safety => "Safety",
            Self::Annual => "Annual",
            Self::Other => "General",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "inspection_status", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum InspectionStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
}

impl InspectionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// Inspection record. Values are replaced wholesale on every transition;
/// `version` guards the write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Inspection {
    pub id: Uuid,
    pub client_id: Uuid,
    pub technician_id: Option<Uuid>,
    pub boat_name: String,
    pub boat_model: Option<String>,
    pub boat_year: Option<i32>,
    pub boat_length: Option<f64>,
    pub listing_url: Option<String>,
    pub inspection_type: InspectionType,
    pub status: InspectionStatus,
    pub location: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub scheduled_date: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_date: Option<OffsetDateTime>,
    pub price_cents: i64,
    pub rating: Option<i16>,
    pub comment: Option<String>,
    pub notes: Option<String>,
    pub version: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Row filter for listings. `client_id` / `technician_id` scope the result
/// to one party; both `None` means every inspection.
#[derive(Debug, Clone, Default)]
pub struct InspectionFilter {
    pub client_id: Option<Uuid>,
    pub technician_id: Option<Uuid>,
    pub status: Option<InspectionStatus>,
    pub inspection_type: Option<InspectionType>,
}

impl InspectionFilter {
    pub fn matches(&self, i: &Inspection) -> bool {
        self.client_id.map_or(true, |id| i.client_id == id)
            && self.technician_id.map_or(true, |id| i.technician_id == Some(id))
            && self.status.map_or(true, |s| i.status == s)
            && self.inspection_type.map_or(true, |t| i.inspection_type == t)
    }
}
