//! Persistence seam. Services receive an `Arc<dyn Store>` at construction
//! and never reach for a global pool.

use std::sync::Arc;

use tracing::warn;

use crate::auth::repo::UserRepo;
use crate::config::AppConfig;
use crate::inspections::repo::InspectionRepo;
use crate::payments::repo::PaymentRepo;
use crate::technicians::repo::TechnicianRepo;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub trait Store: UserRepo + InspectionRepo + TechnicianRepo + PaymentRepo {}

impl<T> Store for T where T: UserRepo + InspectionRepo + TechnicianRepo + PaymentRepo {}

/// Postgres when `DATABASE_URL` is set, otherwise the in-memory store.
pub async fn connect(config: &AppConfig) -> anyhow::Result<Arc<dyn Store>> {
    match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url).await?;
            store.migrate().await;
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set; using in-memory store, data is lost on restart");
            Ok(Arc::new(MemoryStore::default()))
        }
    }
}
