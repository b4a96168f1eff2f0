//! Seed helpers shared by the unit tests.

use std::sync::Arc;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::{
    extractors::Caller,
    repo::UserRepo,
    repo_types::{Role, User},
};
use crate::store::Store;
use crate::technicians::{repo::TechnicianRepo, repo_types::TechnicianProfile};

pub const BROKER_SECRET: &str = "test-broker-secret";

pub fn user(email: &str, role: Role) -> User {
    User {
        id: Uuid::new_v4(),
        name: email.split('@').next().unwrap_or("user").to_string(),
        email: email.to_string(),
        password_hash: crate::auth::password::hash_password("password123").unwrap(),
        role,
        is_active: true,
        email_verified: true,
        verification_token: None,
        verification_expires_at: None,
        last_login_at: None,
        created_at: OffsetDateTime::now_utc(),
    }
}

pub async fn seed_user(store: &Arc<dyn Store>, email: &str, role: Role) -> Caller {
    let u = user(email, role);
    store.insert_user(&u).await.unwrap();
    Caller {
        user_id: u.id,
        role: u.role,
    }
}

pub fn profile(user_id: Uuid, license: &str) -> TechnicianProfile {
    let now = OffsetDateTime::now_utc();
    TechnicianProfile {
        id: Uuid::new_v4(),
        user_id,
        license_number: license.to_string(),
        specialization: Some("sailboats".into()),
        years_of_experience: Some(8),
        bio: None,
        hourly_rate_cents: Some(6500),
        average_rating: 0.0,
        total_inspections: 0,
        total_reviews: 0,
        is_available: true,
        created_at: now,
        updated_at: now,
    }
}

/// Technician-role user with a directory profile.
pub async fn seed_technician(store: &Arc<dyn Store>, email: &str, license: &str) -> Caller {
    let caller = seed_user(store, email, Role::Technician).await;
    store
        .insert_profile(&profile(caller.user_id, license))
        .await
        .unwrap();
    caller
}
