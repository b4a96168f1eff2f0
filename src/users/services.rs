use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use super::dto::UpdateMeRequest;
use crate::auth::{extractors::Caller, repo::UserRepo, repo_types::User};
use crate::error::{AppError, AppResult};
use crate::policy::{authorize, Operation, Subject};
use crate::store::Store;

/// Self-service profile and admin account switches.
pub struct AccountService {
    store: Arc<dyn Store>,
}

impl AccountService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    async fn load(&self, id: Uuid) -> AppResult<User> {
        self.store
            .find_user(id)
            .await?
            .ok_or_else(|| AppError::not_found("User not found"))
    }

    pub async fn me(&self, caller: &Caller) -> AppResult<User> {
        self.load(caller.user_id).await
    }

    pub async fn update_me(&self, caller: &Caller, req: UpdateMeRequest) -> AppResult<User> {
        let mut user = self.load(caller.user_id).await?;
        if let Some(name) = req.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(AppError::validation("Name cannot be empty"));
            }
            user.name = name.to_string();
        }
        self.store.update_user(&user).await?;
        Ok(user)
    }

    pub async fn set_active(&self, caller: &Caller, id: Uuid, active: bool) -> AppResult<User> {
        authorize(Operation::ManageUsers, caller, Subject::none())?;
        if id == caller.user_id && !active {
            return Err(AppError::validation("Admins cannot deactivate themselves"));
        }
        let mut user = self.load(id).await?;
        if user.is_active != active {
            user.is_active = active;
            self.store.update_user(&user).await?;
            info!(user_id = %id, active, admin_id = %caller.user_id, "account status changed");
        }
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo_types::Role;
    use crate::store::MemoryStore;
    use crate::testing::seed_user;

    #[tokio::test]
    async fn admin_toggles_accounts() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
        let svc = AccountService::new(store.clone());
        let admin = seed_user(&store, "admin@example.com", Role::Admin).await;
        let client = seed_user(&store, "c@example.com", Role::Client).await;

        let err = svc.set_active(&client, admin.user_id, false).await.unwrap_err();
        assert!(matches!(err, AppError::Authorization(_)));

        let user = svc.set_active(&admin, client.user_id, false).await.unwrap();
        assert!(!user.is_active);
        assert!(!store.find_user(client.user_id).await.unwrap().unwrap().is_active);
        assert!(svc.set_active(&admin, client.user_id, true).await.unwrap().is_active);

        let err = svc.set_active(&admin, admin.user_id, false).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn update_me_changes_name_only() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
        let svc = AccountService::new(store.clone());
        let me = seed_user(&store, "me@example.com", Role::Client).await;

        let user = svc
            .update_me(&me, UpdateMeRequest { name: Some(" Jo ".into()) })
            .await
            .unwrap();
        assert_eq!(user.name, "Jo");
        assert_eq!(user.email, "me@example.com");

        let err = svc
            .update_me(&me, UpdateMeRequest { name: Some("  ".into()) })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
