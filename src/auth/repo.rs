use anyhow::Context;
use async_trait::async_trait;
use uuid::Uuid;

use crate::auth::repo_types::User;
use crate::store::PgStore;

const USER_COLUMNS: &str = "id, name, email, password_hash, role, is_active, email_verified, \
     verification_token, verification_expires_at, last_login_at, created_at";

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn find_user(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_user_by_verification_token(&self, token: &str) -> anyhow::Result<Option<User>>;
    async fn insert_user(&self, user: &User) -> anyhow::Result<()>;
    /// Overwrites every mutable column of the user.
    async fn update_user(&self, user: &User) -> anyhow::Result<()>;
}

#[async_trait]
impl UserRepo for PgStore {
    async fn find_user(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user by id")?;
        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    async fn find_user_by_verification_token(&self, token: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE verification_token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.db)
        .await
        .context("find user by verification token")?;
        Ok(user)
    }

    async fn insert_user(&self, user: &User) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, name, email, password_hash, role, is_active, email_verified,
                               verification_token, verification_expires_at, last_login_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role)
        .bind(user.is_active)
        .bind(user.email_verified)
        .bind(&user.verification_token)
        .bind(user.verification_expires_at)
        .bind(user.last_login_at)
        .bind(user.created_at)
        .execute(&self.db)
        .await
        .context("insert user")?;
        Ok(())
    }

    async fn update_user(&self, user: &User) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE users
               SET name = $2, password_hash = $3, role = $4, is_active = $5, email_verified = $6,
                   verification_token = $7, verification_expires_at = $8, last_login_at = $9
             WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(user.role)
        .bind(user.is_active)
        .bind(user.email_verified)
        .bind(&user.verification_token)
        .bind(user.verification_expires_at)
        .bind(user.last_login_at)
        .execute(&self.db)
        .await
        .context("update user")?;
        Ok(())
    }
}
