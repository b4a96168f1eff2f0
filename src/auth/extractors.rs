use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tracing::warn;
use uuid::Uuid;

use super::claims::TokenKind;
use super::jwt::JwtKeys;
use super::repo::UserRepo;
use super::repo_types::Role;
use crate::{error::AppError, state::AppState};

/// Authenticated caller: who is asking and with which capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Uuid,
    pub role: Role,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        // Read Authorization header
        let auth = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| AppError::unauthenticated("Missing Authorization header"))?;

        // Expect "Bearer <token>"
        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .ok_or_else(|| AppError::unauthenticated("Invalid Authorization header"))?;

        let keys = JwtKeys::from_ref(state);
        let claims = keys.verify(token).map_err(|_| {
            warn!("invalid or expired token");
            AppError::unauthenticated("Invalid or expired token")
        })?;
        if claims.kind != TokenKind::Access {
            return Err(AppError::unauthenticated("Access token required"));
        }

        // Role and activation are read from the store so that admin changes apply immediately.
        let user = state
            .store
            .find_user(claims.sub)
            .await?
            .ok_or_else(|| AppError::unauthenticated("User not found"))?;
        if !user.is_active {
            return Err(AppError::forbidden("Account is deactivated"));
        }

        Ok(Caller {
            user_id: user.id,
            role: user.role,
        })
    }
}
