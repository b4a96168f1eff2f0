use std::sync::Arc;

use constant_time_eq::constant_time_eq;
use lazy_static::lazy_static;
use rand::{rngs::OsRng, RngCore};
use regex::Regex;
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};
use uuid::Uuid;

use super::dto::{AuthResponse, LoginRequest, OAuthLoginRequest, PublicUser, RegisterRequest};
use super::jwt::JwtKeys;
use super::password::{hash_password, verify_password};
use super::repo::UserRepo;
use super::repo_types::{Role, User};
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::mailer::{self, Mailer};
use crate::store::Store;

pub const MIN_PASSWORD_LEN: usize = 8;
const VERIFICATION_TTL: Duration = Duration::hours(24);

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex =
            Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern compiles");
    }
    EMAIL_RE.is_match(email)
}

/// 32 random bytes, hex encoded.
pub(crate) fn random_token() -> String {
    let mut buf = [0u8; 32];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

fn normalize_email(email: &str) -> AppResult<String> {
    let email = email.trim().to_lowercase();
    if !is_valid_email(&email) {
        warn!(%email, "invalid email");
        return Err(AppError::validation("Invalid email"));
    }
    Ok(email)
}

/// Registration, credential checks, token issuance and email verification.
pub struct AuthService {
    store: Arc<dyn Store>,
    mailer: Arc<dyn Mailer>,
    keys: JwtKeys,
    public_base_url: String,
    require_email_verification: bool,
    oauth_broker_secret: Option<String>,
}

impl AuthService {
    pub fn new(store: Arc<dyn Store>, mailer: Arc<dyn Mailer>, config: &AppConfig) -> Self {
        Self {
            store,
            mailer,
            keys: JwtKeys::from(&config.jwt),
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
            require_email_verification: config.require_email_verification,
            oauth_broker_secret: config.oauth_broker_secret.clone(),
        }
    }

    fn issue(&self, user: &User) -> AppResult<AuthResponse> {
        Ok(AuthResponse {
            access_token: self.keys.sign_access(user.id, user.role)?,
            refresh_token: self.keys.sign_refresh(user.id, user.role)?,
            user: PublicUser::from(user),
        })
    }

    fn send_verification(&self, user: &User) {
        let Some(token) = &user.verification_token else {
            return;
        };
        let link = format!("{}/api/v1/auth/verify-email/{token}", self.public_base_url);
        mailer::dispatch(
            &self.mailer,
            mailer::verification_email(&user.email, &user.name, &link),
        );
    }

    pub async fn register(&self, req: RegisterRequest) -> AppResult<AuthResponse> {
        let email = normalize_email(&req.email)?;
        let name = req.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::validation("Name is required"));
        }
        if req.password.len() < MIN_PASSWORD_LEN {
            warn!("password too short");
            return Err(AppError::validation("Password too short"));
        }
        let role = req.role.unwrap_or(Role::Client);
        if role == Role::Admin {
            return Err(AppError::validation("Admin accounts cannot self-register"));
        }
        if self.store.find_user_by_email(&email).await?.is_some() {
            warn!(%email, "email already registered");
            return Err(AppError::conflict("Email already registered"));
        }

        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            name,
            email,
            password_hash: hash_password(&req.password)?,
            role,
            is_active: true,
            email_verified: false,
            verification_token: Some(random_token()),
            verification_expires_at: Some(now + VERIFICATION_TTL),
            last_login_at: None,
            created_at: now,
        };
        self.store.insert_user(&user).await?;
        self.send_verification(&user);

        info!(user_id = %user.id, email = %user.email, role = ?user.role, "user registered");
        self.issue(&user)
    }

    pub async fn login(&self, req: LoginRequest) -> AppResult<AuthResponse> {
        let email = normalize_email(&req.email)?;
        let Some(mut user) = self.store.find_user_by_email(&email).await? else {
            warn!(%email, "login unknown email");
            return Err(AppError::unauthenticated("Invalid credentials"));
        };
        if !verify_password(&req.password, &user.password_hash)? {
            warn!(%email, user_id = %user.id, "login invalid password");
            return Err(AppError::unauthenticated("Invalid credentials"));
        }
        if !user.is_active {
            return Err(AppError::forbidden("Account is deactivated"));
        }
        if self.require_email_verification && !user.email_verified {
            return Err(AppError::forbidden("Email address not verified"));
        }

        user.last_login_at = Some(OffsetDateTime::now_utc());
        self.store.update_user(&user).await?;
        info!(user_id = %user.id, "user logged in");
        self.issue(&user)
    }

    pub async fn refresh(&self, refresh_token: &str) -> AppResult<AuthResponse> {
        let claims = self
            .keys
            .verify_refresh(refresh_token)
            .map_err(|_| AppError::unauthenticated("Invalid refresh token"))?;
        let user = self
            .store
            .find_user(claims.sub)
            .await?
            .ok_or_else(|| AppError::unauthenticated("User not found"))?;
        if !user.is_active {
            return Err(AppError::forbidden("Account is deactivated"));
        }
        self.issue(&user)
    }

    pub async fn verify_email(&self, token: &str) -> AppResult<()> {
        let mut user = self
            .store
            .find_user_by_verification_token(token)
            .await?
            .ok_or_else(|| AppError::validation("Invalid or expired verification token"))?;
        let expired = user
            .verification_expires_at
            .map_or(true, |at| at < OffsetDateTime::now_utc());
        if expired {
            return Err(AppError::validation("Invalid or expired verification token"));
        }
        user.email_verified = true;
        user.verification_token = None;
        user.verification_expires_at = None;
        self.store.update_user(&user).await?;
        info!(user_id = %user.id, "email verified");
        Ok(())
    }

    /// Unknown addresses are acknowledged the same way as known ones.
    pub async fn resend_verification(&self, email: &str) -> AppResult<()> {
        let email = normalize_email(email)?;
        let Some(mut user) = self.store.find_user_by_email(&email).await? else {
            return Ok(());
        };
        if user.email_verified {
            return Err(AppError::validation("Email already verified"));
        }
        user.verification_token = Some(random_token());
        user.verification_expires_at = Some(OffsetDateTime::now_utc() + VERIFICATION_TTL);
        self.store.update_user(&user).await?;
        self.send_verification(&user);
        Ok(())
    }

    fn check_broker(&self, presented: Option<&str>) -> AppResult<()> {
        let Some(expected) = &self.oauth_broker_secret else {
            return Err(AppError::ServiceUnavailable("OAuth login is not configured".into()));
        };
        match presented {
            Some(p) if constant_time_eq(p.as_bytes(), expected.as_bytes()) => Ok(()),
            _ => {
                warn!("oauth exchange with bad broker credentials");
                Err(AppError::unauthenticated("Invalid broker credentials"))
            }
        }
    }

    /// Only the OAuth broker may call this; it proves itself with the shared
    /// secret and has already authenticated the identity. New accounts are
    /// created verified, with an unusable random password.
    pub async fn oauth_login(
        &self,
        broker_secret: Option<&str>,
        req: OAuthLoginRequest,
    ) -> AppResult<AuthResponse> {
        self.check_broker(broker_secret)?;
        let provider = req.provider.trim().to_lowercase();
        if provider.is_empty() {
            return Err(AppError::validation("provider is required"));
        }
        let email = normalize_email(&req.email)?;
        let now = OffsetDateTime::now_utc();

        let user = match self.store.find_user_by_email(&email).await? {
            Some(mut user) => {
                if !user.is_active {
                    return Err(AppError::forbidden("Account is deactivated"));
                }
                user.email_verified = true;
                user.verification_token = None;
                user.verification_expires_at = None;
                user.last_login_at = Some(now);
                self.store.update_user(&user).await?;
                user
            }
            None => {
                let name = req
                    .name
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
                let user = User {
                    id: Uuid::new_v4(),
                    name,
                    email,
                    password_hash: hash_password(&random_token())?,
                    role: Role::Client,
                    is_active: true,
                    email_verified: true,
                    verification_token: None,
                    verification_expires_at: None,
                    last_login_at: Some(now),
                    created_at: now,
                };
                self.store.insert_user(&user).await?;
                info!(user_id = %user.id, %provider, "user created via oauth");
                user
            }
        };
        self.issue(&user)
    }
}
