//! Credential lifecycle: registration, login, logout, refresh rotation.

use sqlx::PgPool;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::dtos::auth::{LoginRequest, RegisterRequest};
use crate::error::AppError;
use crate::models::{Plan, RefreshToken, User};
use crate::services::jwt::{JwtService, TokenResponse};
use crate::services::redis::RevocationStore;
use crate::utils::password::{hash_password, verify_password};

/// Result of an operation that issued credentials; the identity is returned
/// alongside the tokens so callers can audit it.
pub struct AuthOutcome {
    pub user_id: Uuid,
    pub email: String,
    pub tokens: TokenResponse,
}

#[derive(Clone)]
pub struct AuthService {
    pool: PgPool,
    jwt: JwtService,
    revocation: Arc<dyn RevocationStore>,
}

impl AuthService {
    pub fn new(pool: PgPool, jwt: JwtService, revocation: Arc<dyn RevocationStore>) -> Self {
        Self {
            pool,
            jwt,
            revocation,
        }
    }

    pub async fn register(&self, req: RegisterRequest) -> Result<AuthOutcome, AppError> {
        let existing: Option<Uuid> = sqlx::query_scalar("SELECT id FROM users WHERE email = $1")
            .bind(&req.email)
            .fetch_optional(&self.pool)
            .await?;

        if existing.is_some() {
            return Err(AppError::Conflict("Email already registered".to_string()));
        }

        let password_hash = hash_password(&req.password)?;

        let user_id: Uuid = sqlx::query_scalar(
            "INSERT INTO users (email, password_hash, plan) VALUES ($1, $2, 'free') RETURNING id",
        )
        .bind(&req.email)
        .bind(&password_hash)
        .fetch_one(&self.pool)
        .await?;

        let tokens = self.issue_tokens(user_id, &req.email).await?;

        Ok(AuthOutcome {
            user_id,
            email: req.email,
            tokens,
        })
    }

    pub async fn login(&self, req: LoginRequest) -> Result<AuthOutcome, AppError> {
        let user: Option<User> = sqlx::query_as(
            "SELECT id, email, password_hash, plan, is_admin, plan_expires_at, created_at \
             FROM users WHERE email = $1",
        )
        .bind(&req.email)
        .fetch_optional(&self.pool)
        .await?;

        let user = user.ok_or(AppError::InvalidCredential)?;

        if !verify_password(&req.password, &user.password_hash)? {
            return Err(AppError::InvalidCredential);
        }

        // Suspension overrides everything, including a correct password.
        let plan = Plan::from_str(&user.plan)
            .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;
        if plan == Plan::Suspended {
            return Err(AppError::AccountSuspended);
        }

        let tokens = self.issue_tokens(user.id, &user.email).await?;

        Ok(AuthOutcome {
            user_id: user.id,
            email: user.email,
            tokens,
        })
    }

    /// Blacklist the access token for its remaining lifetime and delete the
    /// presented refresh token's row.
    pub async fn logout(
        &self,
        access_jti: &str,
        access_remaining_seconds: i64,
        refresh_token: &str,
    ) -> Result<(), AppError> {
        self.revocation
            .blacklist(access_jti, access_remaining_seconds)
            .await?;

        let claims = self.jwt.validate_refresh_token(refresh_token)?;
        let token_id =
            Uuid::parse_str(&claims.jti).map_err(|_| AppError::InvalidCredential)?;

        sqlx::query("DELETE FROM refresh_tokens WHERE id = $1 AND token_hash = $2")
            .bind(token_id)
            .bind(RefreshToken::hash_token(refresh_token))
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Rotate a refresh token: the presented token's row is deleted and a
    /// fresh pair is issued. The server-side row is the revocation point for
    /// refresh credentials, so a row that is missing, mismatched, or expired
    /// rejects the credential even when the signature verifies.
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthOutcome, AppError> {
        let claims = self.jwt.validate_refresh_token(refresh_token)?;
        let token_id =
            Uuid::parse_str(&claims.jti).map_err(|_| AppError::InvalidCredential)?;

        let stored: Option<RefreshToken> = sqlx::query_as(
            "SELECT id, user_id, token_hash, expires_at, created_at \
             FROM refresh_tokens WHERE id = $1",
        )
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await?;

        let stored = stored.ok_or(AppError::InvalidCredential)?;

        if stored.token_hash != RefreshToken::hash_token(refresh_token) || stored.is_expired() {
            return Err(AppError::InvalidCredential);
        }

        let user: Option<User> = sqlx::query_as(
            "SELECT id, email, password_hash, plan, is_admin, plan_expires_at, created_at \
             FROM users WHERE id = $1",
        )
        .bind(stored.user_id)
        .fetch_optional(&self.pool)
        .await?;

        let user = user.ok_or(AppError::InvalidCredential)?;

        let plan = Plan::from_str(&user.plan)
            .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;
        if plan == Plan::Suspended {
            return Err(AppError::AccountSuspended);
        }

        sqlx::query("DELETE FROM refresh_tokens WHERE id = $1")
            .bind(token_id)
            .execute(&self.pool)
            .await?;

        let tokens = self.issue_tokens(user.id, &user.email).await?;

        Ok(AuthOutcome {
            user_id: user.id,
            email: user.email,
            tokens,
        })
    }

    async fn issue_tokens(&self, user_id: Uuid, email: &str) -> Result<TokenResponse, AppError> {
        let (access_token, refresh_token, refresh_token_id) = self
            .jwt
            .generate_token_pair(&user_id.to_string(), email)?;

        let row = RefreshToken::new(
            refresh_token_id,
            user_id,
            &refresh_token,
            self.jwt.refresh_token_expiry_days(),
        );

        sqlx::query(
            "INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(row.id)
        .bind(row.user_id)
        .bind(&row.token_hash)
        .bind(row.expires_at)
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;

        Ok(TokenResponse {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.jwt.access_token_expiry_seconds(),
        })
    }
}
