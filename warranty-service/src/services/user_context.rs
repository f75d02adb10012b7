//! Per-request principal loading.
//!
//! The security context is read fresh on every request (one round trip) so
//! plan changes and suspensions take effect without touching the revocation
//! store. Only the admin flag is cached, by the admin gate.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::Plan;

/// Authorization-relevant attributes of the authenticated principal.
#[derive(Debug, Clone)]
pub struct PrincipalSecurityContext {
    pub id: Uuid,
    pub email: String,
    pub plan: Plan,
    pub is_admin: bool,
    pub is_partner: bool,
    pub plan_expires_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct ContextRow {
    id: Uuid,
    email: String,
    plan: String,
    is_admin: bool,
    is_partner: bool,
    plan_expires_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct UserContextResolver {
    pool: PgPool,
}

impl UserContextResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Load the principal's security context in a single query.
    ///
    /// A missing row means the account was deleted after the token was
    /// issued, which is indistinguishable from an invalid credential to the
    /// caller. A suspended plan short-circuits every later gate.
    pub async fn resolve(&self, user_id: Uuid) -> Result<PrincipalSecurityContext, AppError> {
        let row: Option<ContextRow> = sqlx::query_as(
            r#"
            SELECT u.id, u.email, u.plan, u.is_admin, u.plan_expires_at,
                   EXISTS(
                       SELECT 1 FROM partners p
                       WHERE p.user_id = u.id AND p.is_active
                   ) AS is_partner
            FROM users u
            WHERE u.id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or(AppError::InvalidCredential)?;

        let plan = Plan::from_str(&row.plan)
            .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;

        if plan == Plan::Suspended {
            return Err(AppError::AccountSuspended);
        }

        Ok(PrincipalSecurityContext {
            id: row.id,
            email: row.email,
            plan,
            is_admin: row.is_admin,
            is_partner: row.is_partner,
            plan_expires_at: row.plan_expires_at,
        })
    }

    /// Re-read only the admin flag; used by the admin gate on cache misses.
    pub async fn is_admin(&self, user_id: Uuid) -> Result<bool, AppError> {
        let is_admin: Option<bool> =
            sqlx::query_scalar("SELECT is_admin FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        is_admin.ok_or(AppError::InvalidCredential)
    }
}
