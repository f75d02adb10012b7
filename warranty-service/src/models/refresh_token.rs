use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use uuid::Uuid;

/// Refresh token persisted server-side so it can be individually revoked.
/// Only the SHA-256 hash of the presented token is stored.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshToken {
    /// Row id; also the jti claim of the signed refresh credential.
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl RefreshToken {
    pub fn new(id: Uuid, user_id: Uuid, token: &str, expires_in_days: i64) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id,
            token_hash: Self::hash_token(token),
            expires_at: now + Duration::days(expires_in_days),
            created_at: now,
        }
    }

    /// Hash a token using SHA-256.
    pub fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }
}
