use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::AppError;
use crate::services::PrincipalSecurityContext;
use crate::AppState;

/// How long a cached admin flag stays valid. Privilege revocations and
/// grants are both delayed by at most this window.
pub const ADMIN_CACHE_TTL: Duration = Duration::from_secs(30);

struct AdminCacheEntry {
    is_admin: bool,
    expires_at: Instant,
}

/// Process-local, time-boxed cache of per-user admin flags. Concurrent
/// populations for the same user may race; the cost is one redundant read,
/// never a wrong answer outside the TTL window.
pub struct AdminStatusCache {
    entries: DashMap<Uuid, AdminCacheEntry>,
    ttl: Duration,
}

impl Default for AdminStatusCache {
    fn default() -> Self {
        Self::new()
    }
}

impl AdminStatusCache {
    pub fn new() -> Self {
        Self::with_ttl(ADMIN_CACHE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Returns the cached flag only while unexpired; an expired entry is
    /// evicted and reported absent.
    pub fn get(&self, user_id: Uuid) -> Option<bool> {
        let now = Instant::now();

        if let Some(entry) = self.entries.get(&user_id) {
            if now <= entry.expires_at {
                return Some(entry.is_admin);
            }
        }

        self.entries.remove_if(&user_id, |_, e| now > e.expires_at);
        None
    }

    pub fn set(&self, user_id: Uuid, is_admin: bool) {
        self.entries.insert(
            user_id,
            AdminCacheEntry {
                is_admin,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }
}

/// Admin-required gate. Runs after `auth_middleware`; the flag comes from
/// the cache when fresh, otherwise from the data store.
pub async fn admin_required(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let context = req
        .extensions()
        .get::<PrincipalSecurityContext>()
        .cloned()
        .ok_or(AppError::MissingCredential)?;

    let is_admin = match state.admin_cache.get(context.id) {
        Some(cached) => cached,
        None => {
            let fresh = state.resolver.is_admin(context.id).await?;
            state.admin_cache.set(context.id, fresh);
            fresh
        }
    };

    if !is_admin {
        tracing::warn!(user_id = %context.id, "Admin gate rejected non-administrator");
        return Err(AppError::AdminRequired);
    }

    Ok(next.run(req).await)
}
