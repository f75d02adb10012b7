//! Per-route sliding-window admission control.
//!
//! The primary window lives in the external counter store so the limit is
//! cluster-wide. When that store is unreachable at startup the limiter runs
//! on an in-process keyed limiter with the same window/max semantics, per
//! process rather than cluster-wide.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use governor::{
    clock::{Clock, DefaultClock},
    state::keyed::DashMapStateStore,
    Quota, RateLimiter,
};
use std::{collections::HashMap, num::NonZeroU32, sync::Arc, time::Duration};

use crate::config::{RateLimitConfig, RateLimitRule};
use crate::error::AppError;
use crate::models::AuditAction;
use crate::services::{AuditRecorder, RateLimitStore, RequestMeta};
use crate::utils::client_ip;

/// Route classes with distinct window/max pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    Global,
    Auth,
    Upload,
    PasswordReset,
    Activation,
}

impl RouteClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::Global => "global",
            RouteClass::Auth => "auth",
            RouteClass::Upload => "upload",
            RouteClass::PasswordReset => "password_reset",
            RouteClass::Activation => "activation",
        }
    }
}

type FallbackLimiter = RateLimiter<String, DashMapStateStore<String>, DefaultClock>;

fn create_fallback_limiter(rule: &RateLimitRule) -> Arc<FallbackLimiter> {
    let max = rule.max.max(1) as u32;
    let period = Duration::from_millis((rule.window_seconds * 1000) / max as u64);
    let quota = Quota::with_period(period)
        .expect("window/max always yields a non-zero period")
        .allow_burst(NonZeroU32::new(max).expect("max is clamped to at least 1"));

    Arc::new(RateLimiter::dashmap(quota))
}

/// The admission recorded for one request; kept so auth-class hits can be
/// discounted after a successful response.
#[derive(Debug, Clone)]
pub struct RateLimitHit {
    key: String,
    member: String,
}

pub struct SlidingWindowLimiter {
    store: Option<Arc<dyn RateLimitStore>>,
    fallbacks: HashMap<RouteClass, Arc<FallbackLimiter>>,
    rules: HashMap<RouteClass, RateLimitRule>,
    exempt_paths: Vec<String>,
}

impl SlidingWindowLimiter {
    pub fn new(config: &RateLimitConfig, store: Option<Arc<dyn RateLimitStore>>) -> Self {
        let rules: HashMap<RouteClass, RateLimitRule> = [
            (RouteClass::Global, config.global),
            (RouteClass::Auth, config.auth),
            (RouteClass::Upload, config.upload),
            (RouteClass::PasswordReset, config.password_reset),
            (RouteClass::Activation, config.activation),
        ]
        .into_iter()
        .collect();

        let fallbacks = rules
            .iter()
            .map(|(class, rule)| (*class, create_fallback_limiter(rule)))
            .collect();

        if store.is_none() {
            tracing::warn!(
                "No rate-limit store configured; windows are per process and \
                 successful auth attempts count against the limit"
            );
        }

        Self {
            store,
            fallbacks,
            rules,
            exempt_paths: config.exempt_paths.clone(),
        }
    }

    /// Liveness/readiness/health paths are never subject to admission
    /// control; the list is configuration, not hardcoded.
    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.iter().any(|p| path.starts_with(p))
    }

    fn rule(&self, class: RouteClass) -> RateLimitRule {
        self.rules[&class]
    }

    /// Admit or reject one request for `(class, client_key)`.
    pub async fn admit(
        &self,
        class: RouteClass,
        client_key: &str,
    ) -> Result<Option<RateLimitHit>, AppError> {
        let rule = self.rule(class);

        if let Some(store) = &self.store {
            let window_ms = rule.window_seconds as i64 * 1000;
            let now_ms = Utc::now().timestamp_millis();
            let key = format!("rl:{}:{}", class.as_str(), client_key);

            match store.record_request(&key, now_ms, window_ms).await {
                Ok(sample) => {
                    if sample.count > rule.max {
                        let retry_after = sample
                            .oldest_ms
                            .map(|oldest| {
                                (((oldest + window_ms - now_ms) + 999) / 1000).max(1) as u64
                            })
                            .unwrap_or(rule.window_seconds);
                        return Err(AppError::RateLimited { retry_after });
                    }
                    return Ok(Some(RateLimitHit {
                        key,
                        member: sample.member,
                    }));
                }
                Err(e) => {
                    // Availability over strictness: a counter-store outage
                    // degrades admission control instead of rejecting.
                    tracing::warn!(
                        error = %e,
                        class = class.as_str(),
                        "Rate-limit store unreachable, admitting request"
                    );
                    return Ok(None);
                }
            }
        }

        // In-process degraded mode. No hit is returned, so these admissions
        // cannot be discounted later; successful auth attempts count here.
        let limiter = &self.fallbacks[&class];
        match limiter.check_key(&client_key.to_string()) {
            Ok(_) => Ok(None),
            Err(negative) => {
                let wait = negative.wait_time_from(DefaultClock::default().now());
                Err(AppError::RateLimited {
                    retry_after: wait.as_secs().max(1),
                })
            }
        }
    }

    /// Remove a recorded hit so it does not count against the window.
    pub async fn discount(&self, hit: &RateLimitHit) {
        if let Some(store) = &self.store {
            if let Err(e) = store.discount_request(&hit.key, &hit.member).await {
                tracing::warn!(error = %e, "Failed to discount rate-limit hit");
            }
        }
    }
}

#[derive(Clone)]
pub struct RateLimitLayer {
    pub limiter: Arc<SlidingWindowLimiter>,
    pub class: RouteClass,
    /// Rejections are recorded as security events when a recorder is wired.
    pub audit: Option<AuditRecorder>,
}

/// Middleware for sliding-window rate limiting, keyed by client address.
pub async fn rate_limit_middleware(
    State(layer): State<RateLimitLayer>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if layer.limiter.is_exempt(req.uri().path()) {
        return Ok(next.run(req).await);
    }

    let client_key = match client_ip(req.headers(), req.extensions()) {
        Some(ip) => ip,
        None => {
            tracing::warn!("Could not determine client address for rate limiting");
            return Ok(next.run(req).await);
        }
    };

    let hit = match layer.limiter.admit(layer.class, &client_key).await {
        Ok(hit) => hit,
        Err(e) => {
            if let (AppError::RateLimited { .. }, Some(audit)) = (&e, &layer.audit) {
                audit.record_security(
                    AuditAction::SecurityRateLimited,
                    &RequestMeta::capture(&req),
                    None,
                    &format!("Rate limit exceeded for {} routes", layer.class.as_str()),
                );
            }
            return Err(e);
        }
    };

    let response = next.run(req).await;

    // Successful authentication attempts do not count against the limit.
    if layer.class == RouteClass::Auth && response.status().as_u16() < 400 {
        if let Some(hit) = hit {
            layer.limiter.discount(&hit).await;
        }
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MockSecurityStore;

    fn test_config() -> RateLimitConfig {
        RateLimitConfig {
            global: RateLimitRule {
                window_seconds: 900,
                max: 100,
            },
            auth: RateLimitRule {
                window_seconds: 900,
                max: 5,
            },
            upload: RateLimitRule {
                window_seconds: 60,
                max: 10,
            },
            password_reset: RateLimitRule {
                window_seconds: 3600,
                max: 3,
            },
            activation: RateLimitRule {
                window_seconds: 900,
                max: 10,
            },
            exempt_paths: vec!["/health".to_string(), "/ready".to_string()],
        }
    }

    #[tokio::test]
    async fn sixth_auth_attempt_is_rejected_with_retry_after() {
        let store = Arc::new(MockSecurityStore::new());
        let limiter = SlidingWindowLimiter::new(&test_config(), Some(store));

        for _ in 0..5 {
            assert!(limiter.admit(RouteClass::Auth, "203.0.113.9").await.is_ok());
        }

        match limiter.admit(RouteClass::Auth, "203.0.113.9").await {
            Err(AppError::RateLimited { retry_after }) => {
                assert!(retry_after >= 890 && retry_after <= 900);
            }
            other => panic!("Expected RateLimited, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn limits_are_per_client_key() {
        let store = Arc::new(MockSecurityStore::new());
        let limiter = SlidingWindowLimiter::new(&test_config(), Some(store));

        for _ in 0..5 {
            limiter.admit(RouteClass::Auth, "203.0.113.9").await.unwrap();
        }
        assert!(limiter.admit(RouteClass::Auth, "203.0.113.9").await.is_err());

        // A different client is unaffected.
        assert!(limiter
            .admit(RouteClass::Auth, "198.51.100.2")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn discounted_hits_free_up_the_window() {
        let store = Arc::new(MockSecurityStore::new());
        let limiter = SlidingWindowLimiter::new(&test_config(), Some(store));

        for _ in 0..4 {
            limiter.admit(RouteClass::Auth, "203.0.113.9").await.unwrap();
        }
        let hit = limiter
            .admit(RouteClass::Auth, "203.0.113.9")
            .await
            .unwrap()
            .unwrap();
        limiter.discount(&hit).await;

        assert!(limiter.admit(RouteClass::Auth, "203.0.113.9").await.is_ok());
    }

    #[tokio::test]
    async fn fallback_limiter_enforces_the_same_limits() {
        // No external store: in-process degraded mode.
        let limiter = SlidingWindowLimiter::new(&test_config(), None);

        for _ in 0..3 {
            // No hit is handed back, so degraded-mode admissions are never
            // discounted.
            let hit = limiter
                .admit(RouteClass::PasswordReset, "203.0.113.9")
                .await
                .unwrap();
            assert!(hit.is_none());
        }

        match limiter.admit(RouteClass::PasswordReset, "203.0.113.9").await {
            Err(AppError::RateLimited { retry_after }) => assert!(retry_after >= 1),
            other => panic!("Expected RateLimited, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn rejection_records_a_security_event() {
        use axum::{body::Body, http::Request as HttpRequest, routing::post, Router};
        use tokio::sync::mpsc;
        use tower::util::ServiceExt;

        let (tx, mut rx) = mpsc::channel(8);
        let store = Arc::new(MockSecurityStore::new());
        let layer = RateLimitLayer {
            limiter: Arc::new(SlidingWindowLimiter::new(&test_config(), Some(store))),
            class: RouteClass::Auth,
            audit: Some(crate::services::AuditRecorder::from_sender(tx)),
        };
        let app = Router::new()
            .route("/auth/login", post(|| async { axum::http::StatusCode::UNAUTHORIZED }))
            .layer(axum::middleware::from_fn_with_state(
                layer,
                rate_limit_middleware,
            ));

        for _ in 0..6 {
            let res = app
                .clone()
                .oneshot(
                    HttpRequest::builder()
                        .method("POST")
                        .uri("/auth/login")
                        .header("x-forwarded-for", "203.0.113.9")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            if res.status() == axum::http::StatusCode::TOO_MANY_REQUESTS {
                break;
            }
        }

        let entry = rx.try_recv().unwrap();
        assert_eq!(entry.action, "security.rate_limited");
        assert_eq!(entry.endpoint, "/auth/login");
        assert_eq!(entry.ip_address.as_deref(), Some("203.0.113.9"));
    }

    #[test]
    fn exempt_paths_match_by_prefix() {
        let limiter = SlidingWindowLimiter::new(&test_config(), None);
        assert!(limiter.is_exempt("/health"));
        assert!(limiter.is_exempt("/ready"));
        assert!(!limiter.is_exempt("/auth/login"));
    }
}
