//! Double-submit-cookie CSRF defense.
//!
//! State-changing requests must carry a header matching the cookie the
//! server issued. The comparison is constant-time; the token is 256 bits of
//! CSPRNG output.

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use rand::RngCore;
use subtle::ConstantTimeEq;

use crate::error::AppError;
use crate::models::AuditAction;
use crate::services::{AuditRecorder, RequestMeta};

pub const CSRF_COOKIE: &str = "csrf_token";
pub const CSRF_HEADER: &str = "x-csrf-token";

#[derive(Debug, Clone)]
pub struct CsrfSettings {
    pub cookie_ttl_hours: i64,
}

impl Default for CsrfSettings {
    fn default() -> Self {
        Self {
            cookie_ttl_hours: 24,
        }
    }
}

/// Middleware state: the cookie policy plus an optional recorder so
/// rejections land in the audit trail as security events.
#[derive(Clone)]
pub struct CsrfLayer {
    pub settings: CsrfSettings,
    pub audit: Option<AuditRecorder>,
}

impl CsrfLayer {
    pub fn new(settings: CsrfSettings, audit: Option<AuditRecorder>) -> Self {
        Self { settings, audit }
    }
}

fn is_state_changing(method: &Method) -> bool {
    !matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn tokens_match(header_value: &str, cookie_value: &str) -> bool {
    header_value
        .as_bytes()
        .ct_eq(cookie_value.as_bytes())
        .into()
}

pub async fn csrf_middleware(
    State(layer): State<CsrfLayer>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let jar = CookieJar::from_headers(req.headers());
    let cookie_value = jar.get(CSRF_COOKIE).map(|c| c.value().to_string());
    let had_cookie = cookie_value.is_some();

    let verdict = if is_state_changing(req.method()) {
        let header_value = req
            .headers()
            .get(CSRF_HEADER)
            .and_then(|v| v.to_str().ok());

        match (header_value, cookie_value.as_deref()) {
            (Some(header), Some(cookie)) if tokens_match(header, cookie) => Ok(()),
            _ => Err(AppError::CsrfMismatch),
        }
    } else {
        Ok(())
    };

    let mut response = match verdict {
        Ok(()) => next.run(req).await,
        Err(e) => {
            tracing::warn!(
                method = %req.method(),
                path = %req.uri().path(),
                "CSRF check failed"
            );
            if let Some(audit) = &layer.audit {
                audit.record_security(
                    AuditAction::SecurityCsrfRejected,
                    &RequestMeta::capture(&req),
                    None,
                    "CSRF token missing or mismatched on state-changing request",
                );
            }
            e.into_response()
        }
    };

    // Issue a token to clients that do not have one yet. This also covers
    // the rejection above, so a first-time client can retry a state-changing
    // call without a detour through a safe request.
    if !had_cookie {
        let cookie = format!(
            "{}={}; Max-Age={}; Path=/; HttpOnly; SameSite=Strict",
            CSRF_COOKIE,
            generate_token(),
            layer.settings.cookie_ttl_hours * 3600
        );
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body, http::StatusCode, middleware::from_fn_with_state, routing::post, Router,
    };
    use tokio::sync::mpsc;
    use tower::util::ServiceExt;

    #[test]
    fn safe_methods_are_not_state_changing() {
        assert!(!is_state_changing(&Method::GET));
        assert!(!is_state_changing(&Method::HEAD));
        assert!(!is_state_changing(&Method::OPTIONS));
        assert!(is_state_changing(&Method::POST));
        assert!(is_state_changing(&Method::PUT));
        assert!(is_state_changing(&Method::PATCH));
        assert!(is_state_changing(&Method::DELETE));
    }

    #[test]
    fn generated_tokens_are_256_bit_and_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }

    #[test]
    fn comparison_requires_exact_match() {
        assert!(tokens_match("abc123", "abc123"));
        assert!(!tokens_match("abc123", "abc124"));
        assert!(!tokens_match("abc123", "abc12"));
        assert!(!tokens_match("", "abc123"));
    }

    #[tokio::test]
    async fn rejection_records_a_security_event() {
        let (tx, mut rx) = mpsc::channel(8);
        let layer = CsrfLayer::new(
            CsrfSettings::default(),
            Some(AuditRecorder::from_sender(tx)),
        );
        let app = Router::new()
            .route("/mutate", post(|| async { "done" }))
            .layer(from_fn_with_state(layer, csrf_middleware));

        let res = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/mutate")
                    .header("cookie", "csrf_token=abc123")
                    .header("x-csrf-token", "abc124")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let entry = rx.try_recv().unwrap();
        assert_eq!(entry.action, "security.csrf_rejected");
        assert_eq!(entry.endpoint, "/mutate");
        assert!(!entry.success);
    }
}
