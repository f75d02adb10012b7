pub mod config;
pub mod db;
pub mod dtos;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod services;
pub mod utils;

use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware::{from_fn, from_fn_with_state},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::Config;
use crate::error::AppError;
use crate::middleware::{
    admin_required, auth_middleware, csrf_middleware, premium_required, rate_limit_middleware,
    request_id_middleware, AdminStatusCache, CsrfLayer, CsrfSettings, RateLimitLayer,
    RouteClass, SlidingWindowLimiter,
};
use crate::services::{
    AuditQueryEngine, AuditRecorder, AuthService, JwtService, RevocationStore,
    UserContextResolver,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub pool: PgPool,
    pub jwt: JwtService,
    pub revocation: Arc<dyn RevocationStore>,
    pub rate_limiter: Arc<SlidingWindowLimiter>,
    pub admin_cache: Arc<AdminStatusCache>,
    pub resolver: UserContextResolver,
    pub audit: AuditRecorder,
    pub audit_query: AuditQueryEngine,
    pub auth_service: AuthService,
}

pub fn build_router(state: AppState) -> Result<Router, AppError> {
    let cors = build_cors(&state.config)?;

    let csrf_layer = CsrfLayer::new(
        CsrfSettings {
            cookie_ttl_hours: state.config.security.csrf_cookie_ttl_hours,
        },
        Some(state.audit.clone()),
    );

    // Authentication attempts get their own, much tighter window.
    let auth_limiter = RateLimitLayer {
        limiter: state.rate_limiter.clone(),
        class: RouteClass::Auth,
        audit: Some(state.audit.clone()),
    };
    let auth_routes = Router::new()
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/refresh", post(handlers::auth::refresh))
        .layer(from_fn_with_state(auth_limiter, rate_limit_middleware));

    let logout_route = Router::new()
        .route("/auth/logout", post(handlers::auth::logout))
        .layer(from_fn_with_state(state.clone(), auth_middleware));

    let audit_routes = Router::new()
        .route("/audit/logs", get(handlers::audit::list_logs))
        .layer(from_fn_with_state(state.clone(), auth_middleware));

    let premium_routes = Router::new()
        .route("/account/entitlements", get(handlers::account::entitlements))
        .layer(from_fn(premium_required))
        .layer(from_fn_with_state(state.clone(), auth_middleware));

    let admin_routes = Router::new()
        .route("/audit/stats", get(handlers::audit::stats))
        .route(
            "/admin/users/:user_id/suspend",
            post(handlers::admin::suspend_user),
        )
        .route(
            "/admin/users/:user_id/plan",
            put(handlers::admin::update_plan),
        )
        .layer(from_fn_with_state(state.clone(), admin_required))
        .layer(from_fn_with_state(state.clone(), auth_middleware));

    let global_limiter = RateLimitLayer {
        limiter: state.rate_limiter.clone(),
        class: RouteClass::Global,
        audit: Some(state.audit.clone()),
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .merge(auth_routes)
        .merge(logout_route)
        .merge(audit_routes)
        .merge(premium_routes)
        .merge(admin_routes)
        .layer(from_fn_with_state(csrf_layer, csrf_middleware))
        .layer(from_fn_with_state(global_limiter, rate_limit_middleware))
        .layer(from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    Ok(app)
}

fn build_cors(config: &Config) -> Result<CorsLayer, AppError> {
    let origins = config
        .security
        .allowed_origins
        .iter()
        .map(|o| {
            o.parse::<HeaderValue>()
                .map_err(|e| AppError::Config(anyhow::anyhow!("Invalid CORS origin {}: {}", o, e)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-csrf-token"),
            HeaderName::from_static("x-request-id"),
        ])
        .allow_credentials(true))
}

/// Liveness plus dependency health. Exempt from rate limiting via the
/// configured exemption list.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = db::health_check(&state.pool).await.is_ok();
    let security_store = state.revocation.health_check().await.is_ok();

    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(serde_json::json!({
            "status": if database && security_store { "ok" } else { "degraded" },
            "service": state.config.service_name,
            "database": database,
            "securityStore": security_store,
        })),
    )
}
