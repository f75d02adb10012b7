use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::{
    dtos::auth::{LoginRequest, LogoutRequest, RefreshRequest, RegisterRequest},
    error::AppError,
    middleware::AuthUser,
    models::AuditAction,
    services::RequestMeta,
    utils::ValidatedJson,
    AppState,
};

/// Register a new account and issue an initial token pair.
pub async fn register(
    State(state): State<AppState>,
    meta: RequestMeta,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    match state.auth_service.register(req).await {
        Ok(outcome) => {
            state.audit.record_auth(
                AuditAction::AuthRegister,
                &meta,
                Some((outcome.user_id, &outcome.email)),
                true,
                None,
            );
            Ok((StatusCode::CREATED, Json(outcome.tokens)))
        }
        Err(e) => {
            state
                .audit
                .record_auth(AuditAction::AuthRegister, &meta, None, false, Some(&e.to_string()));
            Err(e)
        }
    }
}

/// Login with email and password.
pub async fn login(
    State(state): State<AppState>,
    meta: RequestMeta,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    match state.auth_service.login(req).await {
        Ok(outcome) => {
            state.audit.record_auth(
                AuditAction::AuthLogin,
                &meta,
                Some((outcome.user_id, &outcome.email)),
                true,
                None,
            );
            Ok((StatusCode::OK, Json(outcome.tokens)))
        }
        Err(e) => {
            state
                .audit
                .record_auth(AuditAction::AuthLogin, &meta, None, false, Some(&e.to_string()));
            Err(e)
        }
    }
}

/// Logout and invalidate both tokens.
pub async fn logout(
    State(state): State<AppState>,
    user: AuthUser,
    meta: RequestMeta,
    Json(req): Json<LogoutRequest>,
) -> Result<impl IntoResponse, AppError> {
    let claims = user.0;
    let user_id =
        uuid::Uuid::parse_str(&claims.sub).map_err(|_| AppError::InvalidCredential)?;

    let result = state
        .auth_service
        .logout(&claims.jti, claims.remaining_seconds(), &req.refresh_token)
        .await;

    state.audit.record_auth(
        AuditAction::AuthLogout,
        &meta,
        Some((user_id, &claims.email)),
        result.is_ok(),
        result.as_ref().err().map(|e| e.to_string()).as_deref(),
    );
    result?;

    Ok((
        StatusCode::OK,
        Json(serde_json::json!({ "message": "Logged out successfully" })),
    ))
}

/// Rotate a refresh token into a fresh pair.
pub async fn refresh(
    State(state): State<AppState>,
    meta: RequestMeta,
    Json(req): Json<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    match state.auth_service.refresh(&req.refresh_token).await {
        Ok(outcome) => {
            state.audit.record_auth(
                AuditAction::AuthRefresh,
                &meta,
                Some((outcome.user_id, &outcome.email)),
                true,
                None,
            );
            Ok((StatusCode::OK, Json(outcome.tokens)))
        }
        Err(e) => {
            state
                .audit
                .record_auth(AuditAction::AuthRefresh, &meta, None, false, Some(&e.to_string()));
            Err(e)
        }
    }
}
