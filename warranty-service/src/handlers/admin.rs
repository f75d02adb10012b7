use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::str::FromStr;
use uuid::Uuid;

use crate::{
    dtos::admin::UpdatePlanRequest,
    dtos::auth::MessageResponse,
    error::AppError,
    middleware::CurrentUser,
    models::{AuditAction, Plan},
    services::RequestMeta,
    AppState,
};

#[derive(sqlx::FromRow)]
struct PlanRow {
    plan: String,
    plan_expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

async fn fetch_plan(state: &AppState, user_id: Uuid) -> Result<PlanRow, AppError> {
    let row: Option<PlanRow> =
        sqlx::query_as("SELECT plan, plan_expires_at FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&state.pool)
            .await?;
    row.ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

/// Revoke the sessions of a user whose account is being cut off. The access
/// token they hold still dies within its lifetime via the suspension check
/// in the auth gate.
async fn revoke_sessions(state: &AppState, user_id: Uuid) -> Result<(), AppError> {
    sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
        .bind(user_id)
        .execute(&state.pool)
        .await?;
    Ok(())
}

/// Suspend a user account. Existing refresh tokens are revoked immediately.
pub async fn suspend_user(
    State(state): State<AppState>,
    CurrentUser(admin): CurrentUser,
    Path(user_id): Path<Uuid>,
    meta: RequestMeta,
) -> Result<impl IntoResponse, AppError> {
    let before = fetch_plan(&state, user_id).await?;

    sqlx::query("UPDATE users SET plan = 'suspended' WHERE id = $1")
        .bind(user_id)
        .execute(&state.pool)
        .await?;

    revoke_sessions(&state, user_id).await?;

    state.audit.record_resource_change(
        AuditAction::AdminUserSuspend,
        &meta,
        &admin,
        "user",
        &user_id.to_string(),
        &json!({ "plan": before.plan }),
        &json!({ "plan": "suspended" }),
    );

    Ok((
        StatusCode::OK,
        Json(MessageResponse {
            message: "User suspended".to_string(),
        }),
    ))
}

/// Change a user's plan. Moving to `suspended` through this endpoint also
/// revokes the user's sessions, same as the dedicated suspend route.
pub async fn update_plan(
    State(state): State<AppState>,
    CurrentUser(admin): CurrentUser,
    Path(user_id): Path<Uuid>,
    meta: RequestMeta,
    Json(req): Json<UpdatePlanRequest>,
) -> Result<impl IntoResponse, AppError> {
    let plan = Plan::from_str(&req.plan).map_err(AppError::Validation)?;

    let before = fetch_plan(&state, user_id).await?;

    sqlx::query("UPDATE users SET plan = $1, plan_expires_at = $2 WHERE id = $3")
        .bind(plan.as_str())
        .bind(req.plan_expires_at)
        .bind(user_id)
        .execute(&state.pool)
        .await?;

    if plan == Plan::Suspended {
        revoke_sessions(&state, user_id).await?;
    }

    state.audit.record_resource_change(
        AuditAction::AdminUserPlanChange,
        &meta,
        &admin,
        "user",
        &user_id.to_string(),
        &json!({ "plan": before.plan, "plan_expires_at": before.plan_expires_at }),
        &json!({ "plan": plan.as_str(), "plan_expires_at": req.plan_expires_at }),
    );

    Ok((
        StatusCode::OK,
        Json(MessageResponse {
            message: "Plan updated".to_string(),
        }),
    ))
}
