use axum::{response::IntoResponse, Json};
use serde_json::json;

use crate::{error::AppError, middleware::CurrentUser};

/// Premium-only view of the caller's entitlements. The router guards this
/// with the premium gate, so reaching the handler implies an active plan.
pub async fn entitlements(
    CurrentUser(caller): CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(json!({
        "plan": caller.plan.as_str(),
        "planExpiresAt": caller.plan_expires_at,
        "isPartner": caller.is_partner,
    })))
}
