use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::{
    error::AppError,
    middleware::CurrentUser,
    services::{enforce_scope, AuditLogFilter},
    AppState,
};

/// List audit log entries. Non-administrators are scoped to their own
/// entries no matter what filter they send.
pub async fn list_logs(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Query(mut filter): Query<AuditLogFilter>,
) -> Result<impl IntoResponse, AppError> {
    enforce_scope(&mut filter, &caller);
    let page = state.audit_query.query(&filter).await?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Aggregate counts over the audit trail. Admin-gated by the router.
pub async fn stats(
    State(state): State<AppState>,
    Query(range): Query<StatsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let stats = state.audit_query.stats(range.from, range.to).await?;
    Ok(Json(stats))
}
