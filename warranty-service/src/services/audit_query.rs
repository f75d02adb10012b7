//! Filtered, paginated, access-scoped retrieval over the audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::AuditLog;
use crate::services::PrincipalSecurityContext;

/// Hard cap on page size.
pub const MAX_PAGE_SIZE: i64 = 100;

fn default_limit() -> i64 {
    50
}

/// Conjunctive, all-optional filters over the audit trail.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditLogFilter {
    pub user_id: Option<Uuid>,
    pub action: Option<String>,
    pub severity: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub success: Option<bool>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

/// A non-administrative caller only ever sees their own entries, regardless
/// of any caller-supplied user-id filter.
pub fn enforce_scope(filter: &mut AuditLogFilter, caller: &PrincipalSecurityContext) {
    if !caller.is_admin {
        filter.user_id = Some(caller.id);
    }
}

#[derive(Debug, Serialize)]
pub struct AuditLogPage {
    pub entries: Vec<AuditLog>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    #[serde(rename = "hasMore")]
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
pub struct AuditStats {
    pub total: i64,
    pub by_severity: BTreeMap<String, i64>,
    pub by_action: BTreeMap<String, i64>,
    pub failed_actions: BTreeMap<String, i64>,
}

#[derive(sqlx::FromRow)]
struct SeverityRollup {
    total: i64,
    info: i64,
    warning: i64,
    error: i64,
    critical: i64,
}

#[derive(sqlx::FromRow)]
struct ActionRollup {
    action: String,
    count: i64,
    failed: i64,
}

#[derive(Clone)]
pub struct AuditQueryEngine {
    pool: PgPool,
}

impl AuditQueryEngine {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Page plus a total computed against the same predicate, independent of
    /// limit/offset.
    pub async fn query(&self, filter: &AuditLogFilter) -> Result<AuditLogPage, AppError> {
        let limit = filter.limit.clamp(1, MAX_PAGE_SIZE);
        let offset = filter.offset.max(0);

        let mut count_query = QueryBuilder::new("SELECT COUNT(*) FROM audit_logs");
        push_filters(&mut count_query, filter);
        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut page_query = QueryBuilder::new(
            "SELECT id, user_id, user_email, action, severity, resource_type, \
             resource_id, description, metadata, ip_address, user_agent, \
             endpoint, http_method, success, error_message, created_at \
             FROM audit_logs",
        );
        push_filters(&mut page_query, filter);
        page_query.push(" ORDER BY created_at DESC");
        page_query.push(" LIMIT ").push_bind(limit);
        page_query.push(" OFFSET ").push_bind(offset);

        let entries: Vec<AuditLog> = page_query
            .build_query_as()
            .fetch_all(&self.pool)
            .await?;

        let has_more = total > offset + entries.len() as i64;

        Ok(AuditLogPage {
            entries,
            total,
            limit,
            offset,
            has_more,
        })
    }

    /// Two independent aggregations (fixed-shape severity rollup, dynamic
    /// per-action rollup) combined here rather than in a cartesian join.
    pub async fn stats(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<AuditStats, AppError> {
        let mut severity_query = QueryBuilder::new(
            "SELECT COUNT(*) AS total, \
             COUNT(*) FILTER (WHERE severity = 'info') AS info, \
             COUNT(*) FILTER (WHERE severity = 'warning') AS warning, \
             COUNT(*) FILTER (WHERE severity = 'error') AS error, \
             COUNT(*) FILTER (WHERE severity = 'critical') AS critical \
             FROM audit_logs",
        );
        push_date_range(&mut severity_query, from, to);
        let rollup: SeverityRollup = severity_query
            .build_query_as()
            .fetch_one(&self.pool)
            .await?;

        let mut action_query = QueryBuilder::new(
            "SELECT action, COUNT(*) AS count, \
             COUNT(*) FILTER (WHERE NOT success) AS failed \
             FROM audit_logs",
        );
        push_date_range(&mut action_query, from, to);
        action_query.push(" GROUP BY action ORDER BY count DESC");
        let actions: Vec<ActionRollup> = action_query
            .build_query_as()
            .fetch_all(&self.pool)
            .await?;

        let mut by_severity = BTreeMap::new();
        by_severity.insert("info".to_string(), rollup.info);
        by_severity.insert("warning".to_string(), rollup.warning);
        by_severity.insert("error".to_string(), rollup.error);
        by_severity.insert("critical".to_string(), rollup.critical);

        let mut by_action = BTreeMap::new();
        let mut failed_actions = BTreeMap::new();
        for row in actions {
            if row.failed > 0 {
                failed_actions.insert(row.action.clone(), row.failed);
            }
            by_action.insert(row.action, row.count);
        }

        Ok(AuditStats {
            total: rollup.total,
            by_severity,
            by_action,
            failed_actions,
        })
    }
}

fn push_filters<'a>(query: &mut QueryBuilder<'a, Postgres>, filter: &'a AuditLogFilter) {
    query.push(" WHERE 1 = 1");

    if let Some(user_id) = filter.user_id {
        query.push(" AND user_id = ").push_bind(user_id);
    }
    if let Some(action) = &filter.action {
        query.push(" AND action = ").push_bind(action.as_str());
    }
    if let Some(severity) = &filter.severity {
        query.push(" AND severity = ").push_bind(severity.as_str());
    }
    if let Some(resource_type) = &filter.resource_type {
        query.push(" AND resource_type = ").push_bind(resource_type.as_str());
    }
    if let Some(resource_id) = &filter.resource_id {
        query.push(" AND resource_id = ").push_bind(resource_id.as_str());
    }
    if let Some(success) = filter.success {
        query.push(" AND success = ").push_bind(success);
    }
    push_date_range(query, filter.from, filter.to);
}

fn push_date_range(
    query: &mut QueryBuilder<'_, Postgres>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) {
    if !query.sql().contains("WHERE") {
        query.push(" WHERE 1 = 1");
    }
    if let Some(from) = from {
        query.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(to) = to {
        query.push(" AND created_at <= ").push_bind(to);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Plan;

    fn caller(is_admin: bool) -> PrincipalSecurityContext {
        PrincipalSecurityContext {
            id: Uuid::new_v4(),
            email: "caller@example.com".to_string(),
            plan: Plan::Free,
            is_admin,
            is_partner: false,
            plan_expires_at: None,
        }
    }

    #[test]
    fn non_admin_filter_is_forced_to_own_id() {
        let admin = caller(true);
        let user = caller(false);
        let other = Uuid::new_v4();

        let mut filter = AuditLogFilter {
            user_id: Some(other),
            ..Default::default()
        };
        enforce_scope(&mut filter, &user);
        assert_eq!(filter.user_id, Some(user.id));

        let mut filter = AuditLogFilter {
            user_id: Some(other),
            ..Default::default()
        };
        enforce_scope(&mut filter, &admin);
        assert_eq!(filter.user_id, Some(other));
    }

    #[test]
    fn filters_are_conjunctive_and_parameterized() {
        let filter = AuditLogFilter {
            user_id: Some(Uuid::new_v4()),
            action: Some("auth.login".to_string()),
            success: Some(false),
            from: Some(Utc::now()),
            ..Default::default()
        };

        let mut query = QueryBuilder::new("SELECT COUNT(*) FROM audit_logs");
        push_filters(&mut query, &filter);
        let sql = query.sql();

        assert!(sql.contains("user_id = $1"));
        assert!(sql.contains("action = $2"));
        assert!(sql.contains("success = $3"));
        assert!(sql.contains("created_at >= $4"));
        assert!(!sql.contains("severity ="));
    }

    #[test]
    fn empty_filter_adds_no_predicates() {
        let filter = AuditLogFilter::default();
        let mut query = QueryBuilder::new("SELECT COUNT(*) FROM audit_logs");
        push_filters(&mut query, &filter);
        assert_eq!(query.sql(), "SELECT COUNT(*) FROM audit_logs WHERE 1 = 1");
    }
}
