//! Audit trail models.
//!
//! Rows are immutable once written; only the retention cleanup job may
//! remove them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Closed set of auditable actions. The string form is what lands in the
/// `action` column and in query filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    #[serde(rename = "auth.register")]
    AuthRegister,
    #[serde(rename = "auth.login")]
    AuthLogin,
    #[serde(rename = "auth.logout")]
    AuthLogout,
    #[serde(rename = "auth.refresh")]
    AuthRefresh,
    #[serde(rename = "item.create")]
    ItemCreate,
    #[serde(rename = "item.update")]
    ItemUpdate,
    #[serde(rename = "item.delete")]
    ItemDelete,
    #[serde(rename = "document.upload")]
    DocumentUpload,
    #[serde(rename = "admin.user_suspend")]
    AdminUserSuspend,
    #[serde(rename = "admin.user_plan_change")]
    AdminUserPlanChange,
    #[serde(rename = "admin.user_delete")]
    AdminUserDelete,
    #[serde(rename = "security.suspicious_activity")]
    SecuritySuspiciousActivity,
    #[serde(rename = "security.rate_limited")]
    SecurityRateLimited,
    #[serde(rename = "security.csrf_rejected")]
    SecurityCsrfRejected,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::AuthRegister => "auth.register",
            AuditAction::AuthLogin => "auth.login",
            AuditAction::AuthLogout => "auth.logout",
            AuditAction::AuthRefresh => "auth.refresh",
            AuditAction::ItemCreate => "item.create",
            AuditAction::ItemUpdate => "item.update",
            AuditAction::ItemDelete => "item.delete",
            AuditAction::DocumentUpload => "document.upload",
            AuditAction::AdminUserSuspend => "admin.user_suspend",
            AuditAction::AdminUserPlanChange => "admin.user_plan_change",
            AuditAction::AdminUserDelete => "admin.user_delete",
            AuditAction::SecuritySuspiciousActivity => "security.suspicious_activity",
            AuditAction::SecurityRateLimited => "security.rate_limited",
            AuditAction::SecurityCsrfRejected => "security.csrf_rejected",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit entry severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the append-only audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditLog {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub user_email: Option<String>,
    pub action: String,
    pub severity: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub endpoint: String,
    pub http_method: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_serializes_to_dotted_code() {
        let json = serde_json::to_string(&AuditAction::AdminUserSuspend).unwrap();
        assert_eq!(json, "\"admin.user_suspend\"");
        let back: AuditAction = serde_json::from_str("\"auth.login\"").unwrap();
        assert_eq!(back, AuditAction::AuthLogin);
    }

    #[test]
    fn severity_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Severity::Critical).unwrap(),
            "\"critical\""
        );
        assert_eq!(Severity::Warning.as_str(), "warning");
    }
}
