//! Audit recorder.
//!
//! Entries are built on the request path but persisted by a background
//! worker fed through a bounded channel, so the insert never adds latency to
//! the client-visible request and a surge cannot grow pending work without
//! bound. Queue-full and insert failures are logged, never propagated.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::Utc;
use serde_json::{json, Value};
use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{AuditAction, AuditLog, Severity};
use crate::services::PrincipalSecurityContext;
use crate::utils::client_ip;

/// Default capacity of the pending-write queue.
pub const AUDIT_QUEUE_CAPACITY: usize = 1024;

/// Field names excluded from resource-change diffs.
const SENSITIVE_FIELDS: &[&str] = &["password", "secret", "token"];

/// Request attributes every audit entry carries, captured as an extractor so
/// handlers do not reassemble them by hand.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub endpoint: String,
    pub http_method: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestMeta {
    /// Capture from a request that middleware still owns; the extractor
    /// below covers the handler path.
    pub fn capture(req: &axum::extract::Request) -> Self {
        RequestMeta {
            endpoint: req.uri().path().to_string(),
            http_method: req.method().to_string(),
            ip_address: client_ip(req.headers(), req.extensions()),
            user_agent: req
                .headers()
                .get(axum::http::header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string()),
        }
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequestMeta
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(RequestMeta {
            endpoint: parts.uri.path().to_string(),
            http_method: parts.method.to_string(),
            ip_address: client_ip(&parts.headers, &parts.extensions),
            user_agent: parts
                .headers
                .get(axum::http::header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string()),
        })
    }
}

/// Builder for one audit entry.
pub struct AuditEntry {
    entry: AuditLog,
}

impl AuditEntry {
    pub fn new(action: AuditAction, meta: &RequestMeta) -> Self {
        Self {
            entry: AuditLog {
                id: Uuid::new_v4(),
                user_id: None,
                user_email: None,
                action: action.as_str().to_string(),
                severity: Severity::Info.as_str().to_string(),
                resource_type: None,
                resource_id: None,
                description: None,
                metadata: None,
                ip_address: meta.ip_address.clone(),
                user_agent: meta.user_agent.clone(),
                endpoint: meta.endpoint.clone(),
                http_method: meta.http_method.clone(),
                success: true,
                error_message: None,
                created_at: Utc::now(),
            },
        }
    }

    pub fn user(mut self, id: Uuid, email: &str) -> Self {
        self.entry.user_id = Some(id);
        self.entry.user_email = Some(email.to_string());
        self
    }

    pub fn principal(self, principal: &PrincipalSecurityContext) -> Self {
        self.user(principal.id, &principal.email)
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.entry.severity = severity.as_str().to_string();
        self
    }

    pub fn resource(mut self, resource_type: &str, resource_id: &str) -> Self {
        self.entry.resource_type = Some(resource_type.to_string());
        self.entry.resource_id = Some(resource_id.to_string());
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.entry.description = Some(description.to_string());
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.entry.metadata = Some(metadata);
        self
    }

    /// Outcome of the action: success is a 2xx/3xx-equivalent result.
    pub fn outcome(mut self, success: bool, error_message: Option<&str>) -> Self {
        self.entry.success = success;
        self.entry.error_message = error_message.map(|s| s.to_string());
        self
    }

    pub fn build(self) -> AuditLog {
        self.entry
    }
}

#[derive(Clone)]
pub struct AuditRecorder {
    tx: mpsc::Sender<AuditLog>,
}

impl AuditRecorder {
    pub(crate) fn from_sender(tx: mpsc::Sender<AuditLog>) -> Self {
        Self { tx }
    }

    /// Spawn the background writer and return the recorder handle. The
    /// worker drains remaining entries and exits once every recorder clone
    /// has been dropped, which main awaits before process exit.
    pub fn spawn(pool: PgPool, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<AuditLog>(capacity);

        let handle = tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                if let Err(e) = insert_entry(&pool, &entry).await {
                    tracing::error!(
                        error = %e,
                        action = %entry.action,
                        "Failed to write audit log entry"
                    );
                }
            }
            tracing::debug!("Audit writer drained and stopped");
        });

        (Self { tx }, handle)
    }

    /// Enqueue an entry. Never blocks and never fails the caller; a full
    /// queue drops the entry with a warning.
    pub fn record(&self, entry: AuditLog) {
        if let Err(e) = self.tx.try_send(entry) {
            match e {
                mpsc::error::TrySendError::Full(entry) => {
                    tracing::warn!(
                        action = %entry.action,
                        "Audit queue full, dropping entry"
                    );
                }
                mpsc::error::TrySendError::Closed(entry) => {
                    tracing::error!(
                        action = %entry.action,
                        "Audit writer stopped, dropping entry"
                    );
                }
            }
        }
    }

    /// Authentication events. Failures are recorded at warning severity.
    pub fn record_auth(
        &self,
        action: AuditAction,
        meta: &RequestMeta,
        user: Option<(Uuid, &str)>,
        success: bool,
        error_message: Option<&str>,
    ) {
        let severity = if success {
            Severity::Info
        } else {
            Severity::Warning
        };

        let mut entry = AuditEntry::new(action, meta)
            .severity(severity)
            .outcome(success, error_message);
        if let Some((id, email)) = user {
            entry = entry.user(id, email);
        }
        self.record(entry.build());
    }

    /// Security events always carry a description; warning severity unless
    /// the caller escalates afterwards.
    pub fn record_security(
        &self,
        action: AuditAction,
        meta: &RequestMeta,
        user: Option<(Uuid, &str)>,
        description: &str,
    ) {
        let mut entry = AuditEntry::new(action, meta)
            .severity(Severity::Warning)
            .description(description)
            .outcome(false, None);
        if let Some((id, email)) = user {
            entry = entry.user(id, email);
        }
        self.record(entry.build());
    }

    /// Resource mutations carry the old and new values plus a field-level
    /// diff, with sensitive fields excluded.
    #[allow(clippy::too_many_arguments)]
    pub fn record_resource_change(
        &self,
        action: AuditAction,
        meta: &RequestMeta,
        principal: &PrincipalSecurityContext,
        resource_type: &str,
        resource_id: &str,
        old_value: &Value,
        new_value: &Value,
    ) {
        let entry = AuditEntry::new(action, meta)
            .principal(principal)
            .resource(resource_type, resource_id)
            .metadata(json!({
                "old": old_value,
                "new": new_value,
                "diff": field_diff(old_value, new_value),
            }))
            .build();
        self.record(entry);
    }
}

async fn insert_entry(pool: &PgPool, entry: &AuditLog) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO audit_logs (
            id, user_id, user_email, action, severity,
            resource_type, resource_id, description, metadata,
            ip_address, user_agent, endpoint, http_method,
            success, error_message, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        "#,
    )
    .bind(entry.id)
    .bind(entry.user_id)
    .bind(&entry.user_email)
    .bind(&entry.action)
    .bind(&entry.severity)
    .bind(&entry.resource_type)
    .bind(&entry.resource_id)
    .bind(&entry.description)
    .bind(&entry.metadata)
    .bind(&entry.ip_address)
    .bind(&entry.user_agent)
    .bind(&entry.endpoint)
    .bind(&entry.http_method)
    .bind(entry.success)
    .bind(&entry.error_message)
    .bind(entry.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

fn is_sensitive(field: &str) -> bool {
    let lower = field.to_lowercase();
    SENSITIVE_FIELDS.iter().any(|s| lower.contains(s))
}

/// Top-level field diff between two JSON objects: `{field: {from, to}}` for
/// every key whose value changed, skipping sensitive field names.
pub fn field_diff(old: &Value, new: &Value) -> Value {
    let empty = serde_json::Map::new();
    let old_map = old.as_object().unwrap_or(&empty);
    let new_map = new.as_object().unwrap_or(&empty);

    let mut diff = serde_json::Map::new();

    let mut keys: Vec<&String> = old_map.keys().chain(new_map.keys()).collect();
    keys.sort();
    keys.dedup();

    for key in keys {
        if is_sensitive(key) {
            continue;
        }
        let from = old_map.get(key).cloned().unwrap_or(Value::Null);
        let to = new_map.get(key).cloned().unwrap_or(Value::Null);
        if from != to {
            diff.insert(key.clone(), json!({ "from": from, "to": to }));
        }
    }

    Value::Object(diff)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> RequestMeta {
        RequestMeta {
            endpoint: "/items/42".to_string(),
            http_method: "PATCH".to_string(),
            ip_address: Some("203.0.113.9".to_string()),
            user_agent: Some("test-agent".to_string()),
        }
    }

    #[test]
    fn entry_builder_carries_request_context() {
        let entry = AuditEntry::new(AuditAction::ItemUpdate, &meta())
            .user(Uuid::new_v4(), "user@example.com")
            .resource("item", "42")
            .build();

        assert_eq!(entry.action, "item.update");
        assert_eq!(entry.endpoint, "/items/42");
        assert_eq!(entry.http_method, "PATCH");
        assert_eq!(entry.ip_address.as_deref(), Some("203.0.113.9"));
        assert_eq!(entry.severity, "info");
        assert!(entry.success);
    }

    #[test]
    fn auth_failures_escalate_to_warning() {
        let (tx, mut rx) = mpsc::channel(8);
        let recorder = AuditRecorder { tx };

        recorder.record_auth(
            AuditAction::AuthLogin,
            &meta(),
            None,
            false,
            Some("Invalid credentials"),
        );

        let entry = rx.try_recv().unwrap();
        assert_eq!(entry.severity, "warning");
        assert!(!entry.success);
        assert_eq!(entry.error_message.as_deref(), Some("Invalid credentials"));
    }

    #[test]
    fn security_events_always_have_a_description() {
        let (tx, mut rx) = mpsc::channel(8);
        let recorder = AuditRecorder { tx };

        recorder.record_security(
            AuditAction::SecuritySuspiciousActivity,
            &meta(),
            None,
            "Repeated activation-code failures",
        );

        let entry = rx.try_recv().unwrap();
        assert_eq!(entry.severity, "warning");
        assert_eq!(
            entry.description.as_deref(),
            Some("Repeated activation-code failures")
        );
    }

    #[test]
    fn queue_full_drops_instead_of_blocking() {
        let (tx, _rx) = mpsc::channel(1);
        let recorder = AuditRecorder { tx };

        let first = AuditEntry::new(AuditAction::ItemCreate, &meta()).build();
        let second = AuditEntry::new(AuditAction::ItemCreate, &meta()).build();
        recorder.record(first);
        // Queue is full; this must not panic or block.
        recorder.record(second);
    }

    #[test]
    fn diff_skips_sensitive_fields() {
        let old = json!({"plan": "free", "password_hash": "a", "api_token": "x", "email": "a@b.c"});
        let new = json!({"plan": "premium", "password_hash": "b", "api_token": "y", "email": "a@b.c"});

        let diff = field_diff(&old, &new);
        let obj = diff.as_object().unwrap();

        assert_eq!(obj.len(), 1);
        assert_eq!(obj["plan"]["from"], "free");
        assert_eq!(obj["plan"]["to"], "premium");
    }

    #[test]
    fn diff_reports_added_and_removed_fields() {
        let old = json!({"a": 1});
        let new = json!({"b": 2});

        let diff = field_diff(&old, &new);
        assert_eq!(diff["a"]["from"], 1);
        assert_eq!(diff["a"]["to"], Value::Null);
        assert_eq!(diff["b"]["from"], Value::Null);
        assert_eq!(diff["b"]["to"], 2);
    }
}
