use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Plan update payload. A null `plan_expires_at` denotes a non-expiring
/// grant.
#[derive(Debug, Deserialize)]
pub struct UpdatePlanRequest {
    pub plan: String,
    pub plan_expires_at: Option<DateTime<Utc>>,
}
