use axum::{extract::Request, middleware::Next, response::Response};
use chrono::Utc;

use crate::error::AppError;
use crate::models::Plan;
use crate::services::PrincipalSecurityContext;

/// Premium-plan gate. A null expiry denotes a non-expiring grant; a set
/// expiry is compared against the current instant in UTC.
pub fn check_premium(context: &PrincipalSecurityContext) -> Result<(), AppError> {
    match context.plan {
        Plan::Suspended => Err(AppError::AccountSuspended),
        Plan::Free => Err(AppError::PremiumRequired),
        Plan::Premium => {
            if let Some(expires_at) = context.plan_expires_at {
                if expires_at < Utc::now() {
                    return Err(AppError::PremiumExpired);
                }
            }
            Ok(())
        }
    }
}

/// Runs after `auth_middleware`.
pub async fn premium_required(req: Request, next: Next) -> Result<Response, AppError> {
    let context = req
        .extensions()
        .get::<PrincipalSecurityContext>()
        .ok_or(AppError::MissingCredential)?;

    check_premium(context)?;

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn context(plan: Plan, plan_expires_at: Option<chrono::DateTime<Utc>>) -> PrincipalSecurityContext {
        PrincipalSecurityContext {
            id: Uuid::new_v4(),
            email: "user@example.com".to_string(),
            plan,
            is_admin: false,
            is_partner: false,
            plan_expires_at,
        }
    }

    #[test]
    fn free_plan_is_rejected() {
        assert!(matches!(
            check_premium(&context(Plan::Free, None)),
            Err(AppError::PremiumRequired)
        ));
    }

    #[test]
    fn expired_premium_is_rejected() {
        let just_expired = Utc::now() - Duration::seconds(1);
        assert!(matches!(
            check_premium(&context(Plan::Premium, Some(just_expired))),
            Err(AppError::PremiumExpired)
        ));
    }

    #[test]
    fn non_expiring_premium_is_accepted() {
        assert!(check_premium(&context(Plan::Premium, None)).is_ok());

        let future = Utc::now() + Duration::days(30);
        assert!(check_premium(&context(Plan::Premium, Some(future))).is_ok());
    }

    #[test]
    fn suspension_overrides_premium() {
        assert!(matches!(
            check_premium(&context(Plan::Suspended, None)),
            Err(AppError::AccountSuspended)
        ));
    }
}
