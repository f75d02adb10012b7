use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::error::AppError;
use crate::services::{AccessTokenClaims, PrincipalSecurityContext};
use crate::AppState;

/// Middleware to require authentication.
///
/// Gate order: bearer credential decoded, revocation checked, principal
/// loaded fresh and suspension evaluated. Each failure short-circuits the
/// rest of the chain.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(AppError::MissingCredential)?;

    let claims = state.jwt.validate_access_token(token)?;

    match state.revocation.is_revoked(&claims.jti).await {
        Ok(true) => return Err(AppError::RevokedCredential),
        Ok(false) => {}
        Err(AppError::StoreUnavailable(e)) => {
            // Fail closed in production (treat as revoked), fail open
            // elsewhere (availability over immediate revocation).
            if state.config.environment.is_prod() {
                tracing::error!(error = %e, "Revocation store unreachable, rejecting credential");
                return Err(AppError::RevokedCredential);
            }
            tracing::warn!(error = %e, "Revocation store unreachable, skipping revocation check");
        }
        Err(e) => return Err(e),
    }

    let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AppError::InvalidCredential)?;

    // Loaded fresh per request; a deleted account fails here, a suspended
    // one is rejected before any further gate runs.
    let context = state.resolver.resolve(user_id).await?;

    req.extensions_mut().insert(claims);
    req.extensions_mut().insert(context);

    Ok(next.run(req).await)
}

/// Extractor to easily get claims in handlers
pub struct AuthUser(pub AccessTokenClaims);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let claims = parts
            .extensions
            .get::<AccessTokenClaims>()
            .ok_or_else(|| {
                AppError::Internal(anyhow::anyhow!(
                    "Auth claims missing from request extensions"
                ))
            })?;

        Ok(AuthUser(claims.clone()))
    }
}

/// Extractor for the principal's security context.
pub struct CurrentUser(pub PrincipalSecurityContext);

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let context = parts
            .extensions
            .get::<PrincipalSecurityContext>()
            .ok_or_else(|| {
                AppError::Internal(anyhow::anyhow!(
                    "Security context missing from request extensions"
                ))
            })?;

        Ok(CurrentUser(context.clone()))
    }
}
