use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Whether 5xx responses may carry error detail. Set once at startup from
/// the environment; production keeps detail server-side only.
static EXPOSE_ERROR_DETAIL: AtomicBool = AtomicBool::new(false);

pub fn set_expose_error_detail(expose: bool) {
    EXPOSE_ERROR_DETAIL.store(expose, Ordering::Relaxed);
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Missing or invalid Authorization header")]
    MissingCredential,

    #[error("Invalid or expired token")]
    InvalidCredential,

    #[error("Token has been revoked")]
    RevokedCredential,

    #[error("Account is suspended")]
    AccountSuspended,

    #[error("Administrator access required")]
    AdminRequired,

    #[error("Premium plan required")]
    PremiumRequired,

    #[error("Premium plan has expired")]
    PremiumExpired,

    #[error("CSRF token missing or invalid")]
    CsrfMismatch,

    #[error("Too many requests")]
    RateLimited { retry_after: u64 },

    #[error("Security store unavailable")]
    StoreUnavailable(anyhow::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Configuration error: {0}")]
    Config(anyhow::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(rename = "statusCode", skip_serializing_if = "Option::is_none")]
    status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(rename = "retryAfter", skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body, retry_after) = match self {
            AppError::MissingCredential
            | AppError::InvalidCredential
            | AppError::RevokedCredential => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    error: self.to_string(),
                    status_code: None,
                    message: None,
                    retry_after: None,
                },
                None,
            ),
            AppError::AccountSuspended
            | AppError::AdminRequired
            | AppError::PremiumRequired
            | AppError::PremiumExpired
            | AppError::CsrfMismatch => (
                StatusCode::FORBIDDEN,
                ErrorBody {
                    error: self.to_string(),
                    status_code: None,
                    message: None,
                    retry_after: None,
                },
                None,
            ),
            AppError::RateLimited { retry_after } => (
                StatusCode::TOO_MANY_REQUESTS,
                ErrorBody {
                    error: "Too many requests".to_string(),
                    status_code: None,
                    message: Some("Rate limit exceeded. Please try again later.".to_string()),
                    retry_after: Some(retry_after),
                },
                Some(retry_after),
            ),
            AppError::Validation(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorBody {
                    error: msg,
                    status_code: None,
                    message: None,
                    retry_after: None,
                },
                None,
            ),
            AppError::Conflict(msg) => (
                StatusCode::CONFLICT,
                ErrorBody {
                    error: msg,
                    status_code: None,
                    message: None,
                    retry_after: None,
                },
                None,
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    error: msg,
                    status_code: None,
                    message: None,
                    retry_after: None,
                },
                None,
            ),
            AppError::StoreUnavailable(err) => {
                tracing::error!(error = %err, "Security store unavailable");
                internal_body(StatusCode::SERVICE_UNAVAILABLE, &err.to_string())
            }
            AppError::Database(err) => {
                tracing::error!(error = %err, "Database error");
                internal_body(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
            }
            AppError::Redis(err) => {
                tracing::error!(error = %err, "Redis error");
                internal_body(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
            }
            AppError::Config(err) => {
                tracing::error!(error = %err, "Configuration error");
                internal_body(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Unhandled internal error");
                internal_body(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
            }
        };

        let mut res = (status, Json(body)).into_response();

        if let Some(retry) = retry_after {
            res.headers_mut()
                .insert(axum::http::header::RETRY_AFTER, retry.into());
        }

        res
    }
}

fn internal_body(status: StatusCode, detail: &str) -> (StatusCode, ErrorBody, Option<u64>) {
    let message = if EXPOSE_ERROR_DETAIL.load(Ordering::Relaxed) {
        Some(detail.to_string())
    } else {
        None
    };

    (
        status,
        ErrorBody {
            error: "Internal server error".to_string(),
            status_code: Some(status.as_u16()),
            message,
            retry_after: None,
        },
        None,
    )
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}
