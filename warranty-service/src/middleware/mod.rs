pub mod admin;
pub mod auth;
pub mod csrf;
pub mod premium;
pub mod rate_limit;
pub mod tracing;

pub use admin::{admin_required, AdminStatusCache, ADMIN_CACHE_TTL};
pub use auth::{auth_middleware, AuthUser, CurrentUser};
pub use csrf::{csrf_middleware, CsrfLayer, CsrfSettings};
pub use premium::premium_required;
pub use rate_limit::{
    rate_limit_middleware, RateLimitLayer, RouteClass, SlidingWindowLimiter,
};
pub use self::tracing::request_id_middleware;
