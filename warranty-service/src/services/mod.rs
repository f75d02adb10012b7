pub mod audit;
pub mod audit_query;
pub mod auth;
pub mod jwt;
pub mod redis;
pub mod user_context;

pub use audit::{AuditEntry, AuditRecorder, RequestMeta, AUDIT_QUEUE_CAPACITY};
pub use audit_query::{enforce_scope, AuditLogFilter, AuditQueryEngine};
pub use auth::AuthService;
pub use jwt::{AccessTokenClaims, JwtService, RefreshTokenClaims, TokenResponse};
pub use redis::{
    MockSecurityStore, NullSecurityStore, RateLimitStore, RedisService, RevocationStore,
};
pub use user_context::{PrincipalSecurityContext, UserContextResolver};
