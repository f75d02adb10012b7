pub mod audit_log;
pub mod refresh_token;
pub mod user;

pub use audit_log::{AuditAction, AuditLog, Severity};
pub use refresh_token::RefreshToken;
pub use user::{Plan, User};
