use crate::error::AppError;
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub environment: Environment,
    pub service_name: String,
    pub log_level: String,
    pub port: u16,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

impl Environment {
    pub fn is_prod(&self) -> bool {
        *self == Environment::Prod
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
    pub max_lifetime_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub csrf_cookie_ttl_hours: i64,
}

/// Window/max pair for one rate-limit route class.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateLimitRule {
    pub window_seconds: u64,
    pub max: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub global: RateLimitRule,
    pub auth: RateLimitRule,
    pub upload: RateLimitRule,
    pub password_reset: RateLimitRule,
    pub activation: RateLimitRule,
    /// Path prefixes that are never subject to admission control.
    pub exempt_paths: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::Config(anyhow::anyhow!(e)))?;

        let is_prod = environment.is_prod();

        // The global limit is deliberately lenient outside production so that
        // local development and test suites do not trip it.
        let global_max: u64 = parse_env("RATE_LIMIT_GLOBAL_MAX", Some("100"), is_prod)?;
        let global_max = if is_prod { global_max } else { global_max * 10 };

        let config = Config {
            environment,
            service_name: get_env("SERVICE_NAME", Some("warranty-service"), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            port: parse_env("PORT", Some("8080"), is_prod)?,
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", Some("10"), is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", Some("1"), is_prod)?,
                acquire_timeout_seconds: parse_env(
                    "DATABASE_ACQUIRE_TIMEOUT_SECONDS",
                    Some("30"),
                    is_prod,
                )?,
                idle_timeout_seconds: parse_env(
                    "DATABASE_IDLE_TIMEOUT_SECONDS",
                    Some("600"),
                    is_prod,
                )?,
                max_lifetime_seconds: parse_env(
                    "DATABASE_MAX_LIFETIME_SECONDS",
                    Some("1800"),
                    is_prod,
                )?,
            },
            redis: RedisConfig {
                url: get_env("REDIS_URL", None, is_prod)?,
            },
            jwt: JwtConfig {
                access_secret: get_env("JWT_ACCESS_SECRET", None, is_prod)?,
                refresh_secret: get_env("JWT_REFRESH_SECRET", None, is_prod)?,
                access_token_expiry_minutes: parse_env(
                    "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                    Some("60"),
                    is_prod,
                )?,
                refresh_token_expiry_days: parse_env(
                    "JWT_REFRESH_TOKEN_EXPIRY_DAYS",
                    Some("7"),
                    is_prod,
                )?,
            },
            security: SecurityConfig {
                allowed_origins: get_env("ALLOWED_ORIGINS", Some("http://localhost:3000"), is_prod)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .collect(),
                csrf_cookie_ttl_hours: parse_env("CSRF_COOKIE_TTL_HOURS", Some("24"), is_prod)?,
            },
            rate_limit: RateLimitConfig {
                global: RateLimitRule {
                    window_seconds: parse_env(
                        "RATE_LIMIT_GLOBAL_WINDOW_SECONDS",
                        Some("900"),
                        is_prod,
                    )?,
                    max: global_max,
                },
                auth: RateLimitRule {
                    window_seconds: parse_env(
                        "RATE_LIMIT_AUTH_WINDOW_SECONDS",
                        Some("900"),
                        is_prod,
                    )?,
                    max: parse_env("RATE_LIMIT_AUTH_MAX", Some("5"), is_prod)?,
                },
                upload: RateLimitRule {
                    window_seconds: parse_env(
                        "RATE_LIMIT_UPLOAD_WINDOW_SECONDS",
                        Some("60"),
                        is_prod,
                    )?,
                    max: parse_env("RATE_LIMIT_UPLOAD_MAX", Some("10"), is_prod)?,
                },
                password_reset: RateLimitRule {
                    window_seconds: parse_env(
                        "RATE_LIMIT_PASSWORD_RESET_WINDOW_SECONDS",
                        Some("3600"),
                        is_prod,
                    )?,
                    max: parse_env("RATE_LIMIT_PASSWORD_RESET_MAX", Some("3"), is_prod)?,
                },
                activation: RateLimitRule {
                    window_seconds: parse_env(
                        "RATE_LIMIT_ACTIVATION_WINDOW_SECONDS",
                        Some("900"),
                        is_prod,
                    )?,
                    max: parse_env("RATE_LIMIT_ACTIVATION_MAX", Some("10"), is_prod)?,
                },
                exempt_paths: get_env(
                    "RATE_LIMIT_EXEMPT_PATHS",
                    Some("/health,/live,/ready"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.port == 0 {
            return Err(AppError::Config(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.jwt.access_token_expiry_minutes <= 0 {
            return Err(AppError::Config(anyhow::anyhow!(
                "JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be positive"
            )));
        }

        if self.jwt.refresh_token_expiry_days <= 0 {
            return Err(AppError::Config(anyhow::anyhow!(
                "JWT_REFRESH_TOKEN_EXPIRY_DAYS must be positive"
            )));
        }

        // Compromise of one secret must not compromise the other token kind.
        if self.jwt.access_secret == self.jwt.refresh_secret {
            return Err(AppError::Config(anyhow::anyhow!(
                "JWT_ACCESS_SECRET and JWT_REFRESH_SECRET must be distinct"
            )));
        }

        if self.environment.is_prod() && self.security.allowed_origins.iter().any(|o| o == "*") {
            return Err(AppError::Config(anyhow::anyhow!(
                "Wildcard CORS origin not allowed in production"
            )));
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::Config(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::Config(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: Option<&str>, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, default, is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::Config(anyhow::anyhow!("{}: {}", key, e)))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
