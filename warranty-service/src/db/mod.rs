//! Postgres pool construction and schema management. Pool sizing and
//! timeouts are configuration, not constants, so each deployment can tune
//! them to its instance size.

use crate::config::DatabaseConfig;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
        .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
        .max_lifetime(Duration::from_secs(config.max_lifetime_seconds))
}

/// Open the shared connection pool.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Opening Postgres pool"
    );

    let pool = pool_options(config).connect(&config.url).await?;

    tracing::info!("Postgres pool ready");
    Ok(pool)
}

/// Apply the embedded migrations. Called once at startup, before any
/// service takes the pool.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Schema migrations applied");
    Ok(())
}

/// Cheap readiness probe used by the health endpoint.
pub async fn health_check(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> DatabaseConfig {
        DatabaseConfig {
            url: "postgres://localhost/warranty_test".to_string(),
            max_connections: 7,
            min_connections: 2,
            acquire_timeout_seconds: 5,
            idle_timeout_seconds: 60,
            max_lifetime_seconds: 300,
        }
    }

    #[test]
    fn pool_options_come_from_config() {
        let options = pool_options(&test_config());

        assert_eq!(options.get_max_connections(), 7);
        assert_eq!(options.get_min_connections(), 2);
        assert_eq!(options.get_acquire_timeout(), Duration::from_secs(5));
        assert_eq!(options.get_idle_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(options.get_max_lifetime(), Some(Duration::from_secs(300)));
    }

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn pool_connects() {
        let result = create_pool(&test_config()).await;
        assert!(result.is_ok());
    }
}
