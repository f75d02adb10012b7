use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

use warranty_service::{
    build_router,
    config::Config,
    db,
    error::{set_expose_error_detail, AppError},
    middleware::{AdminStatusCache, SlidingWindowLimiter},
    observability::init_tracing,
    services::{
        AuditQueryEngine, AuditRecorder, AuthService, JwtService, NullSecurityStore,
        RateLimitStore, RedisService, RevocationStore, UserContextResolver,
        AUDIT_QUEUE_CAPACITY,
    },
    AppState,
};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();

    // Load configuration, fail fast if invalid
    let config = Config::from_env()?;

    set_expose_error_detail(!config.environment.is_prod());
    init_tracing(&config.log_level);

    tracing::info!(
        service = %config.service_name,
        environment = ?config.environment,
        "Starting warranty service"
    );

    tracing::info!("Initializing database connection");
    let pool = db::create_pool(&config.database)
        .await
        .map_err(AppError::Database)?;
    db::run_migrations(&pool)
        .await
        .map_err(|e| AppError::Database(e.into()))?;
    tracing::info!("Database initialized successfully");

    // An unreachable Redis degrades rather than aborts: revocation checks
    // surface StoreUnavailable and the rate limiter runs in-process.
    let (revocation, rate_store): (Arc<dyn RevocationStore>, Option<Arc<dyn RateLimitStore>>) =
        match RedisService::new(&config.redis).await {
            Ok(redis) => {
                tracing::info!("Redis service initialized");
                let redis = Arc::new(redis);
                (redis.clone(), Some(redis))
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Redis unreachable at startup, running in degraded mode"
                );
                (Arc::new(NullSecurityStore), None)
            }
        };

    let jwt = JwtService::new(&config.jwt);
    let rate_limiter = Arc::new(SlidingWindowLimiter::new(&config.rate_limit, rate_store));
    let admin_cache = Arc::new(AdminStatusCache::new());
    let resolver = UserContextResolver::new(pool.clone());
    let auth_service = AuthService::new(pool.clone(), jwt.clone(), revocation.clone());
    let audit_query = AuditQueryEngine::new(pool.clone());

    let (audit, audit_worker) = AuditRecorder::spawn(pool.clone(), AUDIT_QUEUE_CAPACITY);

    let state = AppState {
        config: config.clone(),
        pool,
        jwt,
        revocation,
        rate_limiter,
        admin_cache,
        resolver,
        audit,
        audit_query,
        auth_service,
    };

    let app = build_router(state)?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::Internal(e.into()))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| AppError::Internal(e.into()))?;

    // Every recorder clone is gone once the router is dropped; the worker
    // drains whatever is still queued before exiting.
    if let Err(e) = audit_worker.await {
        tracing::error!(error = %e, "Audit writer did not shut down cleanly");
    }

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
