//! Warden Server - Main entry point

use std::sync::Arc;
use std::time::Duration;

use warden_core::{
    api::{self, AppState},
    config::Config,
    db::{InMemoryStore, PgStore},
    middleware::{ttl_from_hours, GuardSettings, TokenAuthenticator},
    telemetry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = match std::env::var("WARDEN_CONFIG") {
        Ok(path) => Config::from_file(&path)?,
        Err(_) => Config::load()?,
    };

    let telemetry = telemetry::init_telemetry(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Warden Server"
    );

    let ttl = ttl_from_hours(config.auth.token_ttl_hours)
        .ok_or_else(|| anyhow::anyhow!("auth.token_ttl_hours is out of range"))?;
    let authenticator = TokenAuthenticator::new(&config.auth.jwt_secret).with_ttl(ttl);
    let settings = GuardSettings {
        admin_role: config.auth.admin_role.clone(),
    };

    let state = match config.database.url.as_deref() {
        Some(url) => {
            let store = PgStore::connect(url, config.database.max_connections).await?;
            tracing::info!("Connected to database");
            if config.database.run_migrations {
                store.migrate().await?;
            }
            AppState::from_store(Arc::new(store), authenticator, settings, telemetry.metrics.clone())
        }
        None => {
            tracing::warn!("No database URL configured, using the in-memory store");
            AppState::from_store(
                Arc::new(InMemoryStore::new()),
                authenticator,
                settings,
                telemetry.metrics.clone(),
            )
        }
    };

    // Routes whose permission is missing from the catalog can never be authorized
    match state.guard.unreachable_requirements(&api::route_requirements()).await {
        Ok(missing) => {
            for requirement in missing {
                tracing::warn!(
                    requirement = %requirement,
                    "Route requires a permission that is not in the catalog"
                );
            }
        }
        Err(e) => tracing::warn!(error = %e, "Failed to check route permissions against the catalog"),
    }

    let app = api::build_router_with_timeout(
        state,
        Duration::from_secs(config.server.request_timeout_secs),
    );

    let addr = config.bind_address();
    tracing::info!(address = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
