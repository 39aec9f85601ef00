//! Q&A Service
//!
//! Hosts the session core and its operational endpoints.
//!
//! # Startup Flow
//!
//! 1. Initialize tracing
//! 2. Load configuration from environment
//! 3. Initialize Prometheus metrics recorder
//! 4. Open the entity store (Postgres with migrations, or in-memory)
//! 5. Start the actor system
//! 6. Start the health HTTP server (liveness, readiness, metrics)
//! 7. Wait for shutdown signal

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use qa_service::actors::{ActorMetrics, ActorSettings, SessionControllerActorHandle};
use qa_service::config::{Config, StoreBackend};
use qa_service::observability::{health_router, init_metrics_recorder, HealthState};
use qa_service::store::{EntityStore, InMemoryStore, PgStore};
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Upper bound on waiting for meeting actors at shutdown.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.observability.log_filter.clone().into());
    if config.observability.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!("Starting Q&A service");
    info!(config = ?config, "Configuration loaded successfully");

    // Must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let store: Arc<dyn EntityStore> = match (config.store_backend, &config.database) {
        (StoreBackend::Postgres, Some(database)) => {
            info!("Connecting to database...");
            let store = PgStore::connect(database).await.map_err(|e| {
                error!(error = %e, "Failed to connect to database");
                e
            })?;
            store.migrate().await.map_err(|e| {
                error!(error = %e, "Failed to run database migrations");
                e
            })?;
            info!("Database ready");
            Arc::new(store)
        }
        (StoreBackend::Postgres, None) => {
            return Err("postgres backend selected without database settings".into());
        }
        (StoreBackend::Memory, _) => {
            warn!("Using in-memory store; state is lost on restart");
            Arc::new(InMemoryStore::new())
        }
    };

    let max_meetings = usize::try_from(config.max_meetings)?;
    let controller = SessionControllerActorHandle::new(
        Arc::clone(&store),
        ActorSettings {
            store_deadline: config.store_deadline,
            max_meetings,
            selection_seed: config.selection_seed,
        },
        ActorMetrics::new(),
    );

    let health_state = Arc::new(HealthState::new(Arc::clone(&store)));
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let app = health_router(Arc::clone(&health_state))
        .merge(metrics_router)
        .layer(TraceLayer::new_for_http());

    // Bind before spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let health_shutdown_token = controller.child_token();
    let server = tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    health_state.set_ready();
    info!("Q&A service running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");
    health_state.set_not_ready();

    if let Err(e) = controller.shutdown(SHUTDOWN_DEADLINE).await {
        warn!(error = %e, "Actor system shutdown error");
    }
    if let Err(e) = server.await {
        warn!(error = %e, "Health server task did not finish cleanly");
    }

    info!("Q&A service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
