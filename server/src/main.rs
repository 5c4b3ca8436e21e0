use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use dotenvy::dotenv;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use boxoffice_server::clock::SystemClock;
use boxoffice_server::config::Config;
use boxoffice_server::jobs;
use boxoffice_server::routes::create_routes;
use boxoffice_server::services::notifications::TracingPushSender;
use boxoffice_server::state::AppState;
use boxoffice_server::store::{InventoryStore, MemoryBackend, PgBackend, RetryPolicy};

const JOB_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().expect("Invalid configuration");

    let retry = RetryPolicy {
        max_attempts: config.store_max_attempts,
        ..RetryPolicy::default()
    };
    let store = match &config.database_url {
        Some(url) => {
            let backend = PgBackend::connect(url)
                .await
                .expect("Failed to connect to database");
            InventoryStore::new(Arc::new(backend), retry)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            InventoryStore::new(Arc::new(MemoryBackend::default()), retry)
        }
    };

    let state = AppState::new(
        store,
        Arc::new(SystemClock),
        Arc::new(TracingPushSender),
        &config,
    );

    let cancel = CancellationToken::new();
    let handles = jobs::spawn_all(&state, &config, &cancel);

    let app: Router = create_routes(state, &config);

    tracing::info!("Server running at http://{}", config.bind_addr);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server failed");

    cancel.cancel();
    let drained = tokio::time::timeout(JOB_SHUTDOWN_TIMEOUT, async {
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Background job panicked");
            }
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!("Background jobs did not stop in time");
    }

    tracing::info!("Server stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
