use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use homequeue::config::Config;
use homequeue::control::{ControlExecutor, DryRunExecutor, HttpControlExecutor};
use homequeue::db::{ActionStore, MemoryStore, PgStore};
use homequeue::events::EventHub;
use homequeue::handlers::HandlerRegistry;
use homequeue::queue::QueueService;
use homequeue::state::{AppState, SharedState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let config = Config::from_env().expect("Failed to load configuration");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(&config.log_level)
        }))
        .init();

    tracing::info!("Starting homequeue");

    let store: Arc<dyn ActionStore> = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .expect("Failed to connect to database");

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .expect("Failed to run migrations");

            tracing::info!("Migrations applied");
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, queue state is kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let control: Arc<dyn ControlExecutor> = match &config.control {
        Some(control) => {
            tracing::info!("Forwarding control actions to {}", control.base_url);
            Arc::new(HttpControlExecutor::new(&control.base_url, control.timeout)?)
        }
        None => {
            tracing::warn!("HOMEQUEUE_CONTROL_URL not set, control actions run dry");
            Arc::new(DryRunExecutor)
        }
    };

    let service = Arc::new(QueueService::new(
        store,
        HandlerRegistry::with_builtins(control),
        Arc::new(EventHub::new()),
        config.runtime_settings(),
    ));

    let overrides = service.update_settings(config.setting_overrides()).await?;
    for update in &overrides.updated {
        tracing::info!("Environment pins {}={}", update.setting.key, update.setting.value);
    }
    for (key, error) in &overrides.errors {
        tracing::warn!("Ignoring environment override for {key}: {error}");
    }
    service.start().await?;

    let addr = SocketAddr::new(config.host, config.port);
    let state: SharedState = Arc::new(AppState {
        service: service.clone(),
        config,
    });
    let app = homequeue::build_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    service.stop().await;
    tracing::info!("Queue processor stopped");

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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
