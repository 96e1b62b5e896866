// Main entry point for the dispatch server

use std::sync::Arc;

use anyhow::{Context, Result};
use dispatch_core::kernel::{
    scheduled_tasks::start_scheduler, BaseNotificationSink, LogNotificationSink,
    NatsClientPublisher, NatsNotificationSink, PgBookingStore, PgProviderDirectory, ServerDeps,
};
use dispatch_core::{server::build_app, Config};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,dispatch_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting dispatch server");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    // Provider notifications go over NATS when configured
    let notifier: Arc<dyn BaseNotificationSink> = match &config.nats_url {
        Some(url) => {
            let publisher = NatsClientPublisher::connect(url)
                .await
                .context("Failed to connect to NATS")?;
            tracing::info!(url = %url, "NATS connected");
            Arc::new(NatsNotificationSink::new(Arc::new(publisher)))
        }
        None => {
            tracing::warn!("NATS_URL not set, provider notifications will only be logged");
            Arc::new(LogNotificationSink)
        }
    };

    let server_deps = ServerDeps::new(
        Arc::new(PgBookingStore::new(pool.clone())),
        Arc::new(PgProviderDirectory::new(pool.clone())),
        notifier,
        config.matching,
        config.tracking,
        config.dispatch,
    );

    // Background expiry sweep
    let _scheduler = start_scheduler(server_deps.clone(), &config.expiry_sweep_cron)
        .await
        .context("Failed to start scheduler")?;

    let app = build_app(server_deps, Some(pool));

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
