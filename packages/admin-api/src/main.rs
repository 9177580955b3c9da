// Main entry point for the admin API server

mod routes;
mod stream;

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use prospector::adapters::{GatewayClient, OpenAiClient};
use prospector::dedup::DuplicateDetector;
use prospector::jobs::{recovery, JobScheduler, PipelineDeps, SchedulerConfig};
use prospector::pipeline::PacingPolicy;
use prospector::store::{PgStore, Store};
use prospector::Config;

use routes::{build_app, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,prospector=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Prospector admin API");

    let config = Config::from_env().context("Failed to load configuration")?;

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));

    // Anything still pending/running in the tables is an orphan of the
    // previous process; sweep before accepting new work.
    recovery::fail_interrupted_jobs(&store)
        .await
        .context("Startup recovery failed")?;

    let gateway = Arc::new(GatewayClient::new(
        config.gateway_base_url.clone(),
        config.gateway_token.clone(),
    ));
    let openai = Arc::new(OpenAiClient::new(
        config.openai_api_key.clone(),
        config.openai_model.clone(),
    ));

    let deps = PipelineDeps {
        crawler: gateway.clone(),
        classifier: openai.clone(),
        composer: openai,
        actor: gateway,
        detector: DuplicateDetector::default(),
        pacing: PacingPolicy::from_millis(config.pace_min_ms, config.pace_max_ms),
    };

    let scheduler = Arc::new(JobScheduler::new(
        Arc::clone(&store),
        deps,
        SchedulerConfig::default(),
    ));
    Arc::clone(&scheduler).spawn_cleanup();

    let app = build_app(AppState { scheduler, store });

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
