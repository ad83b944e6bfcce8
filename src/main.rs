use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use credit_scoring_api::artifacts;
use credit_scoring_api::config::Config;
use credit_scoring_api::handlers::AppState;
use credit_scoring_api::routes;

/// Main entry point for the application.
///
/// This function initializes the application, including:
/// - Logging and tracing.
/// - Configuration loading.
/// - The pipeline artifact and the customer dataset.
/// - Explanation caches (inside `AppState`).
/// - HTTP routes and middleware (CORS, body limit, rate limiting).
///
/// Any artifact problem aborts before the listener binds.
///
/// # Returns
///
/// * `anyhow::Result<()>` - Ok if the server runs successfully, or an error if initialization fails.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "credit_scoring_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let loaded = artifacts::load(&config).context("Startup aborted")?;
    tracing::info!(
        "✓ Pipeline loaded: {} ({} features)",
        loaded.scorer.pipeline().terminal().kind(),
        loaded.scorer.features().len()
    );

    let port = config.port;
    let rate_per_second = config.rate_limit_per_second;
    let rate_burst = config.rate_limit_burst;
    let app_state = Arc::new(AppState::new(config, loaded.scorer, loaded.fingerprint));

    // Rate limiting per client IP on the endpoints that run the model
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(rate_per_second)
            .burst_size(rate_burst)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .context("Invalid rate limit configuration")?,
    );
    tracing::info!(
        "Rate limiter configured: {} req/sec per IP, burst of {}",
        rate_per_second,
        rate_burst
    );

    let scoring = routes::scoring_routes().layer(GovernorLayer {
        config: governor_conf,
    });
    let app = routes::build_router(app_state, scoring);

    // Start server
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
