use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fiv_match_api::abuse::{spawn_pruner, AbuseGate, PRUNE_INTERVAL};
use fiv_match_api::config::Config;
use fiv_match_api::db::{ensure_schema, Database};
use fiv_match_api::email::ResendEmailClient;
use fiv_match_api::handlers::{self, AppState};
use fiv_match_api::repository::PgStore;
use fiv_match_api::routing::RoutingResolver;

/// Main entry point for the application.
///
/// This function initializes the application, including:
/// - Logging and tracing.
/// - Configuration loading.
/// - Database connection and schema.
/// - Routing rules, email client and abuse gate.
/// - HTTP routes and middleware (CORS, Rate Limiting).
///
/// It then starts the Axum server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fiv_match_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize database connection pool
    let db = Database::new(&config.database_url).await?;
    ensure_schema(&db.pool).await?;
    tracing::info!("Database connection pool established");

    // A missing default recipient is fatal here, not at first dispatch
    let routing = Arc::new(RoutingResolver::new(
        &config.routing_rules,
        config.default_routing_email.clone(),
    )?);
    tracing::info!(
        "Routing resolver ready: {} rules, default {}",
        routing.rule_count(),
        routing.default_email()
    );

    let email = Arc::new(ResendEmailClient::new(config.email.clone())?);
    tracing::info!("✓ Email client initialized: {}", config.email.base_url);

    let gate = AbuseGate::in_memory(config.abuse.clone());
    let _pruner = spawn_pruner(gate.limiter(), PRUNE_INTERVAL);

    let store = Arc::new(PgStore::new(db.pool.clone()));
    let port = config.port;
    let app_state = Arc::new(AppState::new(
        config,
        store.clone(),
        store,
        email,
        routing,
        gate,
    ));

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid governor configuration"))?,
    );

    // Periodically drop governor state for idle clients
    let governor_limiter = governor_conf.limiter().clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            governor_limiter.retain_recent();
        }
    });

    let protected_routes = handlers::api_routes().layer(GovernorLayer {
        config: governor_conf,
    });

    // Health check bypasses rate limiting
    let app = handlers::build_router(app_state, protected_routes);

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
