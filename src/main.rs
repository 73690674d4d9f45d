use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use boleto_sync_api::auth;
use boleto_sync_api::config::Config;
use boleto_sync_api::db::Database;
use boleto_sync_api::handlers::{self, AppState};

/// Main entry point.
///
/// Initializes tracing, configuration, the database pool and the HTTP
/// routes (management routes behind the API-key middleware, public link
/// resolution open), then starts the Axum server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "boleto_sync_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize database connection pool
    let db = Database::new(&config.database_url).await?;
    tracing::info!("Database connection pool established");

    // Per-cliente single-flight guard for synchronization runs. The TTL is a
    // safety net: entries are invalidated explicitly when a sync finishes.
    let sync_in_flight = Cache::builder()
        .time_to_live(Duration::from_secs(3600))
        .max_capacity(10_000)
        .build();
    tracing::info!("Sync single-flight guard initialized");

    let app_state = Arc::new(AppState {
        db: db.pool.clone(),
        config: config.clone(),
        sync_in_flight,
    });

    // Rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .unwrap(),
    );

    // Management routes: gated by the X-API-Key middleware.
    let protected_routes = Router::new()
        .route("/api/boletos/sincronizar", post(handlers::sincronizar_boletos))
        .route("/api/boletos", get(handlers::listar_boletos))
        .route("/api/boletos/detalhe/:nosso_numero", get(handlers::detalhe_boleto))
        .route("/api/boletos/pdf/:nosso_numero", get(handlers::pdf_boleto))
        .route(
            "/api/boletos/consultor/:consultor_id/resumo",
            get(handlers::resumo_consultor),
        )
        .route("/api/boletos/:id", get(handlers::buscar_boleto))
        .route("/api/links-consultor", get(handlers::listar_links))
        .route("/api/links-consultor/gerar", post(handlers::gerar_links))
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            auth::require_api_key,
        ))
        .layer(
            ServiceBuilder::new()
                // Request size limit: 5MB max payload
                .layer(RequestBodyLimitLayer::new(5 * 1024 * 1024))
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    // Public routes: the slug/short code itself is the capability.
    let public_routes = Router::new()
        .route("/api/consultor-link/s/:short_code", get(handlers::resolver_short_code))
        .route("/api/consultor-link/:slug", get(handlers::resolver_link));

    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
