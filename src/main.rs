mod config;
mod db;
mod error;
mod events;
mod handlers;
mod middleware;
mod models;
mod services;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::Database;
use crate::events::EventBus;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<Config>,
    pub events: Arc<EventBus>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hashvault=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting hashvault...");

    // Load configuration
    let config = Config::load()?;
    let config = Arc::new(config);
    tracing::info!("Configuration loaded");

    // Initialize database
    let db = Database::new(&config.database.path).await?;
    db.run_migrations().await?;
    tracing::info!("Database initialized");

    // Event bus, constructed here and injected; delivery to external
    // consumers runs as a task owned by this bootstrap.
    let events = Arc::new(EventBus::new(config.events.channel_capacity));
    let event_task = tokio::spawn(deliver_events(events.subscribe()));

    // Create app state
    let state = AppState {
        db,
        config: config.clone(),
        events,
    };

    // Build router
    let app = create_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    event_task.abort();
    Ok(())
}

/// Forward domain events to external delivery (stdout audit trail here;
/// notification fan-out lives outside the engine)
async fn deliver_events(mut rx: broadcast::Receiver<events::DomainEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => tracing::info!(target: "hashvault::events", ?event, "domain event"),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "event subscriber lagging");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Files
        .route("/files/upload", post(handlers::file::upload_file))
        .route("/files", get(handlers::file::list_files))
        .route("/files/public", get(handlers::file::list_public_files))
        .route(
            "/files/:id",
            get(handlers::file::get_file)
                .patch(handlers::file::update_file)
                .delete(handlers::file::delete_file),
        )
        .route("/files/:id/download", get(handlers::file::download_file))
        // User views
        .route("/user/storage", get(handlers::user::get_storage_usage))
        .route("/user/stats", get(handlers::user::get_user_stats))
        // System stats
        .route("/stats", get(handlers::stats::get_system_stats))
        // Admin
        .route(
            "/admin/users/:id/quota",
            put(handlers::admin::update_user_quota),
        )
        // Payload size ceilings are enforced by the outer layer
        .layer(DefaultBodyLimit::disable())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::identity::identity_middleware,
        ));

    // Combine all routes under /api/v1
    Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
