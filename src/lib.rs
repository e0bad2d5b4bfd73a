//! PFD Backend - process flow diagram editor API server and client

pub mod canvas;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod logging;
pub mod media;
pub mod routes;

#[cfg(test)]
mod test_utils;

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, limit::RequestBodyLimitLayer,
    services::ServeDir, trace::TraceLayer,
};

use crate::config::{AppConfig, MEDIA_URL_PREFIX};
use crate::db::{MemoryStore, PgStore, Store};

/// Room for two maximum-size media files plus the text fields of a form
const MAX_BODY_SIZE: usize = 12 * 1024 * 1024;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: AppConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
        }
    }
}

/// Configure CORS from environment variables.
/// Uses ALLOWED_ORIGINS (comma-separated) or FRONTEND_ORIGIN.
/// Falls back to the local frontend dev servers.
pub fn configure_cors() -> CorsLayer {
    let allowed_origins = std::env::var("ALLOWED_ORIGINS")
        .ok()
        .and_then(|s| {
            let origins: Vec<HeaderValue> = s
                .split(',')
                .filter_map(|origin| origin.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                None
            } else {
                Some(origins)
            }
        })
        .or_else(|| {
            std::env::var("FRONTEND_ORIGIN")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(|origin| vec![origin])
        })
        .unwrap_or_else(|| {
            vec![
                HeaderValue::from_static("http://localhost:3000"),
                HeaderValue::from_static("http://127.0.0.1:3000"),
                HeaderValue::from_static("http://localhost:5173"),
            ]
        });

    CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ])
        .allow_credentials(true)
}

/// Create and configure the application router.
pub fn create_app(state: AppState) -> Router {
    let cors = configure_cors();
    let media = ServeDir::new(&state.config.media_dir);

    Router::new()
        .route("/api/auth/register/", post(routes::auth::register))
        .route("/api/auth/login/", post(routes::auth::login))
        .route("/api/auth/refresh/", post(routes::auth::refresh))
        .route("/api/auth/logout/", post(routes::auth::logout))
        .route(
            "/api/components/",
            get(routes::components::list_components).post(routes::components::create_component),
        )
        .route(
            "/api/components/{id}/",
            get(routes::components::get_component),
        )
        .route(
            "/api/project/",
            get(routes::projects::list_projects).post(routes::projects::create_project),
        )
        .route(
            "/api/project/{id}/",
            get(routes::projects::get_project)
                .put(routes::projects::update_project)
                .patch(routes::projects::update_project)
                .delete(routes::projects::delete_project),
        )
        .route(
            "/api/project/{id}/export/",
            get(routes::projects::export_project),
        )
        .route(
            "/api/project/{id}/equipment/",
            get(routes::projects::equipment_list),
        )
        .route("/health", get(routes::health::health_ping))
        .route("/health/detailed", get(routes::health::health_detailed))
        .route("/health/database", get(routes::health::health_database))
        .nest_service(MEDIA_URL_PREFIX, media)
        .with_state(state)
        .layer(logging::middleware::propagate_request_id_layer())
        .layer(middleware::from_fn(logging::middleware::log_request))
        .layer(logging::middleware::request_id_layer())
        .layer(TraceLayer::new_for_http())
        // Compress responses with gzip/br/zstd automatically
        .layer(CompressionLayer::new())
        // Multipart uploads need more than axum's 2 MB default
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(cors)
}

/// Pick the storage backend: Postgres when DATABASE_URL is set, otherwise an
/// in-memory store that loses everything on restart.
async fn init_store() -> Result<Arc<dyn Store>, BoxError> {
    if std::env::var("DATABASE_URL").is_err() {
        tracing::warn!("DATABASE_URL not set. Using in-memory store; data will not persist.");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let pool = db::init_pool(None).await?;
    db::run_migrations(&pool).await?;
    Ok(Arc::new(PgStore::new(pool)))
}

/// Run the server (used by main).
pub async fn run() -> Result<(), BoxError> {
    dotenvy::dotenv().ok();

    // Guards must be held for the programme's lifetime or buffered log lines
    // are lost.
    let _log_guards = logging::init(&logging::LogConfig::default());

    routes::health::init_start_time();

    let config = AppConfig::default();

    // Refuse to start in production with the insecure default JWT secret.
    if config.is_production() && config.uses_default_secret() {
        return Err("JWT_SECRET must be set to a secure, unique value in production. \
                    Refusing to start with the default secret."
            .into());
    }
    if config.uses_default_secret() {
        tracing::warn!("SECURITY: JWT_SECRET is not set; using the development default.");
    }

    let store = init_store().await?;

    tokio::fs::create_dir_all(&config.media_dir).await?;
    tracing::info!("Serving media from {}", config.media_dir.display());

    let addr = config.bind_addr()?;
    let app = create_app(AppState::new(store, config));

    tracing::info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
