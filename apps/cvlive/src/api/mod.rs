//! # cvlive HTTP API
//!
//! The edit surface of a running chart, built on axum.
//!
//! ## Endpoints
//!
//! - `GET    /health` - Health check (never authenticated)
//! - `GET    /chart` - The chart in file format
//! - `GET    /registry` - Available operations
//! - `GET    /status` - Per-node state, outputs and error flags
//! - `POST   /nodes/image` - Add an uploaded-image source
//! - `POST   /nodes/structured` - Add a structured-data source
//! - `POST   /nodes/operation` - Add an operation node
//! - `DELETE /nodes/{id}` - Remove a node
//! - `PUT    /nodes/{id}/params/{name}/value` - Set a parameter literal
//! - `PUT    /nodes/{id}/params/{name}/source` - Bind a parameter source
//! - `PUT    /nodes/{id}/payload` - Replace a structured payload
//! - `PUT    /nodes/{id}/name` - Rename a node
//! - `POST   /refresh` - Run a pass and return its report
//!
//! Authentication and CORS come from `Config` (`api_key`, `cors_origins`).

mod auth;
mod handlers;
mod types;

pub use auth::ApiKey;
pub use types::{
    AddImageRequest, AddOperationRequest, AddStructuredRequest, ApiError, EditResponse,
    ErrorResponse, HealthResponse, NodeCreatedResponse, NodeStatusJson, RemoveNodeResponse,
    RenameRequest, SetPayloadRequest, SetSourceRequest, SetValueRequest, StatusResponse,
};

use crate::config::Config;
use crate::driver::Driver;
use crate::service::ComputeService;
use crate::sink::StatusBoard;
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{delete, get, post, put},
};
use cvlive_core::CvliveError;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Maximum request body (structured payloads included).
const MAX_BODY_SIZE: usize = 2 * 1024 * 1024;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state.
pub struct AppState<S> {
    /// The driver owning the session.
    pub driver: Arc<Driver<S>>,
    /// Latest per-node outcomes, fed by the driver.
    pub board: StatusBoard,
    /// Whether edits request a pass.
    pub auto_refresh: bool,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            driver: Arc::clone(&self.driver),
            board: self.board.clone(),
            auto_refresh: self.auto_refresh,
        }
    }
}

impl<S: ComputeService> AppState<S> {
    /// Create state over a driver that already reports to `board`.
    #[must_use]
    pub fn new(driver: Arc<Driver<S>>, board: StatusBoard, auto_refresh: bool) -> Self {
        Self {
            driver,
            board,
            auto_refresh,
        }
    }

    /// Request a pass after an edit. Returns whether one was requested.
    pub fn after_edit(&self) -> bool {
        if self.auto_refresh {
            // Detached: the pass outlives the request.
            drop(self.driver.request_pass());
        }
        self.auto_refresh
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

const ALLOWED_METHODS: [Method; 5] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::OPTIONS,
];

/// Build the CORS layer from `cors_origins`.
///
/// `*` allows everything; unset or unparsable falls back to localhost.
fn build_cors_layer(origins: Option<&str>) -> CorsLayer {
    match origins {
        Some("*") => {
            tracing::warn!("CORS: Allowing ALL origins. This is insecure for production!");
            CorsLayer::permissive()
        }
        Some(list) => {
            let allowed: Vec<HeaderValue> = list
                .split(',')
                .filter_map(|s| {
                    let trimmed = s.trim();
                    match trimmed.parse::<HeaderValue>() {
                        Ok(hv) => Some(hv),
                        Err(e) => {
                            tracing::warn!("CORS: Invalid origin '{}': {}", trimmed, e);
                            None
                        }
                    }
                })
                .collect();
            if allowed.is_empty() {
                tracing::warn!("CORS: No valid origins configured, defaulting to localhost only");
                build_localhost_cors()
            } else {
                CorsLayer::new()
                    .allow_origin(allowed)
                    .allow_methods(ALLOWED_METHODS)
                    .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
            }
        }
        None => build_localhost_cors(),
    }
}

fn build_localhost_cors() -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        "http://localhost:3000",
        "http://localhost:8080",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8080",
    ]
    .into_iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(ALLOWED_METHODS)
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the router with all endpoints and middleware.
///
/// Middleware, outer to inner: tracing, CORS, body limit, authentication.
pub fn create_router<S: ComputeService>(state: AppState<S>, config: &Config) -> Router {
    let cors = build_cors_layer(config.cors_origins.as_deref());

    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/chart", get(handlers::chart_handler::<S>))
        .route("/registry", get(handlers::registry_handler::<S>))
        .route("/status", get(handlers::status_handler::<S>))
        .route("/refresh", post(handlers::refresh_handler::<S>))
        .route("/nodes/image", post(handlers::add_image_handler::<S>))
        .route("/nodes/structured", post(handlers::add_structured_handler::<S>))
        .route("/nodes/operation", post(handlers::add_operation_handler::<S>))
        .route("/nodes/{id}", delete(handlers::remove_node_handler::<S>))
        .route(
            "/nodes/{id}/params/{name}/value",
            put(handlers::set_value_handler::<S>),
        )
        .route(
            "/nodes/{id}/params/{name}/source",
            put(handlers::set_source_handler::<S>),
        )
        .route("/nodes/{id}/payload", put(handlers::set_payload_handler::<S>))
        .route("/nodes/{id}/name", put(handlers::rename_handler::<S>));

    match config.api_key.as_deref().filter(|k| !k.is_empty()) {
        Some(key) => {
            tracing::info!("API key authentication enabled");
            router = router.layer(axum_middleware::from_fn_with_state(
                ApiKey(Arc::from(key)),
                auth::api_key_auth_middleware,
            ));
        }
        None => {
            tracing::warn!(
                "API key authentication DISABLED - all endpoints are publicly accessible! \
                 Set CVLIVE_API_KEY to enable authentication."
            );
        }
    }

    router
        .layer(axum::extract::DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Serve the API until Ctrl-C.
pub async fn run_server<S: ComputeService>(
    state: AppState<S>,
    config: &Config,
) -> Result<(), CvliveError> {
    let addr = config.bind_addr();
    let router = create_router(state, config);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| CvliveError::IoError(format!("Bind failed: {}", e)))?;

    tracing::info!("cvlive HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
            }
        })
        .await
        .map_err(|e| CvliveError::IoError(format!("Server error: {}", e)))
}
