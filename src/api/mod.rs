pub mod error;
mod ingest;
pub mod metrics;
mod system;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // allow_credentials cannot be combined with wildcard origins or headers.
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("http://localhost:3000"))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static("x-github-event"),
            HeaderName::from_static("x-github-delivery"),
            HeaderName::from_static("x-hub-signature-256"),
        ])
        .allow_credentials(true);

    Router::new()
        .route("/health", get(system::health))
        .route("/build-info", get(system::build_info))
        .route("/runtime-info", get(system::runtime_info))
        .route("/metrics", get(metrics::metrics_endpoint))
        .route("/ingest", post(ingest::ingest))
        .layer(middleware::from_fn(metrics::metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
