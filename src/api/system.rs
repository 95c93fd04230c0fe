//! System-level API endpoints: liveness, build and runtime information.

use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::AppState;

/// GET /health - Liveness probe.
///
/// Touches nothing: no GitHub calls, no token exchange. A healthy answer
/// only means the process is serving.
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// GET /build-info - Image build metadata, verbatim as the build pipeline
/// emitted it.
pub async fn build_info(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(state.config.build.as_json().clone())
}

/// Runtime state snapshot for operators
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeInfo {
    /// Whether events are being forwarded to Sentry
    pub sentry_enabled: bool,
    /// Operator-supplied deployment environment name
    pub deployment_environment: String,
    /// Seconds since the process started serving
    pub uptime_seconds: u64,
    /// Ingest requests seen since startup
    pub ingest_requests_received: u64,
    /// Ingest requests that ended with an open pull request
    pub ingest_requests_succeeded: u64,
}

/// GET /runtime-info - Current process state.
pub async fn runtime_info(State(state): State<Arc<AppState>>) -> Json<RuntimeInfo> {
    Json(RuntimeInfo {
        sentry_enabled: state.sentry_enabled,
        deployment_environment: state.config.sentry.environment.clone(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        ingest_requests_received: state.counters.received.load(Ordering::Relaxed),
        ingest_requests_succeeded: state.counters.succeeded.load(Ordering::Relaxed),
    })
}
