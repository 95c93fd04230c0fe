//! Prometheus metrics endpoint and HTTP request tracking middleware.
//!
//! This module provides:
//! - A `/metrics` endpoint that returns Prometheus-formatted metrics
//! - Middleware for tracking HTTP request counts and durations
//! - Helper functions to record ingest, admission and token exchange metrics

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Instant;

use crate::AppState;

// Metric names as constants for consistency
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
pub const INGEST_REQUESTS_TOTAL: &str = "ingest_requests_total";
pub const ADMISSION_DECISIONS_TOTAL: &str = "admission_decisions_total";
pub const TOKEN_EXCHANGES_TOTAL: &str = "token_exchanges_total";
pub const TOKEN_EXCHANGE_DURATION_SECONDS: &str = "token_exchange_duration_seconds";

/// Initialize the Prometheus metrics recorder and return a handle for rendering metrics.
///
/// This should be called once during application startup.
pub fn init_metrics() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    // Register metric descriptions
    describe_counter!(
        HTTP_REQUESTS_TOTAL,
        "Total number of HTTP requests received"
    );
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(
        INGEST_REQUESTS_TOTAL,
        "Total number of ingest requests by outcome (received/succeeded/failed)"
    );
    describe_counter!(
        ADMISSION_DECISIONS_TOTAL,
        "Total number of admission gate decisions by decision and reason"
    );
    describe_counter!(
        TOKEN_EXCHANGES_TOTAL,
        "Total number of installation token exchanges by outcome"
    );
    describe_histogram!(
        TOKEN_EXCHANGE_DURATION_SECONDS,
        "Installation token exchange duration in seconds"
    );

    handle
}

/// GET /metrics - Returns Prometheus-formatted metrics.
///
/// This endpoint is accessible without authentication.
pub async fn metrics_endpoint(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    // Render metrics in Prometheus text format
    let handle = state.metrics_handle.as_ref();
    match handle {
        Some(h) => (StatusCode::OK, h.render()),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Metrics not initialized".to_string(),
        ),
    }
}

/// Middleware to track HTTP request metrics.
///
/// Records:
/// - `http_requests_total` counter with method, path, and status labels
/// - `http_request_duration_seconds` histogram with method and path labels
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();

    // Extract path pattern (use matched path for templates like /repos/:id)
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|mp| mp.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let method = request.method().to_string();

    // Process the request
    let response = next.run(request).await;

    // Record metrics
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

/// Record an ingest request arriving, before any gating.
pub fn record_ingest_received() {
    counter!(INGEST_REQUESTS_TOTAL, "outcome" => "received").increment(1);
}

/// Record an ingest request that ended with an open pull request.
pub fn record_ingest_succeeded() {
    counter!(INGEST_REQUESTS_TOTAL, "outcome" => "succeeded").increment(1);
}

/// Record an ingest request that was rejected or failed along the way.
pub fn record_ingest_failed() {
    counter!(INGEST_REQUESTS_TOTAL, "outcome" => "failed").increment(1);
}

/// Record a delivery the admission gate let through.
pub fn record_admission_accepted() {
    counter!(ADMISSION_DECISIONS_TOTAL, "decision" => "accepted", "reason" => "allow_list")
        .increment(1);
}

/// Record a delivery the admission gate turned away.
pub fn record_admission_rejected(reason: &'static str) {
    counter!(ADMISSION_DECISIONS_TOTAL, "decision" => "rejected", "reason" => reason).increment(1);
}

/// Record one installation token exchange attempt.
pub fn record_token_exchange(outcome: &'static str, duration_seconds: f64) {
    counter!(TOKEN_EXCHANGES_TOTAL, "outcome" => outcome).increment(1);
    histogram!(TOKEN_EXCHANGE_DURATION_SECONDS).record(duration_seconds);
}
