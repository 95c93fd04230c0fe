pub mod api;
pub mod config;
pub mod github;
pub mod ingest;

use config::Config;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicU64;
use std::time::Instant;

use crate::github::InstallationTokenCache;
use crate::ingest::AdmissionGate;

/// Process-lifetime ingest counters surfaced on `/runtime-info`.
#[derive(Debug, Default)]
pub struct IngestCounters {
    pub received: AtomicU64,
    pub succeeded: AtomicU64,
}

pub struct AppState {
    pub config: Config,
    pub http: reqwest::Client,
    pub tokens: InstallationTokenCache,
    pub gate: AdmissionGate,
    pub counters: IngestCounters,
    pub started_at: Instant,
    pub sentry_enabled: bool,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        config: Config,
        http: reqwest::Client,
        tokens: InstallationTokenCache,
        sentry_enabled: bool,
    ) -> Self {
        let gate = AdmissionGate::new(config.allowed_events.clone());
        Self {
            config,
            http,
            tokens,
            gate,
            counters: IngestCounters::default(),
            started_at: Instant::now(),
            sentry_enabled,
            metrics_handle: None,
        }
    }

    /// Set the Prometheus metrics handle
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}
