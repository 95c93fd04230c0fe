use axum::{extract::State, http::HeaderMap, Json};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::error::{ApiError, ErrorDetails, ValidationErrorBuilder};
use crate::api::metrics;
use crate::github::GitHubClient;
use crate::ingest::admission::{IngestDecision, RejectReason};
use crate::ingest::payload::{self, IngestPayload};
use crate::ingest::pipeline;
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Verify GitHub webhook signature (X-Hub-Signature-256 header)
fn verify_signature(secret: &str, signature_header: &str, payload: &[u8]) -> bool {
    // Signature format: sha256=<hex>
    let signature = match signature_header.strip_prefix("sha256=") {
        Some(sig) => sig,
        None => return false,
    };

    let expected = match hex::decode(signature) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(payload);

    // Use constant-time comparison
    mac.verify_slice(&expected).is_ok()
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub pr_url: String,
}

/// POST /ingest - Admit a delivery and run the ingestion pipeline.
///
/// The admission gate runs before any credential work: rejected deliveries
/// never trigger a token exchange.
pub async fn ingest(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<IngestResponse>, ApiError> {
    state.counters.received.fetch_add(1, Ordering::Relaxed);
    metrics::record_ingest_received();

    // Verify signature if a webhook secret is configured
    if let Some(ref secret) = state.config.ingest_secret {
        let signature = headers
            .get("X-Hub-Signature-256")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                tracing::warn!("ingest request missing X-Hub-Signature-256 header");
                metrics::record_ingest_failed();
                ApiError::unauthorized("Missing X-Hub-Signature-256 header")
            })?;

        if !verify_signature(secret, signature, &body) {
            tracing::warn!("ingest request signature verification failed");
            metrics::record_ingest_failed();
            return Err(ApiError::unauthorized("Signature verification failed"));
        }
        tracing::debug!("ingest request signature verified");
    }

    let delivery = headers
        .get("X-GitHub-Delivery")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    // A missing event type header admits nothing; it classifies as malformed.
    let event_type = headers
        .get("X-GitHub-Event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    match state.gate.admit(event_type) {
        IngestDecision::Accepted => {
            metrics::record_admission_accepted();
            tracing::info!(%delivery, event_type, "delivery admitted");
        }
        IngestDecision::Rejected(reason) => {
            metrics::record_admission_rejected(reason.as_str());
            metrics::record_ingest_failed();
            return Err(reject_delivery(&delivery, event_type, reason));
        }
    }

    let mut payload: IngestPayload = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!(%delivery, "could not parse ingest payload: {}", e);
        metrics::record_ingest_failed();
        ApiError::bad_request(format!("Invalid JSON payload: {e}"))
    })?;

    validate_payload(&payload).map_err(|err| {
        metrics::record_ingest_failed();
        err
    })?;

    for file in &mut payload.files {
        file.normalize();
    }

    let (owner, name) = payload.repo_parts().ok_or_else(|| {
        metrics::record_ingest_failed();
        ApiError::bad_request("Repository must be in owner/name form")
    })?;

    let token = state.tokens.installation_token().await.map_err(|e| {
        tracing::error!(%delivery, error = %e, "could not obtain installation token");
        metrics::record_ingest_failed();
        ApiError::external_service("Could not obtain GitHub installation credentials")
    })?;

    let github = GitHubClient::new(
        state.http.clone(),
        state.config.github.api_base.clone(),
        token,
    );

    let outcome = pipeline::open_pull_request(
        &github,
        owner,
        name,
        &payload.branch_suffix,
        &payload.files,
    )
    .await
    .map_err(|e| {
        metrics::record_ingest_failed();
        ApiError::from(e)
    })?;

    state.counters.succeeded.fetch_add(1, Ordering::Relaxed);
    metrics::record_ingest_succeeded();
    tracing::info!(
        %delivery,
        pr_url = %outcome.pr_url,
        branch = %outcome.branch,
        "ingestion completed"
    );

    Ok(Json(IngestResponse {
        pr_url: outcome.pr_url,
    }))
}

/// Rejections are routine traffic shaping, logged at warn or below.
fn reject_delivery(delivery: &str, event_type: &str, reason: RejectReason) -> ApiError {
    match reason {
        RejectReason::MalformedEventType => {
            tracing::warn!(%delivery, reason = reason.as_str(), "delivery rejected");
            ApiError::bad_request("Missing or malformed event type")
        }
        RejectReason::UnknownEventType | RejectReason::NotAllowed => {
            tracing::info!(%delivery, event_type, reason = reason.as_str(), "delivery rejected");
            let mut details = HashMap::new();
            details.insert(
                "reason".to_string(),
                serde_json::Value::String(reason.as_str().to_string()),
            );
            ApiError::forbidden("Event type is not permitted by this service")
                .with_details(ErrorDetails::Generic(details))
        }
    }
}

fn validate_payload(payload: &IngestPayload) -> Result<(), ApiError> {
    let mut builder = ValidationErrorBuilder::new();

    if let Err(message) = payload::validate_repo(&payload.repo) {
        builder.add("repo", message);
    }
    if let Err(message) = payload::validate_branch_suffix(&payload.branch_suffix) {
        builder.add("branch_suffix", message);
    }
    if payload.files.is_empty() {
        builder.add("files", "At least one file is required");
    }
    if payload.files.len() > payload::MAX_FILES {
        builder.add(
            "files",
            format!("Too many files (max {})", payload::MAX_FILES),
        );
    }

    let mut seen = HashSet::new();
    for (i, file) in payload.files.iter().enumerate() {
        if let Err(message) = payload::validate_file_path(&file.path) {
            builder.add(format!("files[{i}].path"), message);
        } else if !seen.insert(file.path.as_str()) {
            builder.add(format!("files[{i}].path"), "Duplicate file path");
        }
        if let Err(message) = payload::validate_file_content(&file.content) {
            builder.add(format!("files[{i}].content"), message);
        }
    }

    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BuildInfo, Config, GitHubConfig, SentryConfig};
    use crate::github::test_keys;
    use crate::github::{
        AppIdentity, InstallationToken, InstallationTokenCache, SignedAssertion, TokenError,
        TokenExchanger,
    };
    use crate::ingest::payload::IngestFile;
    use async_trait::async_trait;
    use axum::http::HeaderValue;
    use std::sync::atomic::AtomicUsize;

    const TEST_DSN: &str = "https://a94ae32be2584e0bbd7a4cbb95971fee@o1.ingest.sentry.io/42";

    /// Counts exchange attempts and fails each one, so tests can tell
    /// whether the handler ever asked for credentials.
    #[derive(Default)]
    struct CountingExchanger {
        calls: AtomicUsize,
    }

    impl CountingExchanger {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenExchanger for CountingExchanger {
        async fn exchange(
            &self,
            _assertion: &SignedAssertion,
            _installation_id: u64,
        ) -> Result<InstallationToken, TokenError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(TokenError::Transport("connection refused".into()))
        }
    }

    fn test_state(exchanger: Arc<CountingExchanger>) -> Arc<AppState> {
        let config = Config {
            github: GitHubConfig {
                app_id: "12345".to_string(),
                installation_id: 7,
                private_key_path: "/secrets/app.pem".into(),
                api_base: "https://api.github.com".to_string(),
            },
            allowed_events: crate::ingest::AllowList::parse("push"),
            log_level: "info".to_string(),
            sentry: SentryConfig {
                dsn: TEST_DSN.parse().unwrap(),
                environment: "test".to_string(),
                release: "test".to_string(),
            },
            ingest_secret: None,
            build: BuildInfo::empty(),
        };
        let identity = AppIdentity::from_parts("12345", 7, test_keys::PRIVATE_KEY_PEM);
        let tokens = InstallationTokenCache::new(identity, exchanger);
        Arc::new(AppState::new(config, reqwest::Client::new(), tokens, false))
    }

    fn event_headers(event_type: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("X-GitHub-Event", HeaderValue::from_str(event_type).unwrap());
        headers
    }

    #[tokio::test]
    async fn test_rejected_delivery_never_exchanges_a_token() {
        let exchanger = Arc::new(CountingExchanger::default());
        let state = test_state(exchanger.clone());

        // Known but not allow-listed.
        let err = ingest(
            State(state.clone()),
            event_headers("issues"),
            Bytes::from_static(b"{}"),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().starts_with("[forbidden]"));

        // Missing event type header classifies as malformed.
        let err = ingest(State(state), HeaderMap::new(), Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("[bad_request]"));

        assert_eq!(exchanger.calls(), 0);
    }

    #[tokio::test]
    async fn test_admitted_delivery_reaches_the_token_exchange() {
        let exchanger = Arc::new(CountingExchanger::default());
        let state = test_state(exchanger.clone());

        let body = br#"{
            "repo": "octo/widgets",
            "branch_suffix": "2026-01-15",
            "files": [{"path": "docs/widget.md", "content": "hello"}]
        }"#;
        let err = ingest(
            State(state),
            event_headers("push"),
            Bytes::from_static(body),
        )
        .await
        .unwrap_err();

        // The exchange ran (and failed); the failure surfaces as 502.
        assert_eq!(exchanger.calls(), 1);
        assert!(err.to_string().starts_with("[external_service_error]"));
    }

    fn sign_payload(secret: &str, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn test_verify_signature_accepts_valid() {
        let payload = br#"{"repo":"octo/widgets"}"#;
        let header = sign_payload("s3cret", payload);
        assert!(verify_signature("s3cret", &header, payload));
    }

    #[test]
    fn test_verify_signature_rejects_bad_input() {
        let payload = b"payload";
        let header = sign_payload("s3cret", payload);

        assert!(!verify_signature("wrong-secret", &header, payload));
        assert!(!verify_signature("s3cret", &header, b"tampered"));
        assert!(!verify_signature("s3cret", "sha1=abcdef", payload));
        assert!(!verify_signature("s3cret", "sha256=nothex", payload));
        assert!(!verify_signature("s3cret", "", payload));
    }

    #[test]
    fn test_validate_payload_accepts_well_formed() {
        let payload = IngestPayload {
            repo: "octo/widgets".to_string(),
            branch_suffix: "2026-01-15".to_string(),
            files: vec![IngestFile {
                path: "docs/widget.md".to_string(),
                content: "hello".to_string(),
            }],
        };
        assert!(validate_payload(&payload).is_ok());
    }

    #[test]
    fn test_validate_payload_collects_field_errors() {
        let payload = IngestPayload {
            repo: "bad repo".to_string(),
            branch_suffix: String::new(),
            files: vec![
                IngestFile {
                    path: "../escape.md".to_string(),
                    content: String::new(),
                },
                IngestFile {
                    path: "ok.md".to_string(),
                    content: "first".to_string(),
                },
                IngestFile {
                    path: "ok.md".to_string(),
                    content: "duplicate".to_string(),
                },
            ],
        };
        let err = validate_payload(&payload).unwrap_err();
        assert!(err.to_string().contains("Validation failed"));
    }

    #[test]
    fn test_validate_payload_requires_files() {
        let payload = IngestPayload {
            repo: "octo/widgets".to_string(),
            branch_suffix: "x".to_string(),
            files: vec![],
        };
        assert!(validate_payload(&payload).is_err());
    }
}
