use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use reqwest::header;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use super::assertion::{sign, SignedAssertion};
use super::client::truncate_body;
use super::error::TokenError;
use super::identity::AppIdentity;
use super::{GITHUB_API_VERSION, USER_AGENT};

/// Tokens within this margin of expiry count as stale and trigger a refresh
/// on the next request.
pub const REFRESH_MARGIN_SECS: i64 = 5 * 60;

/// Hard deadline for a single token exchange round trip.
pub const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Time source for freshness decisions. Swapped for a manual clock in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A short-lived installation access token issued by GitHub.
///
/// Values are snapshots: a caller keeps whatever token it was handed until
/// that token's own expiry, regardless of what the cache does afterwards.
#[derive(Clone)]
pub struct InstallationToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl InstallationToken {
    pub(crate) fn new(token: String, expires_at: DateTime<Utc>) -> Self {
        Self { token, expires_at }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl fmt::Debug for InstallationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallationToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// One round trip that swaps a signed app assertion for an installation
/// access token. Implemented by the real GitHub endpoint and by test doubles.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    async fn exchange(
        &self,
        assertion: &SignedAssertion,
        installation_id: u64,
    ) -> Result<InstallationToken, TokenError>;
}

type SharedExchange = Shared<BoxFuture<'static, Result<InstallationToken, TokenError>>>;

/// Cache slot lifecycle. `Refreshing` holds the shared in-flight exchange;
/// every caller that arrives while it is pending awaits the same future.
enum SlotState {
    Empty,
    Refreshing(SharedExchange),
    Valid(InstallationToken),
}

/// Process-wide installation token cache.
///
/// At most one exchange is in flight at any time. A failed exchange empties
/// the slot and hands the error to every waiter; nothing retries on its own,
/// the next request starts the next attempt.
#[derive(Clone)]
pub struct InstallationTokenCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    identity: AppIdentity,
    exchanger: Arc<dyn TokenExchanger>,
    clock: Arc<dyn Clock>,
    refresh_margin: chrono::Duration,
    exchange_timeout: Duration,
    slot: Mutex<SlotState>,
}

impl InstallationTokenCache {
    pub fn new(identity: AppIdentity, exchanger: Arc<dyn TokenExchanger>) -> Self {
        Self::with_clock(identity, exchanger, Arc::new(SystemClock))
    }

    pub fn with_clock(
        identity: AppIdentity,
        exchanger: Arc<dyn TokenExchanger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                identity,
                exchanger,
                clock,
                refresh_margin: chrono::Duration::seconds(REFRESH_MARGIN_SECS),
                exchange_timeout: EXCHANGE_TIMEOUT,
                slot: Mutex::new(SlotState::Empty),
            }),
        }
    }

    /// Return a token that is valid for at least the refresh margin,
    /// exchanging a fresh one if needed.
    ///
    /// The slot mutex is only held to inspect and swap the state, never
    /// across an await point.
    pub async fn installation_token(&self) -> Result<InstallationToken, TokenError> {
        let exchange = {
            let mut slot = self.inner.slot.lock();
            match &*slot {
                SlotState::Valid(token) if self.inner.is_fresh(token) => {
                    return Ok(token.clone());
                }
                SlotState::Refreshing(exchange) => exchange.clone(),
                _ => {
                    let exchange = self.begin_exchange();
                    *slot = SlotState::Refreshing(exchange.clone());
                    exchange
                }
            }
        };
        exchange.await
    }

    fn begin_exchange(&self) -> SharedExchange {
        let inner = Arc::clone(&self.inner);
        async move {
            let result = inner.exchange_once().await;
            let mut slot = inner.slot.lock();
            *slot = match &result {
                Ok(token) => SlotState::Valid(token.clone()),
                Err(_) => SlotState::Empty,
            };
            result
        }
        .boxed()
        .shared()
    }
}

impl CacheInner {
    fn is_fresh(&self, token: &InstallationToken) -> bool {
        token.expires_at() - self.refresh_margin > self.clock.now()
    }

    async fn exchange_once(&self) -> Result<InstallationToken, TokenError> {
        let started = Instant::now();
        let result = self.perform_exchange().await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.metric_label(),
        };
        crate::api::metrics::record_token_exchange(outcome, started.elapsed().as_secs_f64());
        match &result {
            Ok(token) => {
                info!(expires_at = %token.expires_at(), "obtained installation access token")
            }
            Err(e) => error!(
                error = %e,
                detail = ?e.upstream_detail(),
                "installation token exchange failed"
            ),
        }
        result
    }

    async fn perform_exchange(&self) -> Result<InstallationToken, TokenError> {
        let assertion = sign(&self.identity, self.clock.now())?;
        let exchange = self
            .exchanger
            .exchange(&assertion, self.identity.installation_id());
        match tokio::time::timeout(self.exchange_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(TokenError::Timeout(self.exchange_timeout)),
        }
    }
}

/// The production exchanger: POSTs the app assertion to the installation
/// access token endpoint.
pub struct GitHubTokenExchanger {
    http: reqwest::Client,
    api_base: String,
}

impl GitHubTokenExchanger {
    pub fn new(http: reqwest::Client, api_base: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    token: String,
    expires_at: String,
}

#[async_trait]
impl TokenExchanger for GitHubTokenExchanger {
    async fn exchange(
        &self,
        assertion: &SignedAssertion,
        installation_id: u64,
    ) -> Result<InstallationToken, TokenError> {
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_base, installation_id
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(assertion.token())
            .header(header::ACCEPT, "application/vnd.github+json")
            .header(header::USER_AGENT, USER_AGENT)
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
            .send()
            .await
            .map_err(|e| TokenError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                status = status.as_u16(),
                installation_id, "token exchange rejected by GitHub"
            );
            return Err(TokenError::Status {
                status: status.as_u16(),
                message: truncate_body(&body),
            });
        }

        let payload: AccessTokenResponse = response
            .json()
            .await
            .map_err(|e| TokenError::Malformed(e.to_string()))?;

        let expires_at = DateTime::parse_from_rfc3339(&payload.expires_at)
            .map_err(|e| TokenError::Malformed(format!("bad expires_at timestamp: {e}")))?
            .with_timezone(&Utc);

        Ok(InstallationToken::new(payload.token, expires_at))
    }
}
