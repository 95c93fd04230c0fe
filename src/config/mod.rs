pub mod build_info;

use sentry::types::Dsn;
use std::path::PathBuf;
use thiserror::Error;

use crate::github::DEFAULT_API_BASE;
use crate::ingest::admission::AllowList;

pub use build_info::BuildInfo;

/// Fatal configuration problems. Any of these aborts startup: the service
/// must never begin serving with a partially configured credential core.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),

    #[error("invalid value for {name}: {message}")]
    InvalidVar { name: &'static str, message: String },

    #[error("GitHub App private key at {} could not be read: {source}", path.display())]
    KeyUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("GitHub App private key file at {} is empty", path.display())]
    KeyEmpty { path: PathBuf },

    #[error("GitHub App private key at {} is not a valid RSA private key: {message}", path.display())]
    KeyInvalid { path: PathBuf, message: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub github: GitHubConfig,
    /// Event types the admission gate will accept. May be empty, in which
    /// case every delivery is rejected.
    pub allowed_events: AllowList,
    pub log_level: String,
    pub sentry: SentryConfig,
    /// Shared secret for `X-Hub-Signature-256` verification on `/ingest`.
    /// Unset disables signature checking.
    pub ingest_secret: Option<String>,
    pub build: BuildInfo,
}

#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub app_id: String,
    pub installation_id: u64,
    pub private_key_path: PathBuf,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct SentryConfig {
    pub dsn: Dsn,
    pub environment: String,
    pub release: String,
}

impl Config {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let app_id = required(&lookup, "GITHUB_APP_ID")?;

        let installation_id = required(&lookup, "GITHUB_APP_INSTALLATION_ID")?
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidVar {
                name: "GITHUB_APP_INSTALLATION_ID",
                message: "must be a positive integer".to_string(),
            })?;

        let private_key_path = PathBuf::from(required(&lookup, "GITHUB_APP_PRIVATE_KEY_PATH")?);

        let allowed_events = AllowList::parse(&required(&lookup, "ALLOWED_INGEST_PAYLOADS")?);

        let dsn = required(&lookup, "SENTRY_DSN")?
            .parse::<Dsn>()
            .map_err(|_| ConfigError::InvalidVar {
                name: "SENTRY_DSN",
                message: "must be a valid Sentry DSN".to_string(),
            })?;

        let build = match lookup("DOCKER_METADATA_OUTPUT_JSON") {
            Some(raw) => BuildInfo::parse(&raw).map_err(|message| ConfigError::InvalidVar {
                name: "DOCKER_METADATA_OUTPUT_JSON",
                message,
            })?,
            None => BuildInfo::empty(),
        };

        let release = lookup("SENTRY_RELEASE").unwrap_or_else(|| build.default_release());
        let environment =
            lookup("DEPLOYMENT_ENVIRONMENT").unwrap_or_else(|| "unknown".to_string());
        let log_level = lookup("APP_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let api_base = lookup("GITHUB_API_BASE")
            .map(|base| base.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        let ingest_secret = lookup("INGEST_WEBHOOK_SECRET").filter(|s| !s.is_empty());

        Ok(Self {
            github: GitHubConfig {
                app_id,
                installation_id,
                private_key_path,
                api_base,
            },
            allowed_events,
            log_level,
            sentry: SentryConfig {
                dsn,
                environment,
                release,
            },
            ingest_secret,
            build,
        })
    }
}

fn required<F>(lookup: &F, name: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        Some(_) => Err(ConfigError::InvalidVar {
            name,
            message: "must not be empty".to_string(),
        }),
        None => Err(ConfigError::MissingVar(name)),
    }
}
