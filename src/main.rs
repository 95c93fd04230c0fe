use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ingestr::config::Config;
use ingestr::github::{AppIdentity, GitHubTokenExchanger, InstallationTokenCache};
use ingestr::AppState;

#[derive(Parser, Debug)]
#[command(name = "ingestr")]
#[command(author, version, about = "GitHub App webhook ingestion service", long_about = None)]
struct Cli {
    /// Override log level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Address to listen on
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8000")]
    listen: SocketAddr,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration first; a broken environment should fail here,
    // not after the listener is up.
    let config = Config::from_env().context("configuration error")?;

    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.log_level)
        .clone();

    // The guard must outlive the async runtime so shutdown flushes events.
    let sentry_guard = sentry::init(sentry::ClientOptions {
        dsn: Some(config.sentry.dsn.clone()),
        environment: Some(config.sentry.environment.clone().into()),
        release: Some(config.sentry.release.clone().into()),
        ..Default::default()
    });

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(sentry::integrations::tracing::layer())
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("could not start async runtime")?;

    runtime.block_on(run(config, cli.listen, sentry_guard.is_enabled()))
}

async fn run(config: Config, listen: SocketAddr, sentry_enabled: bool) -> Result<()> {
    tracing::info!("Starting Ingestr v{}", env!("CARGO_PKG_VERSION"));

    // Load and validate the App private key up front
    let identity = AppIdentity::load(
        config.github.app_id.clone(),
        config.github.installation_id,
        &config.github.private_key_path,
    )?;
    tracing::info!(
        app_id = %identity.app_id(),
        installation_id = identity.installation_id(),
        key_path = %config.github.private_key_path.display(),
        "GitHub App private key loaded"
    );

    // One HTTP client for everything; reqwest clients share their pool
    // across clones.
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("could not build HTTP client")?;

    let exchanger = Arc::new(GitHubTokenExchanger::new(
        http.clone(),
        config.github.api_base.clone(),
    ));
    let tokens = InstallationTokenCache::new(identity, exchanger);

    // Initialize Prometheus metrics
    let metrics_handle = ingestr::api::metrics::init_metrics();

    if config.allowed_events.is_empty() {
        tracing::warn!("admission allow-list is empty, every delivery will be rejected");
    } else {
        tracing::info!(
            allowed = config.allowed_events.len(),
            "admission allow-list loaded"
        );
    }

    let state =
        Arc::new(AppState::new(config, http, tokens, sentry_enabled).with_metrics(metrics_handle));

    let app = ingestr::api::create_router(state);

    let listener = tokio::net::TcpListener::bind(listen).await?;
    tracing::info!("API server listening on http://{}", listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
