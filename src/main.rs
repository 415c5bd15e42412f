use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use turnstile::config::{LogFormat, LoggingConfig, TurnstileConfig};
use turnstile::http::{create_router, HttpServer, RateLimitState};
use turnstile::ratelimit::{Janitor, RateLimiter};

/// Rate-limited API gateway.
#[derive(Debug, Parser)]
#[command(name = "turnstile", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "TURNSTILE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the HTTP listen address
    #[arg(long)]
    http_addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Configuration errors stop the process before anything is served
    let mut config = TurnstileConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.http_addr {
        config.server.http_addr = addr;
    }

    init_tracing(&config.logging);

    info!("Starting Turnstile rate limiting gateway");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(http_addr = %config.server.http_addr, "Configuration loaded");

    let rate_limiting = &config.rate_limiting;
    let policies = rate_limiting.policy_table()?;
    info!(
        policies = policies.len(),
        default_limit = policies.default_policy().limit,
        default_window = policies.default_policy().window_seconds,
        exempt_paths = ?rate_limiting.exempt_paths,
        "Rate limiter initialized"
    );

    let rate_limiter =
        Arc::new(RateLimiter::new(policies).with_fail_open(rate_limiting.fail_open));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let janitor = Janitor::new(
        rate_limiter.clone(),
        rate_limiting.janitor.interval(),
        rate_limiting.janitor.max_age(),
    )
    .spawn(shutdown_rx);

    let state = RateLimitState::new(rate_limiter, rate_limiting.exempt_paths.iter().cloned());
    let server = HttpServer::new(config.server.http_addr, create_router(state));

    // Run the server with graceful shutdown on Ctrl+C or SIGTERM
    server.serve_with_shutdown(shutdown_signal()).await?;

    let _ = shutdown_tx.send(true);
    janitor.await?;

    info!("Turnstile stopped");
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
fn init_tracing(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().flatten_event(true).with_target(false))
            .init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(false).with_thread_ids(true))
            .init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
