use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::FutureExt;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use quotamock::clock::SystemClock;
use quotamock::config::QuotaMockConfig;
use quotamock::http::{HttpServer, RequestHandler};
use quotamock::metrics::{InMemoryMetrics, REQUESTS_EXCEEDED, REQUESTS_TOTAL};
use quotamock::provider::FakeDataProvider;
use quotamock::ratelimit::{QuotaStores, RateLimiter};

/// How often idle counters are swept from the stores.
const SWEEP_PERIOD: Duration = Duration::from_secs(1);

/// Mock JSON API enforcing caller-chosen fixed-window quotas.
#[derive(Debug, Parser)]
#[command(name = "quotamock", version, about)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address for the rate-limited API, overriding the configuration
    #[arg(long)]
    http_addr: Option<SocketAddr>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level, args.log_json);

    info!("Starting Quotamock");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = QuotaMockConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.http_addr {
        config.server.http_addr = addr;
    }
    info!(
        http_addr = %config.server.http_addr,
        metrics_enabled = config.server.metrics_enabled,
        "Configuration loaded"
    );

    let rate_limiter = RateLimiter::with_stores(QuotaStores::from_config(&config.rate_limiting));
    let clock = Arc::new(SystemClock);
    let sweeper = rate_limiter.spawn_expiry_sweeper(clock.clone(), SWEEP_PERIOD);
    info!("Rate limiter initialized");

    let metrics = Arc::new(InMemoryMetrics::new());
    let handler = RequestHandler::new(rate_limiter, Arc::new(FakeDataProvider), metrics.clone())
        .with_clock(clock)
        .with_default_group(config.rate_limiting.default_group.clone());

    let shutdown = shutdown_signal().shared();

    let api = HttpServer::new(config.server.http_addr, handler).serve_with_shutdown(shutdown.clone());

    if config.server.metrics_enabled {
        let management = HttpServer::management(config.server.metrics_addr, metrics.clone())
            .serve_with_shutdown(shutdown);
        tokio::try_join!(api, management)?;
    } else {
        api.await?;
    }

    sweeper.abort();
    info!(
        total = metrics.get(REQUESTS_TOTAL),
        exceeded = metrics.get(REQUESTS_EXCEEDED),
        "Quotamock stopped"
    );
    Ok(())
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false).with_thread_ids(true))
            .init();
    }
}

/// Resolve once Ctrl+C or SIGTERM arrives.
///
/// A signal that cannot be registered is logged and never fires, so the
/// other one still triggers shutdown.
async fn shutdown_signal() {
    let received = tokio::select! {
        _ = ctrl_c() => "ctrl_c",
        _ = terminate() => "sigterm",
    };
    info!(signal = received, "Shutting down");
}

async fn ctrl_c() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "Ctrl+C handler unavailable");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
