mod check;
mod http;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use camel_graph_core::config::GraphConfig;
use camel_graph_core::fetch::HttpFetcher;
use camel_graph_core::graphite::GraphiteConsumer;
use camel_graph_core::metrics::{MetricConsumer, StubConsumer};
use camel_graph_core::topology::Instance;

#[derive(Parser)]
#[command(name = "camel-graph")]
#[command(
    about = "Poll Camel route services, serve their topology and ship route metrics",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (default: $CAMEL_GRAPH_CONFIG, then services.yaml|yml|json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, default_value_t = 8080)]
    http_port: u16,

    /// Overrides serviceUpdateIntervalSeconds
    #[arg(long)]
    service_update_interval_seconds: Option<u64>,

    /// Overrides routeUpdateIntervalSeconds
    #[arg(long)]
    route_update_interval_seconds: Option<u64>,

    /// Graphite `host:port`; overrides metrics.graphiteUrl
    #[arg(long)]
    graphite_url: Option<String>,

    /// Retry metrics when no graphite connection is available instead of dropping them
    #[arg(long)]
    graphite_repeat_send_on_fail: bool,

    /// Directory with the UI's static files
    #[arg(long, default_value = "public")]
    public_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll services and serve the topology (default)
    Serve,
    /// Validate the configuration and probe every service once
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Check) => {
            let (path, config) = load_config(&cli)?;
            let fetcher = HttpFetcher::new()?;
            if !check::run_check(&path, &config, &fetcher).await {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Commands::Serve) | None => serve(cli).await,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(cli: &Cli) -> anyhow::Result<(PathBuf, GraphConfig)> {
    let (path, mut config) = match &cli.config {
        Some(path) => {
            let config = GraphConfig::load(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            (path.clone(), config)
        }
        None => {
            let cwd = std::env::current_dir().context("cannot read working directory")?;
            GraphConfig::discover(&cwd)?
        }
    };

    if let Some(secs) = cli.service_update_interval_seconds {
        config.service_update_interval_seconds = secs;
    }
    if let Some(secs) = cli.route_update_interval_seconds {
        config.route_update_interval_seconds = secs;
    }
    if let Some(url) = &cli.graphite_url {
        config.metrics.graphite_url = Some(url.clone());
    }
    if cli.graphite_repeat_send_on_fail {
        config.metrics.repeat_send_on_fail = true;
    }
    config.validate()?;

    tracing::info!(
        config = %path.display(),
        environments = config.environments.len(),
        "configuration loaded"
    );
    Ok((path, config))
}

async fn metric_consumer(config: &GraphConfig) -> Arc<dyn MetricConsumer> {
    let metrics = &config.metrics;
    match metrics.graphite_url.as_deref().filter(|u| !u.is_empty()) {
        Some(addr) => Arc::new(
            GraphiteConsumer::connect(
                addr,
                metrics.pool_min,
                metrics.pool_max,
                metrics.repeat_send_on_fail,
            )
            .await,
        ),
        None => {
            tracing::info!("no graphite url configured, route metrics are discarded");
            Arc::new(StubConsumer)
        }
    }
}

async fn serve(cli: Cli) -> anyhow::Result<()> {
    let (_, config) = load_config(&cli)?;

    let fetcher = Arc::new(HttpFetcher::new()?);
    let consumer = metric_consumer(&config).await;
    let instance = Arc::new(Instance::build(&config, fetcher, consumer)?);
    instance.start();

    let app = http::router(
        http::AppState {
            instance: instance.clone(),
        },
        &cli.public_dir,
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    tracing::info!(%addr, public_dir = %cli.public_dir.display(), "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failure")?;

    instance.stop();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
