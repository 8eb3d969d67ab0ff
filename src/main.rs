//! Command-line entry point: parses flags, wires the collection pipeline to
//! the cluster, and serves the Prometheus scrape endpoint.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use clap::Parser;
use log::{error, info};
use prometheus::Registry;

use tlsexporter::config::{self, Config};
use tlsexporter::metrics::prom::{self, CertExpiryExporter};
use tlsexporter::topology::KubeTopology;
use tlsexporter::{ProbeScheduler, TlsProbe};

const DEFAULT_CONFIG_FILE: &str = "tlsexporter.toml";

/// Prometheus exporter for TLS certificate expiry of Kubernetes ingress hosts
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port on which the metrics server listens
    #[arg(long)]
    port: Option<u16>,

    /// Per-probe dial/read timeout in seconds
    #[arg(long)]
    probe_timeout: Option<u64>,

    /// Upper bound on concurrent probes
    #[arg(long)]
    max_workers: Option<usize>,

    /// Cluster API server address (defaults to the in-cluster service account)
    #[arg(long)]
    api_server: Option<String>,

    /// File holding the bearer token for the API server
    #[arg(long)]
    token_file: Option<String>,

    /// File holding the cluster CA certificate
    #[arg(long)]
    ca_cert_file: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print an example configuration file and exit
    #[arg(long)]
    example_config: bool,
}

#[derive(Clone)]
struct AppState {
    exporter: Arc<CertExpiryExporter>,
    registry: Registry,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logger(&args.log_level);

    if args.example_config {
        println!("{}", Config::example_toml());
        return;
    }

    if let Err(e) = run(args).await {
        error!("{}", e);
        process::exit(1);
    }
}

fn init_logger(level: &str) {
    let env = env_logger::Env::default().filter_or("RUST_LOG", level);
    env_logger::init_from_env(env);
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::default();
    match &args.config {
        Some(path) => {
            info!("loading configuration from {}", path.display());
            config = config.merge_with(Config::from_file(path)?);
        }
        None => {
            if Path::new(DEFAULT_CONFIG_FILE).exists() {
                info!("loading configuration from {}", DEFAULT_CONFIG_FILE);
                config = config.merge_with(Config::from_file(DEFAULT_CONFIG_FILE)?);
            }
        }
    }
    config = config.merge_with(Config::from_cli_args(
        args.port,
        args.probe_timeout,
        args.max_workers,
        args.api_server,
        args.token_file,
        args.ca_cert_file,
    ));
    config.validate()?;

    let topology = KubeTopology::connect(config.kubernetes.as_ref())?;
    let timeout = Duration::from_secs(
        config
            .probe_timeout_secs
            .unwrap_or(config::DEFAULT_PROBE_TIMEOUT_SECS),
    );
    let scheduler = ProbeScheduler::new(
        Arc::new(TlsProbe::new(timeout)),
        config.max_workers.unwrap_or(config::DEFAULT_MAX_WORKERS),
    );
    let exporter = CertExpiryExporter::new(Box::new(topology), scheduler)?;

    let registry = Registry::new();
    #[cfg(target_os = "linux")]
    registry.register(Box::new(
        prometheus::process_collector::ProcessCollector::for_self(),
    ))?;

    let state = AppState {
        exporter: Arc::new(exporter),
        registry,
    };
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    let port = config.port.unwrap_or(config::DEFAULT_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Starting metrics server, listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Serves one scrape. The blocking collection pass runs off the async
/// runtime; a discovery failure answers 500 so the scraper can tell a broken
/// pass from a cluster without ingress hosts.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let scrape =
        tokio::task::spawn_blocking(move || prom::encode_scrape(&state.exporter, &state.registry))
            .await;

    match scrape {
        Ok(Ok(body)) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Ok(Err(e)) => {
            error!("scrape failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("scrape failed: {}\n", e),
            )
                .into_response()
        }
        Err(e) => {
            error!("scrape worker failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
