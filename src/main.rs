//! Disk Inventory
//!
//! Scans the host's physical disks and prints the inventory as JSON. With
//! `--interval-secs` it keeps rescanning; `--metrics-addr` serves Prometheus
//! metrics and health endpoints.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         disk-inventory                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │    Probes    │───▶│  Discovery   │───▶│    Cache     │       │
//! │  │ lsblk, udev, │    │    Engine    │    │  + metrics   │       │
//! │  │ smartctl ... │    │              │    │  + events    │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use disk_inventory::adapters::{system_probes, LoggingEventPublisher};
use disk_inventory::error::{Error, Result};
use disk_inventory::{DiscoveryConfig, DiscoveryEngine, DiscoveryMetrics, ProbeContext};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Disk Inventory - physical disk discovery for storage nodes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "DISK_INVENTORY_CONFIG")]
    config: Option<String>,

    /// Deadline for each probe invocation, in seconds
    #[arg(long, env = "PROBE_TIMEOUT_SECONDS")]
    probe_timeout_secs: Option<u64>,

    /// Disks probed concurrently
    #[arg(long, env = "PROBE_CONCURRENCY")]
    probe_concurrency: Option<usize>,

    /// Skip SMART probing
    #[arg(long, env = "NO_SMART")]
    no_smart: bool,

    /// Skip ZFS pool membership
    #[arg(long, env = "NO_POOLS")]
    no_pools: bool,

    /// Refresh a single device (node or by-id link) instead of a full scan
    #[arg(long, conflicts_with = "interval_secs")]
    refresh: Option<String>,

    /// Rescan every N seconds until interrupted
    #[arg(long, env = "SCAN_INTERVAL_SECONDS")]
    interval_secs: Option<u64>,

    /// Serve /metrics and /healthz on this address (e.g. 0.0.0.0:8080)
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let config = load_config(&args)?;
    info!("Starting disk inventory");
    info!("  Probe timeout: {}s", config.probe_timeout_secs);
    info!("  Probe concurrency: {}", config.probe_concurrency);
    info!("  SMART: {}", config.smart_enabled);
    info!("  Pools: {}", config.pool_enabled);

    let metrics = Arc::new(DiscoveryMetrics::new()?);
    let engine = Arc::new(
        DiscoveryEngine::new(config.clone(), system_probes(&config))
            .with_event_publisher(Arc::new(LoggingEventPublisher::debug_level()))
            .with_metrics(metrics.clone()),
    );

    // Ctrl-C cancels in-flight probes
    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            shutdown.cancel();
        }
    });
    let ctx = ProbeContext::with_cancellation(cancel.clone(), config.probe_timeout());

    if let Some(metrics_addr) = args.metrics_addr.clone() {
        let server_engine = engine.clone();
        let server_metrics = metrics.clone();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(&metrics_addr, server_engine, server_metrics).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    if let Some(device) = &args.refresh {
        let disk = engine.refresh_device(&ctx, device).await?;
        print_json(&disk, args.pretty)?;
        return Ok(());
    }

    let Some(interval) = args.interval_secs else {
        let report = engine.scan(&ctx).await?;
        print_json(&report, args.pretty)?;
        return Ok(());
    };

    // Periodic mode
    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match engine.scan(&ctx).await {
                    Ok(report) => info!(
                        "Inventory holds {} disks ({} degraded stages)",
                        report.disks.len(),
                        report.degraded().count()
                    ),
                    Err(e) => error!("Scan failed, keeping previous inventory: {}", e),
                }
            }
        }
    }

    info!("Shutdown complete");
    Ok(())
}

fn load_config(args: &Args) -> Result<DiscoveryConfig> {
    let mut config = match &args.config {
        Some(path) => DiscoveryConfig::from_yaml_file(path)?,
        None => DiscoveryConfig::default(),
    };

    if let Some(timeout) = args.probe_timeout_secs {
        config.probe_timeout_secs = timeout;
    }
    if let Some(concurrency) = args.probe_concurrency {
        config.probe_concurrency = concurrency;
    }
    if args.no_smart {
        config.smart_enabled = false;
    }
    if args.no_pools {
        config.pool_enabled = false;
    }

    config.validate()?;
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", json);
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "hyper_util=warn"] {
        if let Ok(directive) = directive.parse::<Directive>() {
            filter = filter.add_directive(directive);
        }
    }

    // stdout carries the inventory
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(
    addr: &str,
    engine: Arc<DiscoveryEngine>,
    metrics: Arc<DiscoveryMetrics>,
) -> Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(body.into()));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        response
    }

    async fn handler(
        req: Request<hyper::body::Incoming>,
        engine: Arc<DiscoveryEngine>,
        metrics: Arc<DiscoveryMetrics>,
    ) -> std::result::Result<Response<Full<Bytes>>, std::convert::Infallible> {
        let response = match req.uri().path() {
            "/metrics" => match metrics.encode() {
                Ok(text) => respond(StatusCode::OK, "text/plain; version=0.0.4", text),
                Err(e) => respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", e.to_string()),
            },
            "/healthz" | "/livez" => respond(StatusCode::OK, "text/plain", "ok"),
            // Ready once a scan has been published
            "/readyz" => match engine.last_scan_time() {
                Some(_) => respond(StatusCode::OK, "text/plain", "ok"),
                None => respond(StatusCode::SERVICE_UNAVAILABLE, "text/plain", "no scan yet"),
            },
            "/disks" => match serde_json::to_vec(&engine.cache().current().devices) {
                Ok(json) => respond(StatusCode::OK, "application/json", json),
                Err(e) => respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", e.to_string()),
            },
            _ => respond(StatusCode::NOT_FOUND, "text/plain", "not found"),
        };
        Ok(response)
    }

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Internal(format!("Invalid metrics server address: {}", e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind metrics server: {}", e)))?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| Error::Internal(format!("Metrics server accept error: {}", e)))?;

        let io = TokioIo::new(stream);
        let engine = engine.clone();
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| handler(req, engine.clone(), metrics.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::error!("Metrics server connection error: {}", e);
            }
        });
    }
}
