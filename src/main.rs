//! Volume Autoscaler
//!
//! A Kubernetes controller that expands PersistentVolumeClaims before they
//! run out of bytes or inodes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Volume Autoscaler                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │   Metrics    │───▶│  Reconciler  │───▶│   Cluster    │       │
//! │  │   Watcher    │    │   (Brain)    │    │   Adapter    │       │
//! │  │   (Eyes)     │    │              │    │   (Hands)    │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Deploy exactly one replica with a `Recreate` rollout strategy: per-PVC
//! state lives on the PVCs and concurrent writers can double-resize a volume
//! within its cooldown window.

use clap::Parser;
use kube::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod adapters;
mod config;
mod controller;
mod domain;
mod error;
mod metrics;
mod telemetry;

use crate::adapters::{KubeVolumeRepository, PrometheusMetricsAdapter, SlackConfig, SlackNotifier};
use crate::config::Settings;
use crate::controller::ReconcilerContext;
use crate::domain::ports::ScaleNotifier;
use crate::error::Result;
use crate::metrics::{MetricsConfig, MetricsWatcher};

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::parse();

    // Initialize logging
    init_logging(&settings);

    info!("Starting volume autoscaler");
    info!("  Interval: {}s", settings.interval_time);
    info!(
        "  Trigger: {}% for {} intervals",
        settings.scale_above_percent, settings.scale_after_intervals
    );
    info!("  Cooldown: {}s", settings.scale_cooldown_time);
    info!("  Dry-run mode: {}", settings.dry_run);

    settings.validate().map_err(|e| {
        error!("Invalid configuration: {}", e);
        e
    })?;

    // Resolve where utilization metrics come from
    let query_url = settings.resolve_metrics_url().await.map_err(|e| {
        error!("Failed to resolve metrics endpoint: {}", e);
        e
    })?;
    info!("  Metrics endpoint: {}", query_url);

    // Create Kubernetes client
    let client = Client::try_default().await.map_err(|e| {
        error!("Failed to create Kubernetes client: {}", e);
        error::Error::Internal(format!("Kubernetes client creation failed: {}", e))
    })?;

    info!("Connected to Kubernetes cluster");

    // Initialize the metrics watcher
    let watcher = MetricsWatcher::new(MetricsConfig {
        query_url,
        query_timeout: settings.http_timeout(),
        label_match: settings.gmp_label_match.clone(),
    })?;

    // Check metrics backend health
    if let Err(e) = watcher.health_check().await {
        error!("Metrics backend health check failed: {}", e);
        error!("Continuing anyway - metrics may not be available");
    } else {
        info!("Metrics backend healthy");
    }

    let metrics_provider = Arc::new(PrometheusMetricsAdapter::new(watcher));
    let volumes = Arc::new(KubeVolumeRepository::new(
        client.clone(),
        settings.http_timeout(),
    ));

    // Notifications are silenced in dry-run so rehearsals don't page anyone
    let notifier: Arc<dyn ScaleNotifier> = if settings.dry_run {
        Arc::new(SlackNotifier::disabled())
    } else {
        Arc::new(SlackNotifier::new(SlackConfig {
            webhook_url: settings.slack_webhook_url.clone(),
            channel: settings.slack_channel.clone(),
            message_prefix: settings.slack_message_prefix.clone(),
            message_suffix: settings.slack_message_suffix.clone(),
            timeout: settings.http_timeout(),
        }))
    };

    telemetry::publish_info(&settings);

    let ready = Arc::new(AtomicBool::new(false));
    let shutdown = CancellationToken::new();

    // Start the liveness/readiness/metrics server
    let http_addr = settings.http_addr.clone();
    let http_ready = ready.clone();
    tokio::spawn(async move {
        if let Err(e) = run_http_server(&http_addr, http_ready).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Install signal handlers
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, finishing the current iteration");
        signal_token.cancel();
    });

    // Run the reconciliation loop
    let ctx = ReconcilerContext::new(settings, metrics_provider, volumes, notifier, ready);
    controller::run(ctx, shutdown).await;

    info!("Volume autoscaler shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(settings: &Settings) {
    let level = if settings.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().unwrap())
        .add_directive("kube=info".parse().unwrap())
        .add_directive("tower=warn".parse().unwrap());

    if settings.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Shutdown
// =============================================================================

/// Resolve when SIGTERM or SIGINT arrives.
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            // Fall back to SIGINT only
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

// =============================================================================
// HTTP Surface
// =============================================================================

/// Serve `/alive`, `/ready`, and `/metrics` on one listener.
async fn run_http_server(addr: &str, ready: Arc<AtomicBool>) -> Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
        Response::builder()
            .status(status)
            .body(Full::new(body.into()))
            .unwrap()
    }

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| error::Error::Internal(format!("Invalid HTTP server address: {}", e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| error::Error::Internal(format!("Failed to bind HTTP server: {}", e)))?;

    info!("HTTP server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| error::Error::Internal(format!("HTTP server accept error: {}", e)))?;

        let io = TokioIo::new(stream);
        let ready = ready.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let ready = ready.clone();
                async move {
                    let response = match req.uri().path() {
                        "/alive" => respond(StatusCode::OK, "ok"),
                        "/ready" => {
                            if ready.load(Ordering::Acquire) {
                                respond(StatusCode::OK, "ok")
                            } else {
                                respond(
                                    StatusCode::SERVICE_UNAVAILABLE,
                                    "waiting for first successful iteration",
                                )
                            }
                        }
                        "/metrics" => match telemetry::render() {
                            Ok(text) => Response::builder()
                                .status(StatusCode::OK)
                                .header("Content-Type", "text/plain; version=0.0.4")
                                .body(Full::new(Bytes::from(text)))
                                .unwrap(),
                            Err(e) => {
                                error!("Failed to encode metrics: {}", e);
                                respond(StatusCode::INTERNAL_SERVER_ERROR, "encoding error")
                            }
                        },
                        _ => respond(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::error!("HTTP connection error: {}", e);
            }
        });
    }
}
