//! pushgate - push notification dispatch gateway
//!
//! Accepts batches of push notifications over HTTP, queues one task per
//! notification, and delivers them through per-platform backends. Tokens the
//! providers report as unregistered are removed from the token registry in
//! the background.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;
mod dispatch;
mod error;
mod metrics;
mod push;
mod queue;
mod server;
mod shutdown;

use config::AppConfig;
use dispatch::{DispatchConfig, Dispatcher};
use metrics::Metrics;
use push::{Delivery, LogOptions, LoggingSender, Platform, PlatformSenders, TokenReclaimer};
use queue::{ChannelBroker, ExternalQueue, LocalQueue, QueueAdapter, QueueEngine};
use server::ApiServer;
use shutdown::ShutdownHandler;

/// pushgate - push notification dispatch gateway
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file. Without one, configuration comes from
    /// defaults and `PUSHGATE_*` environment variables.
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = match &args.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("Failed to load config from {path}"))?,
        None => AppConfig::from_env().context("Failed to load config from environment")?,
    };

    // Initialize logging
    init_logging(&config.log)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config_path = args.config.as_deref().unwrap_or("<env>"),
        engine = %config.queue.engine,
        sync = config.core.sync,
        "Starting pushgate"
    );

    let metrics = Arc::new(Metrics::new().context("Failed to register metrics")?);
    metrics.init_server_info(env!("CARGO_PKG_VERSION"));

    let log_options = LogOptions {
        hide_token: config.log.hide_token,
    };

    let toggles = config.platforms();
    let senders = Platform::ALL
        .into_iter()
        .filter(|p| toggles.is_enabled(*p))
        .fold(PlatformSenders::new(log_options), |senders, platform| {
            debug!(%platform, "Delivery backend registered");
            senders.with(platform, Arc::new(LoggingSender::new(log_options)))
        });

    if !Platform::ALL.into_iter().any(|p| senders.has(p)) {
        warn!("No platforms enabled - every notification will be filtered out");
    }

    let reclaimer = if config.reclaimer.enabled {
        let reclaimer =
            TokenReclaimer::new(&config.reclaimer).context("Failed to create token reclaimer")?;
        Some(Arc::new(reclaimer))
    } else {
        info!("Token reclaimer disabled");
        None
    };

    let delivery = Arc::new(Delivery::new(
        Arc::new(senders),
        reclaimer.clone(),
        metrics.clone(),
    ));

    let queue: Arc<dyn QueueAdapter> = match config.queue.engine {
        QueueEngine::Local => Arc::new(LocalQueue::new(
            config.core.worker_num,
            config.core.queue_num,
        )),
        QueueEngine::External => {
            let broker = Arc::new(ChannelBroker::new(config.queue.external_capacity));
            let external = ExternalQueue::new(broker.clone());
            if let Some(receiver) = broker.take_receiver() {
                external.spawn_consumer(receiver, delivery.clone());
            }
            Arc::new(external)
        }
    };

    let dispatcher = Arc::new(Dispatcher::new(
        queue.clone(),
        delivery,
        metrics.clone(),
        DispatchConfig::from_config(&config),
    ));

    // Initialize shutdown handler
    let shutdown = ShutdownHandler::new();

    // Start API server
    let api_server = ApiServer::new(
        config.api.clone(),
        dispatcher,
        metrics,
        config.core.max_notification,
    );

    let server_shutdown = shutdown.subscribe();
    let server_trigger = shutdown.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = api_server.run(server_shutdown).await {
            error!(error = %e, "API server error");
            server_trigger.trigger();
        }
    });

    info!("pushgate running");

    // Wait for shutdown signal
    shutdown.wait_for_signal().await;

    info!("Initiating graceful shutdown");

    // Request tokens derive from the server's shutdown token, so in-flight
    // sync pushes are already released and the server drains promptly.
    shutdown::graceful_shutdown(config.core.shutdown_timeout(), || async move {
        if let Err(e) = server_handle.await {
            error!(error = %e, "API server task failed");
        }
        queue.shutdown().await;
        if let Some(reclaimer) = &reclaimer {
            info!(in_flight = reclaimer.in_flight(), "Draining token reclaims");
            reclaimer.drain().await;
        }
    })
    .await;

    info!("pushgate stopped");
    Ok(())
}

/// Initialize the tracing subscriber based on configuration.
fn init_logging(config: &config::LogConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        "pretty" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty())
                .init();
        }
        "off" => {
            // No logging
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact())
                .init();
        }
    }

    Ok(())
}
