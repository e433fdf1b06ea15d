//! `relay` node binary.
//!
//! `relay acceptor` terminates client sockets and links to the configured
//! dispatchers. `relay dispatcher` serves acceptor links and runs the business
//! tier in-process over the embedded queue.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relay_business::{BusinessConsumer, Mailbox, ProcessorSet};
use relay_queue::{MemoryQueue, QueueConfig};
use relay_settings::{LoggingSettings, RelaySettings};
use relay_telemetry::{init_telemetry, parse_level, TelemetryConfig};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "relay", about = "Multi-tier messaging gateway routing node")]
struct Args {
    /// Settings file. Defaults to `~/.relay/settings.json`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    role: Role,
}

#[derive(Debug, Subcommand)]
enum Role {
    /// Client-facing tier.
    Acceptor,
    /// Routing tier with the embedded queue and business consumers.
    Dispatcher,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let path = args.config.unwrap_or_else(relay_settings::settings_path);
    let settings = relay_settings::load_settings_from_path(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;

    let telemetry = init_telemetry(telemetry_config(&settings.logging));
    let metrics = telemetry.metrics();
    let cancel = CancellationToken::new();

    match args.role {
        Role::Acceptor => {
            let handle = relay_acceptor::start(&settings.acceptor, metrics, cancel.clone())
                .await
                .with_context(|| format!("failed to bind {}", settings.acceptor.listen))?;
            tracing::info!(addr = %handle.addr, "relay acceptor ready");
            wait_for_shutdown().await?;
            handle.shutdown().await;
        }
        Role::Dispatcher => run_dispatcher(&settings, metrics, cancel).await?,
    }

    tracing::info!("shut down");
    Ok(())
}

async fn run_dispatcher(
    settings: &RelaySettings,
    metrics: Arc<relay_telemetry::MetricsRecorder>,
    cancel: CancellationToken,
) -> Result<()> {
    let queue = Arc::new(MemoryQueue::new(QueueConfig {
        partitions: settings.queue.partitions,
        partition_capacity: settings.queue.partition_capacity,
    }));

    let business = Arc::new(BusinessConsumer::new(
        queue.clone(),
        queue.clone(),
        ProcessorSet::standard(Arc::new(Mailbox::new())),
        &settings.business,
        Arc::clone(&metrics),
    ));
    let workers = business.spawn(cancel.child_token());

    let handle = relay_dispatcher::start(
        &settings.dispatcher,
        queue.clone(),
        queue,
        metrics,
        cancel.clone(),
    )
    .await
    .with_context(|| format!("failed to bind {}", settings.dispatcher.listen))?;
    tracing::info!(id = %settings.dispatcher.id, addr = %handle.addr, consumers = workers.len(), "relay dispatcher ready");

    wait_for_shutdown().await?;
    handle.shutdown().await;
    for worker in workers {
        let _ = worker.await;
    }
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;
    tracing::info!("shutting down");
    Ok(())
}

fn telemetry_config(logging: &LoggingSettings) -> TelemetryConfig {
    let log_level = parse_level(&logging.level).unwrap_or_else(|| {
        eprintln!("relay: unknown log level {:?}, using info", logging.level);
        tracing::Level::INFO
    });
    let module_levels = logging
        .modules
        .iter()
        .filter_map(|(module, level)| parse_level(level).map(|l| (module.clone(), l)))
        .collect();
    TelemetryConfig {
        log_level,
        module_levels,
        json: logging.json,
    }
}
