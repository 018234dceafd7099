//! idle-heartbeatd - workstation idle/active heartbeat publisher.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use idle_heartbeatd::broker::{Broker, DryRunBroker, MqttBroker};
use idle_heartbeatd::config::Config;
use idle_heartbeatd::idle::{self, IdleDetector, IdleSource};
use idle_heartbeatd::publisher::HeartbeatPublisher;
use idle_heartbeatd::scheduler::{HeartbeatScheduler, TICK_INTERVAL, TickOutcome};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Publish workstation idle/active status to an MQTT broker.
#[derive(Parser, Debug)]
#[command(name = "idle-heartbeatd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to config.json (default: next to the executable, then the user config dir).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log messages instead of sending them to the broker.
    #[arg(long)]
    dry_run: bool,

    /// Run a single tick and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    init_logging(&args.log_level)?;

    info!("idle-heartbeatd v{} starting", env!("CARGO_PKG_VERSION"));

    let config =
        Config::load_or_search(args.config.as_deref()).context("Failed to load configuration")?;

    info!(
        "Broker {} (tls={}), client id '{}', topic '{}'",
        config.connection.endpoint(),
        config.connection.use_tls,
        config.connection.client_id,
        config.status_topic
    );

    let detector = IdleDetector::new(idle::host_source());

    if args.dry_run {
        info!("Dry-run mode: nothing will be sent");
        run(DryRunBroker, config, detector, args.once).await
    } else {
        run(MqttBroker::default(), config, detector, args.once).await
    }
}

/// Initialize logging with the specified level.
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(format!("idle_heartbeatd={level}"))
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Invalid log level")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    Ok(())
}

async fn run<B: Broker>(
    broker: B,
    config: Config,
    detector: IdleDetector<Box<dyn IdleSource>>,
    once: bool,
) -> Result<ExitCode> {
    let publisher = HeartbeatPublisher::new(broker, config.connection);
    let mut scheduler = HeartbeatScheduler::new(detector, publisher, config.status_topic);

    if once {
        let outcome = scheduler.tick().await;
        scheduler.shutdown().await;
        info!("Single tick on '{}' finished: {:?}", scheduler.topic(), outcome);
        return Ok(match outcome {
            TickOutcome::Published(_) => ExitCode::SUCCESS,
            _ => ExitCode::FAILURE,
        });
    }

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    scheduler.run(TICK_INTERVAL, shutdown).await;

    info!("idle-heartbeatd stopped");
    Ok(ExitCode::SUCCESS)
}

/// Cancel `token` on SIGINT or SIGTERM.
fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received");
        token.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                () = wait_for_ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            wait_for_ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
