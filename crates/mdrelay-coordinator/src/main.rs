//! mdrelay - real-time market-data relay
//!
//! Subscribes the configured keys, logs every update and prints a periodic
//! stats line until Ctrl-C.

use anyhow::Result;
use clap::Parser;
use mdrelay_coordinator::{AppConfig, Coordinator, Notification};
use mdrelay_core::SubscriptionKey;
use mdrelay_pull::HttpPullFeed;
use mdrelay_ws::WsPushFeed;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// mdrelay market-data relay
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via MDRELAY_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Key to subscribe at start-up, e.g. BTCUSDT-1m (repeatable)
    #[arg(short, long = "key")]
    keys: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Must run before any TLS connection
    mdrelay_ws::init_crypto();

    let args = Args::parse();

    let config_path = AppConfig::resolve_path(args.config.as_deref());
    let config = match &config_path {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };

    mdrelay_telemetry::init_logging(&config.telemetry.log_filter)?;
    info!("Starting mdrelay v{}", env!("CARGO_PKG_VERSION"));
    match &config_path {
        Some(path) => info!(config_path = %path, "Configuration loaded"),
        None => warn!("No config file found, using built-in defaults"),
    }

    let keys = config
        .keys
        .iter()
        .chain(args.keys.iter())
        .map(SubscriptionKey::new)
        .collect::<Result<Vec<_>, _>>()?;

    let push = Arc::new(WsPushFeed::new(config.push.clone().into()));
    let pull = Arc::new(HttpPullFeed::new(&config.pull)?);
    let coordinator = Coordinator::new(config.coordinator_config(), push, pull)?;

    for key in &keys {
        coordinator.subscribe(key, |notification| match notification {
            Notification::Update(event) => info!(
                key = %event.key,
                seq = event.sequence,
                server_time_ms = event.server_time_ms,
                payload = %event.payload,
                "Update"
            ),
            Notification::Degraded { key, status } => {
                warn!(key = %key, %status, "Service degraded")
            }
        });
    }
    info!(keys = keys.len(), push_url = %config.push.url, "Subscribed start-up keys");

    let mut stats_tick =
        tokio::time::interval(Duration::from_secs(config.telemetry.stats_interval_secs.max(1)));
    stats_tick.tick().await;

    loop {
        tokio::select! {
            _ = stats_tick.tick() => {
                let stats = coordinator.stats();
                info!(
                    status = %coordinator.status(),
                    channel_state = %stats.channel_state,
                    channel_attempt = stats.channel_attempt,
                    subscribed_keys = stats.subscribed_keys,
                    requests = stats.requests,
                    notifications = stats.notifications,
                    cache_entries = stats.cache.entries,
                    cache_hit_rate = stats.cache.hit_rate,
                    log_entries = stats.event_log.recorded,
                    "Stats"
                );
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                info!("Shutdown signal received");
                break;
            }
        }
    }

    coordinator.shutdown().await;
    info!("mdrelay stopped");
    Ok(())
}
