//! rx-midi - split a polyphonic MIDI channel into monophonic voices
//!
//! Listens to every matching MIDI source, hands each new note to the first free
//! voice and sends the result to every matching destination. Routing channels
//! follow the config file live.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rx_midi::config::{AppConfig, ConfigWatcher};
use rx_midi::gateway::{MidiGateway, MidirGateway};
use rx_midi::monitor::{self, Monitor};
use rx_midi::routing::VoiceRouter;
use rx_midi::stream::SubscriptionBag;

/// rx-midi - reactive polyphonic-to-monophonic MIDI splitter
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// List available MIDI ports
    #[arg(long)]
    list_ports: bool,

    /// Print every routed command
    #[arg(short, long)]
    monitor: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level, args.log_json)?;

    if args.list_ports {
        let gateway = MidirGateway::new("rx-midi").context("Failed to open MIDI")?;
        monitor::print_ports(&gateway.current_sources(), &gateway.current_destinations());
        return Ok(());
    }

    info!("Starting rx-midi v{}...", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let (config_watcher, initial_config) = ConfigWatcher::new(args.config.clone()).await?;
    info!("Configuration loaded successfully with hot-reload enabled");

    run_app(&initial_config, config_watcher, args.monitor, shutdown_signal()).await?;

    info!("rx-midi shutdown complete");
    Ok(())
}

async fn run_app(
    config: &AppConfig,
    mut config_watcher: ConfigWatcher,
    monitor: bool,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<()> {
    let gateway = MidirGateway::new(config.midi.client_name.clone())
        .context("Failed to open MIDI")?;
    let gateway = Arc::new(gateway);
    let interval = Duration::from_millis(config.midi.discovery_interval_ms);
    let discovery = gateway.spawn_discovery(interval);

    let shared: Arc<dyn MidiGateway> = gateway.clone();
    let router = VoiceRouter::new(shared, &config.routing).with_endpoints(&config.midi);
    info!(
        "Routing channel {} to {} voice(s)",
        config.routing.source_channel,
        config.routing.voices.len()
    );

    let mut subscriptions = SubscriptionBag::new();
    if monitor {
        let monitor = Arc::new(Monitor::new());
        subscriptions.add(
            router
                .deliveries()
                .subscribe_next(move |delivery| monitor.print_delivery(&delivery)),
        );
    } else {
        subscriptions.add(router.deliveries().subscribe_next(|delivery| {
            if let Err(e) = &delivery.outcome {
                debug!("Dropped {} for {}: {}", delivery.command, delivery.destination, e);
            }
        }));
    }

    info!("Starting main application loop...");
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(new_config) = config_watcher.next_config() => {
                if new_config.midi != config.midi {
                    warn!("MIDI endpoint changes take effect after restart");
                }
                if let Err(e) = router.apply(&new_config.routing) {
                    warn!("Ignoring routing update: {:#}", e);
                }
            }
            _ = &mut shutdown => {
                info!("Shutting down...");
                break;
            }
        }
    }

    subscriptions.dispose();
    discovery.abort();
    Ok(())
}

fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let text = (!json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
    });
    let json = json.then(|| tracing_subscriber::fmt::layer().json().with_target(false));

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .try_init()
        .context("Failed to initialise logging")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for CTRL+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
