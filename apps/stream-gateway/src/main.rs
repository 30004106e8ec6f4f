use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use stream_gateway::{
    api::{self, AppState},
    config::ConfigManager,
    hub::EventHub,
    signaling::SignalingRelay,
    status::StatusStore,
    supervisor::TranscodeSupervisor,
    StreamControl,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/stream-gateway/config.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!("Starting Stream Gateway v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {:?}", args.config);

    let config_manager = ConfigManager::new(args.config.clone()).await?;
    let config = Arc::new(config_manager.get().await);

    tokio::fs::create_dir_all(&config.transcode.output_base).await?;

    let status = Arc::new(
        StatusStore::new(&config.database.url, config.database.max_connections).await?,
    );
    // The registry starts empty, so whatever the last shutdown left marked
    // as live is not.
    status.demote_live_states().await?;

    let supervisor = Arc::new(TranscodeSupervisor::new(
        config.transcode.clone(),
        status.clone(),
    ));
    let registry = supervisor.registry().clone();
    info!("Transcode supervisor initialized");

    let relay = Arc::new(SignalingRelay::new(&config.signaling));
    relay
        .clone()
        .spawn_gc(Duration::from_secs(config.signaling.gc_interval_seconds));

    let hub = Arc::new(EventHub::new(
        supervisor.clone(),
        relay,
        config.clone(),
    ));
    hub.clone().spawn_event_forwarder(supervisor.subscribe());
    info!("Event hub initialized");

    // Autostart configured cameras, highest priority first.
    let mut cameras: Vec<_> = config.cameras.iter().filter(|c| c.enabled).collect();
    cameras.sort_by_key(|c| std::cmp::Reverse(c.priority));
    for camera in cameras {
        match supervisor.start_stream(camera.id, &camera.source_url).await {
            Ok(outcome) => {
                info!(camera_id = camera.id, status = outcome.label(), "Autostart")
            }
            Err(e) => error!(camera_id = camera.id, "Autostart failed: {}", e),
        }
    }

    // Start API server (actix-web runs on its own system thread)
    let api_config = config.clone();
    let state = AppState {
        control: supervisor.clone(),
        status,
        registry,
        hub,
        config: config.clone(),
    };
    std::thread::spawn(move || {
        let system = actix_rt::System::new();
        system.block_on(async move {
            if let Err(e) = api::start_server(api_config, state).await {
                error!("API server error: {}", e);
            }
        });
    });

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down");

    let grace = Duration::from_secs(config.app.shutdown_timeout_seconds);
    if tokio::time::timeout(grace, supervisor.stop_all()).await.is_err() {
        warn!("Graceful shutdown timed out");
    }

    Ok(())
}
