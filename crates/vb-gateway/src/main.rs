//! vcan bridge gateway. Bridges one local SocketCAN interface to one
//! remote CAN device until the device goes silent or the process is killed.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use vb_gateway::{GatewayConfig, GatewaySession, RemoteDevice, TcpDevice};

#[derive(Parser, Debug)]
#[command(name = "vb-gateway", version, about = "Bridge a SocketCAN interface to a remote CAN device")]
struct Cli {
    /// Remote bus bitrate in bit/s (overrides the config file).
    #[arg(long)]
    bitrate: Option<u32>,

    /// Optional TOML config file.
    #[arg(short, long)]
    config: Option<String>,

    /// Remote device address (host:port).
    address: String,

    /// Local SocketCAN interface name.
    interface: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => GatewayConfig::from_file(path)
            .with_context(|| format!("failed to load config {path}"))?,
        None => GatewayConfig::default(),
    };
    if cli.bitrate.is_some() {
        config.bitrate = cli.bitrate;
    }
    config.validate()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        device = %cli.address,
        interface = %cli.interface,
        "vb-gateway starting"
    );

    let bus = open_bus(&cli.interface)?;

    let device = TcpDevice::connect(&cli.address, config.connect_timeout())
        .await
        .with_context(|| format!("failed to connect to {}", cli.address))?;
    tracing::info!(device = %cli.address, "connected to remote device");

    if let Some(bitrate) = config.bitrate {
        device
            .configure(bitrate)
            .await
            .with_context(|| format!("failed to set bitrate {bitrate}"))?;
        tracing::info!(bitrate, "remote bitrate configured");
    }

    let session = GatewaySession::new(cli.interface.clone(), bus, Arc::new(device), config);

    tokio::select! {
        result = session.run() => {
            result.with_context(|| format!("gateway for {} failed", cli.interface))?;
        }
        () = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    tracing::info!("vb-gateway stopped");
    Ok(())
}

#[cfg(target_os = "linux")]
fn open_bus(interface: &str) -> anyhow::Result<Arc<dyn vb_gateway::LocalBus>> {
    let bus = vb_gateway::SocketCanBus::open(interface)?;
    Ok(Arc::new(bus))
}

#[cfg(not(target_os = "linux"))]
fn open_bus(_interface: &str) -> anyhow::Result<Arc<dyn vb_gateway::LocalBus>> {
    anyhow::bail!("SocketCAN is only available on Linux")
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
