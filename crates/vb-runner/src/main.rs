//! vcan bridge runner: watches for remote CAN devices and keeps one
//! supervised `vb-gateway` per device.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::Parser;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use vb_runner::{
    IpLink, LifecycleEvent, LifecycleManager, RunnerConfig, SourceResult, SupervisorLauncher,
    discovery, linkstate,
};

/// Pending events from both sources before they block.
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Parser, Debug)]
#[command(name = "vb-runner", version, about = "Run a CAN gateway for every discovered remote CAN device")]
struct Cli {
    /// Log level: trace, debug, info, warn or error.
    #[arg(long, default_value = "info")]
    loglevel: Level,

    /// Optional TOML config file.
    #[arg(short, long)]
    config: Option<String>,

    /// Path of the gateway executable to run per device.
    bridge: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::default().add_directive(LevelFilter::from_level(cli.loglevel).into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => RunnerConfig::from_file(path)
            .with_context(|| format!("failed to load config {path}"))?,
        None => RunnerConfig::default(),
    };

    if !cli.bridge.exists() {
        anyhow::bail!("{}: path does not exist", cli.bridge.display());
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bridge = %cli.bridge.display(),
        service_type = %config.service_type,
        "vb-runner starting"
    );

    let launcher = SupervisorLauncher::new(
        cli.bridge.clone(),
        config.bridge_args.clone(),
        config.restart.policy(),
    );
    let mut manager =
        LifecycleManager::new(config.naming.clone(), Arc::new(IpLink::new()), Arc::new(launcher));

    let (tx, rx) = mpsc::channel::<LifecycleEvent>(EVENT_CHANNEL_CAPACITY);
    let service_type = config.service_type.clone();
    let discovery_tx = tx.clone();
    let mut browser =
        tokio::spawn(async move { discovery::browse(&service_type, discovery_tx).await });
    let mut links = tokio::spawn(linkstate::monitor(tx));

    let outcome = tokio::select! {
        () = manager.run(rx) => Err(anyhow!("event sources closed")),
        result = &mut browser => source_ended("service discovery", result),
        result = &mut links => source_ended("link monitor", result),
        () = shutdown_signal() => {
            tracing::info!("shutdown signal received");
            Ok(())
        }
    };

    browser.abort();
    links.abort();
    manager.shutdown().await;

    if let Err(e) = &outcome {
        tracing::error!(error = %e, "vb-runner stopping");
    } else {
        tracing::info!("vb-runner stopped");
    }
    outcome
}

fn source_ended(name: &str, result: Result<SourceResult<()>, JoinError>) -> anyhow::Result<()> {
    match result {
        Ok(Ok(())) => Err(anyhow!("{name} stopped")),
        Ok(Err(e)) => Err(anyhow::Error::new(e).context(format!("{name} failed"))),
        Err(e) => Err(anyhow!("{name} task failed: {e}")),
    }
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
