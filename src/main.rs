use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;

use common::config::Configuration;
use common::model::policy::ArchivalStrategyKind;
use common::strategy::sim::{FixedUtilizationProbe, SimulatedArchival, SimulatedCleanup};
use lifecycle::archival::{ArchivalManager, ArchivalRegistry};
use lifecycle::cleanup::{CleanupEngine, CleanupRegistry};
use lifecycle::monitor::RetentionMonitor;
use lifecycle::policy_manager::PolicyManager;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "custodian.toml")]
    config: String,
}

/// Waits for a shutdown signal (SIGINT or SIGTERM)
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            _ = sigint.recv() => tracing::info!("Received SIGINT"),
            _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        tracing::info!("Received Ctrl+C");
    }

    Ok(())
}

fn cleanup_registry() -> CleanupRegistry {
    let mut registry: CleanupRegistry = HashMap::new();
    for strategy in [
        ArchivalStrategyKind::Delete,
        ArchivalStrategyKind::Compress,
        ArchivalStrategyKind::Sample,
        ArchivalStrategyKind::Aggregate,
    ] {
        registry.insert(strategy, Arc::new(SimulatedCleanup::new(strategy)));
    }
    registry
}

fn archival_registry() -> ArchivalRegistry {
    let mut registry: ArchivalRegistry = HashMap::new();
    for strategy in [
        ArchivalStrategyKind::Archive,
        ArchivalStrategyKind::Compress,
        ArchivalStrategyKind::Sample,
        ArchivalStrategyKind::Aggregate,
    ] {
        registry.insert(strategy, Arc::new(SimulatedArchival));
    }
    registry
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = if std::path::Path::new(&args.config).exists() {
        Configuration::load_from_path(std::path::Path::new(&args.config))
            .context("Failed to load configuration")?
    } else {
        tracing::info!("Configuration file not found, using defaults");
        Configuration::default()
    };
    config.validate().context("Invalid configuration")?;

    tracing::info!("Starting custodian data-lifecycle engine");

    // Terminal job results from both engines flow back to the policy
    // manager through this channel.
    let (completions_tx, completions_rx) = mpsc::unbounded_channel();

    let cleanup = Arc::new(
        CleanupEngine::new(config.cleanup.clone(), cleanup_registry())
            .with_completion_sink(completions_tx.clone()),
    );
    let archival = Arc::new(
        ArchivalManager::new(config.archival.clone(), archival_registry())
            .context("Failed to initialize archival manager")?
            .with_completion_sink(completions_tx),
    );
    let manager = Arc::new(PolicyManager::new(
        config.scheduler.clone(),
        cleanup.clone(),
        archival.clone(),
        completions_rx,
    ));

    // The data plane is an external collaborator; the built-in simulated
    // probe stands in until a real one is wired up.
    let probe = Arc::new(FixedUtilizationProbe::default());
    let monitor = Arc::new(RetentionMonitor::new(
        config.monitor.clone(),
        manager.clone(),
        cleanup.clone(),
        archival.clone(),
        probe,
    ));

    cleanup.start().await;
    archival.start().await;
    manager.start().await;
    monitor.start().await;

    tracing::info!("All components started, waiting for shutdown signal");
    wait_for_shutdown_signal().await?;

    tracing::info!("Shutting down");

    // Stop producers before consumers: no new jobs are scheduled while the
    // engines drain their in-flight work.
    monitor.stop().await;
    manager.stop().await;
    cleanup.stop().await;
    archival.stop().await;

    tracing::info!("Custodian stopped");

    Ok(())
}
