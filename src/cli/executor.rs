//! Command executor for dispatching CLI commands

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;

use super::parser::{Cli, Commands, InvalidateArgs};
use crate::config::Settings;
use crate::coordinator::Coordinator;
use crate::outcome::Outcome;

/// Run the parsed command against a fresh [`Coordinator`].
///
/// The coordinator is always shut down before returning.
pub async fn execute_command(cli: &Cli, settings: Settings) -> anyhow::Result<()> {
    let coordinator = Arc::new(Coordinator::new(settings));

    let result = match &cli.command {
        Some(Commands::Status) | None => status(&coordinator).await,
        Some(Commands::Invalidate(args)) => invalidate(&coordinator, args).await,
        Some(Commands::ResetCircuit { name }) => reset_circuit(&coordinator, name).await,
        Some(Commands::Watch) => watch(&coordinator).await,
    };

    coordinator.shutdown().await;
    result
}

async fn status(coordinator: &Coordinator) -> anyhow::Result<()> {
    let report = coordinator.health().await;
    let json = serde_json::to_string_pretty(&report).context("Failed to render health report")?;
    println!("{}", json);
    Ok(())
}

async fn invalidate(coordinator: &Coordinator, args: &InvalidateArgs) -> anyhow::Result<()> {
    let cache = coordinator.cache(&args.kind).await?;

    let outcome = match &args.key {
        Some(key) => cache.invalidate(key).await,
        None => cache.invalidate_all().await,
    };

    require_live(outcome, "Invalidation was applied locally only")?;
    tracing::info!(
        kind = %args.kind,
        key = args.key.as_deref().unwrap_or("*"),
        "Invalidation broadcast"
    );
    Ok(())
}

async fn reset_circuit(coordinator: &Coordinator, name: &str) -> anyhow::Result<()> {
    let outcome = coordinator.breakers().reset(name).await;
    require_live(outcome, "Circuit reset could not reach the backing store")?;
    tracing::info!(circuit = name, "Circuit reset broadcast");
    Ok(())
}

async fn watch(coordinator: &Coordinator) -> anyhow::Result<()> {
    coordinator
        .start()
        .await
        .context("Failed to start background tasks")?;
    tracing::info!(instance_id = %coordinator.instance_id(), "Watching, press Ctrl-C to stop");
    shutdown_signal().await;
    Ok(())
}

/// An operator action that stayed local had no effect on other instances.
fn require_live(outcome: Outcome<()>, message: &'static str) -> anyhow::Result<()> {
    if outcome.is_degraded() {
        anyhow::bail!(message);
    }
    Ok(())
}

/// Waits for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}
