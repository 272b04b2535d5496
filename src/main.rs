use clap::Parser;

use fusion_coord::cli::{Cli, execute_command, init_logger_from_settings, load_config};
use fusion_coord::config::Environment;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = load_config(&cli)?;
    init_logger_from_settings(&settings)?;

    tracing::info!(
        app_name = %settings.application.name,
        app_version = env!("CARGO_PKG_VERSION"),
        environment = %cli.env.map(Environment::from).unwrap_or_else(Environment::from_env).as_str(),
        "Application starting"
    );
    tracing::info!(
        backing_configured = settings.store.is_configured(),
        address = %settings.store.display_address(),
        pool_size = settings.store.pool_size,
        command_timeout_ms = settings.store.command_timeout_ms,
        "Store configuration loaded"
    );
    tracing::info!(
        family = %settings.circuit_breaker.family,
        failure_threshold = settings.circuit_breaker.failure_threshold,
        reset_timeout_ms = settings.circuit_breaker.reset_timeout_ms,
        cache_ttl_seconds = settings.cache.ttl_seconds,
        "Coordination configuration loaded"
    );

    execute_command(&cli, settings).await
}
