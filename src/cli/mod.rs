//! CLI module for fusion-coord
//!
//! - Argument parsing with clap
//! - Configuration loading with CLI overrides
//! - Command execution against a short-lived coordinator

pub mod executor;
pub mod parser;
pub mod validation;

pub use executor::execute_command;
pub use parser::{Cli, Commands, Environment, InvalidateArgs};

use anyhow::Context;

use crate::config::{ConfigLoader, Settings};
use crate::logger::init_logger;

/// Load settings honoring `--config` and `--env`, then apply the
/// `--verbose` / `--quiet` level override.
pub fn load_config(cli: &Cli) -> anyhow::Result<Settings> {
    let mut loader = ConfigLoader::new().context("Invalid configuration environment")?;
    if let Some(path) = &cli.config {
        loader = loader.with_file(path);
    }
    if let Some(env) = cli.env {
        loader = loader.with_environment(env.into());
    }

    let mut settings = loader.load().context("Failed to load configuration")?;
    if let Some(level) = cli.log_level_override() {
        settings.logger.level = level.to_string();
    }
    Ok(settings)
}

pub fn init_logger_from_settings(settings: &Settings) -> anyhow::Result<()> {
    let logger_config = settings
        .logger
        .clone()
        .into_logger_config()
        .context("Invalid logger configuration")?;
    init_logger(logger_config)
}
