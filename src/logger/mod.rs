//! Logger initialisation on top of `tracing-subscriber`.
//!
//! - Console output with color control
//! - Optional file output in full, compact or JSON format

pub mod config;

pub use config::*;

use std::fs::{self, OpenOptions};
use std::io::IsTerminal;
use std::sync::Mutex;

use anyhow::Context;
use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{
    EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Install the global subscriber. Call once, before building the coordinator.
pub fn init_logger(config: LoggerConfig) -> anyhow::Result<()> {
    config.validate()?;

    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if !config.file.enabled {
        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer(&config.console))
            .try_init()?;
        return Ok(());
    }

    if let Some(parent) = config.file.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(config.file.append)
        .truncate(!config.file.append)
        .open(&config.file.path)
        .with_context(|| format!("Failed to open log file {}", config.file.path.display()))?;
    let writer = Mutex::new(file);

    // The file layer goes first so console ANSI settings never leak into it.
    match config.file.format {
        LogFormat::Full => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_ansi(false).with_target(true).with_writer(writer))
            .with(console_layer(&config.console))
            .try_init()?,
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .compact()
                    .with_writer(writer),
            )
            .with(console_layer(&config.console))
            .try_init()?,
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_ansi(false).json().with_writer(writer))
            .with(console_layer(&config.console))
            .try_init()?,
    }

    Ok(())
}

fn console_layer<S>(config: &ConsoleConfig) -> Option<impl Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
{
    let use_ansi = config.colored && std::io::stdout().is_terminal();
    config.enabled.then(|| {
        fmt::layer()
            .with_ansi(use_ansi)
            .with_target(true)
            .with_level(true)
    })
}
