//! CLI argument parsing with clap

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Operator tool for the fusion coordination layer
#[derive(Parser, Debug)]
#[command(name = "fusion-coord")]
#[command(about = "Inspect and operate the distributed circuit breakers and caches")]
#[command(long_about = "
fusion-coord talks to the same backing store as the running services and lets
an operator inspect or nudge the shared state.

EXAMPLES:
    # Print circuits, caches and store reachability as JSON
    fusion-coord status

    # Drop one site (and everything nested under it) from every instance
    fusion-coord invalidate --kind site --key acme

    # Empty a whole cache kind
    fusion-coord invalidate --kind page --all

    # Force a breaker closed everywhere
    fusion-coord reset-circuit ai:provider

    # Run listeners and sweeps in the foreground until Ctrl-C
    fusion-coord --env production watch
")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file path
    ///
    /// Load this TOML file instead of the layered `config/` directory.
    /// FUSION_* environment variables still apply on top.
    #[arg(short, long, value_name = "FILE", value_parser = super::validation::validate_config_file_path)]
    pub config: Option<PathBuf>,

    /// Override environment detection
    ///
    /// Selects which `{environment}.toml` overlay is loaded.
    #[arg(short, long, value_enum)]
    pub env: Option<Environment>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the health report as JSON (default)
    Status,

    /// Invalidate cache entries on every instance
    ///
    /// Examples:
    ///   fusion-coord invalidate --kind site --key acme
    ///   fusion-coord invalidate --kind site --all
    Invalidate(InvalidateArgs),

    /// Force a circuit closed on every instance
    ResetCircuit {
        /// Dependency name, as passed to the breaker
        #[arg(value_name = "NAME", value_parser = super::validation::validate_name)]
        name: String,
    },

    /// Run sync listeners and cache sweeps until interrupted
    Watch,
}

#[derive(Args, Debug)]
pub struct InvalidateArgs {
    /// Cache kind
    #[arg(long, value_name = "KIND", value_parser = super::validation::validate_kind)]
    pub kind: String,

    /// Key to drop, together with everything under `KEY:`
    #[arg(
        long,
        value_name = "KEY",
        conflicts_with = "all",
        required_unless_present = "all",
        value_parser = super::validation::validate_name
    )]
    pub key: Option<String>,

    /// Drop every entry of the kind
    #[arg(long)]
    pub all: bool,
}

/// Environment options
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum Environment {
    #[value(name = "development", alias = "dev")]
    Development,
    #[value(name = "test")]
    Test,
    #[value(name = "staging", alias = "stage")]
    Staging,
    #[value(name = "production", alias = "prod")]
    Production,
}

impl From<Environment> for crate::config::Environment {
    fn from(env: Environment) -> Self {
        match env {
            Environment::Development => crate::config::Environment::Development,
            Environment::Test => crate::config::Environment::Test,
            Environment::Staging => crate::config::Environment::Staging,
            Environment::Production => crate::config::Environment::Production,
        }
    }
}

impl Cli {
    /// Level override implied by `--verbose` / `--quiet`.
    pub fn log_level_override(&self) -> Option<&'static str> {
        if self.verbose {
            Some("debug")
        } else if self.quiet {
            Some("error")
        } else {
            None
        }
    }
}
