//! # cvlive CLI
//!
//! ## Available Commands
//!
//! - `serve` - Start the HTTP edit API and evaluate on every edit
//! - `run` - Evaluate the chart once and save the annotated chart
//! - `plan` - Show readiness and cache keys without calling the service
//! - `status` - Show the readiness of the chart file (default)
//! - `registry` - Print the operation registry
//! - `clear-cache` - Empty the compute service's result cache

mod commands;

use crate::config::Config;
use clap::{Parser, Subcommand};
use cvlive_core::CvliveError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// cvlive - live image-processing charts
///
/// Re-evaluates only the operations whose inputs changed, reusing
/// content-addressed results from the compute service.
#[derive(Parser, Debug)]
#[command(name = "cvlive")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: cvlive.toml if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Compute service base URL
    #[arg(short = 'S', long, global = true)]
    pub service_url: Option<String>,

    /// Chart file
    #[arg(short = 'C', long, global = true)]
    pub chart: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP edit API
    Serve {
        /// Host to bind to
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,

        /// Do not evaluate on edits; only on POST /refresh
        #[arg(long)]
        no_auto_refresh: bool,
    },

    /// Evaluate the chart once
    Run,

    /// Show what a pass would do, without calling the service
    Plan {
        /// Registry file in effects.json format (default: fetch from service)
        #[arg(short, long)]
        registry: Option<PathBuf>,
    },

    /// Show chart readiness
    Status,

    /// Print the operation registry
    Registry,

    /// Empty the compute service's result cache
    ClearCache,
}

impl Cli {
    /// Resolve the effective configuration: file and environment, then flags.
    pub fn resolve_config(&self) -> Result<Config, CvliveError> {
        let mut config = Config::load(self.config.as_deref())?;
        if let Some(url) = &self.service_url {
            config.service_url = url.clone();
        }
        if let Some(chart) = &self.chart {
            config.chart = chart.clone();
        }
        if let Some(Commands::Serve {
            host,
            port,
            no_auto_refresh,
        }) = &self.command
        {
            if let Some(host) = host {
                config.host = host.clone();
            }
            if let Some(port) = port {
                config.port = *port;
            }
            if *no_auto_refresh {
                config.auto_refresh = false;
            }
        }
        Ok(config)
    }
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), CvliveError> {
    let config = cli.resolve_config()?;
    let json_mode = cli.json_mode;

    if cli.verbose {
        tracing::info!(
            service = %config.service_base(),
            chart = %config.chart.display(),
            "configuration resolved"
        );
    }

    match cli.command {
        Some(Commands::Serve { .. }) => cmd_serve(&config).await,
        Some(Commands::Run) => cmd_run(&config, json_mode).await,
        Some(Commands::Plan { registry }) => {
            cmd_plan(&config, registry.as_deref(), json_mode).await
        }
        Some(Commands::Registry) => cmd_registry(&config, json_mode).await,
        Some(Commands::ClearCache) => cmd_clear_cache(&config, json_mode).await,
        Some(Commands::Status) | None => cmd_status(&config, json_mode),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "cvlive",
            "--service-url",
            "http://gpu:5000",
            "--chart",
            "other.json",
            "serve",
            "--port",
            "9000",
            "--no-auto-refresh",
        ]);
        let config = cli.resolve_config().expect("config");
        assert_eq!(config.service_url, "http://gpu:5000");
        assert_eq!(config.chart, PathBuf::from("other.json"));
        assert_eq!(config.port, 9000);
        assert!(!config.auto_refresh);
    }

    #[test]
    fn plan_takes_registry_file() {
        let cli = Cli::parse_from(["cvlive", "plan", "--registry", "effects.json"]);
        assert!(matches!(
            cli.command,
            Some(Commands::Plan { registry: Some(ref p) }) if p == &PathBuf::from("effects.json")
        ));
    }
}
