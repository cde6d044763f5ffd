//! # cvlive
//!
//! Live image-processing chart server.
//!
//! ```bash
//! # Serve the edit API against a compute service
//! cvlive --service-url http://127.0.0.1:5000 serve --port 8080
//!
//! # One-shot evaluation of a chart file
//! cvlive --chart chart.json run
//!
//! # What would be recomputed, offline
//! cvlive plan --registry effects.json
//! ```

use clap::Parser;
use cvlive::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // CVLIVE_LOG_FORMAT=json switches to machine-parseable output.
    let log_format = std::env::var("CVLIVE_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cvlive=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn print_banner() {
    println!(
        r#"
   ___ __   __ | (_)__   __ ___
  / __|\ \ / / | | |\ \ / // _ \
 | (__  \ V /  | | | \ V /|  __/
  \___|  \_/   |_|_|  \_/  \___|

  live image-processing charts v{}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
