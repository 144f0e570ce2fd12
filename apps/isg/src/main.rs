//! # isg - Interface Signature Graph CLI
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │              apps/isg (THE BINARY)            │
//! │                                               │
//! │   extractor JSON ──▶ CLI (clap) ──▶ isg-core  │
//! │                          │                    │
//! │                          ▼                    │
//! │                 redb snapshot store           │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! isg ingest -f batches.json
//! isg update -f changed.json --checksums current.json
//! isg query callers handler::handle
//! isg query blast parser::Token --depth 3
//! isg --json-mode status
//! ```

use clap::Parser;
use isg::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    // ISG_LOG_FORMAT=json enables machine-parseable logs.
    let log_format = std::env::var("ISG_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "isg=info,isg_core=info".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the startup banner.
fn print_banner() {
    eprintln!(
        "isg v{} - interface signature graph",
        env!("CARGO_PKG_VERSION")
    );
}
