//! # Software AXI Bus Router - Main Entry Point
//!
//! ## Architecture Overview
//!
//! The main function performs these key operations:
//! 1. **Parse arguments**: Processes command-line configuration
//! 2. **Initialize logging**: Sets up structured logging with tracing
//! 3. **Validate configuration**: Converts CLI args to an internal, checked config
//! 4. **Run the router**: Drives the five-phase lifecycle to completion
//!
//! ## Error Handling
//!
//! The application uses `anyhow::Result` throughout. Any fatal error -
//! configuration, transport, or protocol - aborts the process with a
//! non-zero exit code; the error chain is logged before returning.

use anyhow::Result;
use clap::Parser;
use sw_axi_router::cli::{log_level_filter, Args};
use sw_axi_router::{Router, RouterConfig};
use tracing::{error, info};
use tracing_subscriber::{filter::LevelFilter, prelude::*, Layer};

mod logging;
use logging::ColorizedFormatter;

/// Main application entry point.
///
/// Uses Tokio's multi-threaded runtime: the router's Phase 4 concurrency
/// (one task per reader/writer pump plus the routing task) needs real
/// parallelism, not just an executor that interleaves cooperatively.
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match log_level_filter(&args.log_level) {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "warn" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    };

    // The guard must be kept alive for the duration of the program for file
    // logging; dropping it early silently stops the writer.
    let guard;
    let detailed_log_layer;

    if let Some("stderr") = args.log_file.as_deref() {
        detailed_log_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .event_format(ColorizedFormatter)
            .with_filter(log_level)
            .boxed();
        guard = None;
    } else {
        let file_appender = match args.log_file.as_deref() {
            Some(path_str) => {
                let log_path = std::path::Path::new(path_str);
                let log_dir = log_path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or_else(|| std::path::Path::new("."));
                let log_filename = log_path.file_name().unwrap_or_else(|| std::ffi::OsStr::new("sw-axi-router.log"));
                tracing_appender::rolling::never(log_dir, log_filename)
            }
            None => tracing_appender::rolling::never(".", "sw-axi-router.log"),
        };
        let (non_blocking_writer, file_guard) = tracing_appender::non_blocking(file_appender);
        detailed_log_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_filter(log_level)
            .boxed();
        guard = Some(file_guard);
    }

    tracing_subscriber::registry().with(detailed_log_layer).init();
    let _log_guard = guard;

    info!(version = sw_axi_router::VERSION, "starting sw-axi-router");

    let config = RouterConfig::try_from(&args)?;
    info!(uri = %args.uri, expected_clients = config.expected_clients, "configuration validated");

    let router = Router::new(config);
    if let Err(err) = router.run().await {
        error!(error = %err, "router exited with an error");
        return Err(err);
    }

    info!("sw-axi-router exiting cleanly");
    Ok(())
}
