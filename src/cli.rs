//! # Command-Line Interface Module
//!
//! Argument parsing and configuration for the router binary, using `clap`'s
//! derive API the same way the rest of this family of tools does: a flat
//! `Args` struct parsed straight off `std::env::args`, converted into a
//! validated internal configuration before anything touches the network.
//!
//! ## Usage Examples
//!
//! ```bash
//! # Wait for the default two clients on the default socket
//! sw-axi-router
//!
//! # Wait for four clients on a custom socket, with debug logging to a file
//! sw-axi-router --uri unix:///tmp/my-bus --n 4 --log-level debug --log-file router.log
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::builder::styling::{AnsiColor, Styles};
use clap::Parser;

use crate::error::RouterError;

/// Defines the styles for the help message to replicate clap v3's appearance.
fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Yellow.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Software AXI bus router
///
/// Listens on a single Unix domain socket, waits for a fixed number of
/// clients to connect and publish their IP inventory, then routes bus
/// transactions between them until every master has terminated.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None, styles = styles())]
pub struct Args {
    /// Listen URI for client connections
    ///
    /// Only the `unix://` scheme is supported; the remainder of the URI is
    /// the filesystem path of the socket, which is created fresh on every
    /// run (a stale socket file at that path is removed first).
    #[arg(long, default_value = "unix:///tmp/sw-axi")]
    pub uri: String,

    /// Number of client connections to wait for before starting the bus
    #[arg(long, default_value_t = 2)]
    pub n: u64,

    /// Write logs to this file (default: `sw-axi-router.log` in the current
    /// directory), or pass the literal value `stderr` for a colorized
    /// stderr sink instead.
    #[arg(long, help_heading = "Output and Logging")]
    pub log_file: Option<String>,

    /// Minimum log level to emit: trace, debug, info, warn, or error
    #[arg(long, default_value = "info", help_heading = "Output and Logging")]
    pub log_level: String,
}

/// Validated configuration the router actually runs against.
#[derive(Clone, Debug)]
pub struct RouterConfig {
    pub socket_path: PathBuf,
    pub expected_clients: u64,
}

impl TryFrom<&Args> for RouterConfig {
    type Error = anyhow::Error;

    /// Convert CLI arguments to a validated router configuration.
    ///
    /// Parses the `unix://` URI down to a filesystem path and rejects a
    /// client count of zero, which would leave Phase 0 waiting forever.
    fn try_from(args: &Args) -> Result<Self> {
        let socket_path = parse_unix_uri(&args.uri)
            .with_context(|| format!("invalid --uri '{}'", args.uri))?;

        if args.n == 0 {
            bail!(RouterError::Configuration(
                "--n must be at least 1".to_string()
            ));
        }

        Ok(Self {
            socket_path,
            expected_clients: args.n,
        })
    }
}

/// Parse a `unix:///path/to/socket` URI into its filesystem path.
fn parse_unix_uri(uri: &str) -> Result<PathBuf> {
    let path = uri
        .strip_prefix("unix://")
        .ok_or_else(|| RouterError::Configuration(format!("unsupported URI scheme in '{}', expected unix://", uri)))?;
    if path.is_empty() {
        bail!(RouterError::Configuration("unix:// URI is missing a path".to_string()));
    }
    Ok(PathBuf::from(path))
}

/// Parse `--log-level` into a `tracing` filter directive, falling back to
/// `info` on anything unrecognized rather than refusing to start.
pub fn log_level_filter(level: &str) -> &'static str {
    match level.to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    }
}
