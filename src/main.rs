//! # mcp-netcli
//!
//! MCP (Model Context Protocol) server that relays CLI commands to network
//! devices over SSH. Runs as a stdio JSON-RPC server, launched by an
//! AI agent host.
//!
//! ## Architecture
//!
//! ```text
//! main.rs     — entry point, logging, inventory loading, MCP server launch
//! config.rs   — CLI flags / env vars
//! devices.rs  — device records and the YAML inventory loader
//! error.rs    — configuration, session and relay errors
//! session.rs  — session provider traits (the seam the relay talks to)
//! dialect.rs  — per-device_type CLI commands and prompt handling
//! ssh.rs      — russh-based session provider
//! relay.rs    — list_devices / run_command / run_config
//! tools.rs    — MCP tool definitions and handlers
//! mcp.rs      — MCP JSON-RPC protocol handler (stdio)
//! ```
//!
//! ## Tools
//!
//! - `list_devices`: names of configured devices
//! - `run_command`: any show/exec command
//! - `run_config`: any config commands, optionally followed by a save

mod config;
mod devices;
mod dialect;
mod error;
mod mcp;
mod relay;
mod session;
mod ssh;
mod tools;

use std::sync::Arc;

use clap::Parser;
use config::{Cli, RelayConfig};
use relay::Relay;
use ssh::SshProvider;
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    // stdout carries the protocol, so logs go to stderr.
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(log_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let config = RelayConfig::from_cli(&cli);

    let inventory = match devices::load_inventory(&config.inventory_path) {
        Ok(inv) => inv,
        Err(e) => {
            error!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    info!(
        "mcp-netcli v{} starting: {} device(s) from {}, timeout={}s, save_policy={:?}",
        env!("CARGO_PKG_VERSION"),
        inventory.len(),
        config.inventory_path.display(),
        config.timeout.as_secs(),
        config.save_policy
    );

    let provider = Arc::new(SshProvider::new(config.timeout));
    let relay = Relay::new(Arc::new(inventory), provider, config.save_policy);

    mcp::run_stdio(Arc::new(relay)).await;
    info!("stdin closed, exiting");
}
