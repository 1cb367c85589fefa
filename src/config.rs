//! Command-line configuration for mcp-netcli.
//!
//! Every flag can also be supplied through an environment variable, which is
//! convenient when the server is launched by an agent host that only lets you
//! set env vars:
//!
//! | Flag            | Env var               | Default           |
//! |-----------------|-----------------------|-------------------|
//! | `--inventory`   | `NETCLI_INVENTORY`    | `devices.yaml`    |
//! | `--timeout-secs`| `NETCLI_TIMEOUT_SECS` | `30`              |
//! | `--save-policy` | `NETCLI_SAVE_POLICY`  | `skip-on-failure` |
//! | `--log-level`   | `NETCLI_LOG`          | `info`            |
//!
//! `RUST_LOG`, when set, takes precedence over `--log-level`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};

/// CLI arguments parsed by `clap`.
#[derive(Parser, Debug)]
#[command(
    name = "mcp-netcli",
    version,
    about = "MCP server that relays CLI commands to network devices over SSH"
)]
pub struct Cli {
    /// Path to the device inventory (YAML)
    #[arg(long, env = "NETCLI_INVENTORY", default_value = "devices.yaml")]
    pub inventory: PathBuf,

    /// Timeout in seconds for each network step (connect, login, command output)
    #[arg(
        long,
        env = "NETCLI_TIMEOUT_SECS",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub timeout_secs: u64,

    /// Whether `run_config` still saves after a failed config push
    #[arg(
        long,
        env = "NETCLI_SAVE_POLICY",
        value_enum,
        default_value_t = SavePolicy::SkipOnFailure
    )]
    pub save_policy: SavePolicy,

    /// tracing filter, e.g. `info` or `mcp_netcli=debug`
    #[arg(long, env = "NETCLI_LOG", default_value = "info")]
    pub log_level: String,
}

/// What `run_config` does with `save=true` when the config push itself fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum SavePolicy {
    /// Do not persist a configuration that failed to apply.
    #[default]
    SkipOnFailure,
    /// Attempt the save regardless of how the config push went.
    Always,
}

/// Settings injected into the relay and the SSH provider.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub inventory_path: PathBuf,
    pub timeout: Duration,
    pub save_policy: SavePolicy,
}

impl RelayConfig {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            inventory_path: expand_tilde(&cli.inventory),
            timeout: Duration::from_secs(cli.timeout_secs),
            save_policy: cli.save_policy,
        }
    }
}

/// Expand a leading `~` to `$HOME`.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}
