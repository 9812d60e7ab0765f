//! Command line and environment configuration.

use anyhow::{Context, Result, bail};
use chainwatch_domain::Network;
use chainwatch_execution::confirmation::ConfirmerConfig;
use chainwatch_execution::context::ListenerSettings;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "chainwatch")]
#[command(about = "Contract event listener and transaction confirmer", long_about = None)]
pub struct Cli {
    /// Network to listen on (testnet or mainnet)
    #[arg(default_value = "testnet")]
    pub network: Network,

    /// HTTP port for the health and status endpoints
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// PostgreSQL connection string; in-memory store when absent
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// ABI file seeding the in-memory config feed
    #[arg(long, env = "CHAINWATCH_ABI_FILE")]
    pub abi_file: Option<PathBuf>,

    /// Receipt queries before a confirmation is given up
    #[arg(long, default_value_t = 3)]
    pub poll_attempts: u32,

    /// Wait before each receipt query, in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub poll_interval_ms: u64,
}

fn var_name(network: Network, suffix: &str) -> String {
    format!("CHAINWATCH_{}_{suffix}", network.env_prefix())
}

fn required(
    network: Network,
    suffix: &str,
    env: &impl Fn(&str) -> Option<String>,
) -> Result<String> {
    let name = var_name(network, suffix);
    match env(&name) {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => bail!("{name} must be set in .env or environment"),
    }
}

/// Builds the listener settings from the command line and `env`.
///
/// # Errors
/// Returns an error if a required endpoint variable is missing or the poll
/// policy is unusable.
pub fn listener_settings(
    cli: &Cli,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ListenerSettings> {
    let network = cli.network;
    if cli.poll_attempts == 0 {
        bail!("--poll-attempts must be at least 1");
    }

    let mut settings = ListenerSettings::new(
        network,
        required(network, "WSS_URL", &env)?,
        required(network, "RPC_URL", &env)?,
    );
    settings.expected_address = env(&var_name(network, "CONTRACT_ADDRESS"))
        .map(|address| address.trim().to_string())
        .filter(|address| !address.is_empty());
    settings.confirmer = ConfirmerConfig {
        poll_attempts: cli.poll_attempts,
        poll_interval: Duration::from_millis(cli.poll_interval_ms),
        ..ConfirmerConfig::default()
    };
    Ok(settings)
}

/// Reads the ABI used to seed the in-memory config feed.
///
/// # Errors
/// Returns an error if no file was given or it is not JSON.
pub fn read_abi(cli: &Cli) -> Result<serde_json::Value> {
    let Some(path) = &cli.abi_file else {
        bail!("--abi-file is required when running without DATABASE_URL");
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading ABI file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing ABI file {}", path.display()))
}
