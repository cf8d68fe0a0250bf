//! Service bootstrap
//!
//! Command-line arguments, configuration loading and logging setup.

use clap::Parser;
use std::path::PathBuf;
use tracing::debug;

use crate::config::GatewayConfig;
use crate::error::{GatewaySrvError, Result};

pub const SERVICE_NAME: &str = "gatewaysrv";

/// Command-line arguments for gatewaysrv
#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "gatewaysrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Field-bus polling and normalisation gateway",
    long_about = None
)]
pub struct Args {
    /// YAML configuration file
    #[arg(short = 'c', long, env = "GTW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level or filter directive; overrides log.level
    #[arg(short = 'l', long, env = "GTW_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log directory; overrides log.dir
    #[arg(long, env = "GTW_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Do not start the MQTT bridge
    #[arg(long, env = "GTW_NO_MQTT")]
    pub no_mqtt: bool,

    /// Do not start the JSON-RPC API
    #[arg(long, env = "GTW_NO_API")]
    pub no_api: bool,

    /// Validation mode - only validate configuration without starting service
    #[arg(long)]
    pub validate: bool,
}

/// Load the layered configuration and apply command-line overrides
pub fn load_config(args: &Args) -> Result<GatewayConfig> {
    let mut config = GatewayConfig::load(args.config.as_deref())?;
    if let Some(level) = &args.log_level {
        config.log.level = level.clone();
    }
    if let Some(dir) = &args.log_dir {
        config.log.dir = dir.clone();
    }
    debug!("Configuration loaded: {:?}", config.poll_device_ids);
    Ok(config)
}

/// Initialize console and file logging from `log.*`
pub fn initialize_logging(config: &GatewayConfig) -> Result<()> {
    let log_config = config.log.to_log_config(SERVICE_NAME)?;
    common::logging::init_with_config(log_config)
        .map_err(|e| GatewaySrvError::config(format!("Failed to init logging: {}", e)))
}
