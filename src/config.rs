//! Configuration management for the XCP gateway

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use clap::Parser;
use crate::error::{GatewayError, Result};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "xcp-gateway")]
#[command(about = "XCP master gateway for remote charger-controller variable access")]
#[command(version)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Log file path
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// WebSocket bind address for client connections
    #[arg(long, default_value = "0.0.0.0:8000")]
    pub bind: String,

    /// XCP response timeout in milliseconds
    #[arg(long, default_value = "500")]
    pub response_timeout: u64,

    /// XCP connect timeout in milliseconds
    #[arg(long, default_value = "2000")]
    pub connect_timeout: u64,

    /// Retry count for transient transport faults
    #[arg(long, default_value = "3")]
    pub retry_count: u32,

    /// Default polling interval in milliseconds
    #[arg(long, default_value = "500")]
    pub poll_interval: u64,

    /// Generate default configuration file
    #[arg(long)]
    pub generate_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub validate_config: bool,

    /// Show current configuration and exit
    #[arg(long)]
    pub show_config: bool,
}

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub protocol: ProtocolConfig,
    pub polling: PollingConfig,
    pub controllers: HashMap<String, ControllerConfig>,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            protocol: ProtocolConfig::default(),
            polling: PollingConfig::default(),
            controllers: Self::default_controllers(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file or create default
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            let content = std::fs::read_to_string(path)
                .map_err(|e| GatewayError::InvalidConfig(format!("Failed to read config file: {}", e)))?;
            let config: Config = toml::from_str(&content)
                .map_err(|e| GatewayError::InvalidConfig(format!("Invalid TOML syntax: {}", e)))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Merge command line arguments into configuration
    pub fn merge_args(&mut self, args: &Args) {
        self.server.bind = args.bind.clone();
        self.protocol.response_timeout_ms = args.response_timeout;
        self.protocol.connect_timeout_ms = args.connect_timeout;
        self.protocol.retry_count = args.retry_count;
        self.polling.default_interval_ms = args.poll_interval;
        self.logging.level = args.log_level.clone();
        self.logging.file = args.log_file.clone();
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.bind.parse::<std::net::SocketAddr>().is_err() {
            return Err(GatewayError::InvalidConfig(format!(
                "server.bind is not a valid socket address: {}",
                self.server.bind
            )));
        }
        if self.protocol.response_timeout_ms == 0 {
            return Err(GatewayError::InvalidConfig(
                "protocol.response_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.protocol.max_upload_bytes == 0 {
            return Err(GatewayError::InvalidConfig(
                "protocol.max_upload_bytes must be > 0".to_string(),
            ));
        }
        if self.polling.default_interval_ms == 0 {
            return Err(GatewayError::InvalidConfig(
                "polling.default_interval_ms must be > 0".to_string(),
            ));
        }
        for (id, controller) in &self.controllers {
            if controller.link.is_empty() {
                return Err(GatewayError::InvalidConfig(format!(
                    "controllers.{}.link must not be empty",
                    id
                )));
            }
        }
        for sub in &self.polling.startup {
            if !self.controllers.contains_key(&sub.controller) {
                return Err(GatewayError::InvalidConfig(format!(
                    "polling.startup references unknown controller: {}",
                    sub.controller
                )));
            }
        }
        Ok(())
    }

    /// Generate TOML configuration string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| GatewayError::InvalidConfig(format!("Failed to serialize config: {}", e)))
    }

    /// Get default controller configurations
    fn default_controllers() -> HashMap<String, ControllerConfig> {
        let mut controllers = HashMap::new();

        controllers.insert("cabinet".to_string(), ControllerConfig {
            role: ControllerRole::Slave,
            link: "emulated".to_string(),
            address: 1,
            firmware: None,
        });

        controllers
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProtocolConfig {
    pub response_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub retry_count: u32,
    /// Expected XCP protocol version byte in the CONNECT reply
    pub protocol_version: u8,
    /// Queue depth per controller worker
    pub queue_depth: usize,
    /// Largest memory window one UPLOAD command may request
    pub max_upload_bytes: u32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: 500,
            connect_timeout_ms: 2000,
            retry_count: 3,
            protocol_version: 1,
            queue_depth: 32,
            max_upload_bytes: 4096,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PollingConfig {
    pub default_interval_ms: u64,
    /// Capacity of the broadcast channel carrying data samples
    pub sample_capacity: usize,
    /// Subscriptions installed at startup
    #[serde(default)]
    pub startup: Vec<StartupSubscription>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            default_interval_ms: 500,
            sample_capacity: 256,
            startup: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StartupSubscription {
    pub controller: String,
    pub parameter: String,
    pub interval_ms: Option<u64>,
}

/// Role of a controller in the XCP field protocol
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ControllerRole {
    Master,
    Slave,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ControllerConfig {
    pub role: ControllerRole,
    /// Transport endpoint: "tcp://host:port" or "emulated"
    pub link: String,
    /// Station address on the serial fabric
    pub address: u8,
    /// Path to the compiled firmware ELF for this controller
    pub firmware: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}
