//! Configuration management module
//!
//! Handles loading, validation, and management of application configuration.

use alloy_primitives::Address;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::relay::PeerMetadata;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Canonical EVM chain id used for every namespace and transaction
    pub chain_id: u64,

    /// Logging level
    pub log_level: String,

    /// File-based logging configuration
    pub log: LogConfig,

    /// Relay transport configuration
    pub relay: RelayConfig,

    /// Session negotiation and persistence configuration
    pub session: SessionConfig,

    /// Deployed contract addresses
    #[serde(default)]
    pub contracts: ContractsConfig,

    /// Module logic address overrides, keyed by module name
    #[serde(default)]
    pub modules: BTreeMap<String, Address>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    /// Relay WebSocket URL
    pub url: String,

    /// Relay project id, appended as `?projectId=` when non-empty
    #[serde(default)]
    pub project_id: String,

    /// Timeout for a single relay round trip in seconds
    pub request_timeout_seconds: u64,

    /// How long the signer has to answer a pairing proposal in seconds
    pub approval_timeout_seconds: u64,

    /// Initial reconnect interval in milliseconds
    pub reconnect_interval_ms: u64,

    /// Maximum connection attempts before giving up
    pub max_reconnect_attempts: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Where the settled session is persisted between runs
    pub store_path: String,

    /// JSON-RPC methods requested from the signer
    pub methods: Vec<String>,

    /// Signer events requested in the proposal
    pub events: Vec<String>,

    /// Metadata this client advertises to the signer
    pub metadata: PeerMetadata,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ContractsConfig {
    /// DAO factory contract
    pub factory_address: Address,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Absolute or relative path to the rolling log file
    pub file_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chain_id: 11155111,
            log_level: "info".to_string(),
            log: LogConfig::default(),
            relay: RelayConfig::default(),
            session: SessionConfig::default(),
            contracts: ContractsConfig::default(),
            modules: BTreeMap::new(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: "wss://relay.walletconnect.com".to_string(),
            project_id: String::new(),
            request_timeout_seconds: 300,
            approval_timeout_seconds: 300,
            reconnect_interval_ms: 1000,
            max_reconnect_attempts: 5,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            store_path: "walletlink-session.json".to_string(),
            methods: vec!["eth_sendTransaction".to_string(), "personal_sign".to_string()],
            events: vec!["chainChanged".to_string(), "accountsChanged".to_string()],
            metadata: PeerMetadata {
                name: "WalletLink".to_string(),
                description: "DAO community client".to_string(),
                url: "https://walletlink.app".to_string(),
                icons: Vec::new(),
            },
        }
    }
}

impl Default for ContractsConfig {
    fn default() -> Self {
        Self {
            factory_address: Address::ZERO,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file_path: "logs/walletlink.log".to_string(),
        }
    }
}

impl RelayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_seconds)
    }

    /// Relay URL including the project id query, if any
    pub fn endpoint(&self) -> String {
        if self.project_id.trim().is_empty() {
            self.url.clone()
        } else {
            format!("{}?projectId={}", self.url, self.project_id.trim())
        }
    }
}

impl Config {
    /// Load configuration from file with environment variable overrides
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        // Apply environment variable overrides
        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        // WALLETLINK_CHAIN_ID - canonical chain id
        if let Ok(chain_id) = env::var("WALLETLINK_CHAIN_ID") {
            if let Ok(value) = chain_id.parse::<u64>() {
                self.chain_id = value;
            }
        }

        // WALLETLINK_LOG_LEVEL - logging level
        if let Ok(log_level) = env::var("WALLETLINK_LOG_LEVEL") {
            self.log_level = log_level;
        }

        // WALLETLINK_LOG_FILE_PATH - logging destination file
        if let Ok(file_path) = env::var("WALLETLINK_LOG_FILE_PATH") {
            if !file_path.trim().is_empty() {
                self.log.file_path = file_path;
            }
        }

        // Relay-specific environment variables
        if let Ok(url) = env::var("WALLETLINK_RELAY_URL") {
            self.relay.url = url;
        }

        if let Ok(project_id) = env::var("WALLETLINK_RELAY_PROJECT_ID") {
            self.relay.project_id = project_id;
        }

        if let Ok(timeout) = env::var("WALLETLINK_RELAY_REQUEST_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse::<u64>() {
                self.relay.request_timeout_seconds = value;
            }
        }

        if let Ok(timeout) = env::var("WALLETLINK_RELAY_APPROVAL_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse::<u64>() {
                self.relay.approval_timeout_seconds = value;
            }
        }

        if let Ok(interval) = env::var("WALLETLINK_RELAY_RECONNECT_INTERVAL_MS") {
            if let Ok(value) = interval.parse::<u64>() {
                self.relay.reconnect_interval_ms = value;
            }
        }

        if let Ok(attempts) = env::var("WALLETLINK_RELAY_MAX_RECONNECT_ATTEMPTS") {
            if let Ok(value) = attempts.parse::<u32>() {
                self.relay.max_reconnect_attempts = value;
            }
        }

        // WALLETLINK_SESSION_STORE_PATH - persisted session file
        if let Ok(path) = env::var("WALLETLINK_SESSION_STORE_PATH") {
            if !path.trim().is_empty() {
                self.session.store_path = path;
            }
        }

        // WALLETLINK_FACTORY_ADDRESS - DAO factory contract
        if let Ok(factory) = env::var("WALLETLINK_FACTORY_ADDRESS") {
            match factory.trim().parse::<Address>() {
                Ok(address) => self.contracts.factory_address = address,
                Err(e) => tracing::warn!("Ignoring WALLETLINK_FACTORY_ADDRESS: {}", e),
            }
        }
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Load configuration with fallback to default
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::load_from_file(path).unwrap_or_else(|err| {
            tracing::warn!("Failed to load config: {}, using defaults", err);
            let mut config = Self::default();
            config.apply_env_overrides();
            config
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.chain_id == 0 {
            anyhow::bail!("chain_id must be greater than 0");
        }

        if !self.relay.url.starts_with("ws://") && !self.relay.url.starts_with("wss://") {
            anyhow::bail!("relay.url must be a ws:// or wss:// URL: {}", self.relay.url);
        }

        if self.relay.request_timeout_seconds == 0 {
            anyhow::bail!("relay.request_timeout_seconds must be greater than 0");
        }

        if self.relay.approval_timeout_seconds == 0 {
            anyhow::bail!("relay.approval_timeout_seconds must be greater than 0");
        }

        if self.relay.max_reconnect_attempts == 0 {
            anyhow::bail!("relay.max_reconnect_attempts must be greater than 0");
        }

        if self.log.file_path.trim().is_empty() {
            anyhow::bail!("Log file path must not be empty");
        }

        if self.session.store_path.trim().is_empty() {
            anyhow::bail!("session.store_path must not be empty");
        }

        if !self.session.methods.iter().any(|m| m == "eth_sendTransaction") {
            anyhow::bail!("session.methods must include eth_sendTransaction");
        }

        Ok(())
    }

    /// Display formatted configuration
    pub fn display(&self) -> Result<()> {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(self)?);
        Ok(())
    }

    /// Handle configuration command
    pub fn handle_command(config_file: &str, action: &Option<crate::cli::ConfigAction>) -> Result<()> {
        match action {
            Some(crate::cli::ConfigAction::Show) | None => {
                let config = Config::load_or_default(config_file);
                config.display()?;
            }
            Some(crate::cli::ConfigAction::Reset) => {
                let default_config = Config::default();
                default_config.save_to_file(config_file)?;
                println!("Configuration reset: {}", config_file);
                default_config.display()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chain_id, 11155111);
    }

    #[test]
    fn test_relay_endpoint() {
        let mut relay = RelayConfig::default();
        assert_eq!(relay.endpoint(), "wss://relay.walletconnect.com");

        relay.project_id = "abc".to_string();
        assert_eq!(relay.endpoint(), "wss://relay.walletconnect.com?projectId=abc");
    }

    #[test]
    fn test_validate_rejects_http_relay() {
        let mut config = Config::default();
        config.relay.url = "https://relay.example.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_send_transaction() {
        let mut config = Config::default();
        config.session.methods = vec!["personal_sign".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        // No other test asserts on project_id
        unsafe { env::set_var("WALLETLINK_RELAY_PROJECT_ID", "from-env") };

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.relay.project_id, "from-env");
        assert!(config.relay.endpoint().ends_with("?projectId=from-env"));

        unsafe { env::remove_var("WALLETLINK_RELAY_PROJECT_ID") };
    }

    #[test]
    fn test_config_serialization() {
        let mut config = Config::default();
        config
            .modules
            .insert("MemberModule".to_string(), Address::repeat_byte(0x11));
        let serialized = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(config.chain_id, deserialized.chain_id);
        assert_eq!(
            deserialized.modules.get("MemberModule"),
            Some(&Address::repeat_byte(0x11))
        );
    }

    #[test]
    fn test_config_file_operations() {
        let config = Config::default();
        let temp_file = NamedTempFile::new().unwrap();

        // Test save
        config.save_to_file(temp_file.path()).unwrap();

        // Test load
        let loaded_config = Config::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.relay.url, loaded_config.relay.url);
        assert_eq!(config.session.methods, loaded_config.session.methods);
    }
}
