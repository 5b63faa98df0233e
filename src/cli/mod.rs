//! Command Line Interface module
//!
//! Implements the CLI commands and argument parsing for WalletLink.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(name = "walletlink")]
#[command(about = "WalletLink wallet session client")]
#[command(long_about = "Pairs with an external signer over a relay and submits DAO transactions")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file path
    #[arg(long, default_value = "config.toml")]
    pub config_file: String,

    /// Log level (trace, debug, info, warn, error); defaults to the configured level
    #[arg(long)]
    pub log_level: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Pair with a signer and wait for approval
    Connect,

    /// Show the persisted session
    Status,

    /// End the current session
    Disconnect,

    /// Print a module's ABI-encoded initialization data
    EncodeInit {
        /// Module name, e.g. ProposalVotingModule
        module: String,

        /// Admin address used by membership modules
        #[arg(long)]
        admin: Option<String>,

        /// Module parameter as KEY=VALUE, e.g. ProposalVotingModule_approvalThreshold=60
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
    },

    /// Deploy a DAO through the factory contract
    Deploy {
        /// Built-in template name or path to a template TOML file
        #[arg(long, default_value = "basic")]
        template: String,

        /// DAO settings file (TOML or JSON)
        #[arg(long)]
        dao: String,

        /// Print the plan without submitting it
        #[arg(long)]
        dry_run: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

impl Default for Commands {
    fn default() -> Self {
        Commands::Status
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Reset configuration to defaults
    Reset,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the actual command, using default if none provided
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or_default()
    }

    /// Adjust log level based on verbose flag, falling back to the configured level
    pub fn effective_log_level(&self, configured: &str) -> String {
        if self.verbose {
            "debug".to_string()
        } else {
            self.log_level
                .clone()
                .unwrap_or_else(|| configured.to_string())
        }
    }
}

/// Split `KEY=VALUE`; integers become JSON numbers, anything else a string
pub fn parse_param(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("Expected KEY=VALUE, got {}", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("Empty parameter name in {}", raw));
    }

    let value = value.trim();
    let value = match value.parse::<u64>() {
        Ok(n) => serde_json::Value::from(n),
        Err(_) => serde_json::Value::String(value.to_string()),
    };
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_status() {
        let cli = Cli::parse_from(["walletlink"]);
        assert!(matches!(cli.command(), Commands::Status));
        assert_eq!(cli.config_file, "config.toml");
        assert_eq!(cli.effective_log_level("warn"), "warn");
    }

    #[test]
    fn test_verbose_overrides_log_level() {
        let cli = Cli::parse_from(["walletlink", "-v", "--log-level", "warn", "connect"]);
        assert_eq!(cli.effective_log_level("info"), "debug");
        assert!(matches!(cli.command(), Commands::Connect));
    }

    #[test]
    fn test_encode_init_args() {
        let cli = Cli::parse_from([
            "walletlink",
            "encode-init",
            "ProposalVotingModule",
            "--param",
            "ProposalVotingModule_approvalThreshold=60",
        ]);
        match cli.command() {
            Commands::EncodeInit { module, params, .. } => {
                assert_eq!(module, "ProposalVotingModule");
                assert_eq!(params.len(), 1);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_param() {
        assert_eq!(
            parse_param("A_b=60").unwrap(),
            ("A_b".to_string(), serde_json::json!(60))
        );
        assert_eq!(
            parse_param("A_b=sixty").unwrap(),
            ("A_b".to_string(), serde_json::json!("sixty"))
        );
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=1").is_err());
    }
}
