//! Configuration management for the Snooze Relayer
//!
//! Loads configuration from TOML files with environment variable substitution.
//! Everything is resolved once at startup and passed to constructors.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::tx::{Backoff, RetryPolicy};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub engine: EngineConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub chain: ChainConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub instance_id: String,
    /// Run evaluation cycles on a timer in addition to the HTTP trigger
    #[serde(default = "default_true")]
    pub schedule_enabled: bool,
    pub poll_interval_secs: u64,
    #[serde(default = "default_concurrency")]
    pub max_concurrent_resolutions: usize,
    pub receipt_max_attempts: u32,
    pub receipt_retry_delay_ms: u64,
    #[serde(default)]
    pub receipt_backoff: BackoffKind,
    #[serde(default = "default_max_delay_ms")]
    pub receipt_max_delay_ms: u64,
    pub submit_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    pub health_check_interval_secs: u64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `postgres://...` or `memory://` for a non-durable in-process store
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_urls: Vec<String>,
    #[serde(default)]
    pub fee_strategy: FeeStrategy,
    pub explorer_tx_url: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum FeeStrategy {
    /// `eth_gasPrice`
    #[default]
    Legacy,
    /// Base fee of the latest block
    Eip1559,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Name of the environment variable holding the signing key
    pub private_key_env: Option<String>,
    #[serde(default = "default_transfer_gas_limit")]
    pub transfer_gas_limit: u64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            private_key_env: None,
            transfer_gas_limit: default_transfer_gas_limit(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
    /// Appended to success messages, e.g. `@operator`
    #[serde(default)]
    pub mention: Option<String>,
}

impl TelegramConfig {
    pub fn is_configured(&self) -> bool {
        !self.bot_token.is_empty() && !self.chat_id.is_empty()
    }
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    1
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_request_timeout() -> u64 {
    15
}

fn default_transfer_gas_limit() -> u64 {
    21_000
}

impl Settings {
    /// Load settings from the file named by `SNOOZE_CONFIG`
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let config_path = env::var("SNOOZE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    fn parse(raw: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(raw);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        let urls: Vec<_> = self
            .chain
            .rpc_urls
            .iter()
            .filter(|u| !u.trim().is_empty())
            .collect();
        if urls.is_empty() {
            anyhow::bail!("Chain {} has no RPC URLs configured", self.chain.name);
        }

        if self.database.url.trim().is_empty() {
            anyhow::bail!("Database URL is empty");
        }

        if self.engine.receipt_max_attempts == 0 {
            anyhow::bail!("engine.receipt_max_attempts must be at least 1");
        }

        if self.engine.max_concurrent_resolutions == 0 {
            anyhow::bail!("engine.max_concurrent_resolutions must be at least 1");
        }

        if self.engine.schedule_enabled && self.engine.poll_interval_secs == 0 {
            anyhow::bail!("engine.poll_interval_secs must be positive when scheduling is on");
        }

        if !self.telegram.is_configured() {
            tracing::warn!("Telegram not configured - success notifications will only be logged");
        }

        Ok(())
    }
}

impl EngineConfig {
    /// Receipt polling policy built from the engine section
    pub fn receipt_policy(&self) -> RetryPolicy {
        let delay = Duration::from_millis(self.receipt_retry_delay_ms);
        let backoff = match self.receipt_backoff {
            BackoffKind::Fixed => Backoff::Fixed,
            BackoffKind::Exponential => Backoff::Exponential {
                factor: 2,
                max_delay: Duration::from_millis(self.receipt_max_delay_ms),
            },
        };
        RetryPolicy::new(self.receipt_max_attempts, delay, backoff)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.submit_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl ChainConfig {
    /// RPC URLs with blanks (unset env substitutions) removed
    pub fn usable_rpc_urls(&self) -> Vec<String> {
        self.rpc_urls
            .iter()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect()
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = match regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}") {
        Ok(re) => re,
        Err(_) => return result,
    };

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
