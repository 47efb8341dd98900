//! Configuration management for the nonce relayer
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use ethers::types::U256;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub relayer: RelayerConfig,
    pub ledger: LedgerConfig,
    pub wallet: WalletConfig,
    #[serde(default)]
    pub fees: FeeConfig,
    #[serde(default)]
    pub nonce: NonceConfig,
    #[serde(default)]
    pub submitter: SubmitterConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayerConfig {
    pub instance_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    pub rpc_urls: Vec<String>,
    /// Fetched from the ledger when absent
    pub chain_id: Option<u64>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub private_key_env: Option<String>,
    #[serde(default)]
    pub extra_key_envs: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum FeeStrategy {
    Fixed,
    Estimated,
}

/// Fee parameters, all amounts in wei
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeeConfig {
    pub strategy: FeeStrategy,
    pub gas_price: u64,
    pub gas_price_buffer_percent: u64,
    pub max_gas_price: u64,
    /// Ceiling for the gas limit of any transaction
    pub gas_limit: u64,
    /// Added on top of the ledger's gas estimate
    pub gas_limit_margin: u64,
    pub max_priority_fee: Option<u64>,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            strategy: FeeStrategy::Fixed,
            gas_price: 20_000_000_000,
            gas_price_buffer_percent: 10,
            max_gas_price: 100_000_000_000,
            gas_limit: 3_000_000,
            gas_limit_margin: 50_000,
            max_priority_fee: None,
        }
    }
}

impl FeeConfig {
    pub fn gas_price(&self) -> U256 {
        U256::from(self.gas_price)
    }

    pub fn max_gas_price(&self) -> U256 {
        U256::from(self.max_gas_price)
    }

    pub fn gas_limit(&self) -> U256 {
        U256::from(self.gas_limit)
    }

    pub fn gas_limit_margin(&self) -> U256 {
        U256::from(self.gas_limit_margin)
    }

    pub fn max_priority_fee(&self) -> Option<U256> {
        self.max_priority_fee.map(U256::from)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum NonceStrategy {
    Pooled,
    Incremental,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NonceConfig {
    pub strategy: NonceStrategy,
    pub pool_size: u64,
}

impl Default for NonceConfig {
    fn default() -> Self {
        Self {
            strategy: NonceStrategy::Pooled,
            pool_size: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SubmitterConfig {
    pub max_retries: u32,
    /// Unit of the `2^attempt` backoff
    pub backoff_unit_ms: u64,
    pub confirmation_timeout_ms: u64,
    pub receipt_poll_interval_ms: u64,
    pub confirmation_max_attempts: u32,
    pub wait_for_confirmation: bool,
    pub batch_size: usize,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_unit_ms: 1_000,
            confirmation_timeout_ms: 60_000,
            receipt_poll_interval_ms: 500,
            confirmation_max_attempts: 30,
            wait_for_confirmation: true,
            batch_size: 10,
        }
    }
}

impl SubmitterConfig {
    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }
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

fn default_request_timeout_secs() -> u64 {
    30
}

impl Settings {
    /// Load settings from the configured file
    pub fn load() -> Result<Self> {
        let config_path = env::var("NONCE_RELAYER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::from_path(&config_path)
    }

    /// Load settings from a specific file
    pub fn from_path(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml(&config_str)
    }

    /// Parse settings from TOML text
    pub fn from_toml(input: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(input);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        let urls: Vec<_> = self
            .ledger
            .rpc_urls
            .iter()
            .filter(|url| !url.trim().is_empty())
            .collect();
        if urls.is_empty() {
            anyhow::bail!("At least one ledger RPC URL must be configured");
        }

        if self.nonce.pool_size == 0 {
            anyhow::bail!("nonce.pool_size must be greater than zero");
        }

        if self.submitter.max_retries == 0 {
            anyhow::bail!("submitter.max_retries must be at least 1");
        }

        if self.submitter.batch_size == 0 {
            anyhow::bail!("submitter.batch_size must be greater than zero");
        }

        if self.fees.gas_price > self.fees.max_gas_price {
            anyhow::bail!(
                "fees.gas_price ({}) exceeds fees.max_gas_price ({})",
                self.fees.gas_price,
                self.fees.max_gas_price
            );
        }

        if self.wallet.private_key_env.is_none() {
            tracing::warn!("No default signing key configured - submissions need an explicit account");
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("static regex is valid");

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
        [relayer]
        instance_id = "test"

        [ledger]
        rpc_urls = ["http://127.0.0.1:8545"]

        [wallet]
        private_key_env = "RELAYER_PRIVATE_KEY"

        [api]
        host = "127.0.0.1"
        port = 8080

        [metrics]
        enabled = false
        port = 9090
    "#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("NONCE_RELAYER_TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${NONCE_RELAYER_TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_defaults_follow_middleware_settings() {
        let settings = Settings::from_toml(MINIMAL).unwrap();

        assert_eq!(settings.nonce.strategy, NonceStrategy::Pooled);
        assert_eq!(settings.nonce.pool_size, 100);
        assert_eq!(settings.submitter.max_retries, 3);
        assert_eq!(settings.submitter.confirmation_max_attempts, 30);
        assert_eq!(settings.fees.gas_price(), U256::from(20_000_000_000u64));
        assert_eq!(settings.fees.gas_limit(), U256::from(3_000_000u64));
        assert_eq!(settings.ledger.request_timeout_secs, 30);
        assert!(settings.ledger.chain_id.is_none());
    }

    #[test]
    fn test_rejects_empty_pool() {
        let input = format!("{}\n[nonce]\nstrategy = \"pooled\"\npool_size = 0\n", MINIMAL);
        let err = Settings::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("pool_size"));
    }

    #[test]
    fn test_rejects_missing_rpc_url() {
        let input = MINIMAL.replace("\"http://127.0.0.1:8545\"", "\"\"");
        assert!(Settings::from_toml(&input).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let input = format!(
            "{}\n[nonce]\nstrategy = \"incremental\"\n\n[submitter]\nmax_retries = 5\nwait_for_confirmation = false\n",
            MINIMAL
        );
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(input.as_bytes()).unwrap();

        let settings = Settings::from_path(file.path()).unwrap();
        assert_eq!(settings.nonce.strategy, NonceStrategy::Incremental);
        assert_eq!(settings.nonce.pool_size, 100);
        assert_eq!(settings.submitter.max_retries, 5);
        assert!(!settings.submitter.wait_for_confirmation);
        assert_eq!(settings.submitter.backoff_unit(), Duration::from_secs(1));
    }
}
