use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::types::{Address, Wei, GWEI};

/// Main configuration structure for ens-bundler
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BundlerConfig {
    /// Registrar contract settings
    pub registrar: RegistrarConfig,
    /// Gas price parameters, fixed per run
    pub fees: FeesConfig,
    /// Phase controller settings
    pub engine: EngineConfig,
    /// Logging settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistrarConfig {
    /// Registrar controller contract
    pub controller_address: Address,
    /// Resolver recorded for the registered name
    pub resolver_address: Address,
    pub chain_id: u64,
    /// Requested registration duration in seconds
    pub default_duration_secs: u64,
    /// Extra percentage added to the quoted rent price; the ledger refunds the excess
    pub price_buffer_percent: u32,
    pub min_name_length: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FeesConfig {
    pub max_fee_per_gas_gwei: u64,
    pub max_priority_fee_per_gas_gwei: u64,
    pub commit_gas_limit: u64,
    pub register_gas_limit: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Warn when no block arrives for this many seconds
    pub stall_threshold_secs: u64,
    /// Halt when the relay rejects with the same reason this many times in a row
    pub max_identical_rejections: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level used when RUST_LOG is not set
    pub log_level: String,
    /// Emit JSON lines instead of human-readable logs
    pub json_logs: bool,
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            // Goerli registrar controller and public resolver
            controller_address: Address([
                0x28, 0x3a, 0xf0, 0xb2, 0x8c, 0x62, 0xc0, 0x92, 0xc9, 0x72, 0x7f, 0x1e, 0xe0,
                0x9c, 0x02, 0xca, 0x62, 0x7e, 0xb7, 0xf5,
            ]),
            resolver_address: Address([
                0x4b, 0x14, 0x88, 0xb7, 0xa6, 0xb3, 0x20, 0xd2, 0xd7, 0x21, 0x40, 0x62, 0x04,
                0xab, 0xc3, 0xee, 0xaa, 0x9a, 0xd3, 0x29,
            ]),
            chain_id: 5,
            default_duration_secs: 31_536_000, // 1 year
            price_buffer_percent: 10,
            min_name_length: 3,
        }
    }
}

impl Default for FeesConfig {
    fn default() -> Self {
        Self {
            max_fee_per_gas_gwei: 3,
            max_priority_fee_per_gas_gwei: 2,
            commit_gas_limit: 60_000,
            register_gas_limit: 300_000,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stall_threshold_secs: 60,
            max_identical_rejections: 5,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl FeesConfig {
    pub fn max_fee_per_gas(&self) -> Wei {
        Wei::from(self.max_fee_per_gas_gwei) * GWEI
    }

    pub fn max_priority_fee_per_gas(&self) -> Wei {
        Wei::from(self.max_priority_fee_per_gas_gwei) * GWEI
    }
}

impl EngineConfig {
    pub fn stall_threshold(&self) -> Duration {
        Duration::from_secs(self.stall_threshold_secs)
    }
}

impl BundlerConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration file (ens-bundler.toml, or `path` when given)
    /// 3. Environment variables (prefixed with ENS_BUNDLER_, sections split by `__`)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        match path {
            Some(path) => {
                builder = builder.add_source(File::from(path));
            }
            None if Path::new("ens-bundler.toml").exists() => {
                builder = builder.add_source(File::with_name("ens-bundler"));
            }
            None => {}
        }

        builder = builder.add_source(
            Environment::with_prefix("ENS_BUNDLER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let bundler_config: BundlerConfig = config.try_deserialize()?;
        Ok(bundler_config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}
