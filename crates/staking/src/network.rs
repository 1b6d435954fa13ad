//! Network registry and the layered configuration it is built from.
//!
//! Configuration is resolved once at startup: built-in presets, then an optional TOML
//! file, then `STAKEUP_`-prefixed environment variables (`__` separates nested keys,
//! e.g. `STAKEUP_NETWORKS__ZETA_TESTNET__CONFIRMATIONS=3`). The resulting
//! [`NetworkRegistry`] is immutable and handed to every component that needs it.

use std::{collections::BTreeMap, path::Path, time::Duration};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{RetryPolicy, error::RegistryError};

/// The default name for the stakeup configuration file.
pub const CONFIG_FILENAME: &str = "Stakeup.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "STAKEUP_";

/// Default interval between two confirmation polls.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;

/// Default timeout for a single RPC request.
pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 10;

/// Default deadline for a whole invocation (submission + confirmation).
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// How the gas price of a transaction is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeePolicy {
    /// Always use this gas price (wei).
    Fixed { gas_price: u64 },
    /// Ask the node (`eth_gasPrice`) and scale the answer by a percentage.
    Estimated { multiplier_percent: u64 },
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self::Estimated {
            multiplier_percent: 110,
        }
    }
}

/// A network entry as written in configuration, keyed by its identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkEntry {
    pub rpc_url: String,
    pub chain_id: u64,
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    #[serde(default)]
    pub fee_policy: FeePolicy,
    /// Fixed gas limit. If absent, the limit is estimated per transaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<u64>,
    /// Address of the deployed staking contract on this network, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staking_contract: Option<Address>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
}

fn default_confirmations() -> u64 {
    1
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_rpc_timeout_secs() -> u64 {
    DEFAULT_RPC_TIMEOUT_SECS
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl NetworkEntry {
    fn preset(rpc_url: &str, chain_id: u64, confirmations: u64) -> Self {
        Self {
            rpc_url: rpc_url.to_string(),
            chain_id,
            confirmations,
            fee_policy: FeePolicy::default(),
            gas_limit: None,
            staking_contract: None,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            rpc_timeout_secs: DEFAULT_RPC_TIMEOUT_SECS,
        }
    }
}

/// Top-level stakeup configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StakeupConfig {
    /// Known networks, keyed by identifier.
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkEntry>,
    /// Retry policy applied by the transaction submitter.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Overall deadline of an invocation, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for StakeupConfig {
    fn default() -> Self {
        Self {
            networks: Self::presets(),
            retry: RetryPolicy::default(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl StakeupConfig {
    /// Built-in network presets.
    pub fn presets() -> BTreeMap<String, NetworkEntry> {
        let mut localnet = NetworkEntry::preset("http://127.0.0.1:8545", 31337, 1);
        localnet.poll_interval_secs = 1;

        BTreeMap::from([
            (
                "zeta_testnet".to_string(),
                NetworkEntry::preset(
                    "https://zetachain-athens-evm.blockpi.network/v1/rpc/public",
                    7001,
                    1,
                ),
            ),
            (
                "zeta_mainnet".to_string(),
                NetworkEntry::preset(
                    "https://zetachain-evm.blockpi.network/v1/rpc/public",
                    7000,
                    2,
                ),
            ),
            (
                "sepolia_testnet".to_string(),
                NetworkEntry::preset("https://ethereum-sepolia-rpc.publicnode.com", 11155111, 3),
            ),
            (
                "bsc_testnet".to_string(),
                NetworkEntry::preset("https://bsc-testnet-rpc.publicnode.com", 97, 3),
            ),
            (
                "amoy_testnet".to_string(),
                NetworkEntry::preset("https://polygon-amoy-bor-rpc.publicnode.com", 80002, 3),
            ),
            (
                "base_sepolia".to_string(),
                NetworkEntry::preset("https://sepolia.base.org", 84532, 2),
            ),
            ("localnet".to_string(), localnet),
        ])
    }

    /// Load the configuration.
    ///
    /// When `path` is given the file must exist; otherwise `Stakeup.toml` in the current
    /// directory is merged if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        match path {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Configuration file not found: {}", path.display());
                }
                figment = figment.merge(Toml::file(path));
            }
            None => figment = figment.merge(Toml::file(CONFIG_FILENAME)),
        }

        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to load stakeup configuration")?;

        tracing::debug!(
            networks = config.networks.len(),
            timeout_secs = config.timeout_secs,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// The overall invocation deadline.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Resolved connection parameters for one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    pub rpc_url: Url,
    pub chain_id: u64,
    /// Blocks required on top of (and including) the inclusion block.
    pub confirmations: u64,
    pub fee_policy: FeePolicy,
    pub gas_limit: Option<u64>,
    pub staking_contract: Option<Address>,
    pub poll_interval: Duration,
    pub rpc_timeout: Duration,
}

impl NetworkConfig {
    fn from_entry(name: &str, entry: &NetworkEntry) -> Result<Self, RegistryError> {
        let invalid = |reason: &str| RegistryError::InvalidNetwork {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let rpc_url = Url::parse(&entry.rpc_url)
            .map_err(|e| invalid(&format!("invalid rpc_url '{}': {}", entry.rpc_url, e)))?;

        if entry.confirmations == 0 {
            return Err(invalid("confirmations must be at least 1"));
        }
        if entry.poll_interval_secs == 0 {
            return Err(invalid("poll_interval_secs must be at least 1"));
        }
        if entry.rpc_timeout_secs == 0 {
            return Err(invalid("rpc_timeout_secs must be at least 1"));
        }
        if let FeePolicy::Estimated { multiplier_percent } = entry.fee_policy {
            if multiplier_percent == 0 {
                return Err(invalid("fee multiplier must be greater than zero"));
            }
        }

        Ok(Self {
            name: name.to_string(),
            rpc_url,
            chain_id: entry.chain_id,
            confirmations: entry.confirmations,
            fee_policy: entry.fee_policy,
            gas_limit: entry.gas_limit,
            staking_contract: entry.staking_contract,
            poll_interval: Duration::from_secs(entry.poll_interval_secs),
            rpc_timeout: Duration::from_secs(entry.rpc_timeout_secs),
        })
    }
}

/// Immutable lookup table from network identifier to [`NetworkConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRegistry {
    networks: BTreeMap<String, NetworkConfig>,
}

impl NetworkRegistry {
    /// Build the registry, validating every entry.
    pub fn from_config(config: &StakeupConfig) -> Result<Self, RegistryError> {
        let networks = config
            .networks
            .iter()
            .map(|(name, entry)| Ok((name.clone(), NetworkConfig::from_entry(name, entry)?)))
            .collect::<Result<_, RegistryError>>()?;

        Ok(Self { networks })
    }

    /// Look up a network by identifier.
    pub fn resolve(&self, identifier: &str) -> Result<&NetworkConfig, RegistryError> {
        self.networks
            .get(identifier)
            .ok_or_else(|| RegistryError::UnknownNetwork(identifier.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &NetworkConfig> {
        self.networks.values()
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_resolve() {
        let registry = NetworkRegistry::from_config(&StakeupConfig::default()).unwrap();

        let zeta = registry.resolve("zeta_testnet").unwrap();
        assert_eq!(zeta.chain_id, 7001);
        assert_eq!(zeta.confirmations, 1);
        assert_eq!(zeta.poll_interval, Duration::from_secs(2));

        let local = registry.resolve("localnet").unwrap();
        assert_eq!(local.chain_id, 31337);
        assert_eq!(local.rpc_url.as_str(), "http://127.0.0.1:8545/");
    }

    #[test]
    fn test_unknown_network() {
        let registry = NetworkRegistry::from_config(&StakeupConfig::default()).unwrap();
        assert_eq!(
            registry.resolve("moonbase").unwrap_err(),
            RegistryError::UnknownNetwork("moonbase".to_string())
        );
    }

    #[test]
    fn test_zero_confirmations_rejected() {
        let mut config = StakeupConfig::default();
        config
            .networks
            .get_mut("localnet")
            .unwrap()
            .confirmations = 0;

        let err = NetworkRegistry::from_config(&config).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidNetwork { ref name, .. } if name == "localnet"));
    }

    #[test]
    fn test_invalid_rpc_url_rejected() {
        let mut config = StakeupConfig::default();
        config.networks.get_mut("localnet").unwrap().rpc_url = "not a url".to_string();

        let err = NetworkRegistry::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("invalid rpc_url"));
    }

    #[test]
    fn test_load_merges_file_over_presets() {
        let dir = tempdir::TempDir::new("stakeup-config").unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(
            &path,
            r#"
timeout_secs = 60

[retry]
max_attempts = 5

[networks.zeta_testnet]
rpc_url = "https://zeta.example.org/rpc"
chain_id = 7001
confirmations = 4
fee_policy = { kind = "fixed", gas_price = 10000000000 }
staking_contract = "0x5FbDB2315678afecb367f032d93F642f64180aa3"

[networks.devnet]
rpc_url = "http://10.0.0.2:8545"
chain_id = 1337
"#,
        )
        .unwrap();

        let config = StakeupConfig::load(Some(&path)).unwrap();
        assert_eq!(config.timeout_secs, 60);
        assert_eq!(config.retry.max_attempts, 5);

        let registry = NetworkRegistry::from_config(&config).unwrap();

        let zeta = registry.resolve("zeta_testnet").unwrap();
        assert_eq!(zeta.confirmations, 4);
        assert_eq!(
            zeta.fee_policy,
            FeePolicy::Fixed {
                gas_price: 10_000_000_000
            }
        );
        assert!(zeta.staking_contract.is_some());

        let devnet = registry.resolve("devnet").unwrap();
        assert_eq!(devnet.confirmations, 1);
        assert_eq!(devnet.fee_policy, FeePolicy::default());

        // Presets not mentioned in the file survive the merge.
        assert!(registry.resolve("bsc_testnet").is_ok());
    }

    #[test]
    fn test_load_missing_explicit_file() {
        let result = StakeupConfig::load(Some(Path::new("/nonexistent/Stakeup.toml")));
        assert!(result.is_err());
    }
}
