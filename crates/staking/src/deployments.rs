//! Deployed contract addresses and compiled artifacts.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use alloy_core::primitives::{Address, B256, Bytes};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The default name for the deployments file.
pub const DEPLOYMENTS_FILENAME: &str = "deployments.toml";

/// Where a contract was deployed on one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub address: Address,
    pub tx_hash: B256,
    pub deployed_at: DateTime<Utc>,
}

/// Deployed staking contracts, keyed by network identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployments {
    #[serde(default)]
    pub networks: BTreeMap<String, DeploymentRecord>,
}

impl Deployments {
    /// Load the deployments file, or an empty set if it does not exist yet.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from_file(path)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read deployments from {}", path.display()))?;
        let deployments: Self =
            toml::from_str(&content).context("Failed to parse deployments file as TOML")?;
        tracing::debug!(path = %path.display(), networks = deployments.networks.len(), "Deployments loaded");
        Ok(deployments)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .context(format!("Failed to create directory {}", parent.display()))?;
        }
        let content =
            toml::to_string_pretty(self).context("Failed to serialize deployments to TOML")?;
        std::fs::write(path, content)
            .context(format!("Failed to write deployments to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Deployments saved");
        Ok(())
    }

    pub fn address(&self, network: &str) -> Option<Address> {
        self.networks.get(network).map(|record| record.address)
    }

    pub fn record(&mut self, network: &str, address: Address, tx_hash: B256) {
        self.networks.insert(
            network.to_string(),
            DeploymentRecord {
                address,
                tx_hash,
                deployed_at: Utc::now(),
            },
        );
    }
}

/// Default location of the deployments file inside the state directory.
pub fn deployments_path(state_dir: &Path) -> PathBuf {
    state_dir.join(DEPLOYMENTS_FILENAME)
}

/// Read the creation bytecode from a compiled contract artifact.
///
/// Accepts Hardhat artifacts (`"bytecode": "0x.."`) and Foundry artifacts
/// (`"bytecode": { "object": "0x.." }`).
pub fn load_artifact_bytecode(path: &Path) -> Result<Bytes> {
    let content = std::fs::read_to_string(path)
        .context(format!("Failed to read artifact {}", path.display()))?;
    let artifact: Value = serde_json::from_str(&content)
        .context(format!("Artifact {} is not valid JSON", path.display()))?;

    let bytecode = match artifact.get("bytecode") {
        Some(Value::String(code)) => code.as_str(),
        Some(Value::Object(object)) => object
            .get("object")
            .and_then(Value::as_str)
            .context("Artifact bytecode object has no 'object' field")?,
        _ => anyhow::bail!("Artifact {} has no bytecode", path.display()),
    };

    let code = hex::decode(bytecode.trim_start_matches("0x"))
        .context("Artifact bytecode is not valid hex")?;
    if code.is_empty() {
        anyhow::bail!(
            "Artifact {} has empty bytecode (abstract contract or interface?)",
            path.display()
        );
    }

    Ok(Bytes::from(code))
}
