//! Bookkeeping of transactions left in flight by timed-out invocations.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{TransactionHandle, orchestrator::Command};

/// File name of the journal inside the state directory.
pub const JOURNAL_FILENAME: &str = "pending.json";

/// A transaction that was broadcast but not resolved before the deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEntry {
    pub network: String,
    pub account: Address,
    /// Target contract; `None` for deployments.
    pub contract: Option<Address>,
    /// Command that produced the transaction; `None` for deployments.
    pub command: Option<Command>,
    pub handle: TransactionHandle,
}

impl PendingEntry {
    fn key(&self) -> String {
        entry_key(&self.network, self.account)
    }
}

fn entry_key(network: &str, account: Address) -> String {
    format!("{}/{}", network, account)
}

/// JSON file of [`PendingEntry`]s keyed by (network, account).
#[derive(Debug, Clone)]
pub struct PendingJournal {
    path: PathBuf,
}

impl PendingJournal {
    /// Journal stored in `state_dir`, created on first write.
    pub fn open(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(JOURNAL_FILENAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, PendingEntry>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let content = std::fs::read_to_string(&self.path)
            .context(format!("Failed to read journal from {}", self.path.display()))?;
        serde_json::from_str(&content).context("Failed to parse pending transaction journal")
    }

    fn store(&self, entries: &BTreeMap<String, PendingEntry>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .context(format!("Failed to create state directory {}", parent.display()))?;
        }

        let content =
            serde_json::to_string_pretty(entries).context("Failed to serialize journal")?;
        std::fs::write(&self.path, content)
            .context(format!("Failed to write journal to {}", self.path.display()))
    }

    pub fn get(&self, network: &str, account: Address) -> Result<Option<PendingEntry>> {
        Ok(self.load()?.remove(&entry_key(network, account)))
    }

    /// Record `entry`, replacing any previous entry for the same (network, account).
    pub fn record(&self, entry: PendingEntry) -> Result<()> {
        let mut entries = self.load()?;
        tracing::info!(
            network = %entry.network,
            account = %entry.account,
            tx_hash = %entry.handle.tx_hash,
            path = %self.path.display(),
            "Recording pending transaction"
        );
        entries.insert(entry.key(), entry);
        self.store(&entries)
    }

    /// Remove the entry for (network, account). Returns whether one existed.
    pub fn clear(&self, network: &str, account: Address) -> Result<bool> {
        let mut entries = self.load()?;
        let removed = entries.remove(&entry_key(network, account)).is_some();
        if removed {
            tracing::debug!(network = %network, account = %account, "Clearing pending transaction");
            self.store(&entries)?;
        }
        Ok(removed)
    }
}
