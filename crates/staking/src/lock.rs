//! Advisory per-account lock serializing invocations across processes.

use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use fs2::FileExt;

/// Exclusive lock on (network, account), released on drop.
#[derive(Debug)]
pub struct AccountLock {
    file: File,
    path: PathBuf,
}

impl AccountLock {
    /// Take the lock, failing immediately if another process holds it.
    pub fn acquire(state_dir: &Path, network: &str, account: Address) -> Result<Self> {
        let locks_dir = state_dir.join("locks");
        std::fs::create_dir_all(&locks_dir).context(format!(
            "Failed to create lock directory {}",
            locks_dir.display()
        ))?;

        let path = locks_dir.join(format!("{}-{}.lock", network, account));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .context(format!("Failed to open lock file {}", path.display()))?;

        FileExt::try_lock_exclusive(&file).with_context(|| {
            format!(
                "Another stakeup invocation is running for {} on {}",
                account, network
            )
        })?;

        tracing::debug!(path = %path.display(), "Account lock acquired");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for AccountLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(error = %e, path = %self.path.display(), "Failed to release account lock");
        }
    }
}
