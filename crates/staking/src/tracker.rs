//! Polls a submitted transaction until it resolves or the deadline passes.

use std::time::Duration;

use alloy_core::primitives::Address;

use crate::{ChainClient, Deadline, InclusionOutcome, NetworkConfig, TransactionHandle};

/// Consecutive `Dropped` polls required before a transaction is declared dropped.
///
/// Load-balanced endpoints briefly forget fresh transactions.
const DROPPED_POLLS_THRESHOLD: u32 = 3;

/// How a tracked transaction resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackOutcome {
    Confirmed {
        block_height: u64,
        contract_address: Option<Address>,
    },
    Reverted {
        block_height: u64,
        reason: String,
    },
    Dropped,
    /// Still unresolved when the deadline passed. The transaction may yet land.
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct ConfirmationTracker {
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl ConfirmationTracker {
    pub fn new(poll_interval: Duration, poll_timeout: Duration) -> Self {
        Self {
            poll_interval,
            poll_timeout,
        }
    }

    pub fn for_network(network: &NetworkConfig) -> Self {
        Self::new(network.poll_interval, network.rpc_timeout)
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Poll until `handle` is included `required_depth` deep, reverts, is dropped, or
    /// `deadline` passes.
    ///
    /// Never reports [`TrackOutcome::TimedOut`] before the deadline unless it was cancelled.
    pub async fn track<C: ChainClient>(
        &self,
        handle: &TransactionHandle,
        client: &C,
        required_depth: u64,
        deadline: &Deadline,
    ) -> TrackOutcome {
        let mut polls = 0u32;
        let mut dropped_polls = 0u32;

        loop {
            if deadline.is_expired() {
                tracing::warn!(
                    tx_hash = %handle.tx_hash,
                    polls,
                    "Deadline reached before the transaction resolved"
                );
                return TrackOutcome::TimedOut;
            }

            polls += 1;
            let poll_timeout = self.poll_timeout.min(deadline.remaining());

            match client
                .await_inclusion(handle.tx_hash, required_depth, poll_timeout)
                .await
            {
                Ok(InclusionOutcome::Included {
                    block_height,
                    success: true,
                    contract_address,
                    ..
                }) => {
                    tracing::info!(tx_hash = %handle.tx_hash, block_height, polls, "Transaction confirmed");
                    return TrackOutcome::Confirmed {
                        block_height,
                        contract_address,
                    };
                }
                Ok(InclusionOutcome::Included {
                    block_height,
                    success: false,
                    reason,
                    ..
                }) => {
                    let reason = reason.unwrap_or_else(|| "execution reverted".to_string());
                    tracing::warn!(tx_hash = %handle.tx_hash, block_height, reason = %reason, "Transaction reverted");
                    return TrackOutcome::Reverted {
                        block_height,
                        reason,
                    };
                }
                Ok(InclusionOutcome::Dropped) => {
                    dropped_polls += 1;
                    tracing::debug!(tx_hash = %handle.tx_hash, dropped_polls, "Transaction unknown to the node");
                    if dropped_polls >= DROPPED_POLLS_THRESHOLD {
                        tracing::warn!(tx_hash = %handle.tx_hash, "Transaction dropped");
                        return TrackOutcome::Dropped;
                    }
                }
                Ok(InclusionOutcome::TimedOut) => {
                    dropped_polls = 0;
                    tracing::debug!(tx_hash = %handle.tx_hash, polls, "Transaction pending");
                }
                Err(e) => {
                    tracing::debug!(tx_hash = %handle.tx_hash, error = %e, "Inclusion check failed");
                }
            }

            if !deadline.sleep(self.poll_interval).await {
                tracing::warn!(
                    tx_hash = %handle.tx_hash,
                    polls,
                    "Deadline reached before the transaction resolved"
                );
                return TrackOutcome::TimedOut;
            }
        }
    }
}
