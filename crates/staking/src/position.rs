//! Read projection of a staker's on-chain position.

use alloy_core::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// Lifecycle phase of a position, derived from its on-chain fields and the chain clock.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumIter,
)]
#[strum(serialize_all = "kebab-case")]
pub enum Phase {
    /// Nothing staked.
    Unstaked,
    /// Stake active, no unstake requested.
    Staked,
    /// Unstake requested, lock not yet expired.
    Unstaking,
    /// Lock expired, stake can be withdrawn.
    Withdrawable,
}

/// A staker's position as last read from the staking contract.
///
/// This is never cached across invocations: the orchestrator re-reads it at every
/// decision point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakePosition {
    pub staker: Address,
    /// Currently staked amount (wei).
    pub staked: U256,
    /// Accrued, unclaimed reward (wei).
    pub reward: U256,
    /// Chain timestamp of the unstake request, if one was made.
    pub unstake_requested_at: Option<u64>,
    /// Lock applied between an unstake request and the withdrawal, in seconds.
    pub lock_duration: u64,
}

impl StakePosition {
    /// An empty position for `staker`.
    pub fn empty(staker: Address, lock_duration: u64) -> Self {
        Self {
            staker,
            staked: U256::ZERO,
            reward: U256::ZERO,
            unstake_requested_at: None,
            lock_duration,
        }
    }

    /// Timestamp after which the stake can be withdrawn.
    ///
    /// Only defined once an unstake has been requested.
    pub fn withdrawable_after(&self) -> Option<u64> {
        self.unstake_requested_at
            .map(|requested_at| requested_at.saturating_add(self.lock_duration))
    }

    /// Phase of the position at chain time `now`.
    pub fn phase_at(&self, now: u64) -> Phase {
        if self.staked.is_zero() {
            return Phase::Unstaked;
        }

        match self.withdrawable_after() {
            None => Phase::Staked,
            Some(after) if now >= after => Phase::Withdrawable,
            Some(_) => Phase::Unstaking,
        }
    }
}
