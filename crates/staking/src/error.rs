//! Error taxonomy shared by the chain client, the submitter and the orchestrator.

use alloy_core::primitives::B256;
use thiserror::Error;

use crate::{Phase, orchestrator::Command};

/// Failures surfaced by a [`crate::ChainClient`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// The endpoint could not be reached, timed out, or answered with a server error.
    #[error("rpc unavailable: {0}")]
    RpcUnavailable(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    /// Another transaction already occupies the account's nonce slot.
    #[error("nonce conflict: {0}")]
    NonceConflict(String),

    /// The contract rejected the call. Carries the decoded revert reason.
    #[error("contract call reverted: {0}")]
    ContractCallReverted(String),

    #[error("signing failed: {0}")]
    Signer(String),

    /// The broadcast failed in transit; the node may have accepted `tx_hash` anyway.
    #[error("broadcast of {tx_hash} unconfirmed: {reason}")]
    BroadcastUnconfirmed {
        tx_hash: B256,
        nonce: u64,
        reason: String,
    },

    /// The node answered with an error object that fits none of the other variants.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("malformed rpc response: {0}")]
    Malformed(String),
}

impl ChainError {
    /// Whether the submitter may retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RpcUnavailable(_) | Self::NonceConflict(_) | Self::BroadcastUnconfirmed { .. }
        )
    }
}

/// Errors raised while building or querying the [`crate::NetworkRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("unknown network '{0}'")]
    UnknownNetwork(String),

    #[error("invalid configuration for network '{name}': {reason}")]
    InvalidNetwork { name: String, reason: String },
}

/// Why an invocation ended without anything reaching the chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("{command} is not allowed while the position is {phase}")]
    IllegalTransition { command: Command, phase: Phase },

    #[error("stake amount must be greater than zero")]
    ZeroAmount,

    #[error("stake is locked until {withdrawable_after} (chain time is {now})")]
    StillLocked { withdrawable_after: u64, now: u64 },

    #[error("failed to read the staking position: {0}")]
    ReadFailed(ChainError),

    #[error("submission failed after {attempts} attempt(s): {source}")]
    SubmissionFailed { attempts: u32, source: ChainError },

    #[error("deadline reached before the transaction could be submitted")]
    DeadlineExceeded,

    #[error("transaction {0} was dropped from the mempool before inclusion")]
    Dropped(B256),

    /// A transaction from an earlier invocation for the same account is still unresolved.
    #[error("transaction {0} from a previous invocation is still pending")]
    PendingTransaction(B256),
}
