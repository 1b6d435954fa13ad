//! Chain client interface bound to one resolved network.

mod json_rpc;

use std::{future::Future, time::Duration};

use alloy_core::primitives::{Address, B256};

pub use json_rpc::JsonRpcClient;

use crate::{
    NetworkConfig, StakePosition, TransactionHandle, TransactionIntent, TransactionSigner,
    error::ChainError,
};

/// What a single inclusion check observed for a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InclusionOutcome {
    /// Included and buried under at least the requested number of confirmations.
    Included {
        block_height: u64,
        success: bool,
        /// Revert reason when `success` is false.
        reason: Option<String>,
        /// Address of the created contract, for deployments.
        contract_address: Option<Address>,
    },
    /// The node no longer knows the transaction.
    Dropped,
    /// Not (yet) included at the requested depth within the poll timeout.
    TimedOut,
}

/// Capability to read from and write to one network.
///
/// Implementations keep no state between calls beyond their connection.
pub trait ChainClient: Send + Sync {
    /// The network this client is bound to.
    fn network(&self) -> &NetworkConfig;

    /// Read the staking position of `account` on `contract`.
    fn read_state(
        &self,
        contract: Address,
        account: Address,
    ) -> impl Future<Output = Result<StakePosition, ChainError>> + Send;

    /// Timestamp of the latest block, the clock phases are derived against.
    fn chain_time(&self) -> impl Future<Output = Result<u64, ChainError>> + Send;

    /// Next nonce for `account`, counting pending transactions.
    fn pending_nonce(&self, account: Address)
    -> impl Future<Output = Result<u64, ChainError>> + Send;

    /// Sign and broadcast `intent`.
    fn submit(
        &self,
        intent: &TransactionIntent,
        signer: &dyn TransactionSigner,
    ) -> impl Future<Output = Result<TransactionHandle, ChainError>> + Send;

    /// Check whether `tx_hash` is included with at least `confirmations` blocks.
    fn await_inclusion(
        &self,
        tx_hash: B256,
        confirmations: u64,
        timeout: Duration,
    ) -> impl Future<Output = Result<InclusionOutcome, ChainError>> + Send;

    /// Whether the node knows `tx_hash`, pending or mined.
    fn transaction_known(
        &self,
        tx_hash: B256,
    ) -> impl Future<Output = Result<bool, ChainError>> + Send;

    /// Address receiving the rewards of `account`.
    fn beneficiary_of(
        &self,
        contract: Address,
        account: Address,
    ) -> impl Future<Output = Result<Address, ChainError>> + Send;
}
