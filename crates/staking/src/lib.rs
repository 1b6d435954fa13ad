//! stakeup-staking - Staking lifecycle orchestration across EVM networks.
//!
//! This crate resolves networks, reads staking positions, and drives stake, claim,
//! unstake and withdraw transactions through submission and confirmation.

pub mod abi;
pub mod error;
pub use error::{ChainError, RegistryError, Rejection};

mod network;
pub use network::{
    CONFIG_FILENAME, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_RPC_TIMEOUT_SECS, DEFAULT_TIMEOUT_SECS,
    ENV_PREFIX, FeePolicy, NetworkConfig, NetworkEntry, NetworkRegistry, StakeupConfig,
};

mod position;
pub use position::{Phase, StakePosition};

mod intent;
pub use intent::{ContractCall, TransactionHandle, TransactionIntent};

mod signer;
pub use signer::{LocalKeySigner, SignedTransaction, TransactionSigner, UnsignedTransaction};

mod client;
pub use client::{ChainClient, InclusionOutcome, JsonRpcClient};

mod rpc;

mod deadline;
pub use deadline::{Canceller, Deadline};

mod submitter;
pub use submitter::{RetryPolicy, SubmitError, TransactionSubmitter};

mod tracker;
pub use tracker::{ConfirmationTracker, TrackOutcome};

pub mod orchestrator;
pub use orchestrator::{
    Command, DeployResult, LifecycleResult, Plan, PositionSnapshot, StakingOrchestrator,
};

mod journal;
pub use journal::{JOURNAL_FILENAME, PendingEntry, PendingJournal};

mod lock;
pub use lock::AccountLock;

pub mod deployments;
pub use deployments::{DEPLOYMENTS_FILENAME, DeploymentRecord, Deployments};

pub mod tasks;
pub use tasks::{TaskArgs, TaskContext, TaskOutcome, TaskRegistry};
