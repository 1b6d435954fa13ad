//! In-memory chain used by the integration tests.

#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use alloy_core::primitives::{Address, B256, U256};
use stakeup_staking::{
    ChainClient, ChainError, ContractCall, FeePolicy, InclusionOutcome, LocalKeySigner,
    NetworkConfig, StakePosition, TransactionHandle, TransactionIntent, TransactionSigner,
    UnsignedTransaction,
};

pub const ANVIL_KEY_0: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

/// Chain time the mock starts at.
pub const GENESIS_TIME: u64 = 1_700_000_000;

/// Lock applied between an unstake request and a withdrawal.
pub const LOCK_DURATION: u64 = 3_600;

/// Initialize tracing for tests (idempotent).
pub fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init()
        .ok();
}

pub fn signer() -> Arc<LocalKeySigner> {
    Arc::new(LocalKeySigner::from_private_key(ANVIL_KEY_0).unwrap())
}

pub fn staking_contract() -> Address {
    Address::repeat_byte(0x5f)
}

pub fn mock_network() -> NetworkConfig {
    NetworkConfig {
        name: "mocknet".to_string(),
        rpc_url: "http://127.0.0.1:1".parse().unwrap(),
        chain_id: 31337,
        confirmations: 1,
        fee_policy: FeePolicy::Fixed {
            gas_price: 1_000_000_000,
        },
        gas_limit: Some(200_000),
        staking_contract: Some(staking_contract()),
        poll_interval: Duration::from_secs(2),
        rpc_timeout: Duration::from_secs(10),
    }
}

/// What happens to submitted transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InclusionMode {
    /// Included successfully on the first poll.
    Confirm,
    /// Included but reverted with the given reason.
    Revert(String),
    /// Never included; every poll waits out its timeout.
    Never,
    /// Unknown to the node.
    Drop,
}

#[derive(Debug)]
struct MockState {
    position: StakePosition,
    beneficiary: Address,
    chain_time: u64,
    block: u64,
    nonce: u64,
    inclusion: InclusionMode,
    submit_failures: VecDeque<ChainError>,
    read_failures: VecDeque<ChainError>,
    fail_reads_after_inclusion: bool,
    omit_contract_address: bool,
    included: bool,
    pending: HashMap<B256, TransactionIntent>,
    known: HashSet<B256>,
    unconfirmed_broadcasts: u32,
    submit_attempts: u32,
    submissions: u32,
    nonce_reads: u32,
    reads: u32,
    polls: u32,
}

/// A single-account staking contract on a fake chain.
#[derive(Debug, Clone)]
pub struct MockChain {
    network: NetworkConfig,
    state: Arc<Mutex<MockState>>,
}

impl MockChain {
    pub fn new() -> Self {
        let staker = signer().address();
        Self {
            network: mock_network(),
            state: Arc::new(Mutex::new(MockState {
                position: StakePosition::empty(staker, LOCK_DURATION),
                beneficiary: staker,
                chain_time: GENESIS_TIME,
                block: 100,
                nonce: 0,
                inclusion: InclusionMode::Confirm,
                submit_failures: VecDeque::new(),
                read_failures: VecDeque::new(),
                fail_reads_after_inclusion: false,
                omit_contract_address: false,
                included: false,
                pending: HashMap::new(),
                known: HashSet::new(),
                unconfirmed_broadcasts: 0,
                submit_attempts: 0,
                submissions: 0,
                nonce_reads: 0,
                reads: 0,
                polls: 0,
            })),
        }
    }

    fn with_state(self, f: impl FnOnce(&mut MockState)) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    /// Position with `staked` and `reward`, unstake requested `requested_ago` seconds ago.
    pub fn with_position(self, staked: u64, reward: u64, requested_ago: Option<u64>) -> Self {
        self.with_state(|state| {
            state.position.staked = U256::from(staked);
            state.position.reward = U256::from(reward);
            state.position.unstake_requested_at =
                requested_ago.map(|ago| state.chain_time - ago);
        })
    }

    pub fn with_inclusion(self, mode: InclusionMode) -> Self {
        self.with_state(|state| state.inclusion = mode)
    }

    /// Fail the next submissions with these errors, in order.
    pub fn with_submit_failures(self, failures: Vec<ChainError>) -> Self {
        self.with_state(|state| state.submit_failures = failures.into())
    }

    /// Accept the next `count` transactions but report the broadcast as lost in transit.
    pub fn with_unconfirmed_broadcasts(self, count: u32) -> Self {
        self.with_state(|state| state.unconfirmed_broadcasts = count)
    }

    /// Fail the next position reads with these errors, in order.
    pub fn with_read_failures(self, failures: Vec<ChainError>) -> Self {
        self.with_state(|state| state.read_failures = failures.into())
    }

    pub fn failing_reads_after_inclusion(self) -> Self {
        self.with_state(|state| state.fail_reads_after_inclusion = true)
    }

    /// Receipts of deployments leave out the created address.
    pub fn omitting_contract_address(self) -> Self {
        self.with_state(|state| state.omit_contract_address = true)
    }

    pub fn set_inclusion(&self, mode: InclusionMode) {
        self.state.lock().unwrap().inclusion = mode;
    }

    pub fn position(&self) -> StakePosition {
        self.state.lock().unwrap().position.clone()
    }

    pub fn beneficiary(&self) -> Address {
        self.state.lock().unwrap().beneficiary
    }

    pub fn submit_attempts(&self) -> u32 {
        self.state.lock().unwrap().submit_attempts
    }

    pub fn submissions(&self) -> u32 {
        self.state.lock().unwrap().submissions
    }

    pub fn nonce_reads(&self) -> u32 {
        self.state.lock().unwrap().nonce_reads
    }

    pub fn reads(&self) -> u32 {
        self.state.lock().unwrap().reads
    }

    pub fn polls(&self) -> u32 {
        self.state.lock().unwrap().polls
    }
}

impl MockState {
    fn apply(&mut self, intent: &TransactionIntent) {
        match &intent.call {
            ContractCall::Stake => self.position.staked += intent.value,
            ContractCall::Claim => self.position.reward = U256::ZERO,
            ContractCall::RequestUnstake => {
                self.position.unstake_requested_at = Some(self.chain_time)
            }
            ContractCall::Withdraw => {
                self.position.staked = U256::ZERO;
                self.position.unstake_requested_at = None;
            }
            ContractCall::SetBeneficiary(beneficiary) => self.beneficiary = *beneficiary,
            ContractCall::Deploy(_) | ContractCall::Raw(_) => {}
        }
    }
}

impl ChainClient for MockChain {
    fn network(&self) -> &NetworkConfig {
        &self.network
    }

    async fn read_state(
        &self,
        _contract: Address,
        _account: Address,
    ) -> Result<StakePosition, ChainError> {
        let mut state = self.state.lock().unwrap();
        state.reads += 1;
        if let Some(error) = state.read_failures.pop_front() {
            return Err(error);
        }
        if state.fail_reads_after_inclusion && state.included {
            return Err(ChainError::RpcUnavailable("connection reset".to_string()));
        }
        Ok(state.position.clone())
    }

    async fn chain_time(&self) -> Result<u64, ChainError> {
        Ok(self.state.lock().unwrap().chain_time)
    }

    async fn pending_nonce(&self, _account: Address) -> Result<u64, ChainError> {
        let mut state = self.state.lock().unwrap();
        state.nonce_reads += 1;
        Ok(state.nonce)
    }

    async fn submit(
        &self,
        intent: &TransactionIntent,
        signer: &dyn TransactionSigner,
    ) -> Result<TransactionHandle, ChainError> {
        let mut state = self.state.lock().unwrap();
        state.submit_attempts += 1;
        if let Some(error) = state.submit_failures.pop_front() {
            return Err(error);
        }

        let nonce = intent.nonce.unwrap_or(state.nonce);
        let signed = signer.sign(&UnsignedTransaction {
            chain_id: self.network.chain_id,
            nonce,
            gas_price: 1_000_000_000,
            gas_limit: 200_000,
            to: intent.to,
            value: intent.value,
            data: intent.calldata(),
        })?;

        state.nonce = nonce + 1;
        state.submissions += 1;
        state.pending.insert(signed.hash, intent.clone());
        state.known.insert(signed.hash);

        if state.unconfirmed_broadcasts > 0 {
            state.unconfirmed_broadcasts -= 1;
            return Err(ChainError::BroadcastUnconfirmed {
                tx_hash: signed.hash,
                nonce,
                reason: "request timed out".to_string(),
            });
        }
        Ok(TransactionHandle::new(signed.hash, nonce))
    }

    async fn await_inclusion(
        &self,
        tx_hash: B256,
        _confirmations: u64,
        timeout: Duration,
    ) -> Result<InclusionOutcome, ChainError> {
        let mode = {
            let mut state = self.state.lock().unwrap();
            state.polls += 1;
            state.inclusion.clone()
        };

        match mode {
            InclusionMode::Never => {
                tokio::time::sleep(timeout).await;
                Ok(InclusionOutcome::TimedOut)
            }
            InclusionMode::Drop => Ok(InclusionOutcome::Dropped),
            InclusionMode::Confirm | InclusionMode::Revert(_) => {
                let mut state = self.state.lock().unwrap();
                let Some(intent) = state.pending.remove(&tx_hash) else {
                    return Ok(InclusionOutcome::Dropped);
                };
                state.block += 1;
                let block_height = state.block;

                if let InclusionMode::Revert(reason) = mode {
                    return Ok(InclusionOutcome::Included {
                        block_height,
                        success: false,
                        reason: Some(reason),
                        contract_address: None,
                    });
                }

                state.apply(&intent);
                state.included = true;
                let contract_address = (matches!(intent.call, ContractCall::Deploy(_))
                    && !state.omit_contract_address)
                    .then(|| Address::repeat_byte(0xde));
                Ok(InclusionOutcome::Included {
                    block_height,
                    success: true,
                    reason: None,
                    contract_address,
                })
            }
        }
    }

    async fn transaction_known(&self, tx_hash: B256) -> Result<bool, ChainError> {
        Ok(self.state.lock().unwrap().known.contains(&tx_hash))
    }

    async fn beneficiary_of(
        &self,
        _contract: Address,
        _account: Address,
    ) -> Result<Address, ChainError> {
        Ok(self.state.lock().unwrap().beneficiary)
    }
}
