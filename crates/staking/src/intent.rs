//! Transaction intents and the handles returned once they are broadcast.

use alloy_core::primitives::{Address, B256, Bytes, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::abi::{self, Token, staking};

/// The contract call a transaction performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractCall {
    Stake,
    Claim,
    RequestUnstake,
    Withdraw,
    SetBeneficiary(Address),
    /// Contract creation with the given init code.
    Deploy(Bytes),
    /// Pre-encoded calldata.
    Raw(Bytes),
}

impl ContractCall {
    /// ABI-encoded calldata (or init code for a deployment).
    pub fn calldata(&self) -> Bytes {
        match self {
            ContractCall::Stake => abi::encode_call(staking::STAKE, &[]),
            ContractCall::Claim => abi::encode_call(staking::CLAIM_REWARDS, &[]),
            ContractCall::RequestUnstake => abi::encode_call(staking::REQUEST_UNSTAKE, &[]),
            ContractCall::Withdraw => abi::encode_call(staking::WITHDRAW, &[]),
            ContractCall::SetBeneficiary(beneficiary) => {
                abi::encode_call(staking::SET_BENEFICIARY, &[Token::Address(*beneficiary)])
            }
            ContractCall::Deploy(code) | ContractCall::Raw(code) => code.clone(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ContractCall::Stake => "stake",
            ContractCall::Claim => "claim",
            ContractCall::RequestUnstake => "request-unstake",
            ContractCall::Withdraw => "withdraw",
            ContractCall::SetBeneficiary(_) => "set-beneficiary",
            ContractCall::Deploy(_) => "deploy",
            ContractCall::Raw(_) => "raw",
        }
    }
}

/// A transaction the submitter is asked to broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionIntent {
    pub call: ContractCall,
    /// Target contract; `None` for contract creation.
    pub to: Option<Address>,
    /// Native value attached to the call (wei).
    pub value: U256,
    /// Amount moved by the call, for stake and withdraw.
    pub amount: Option<U256>,
    /// Nonce to sign with. Filled in by the submitter right before each attempt.
    pub nonce: Option<u64>,
}

impl TransactionIntent {
    /// A call to `contract` without attached value.
    pub fn call(contract: Address, call: ContractCall) -> Self {
        Self {
            call,
            to: Some(contract),
            value: U256::ZERO,
            amount: None,
            nonce: None,
        }
    }

    /// A payable `stake()` carrying `amount`.
    pub fn stake(contract: Address, amount: U256) -> Self {
        Self {
            call: ContractCall::Stake,
            to: Some(contract),
            value: amount,
            amount: Some(amount),
            nonce: None,
        }
    }

    /// A `withdraw()` expected to release `amount`.
    pub fn withdraw(contract: Address, amount: U256) -> Self {
        Self {
            amount: Some(amount),
            ..Self::call(contract, ContractCall::Withdraw)
        }
    }

    /// Raw calldata with an optional value.
    pub fn raw(contract: Address, data: Bytes, value: U256) -> Self {
        Self {
            value,
            ..Self::call(contract, ContractCall::Raw(data))
        }
    }

    /// A contract creation transaction.
    pub fn deploy(init_code: Bytes) -> Self {
        Self {
            call: ContractCall::Deploy(init_code),
            to: None,
            value: U256::ZERO,
            amount: None,
            nonce: None,
        }
    }

    /// A copy of this intent pinned to `nonce`.
    pub fn with_nonce(&self, nonce: u64) -> Self {
        Self {
            nonce: Some(nonce),
            ..self.clone()
        }
    }

    pub fn calldata(&self) -> Bytes {
        self.call.calldata()
    }
}

/// Handle to a broadcast transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionHandle {
    pub tx_hash: B256,
    pub nonce: u64,
    pub submitted_at: DateTime<Utc>,
    /// Number of failed attempts before this one was accepted.
    pub retries: u32,
}

impl TransactionHandle {
    pub fn new(tx_hash: B256, nonce: u64) -> Self {
        Self {
            tx_hash,
            nonce,
            submitted_at: Utc::now(),
            retries: 0,
        }
    }
}
