//! The staking lifecycle orchestrator.
//!
//! Every invocation reads the position, checks the requested command against the
//! position's phase, submits at most one transaction and tracks it to a terminal
//! [`LifecycleResult`]. Nothing is cached between invocations.

use std::future::Future;

use alloy_core::primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

use crate::{
    ChainClient, ConfirmationTracker, ContractCall, Deadline, Phase, RetryPolicy,
    StakePosition, TrackOutcome, TransactionHandle, TransactionIntent, TransactionSigner,
    TransactionSubmitter,
    error::{ChainError, Rejection},
};

/// Exit code of a confirmed invocation.
pub const EXIT_CONFIRMED: u8 = 0;
/// Exit code of an invocation whose transaction reverted on-chain.
pub const EXIT_REVERTED: u8 = 3;
/// Exit code of an invocation that ran out of time with a transaction in flight.
pub const EXIT_TIMED_OUT: u8 = 4;
/// Exit code of an invocation rejected before anything reached the chain.
pub const EXIT_REJECTED: u8 = 5;

/// A command the orchestrator can carry out against a staking contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Stake { amount: U256 },
    Claim,
    RequestUnstake,
    Withdraw,
    SetBeneficiary { beneficiary: Address },
    /// Arbitrary calldata sent to the staking contract.
    Interact { data: Bytes, value: U256 },
}

/// Terminal result of one orchestrator invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleResult {
    /// The position after the command took effect. `handle` is `None` when nothing had
    /// to be submitted.
    Confirmed {
        state: StakePosition,
        handle: Option<TransactionHandle>,
    },
    Reverted {
        reason: String,
        handle: Option<TransactionHandle>,
    },
    /// The transaction is still in flight; it can be resumed from its handle.
    TimedOut(TransactionHandle),
    Rejected(Rejection),
}

impl LifecycleResult {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Confirmed { .. } => EXIT_CONFIRMED,
            Self::Reverted { .. } => EXIT_REVERTED,
            Self::TimedOut(_) => EXIT_TIMED_OUT,
            Self::Rejected(_) => EXIT_REJECTED,
        }
    }
}

/// Terminal result of a contract deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployResult {
    Deployed {
        address: Address,
        handle: TransactionHandle,
    },
    Reverted {
        reason: String,
        handle: TransactionHandle,
    },
    TimedOut(TransactionHandle),
    Rejected(Rejection),
}

impl DeployResult {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Deployed { .. } => EXIT_CONFIRMED,
            Self::Reverted { .. } => EXIT_REVERTED,
            Self::TimedOut(_) => EXIT_TIMED_OUT,
            Self::Rejected(_) => EXIT_REJECTED,
        }
    }
}

/// A position together with the chain time it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionSnapshot {
    pub position: StakePosition,
    pub chain_time: u64,
}

impl PositionSnapshot {
    pub fn phase(&self) -> Phase {
        self.position.phase_at(self.chain_time)
    }
}

/// What the orchestrator decided to do for a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    Submit(TransactionIntent),
    /// The command is already satisfied; nothing is submitted.
    NoOp,
}

/// Check `command` against the phase of `position` at chain time `now`.
pub fn plan(
    contract: Address,
    command: &Command,
    position: &StakePosition,
    now: u64,
) -> Result<Plan, Rejection> {
    let phase = position.phase_at(now);
    let illegal = || Rejection::IllegalTransition {
        command: command.clone(),
        phase,
    };

    match command {
        Command::Stake { amount } => {
            if amount.is_zero() {
                return Err(Rejection::ZeroAmount);
            }
            match phase {
                Phase::Unstaked | Phase::Staked => {
                    Ok(Plan::Submit(TransactionIntent::stake(contract, *amount)))
                }
                _ => Err(illegal()),
            }
        }
        Command::Claim => match phase {
            Phase::Unstaked => Err(illegal()),
            _ if position.reward.is_zero() => Ok(Plan::NoOp),
            _ => Ok(Plan::Submit(TransactionIntent::call(
                contract,
                ContractCall::Claim,
            ))),
        },
        Command::RequestUnstake => match phase {
            Phase::Staked => Ok(Plan::Submit(TransactionIntent::call(
                contract,
                ContractCall::RequestUnstake,
            ))),
            _ => Err(illegal()),
        },
        Command::Withdraw => match (phase, position.withdrawable_after()) {
            (Phase::Withdrawable, _) => Ok(Plan::Submit(TransactionIntent::withdraw(
                contract,
                position.staked,
            ))),
            (Phase::Unstaking, Some(withdrawable_after)) => Err(Rejection::StillLocked {
                withdrawable_after,
                now,
            }),
            _ => Err(illegal()),
        },
        Command::SetBeneficiary { beneficiary } => match phase {
            Phase::Unstaked => Err(illegal()),
            _ => Ok(Plan::Submit(TransactionIntent::call(
                contract,
                ContractCall::SetBeneficiary(*beneficiary),
            ))),
        },
        Command::Interact { data, value } => Ok(Plan::Submit(TransactionIntent::raw(
            contract,
            data.clone(),
            *value,
        ))),
    }
}

/// Local estimate of the position after `command` confirmed at chain time `now`.
///
/// Only used when the position cannot be re-read after confirmation.
pub fn project(position: &StakePosition, command: &Command, now: u64) -> StakePosition {
    let mut projected = position.clone();
    match command {
        Command::Stake { amount } => projected.staked = projected.staked.saturating_add(*amount),
        Command::Claim => projected.reward = U256::ZERO,
        Command::RequestUnstake => projected.unstake_requested_at = Some(now),
        Command::Withdraw => {
            projected.staked = U256::ZERO;
            projected.unstake_requested_at = None;
        }
        Command::SetBeneficiary { .. } | Command::Interact { .. } => {}
    }
    projected
}

/// Drives staking commands through read, validation, submission and confirmation.
#[derive(Debug)]
pub struct StakingOrchestrator<C> {
    client: C,
    submitter: TransactionSubmitter,
    tracker: ConfirmationTracker,
}

impl<C: ChainClient> StakingOrchestrator<C> {
    pub fn new(client: C, retry: RetryPolicy) -> Self {
        let tracker = ConfirmationTracker::for_network(client.network());
        Self {
            client,
            submitter: TransactionSubmitter::new(retry),
            tracker,
        }
    }

    /// Replace the confirmation tracker built from the network defaults.
    pub fn with_tracker(mut self, tracker: ConfirmationTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Read the position of `account` and the chain time, retrying transient failures.
    pub async fn read_position(
        &self,
        contract: Address,
        account: Address,
        deadline: &Deadline,
    ) -> Result<PositionSnapshot, ChainError> {
        self.with_read_retries(deadline, move || async move {
            let (position, chain_time) = tokio::try_join!(
                self.client.read_state(contract, account),
                self.client.chain_time(),
            )?;
            Ok(PositionSnapshot {
                position,
                chain_time,
            })
        })
        .await
    }

    /// Read the reward beneficiary of `account`, retrying transient failures.
    pub async fn read_beneficiary(
        &self,
        contract: Address,
        account: Address,
        deadline: &Deadline,
    ) -> Result<Address, ChainError> {
        self.with_read_retries(deadline, move || self.client.beneficiary_of(contract, account))
            .await
    }

    /// Carry out `command` for the signer's account on `contract`.
    pub async fn execute(
        &self,
        contract: Address,
        command: &Command,
        signer: &dyn TransactionSigner,
        deadline: &Deadline,
    ) -> LifecycleResult {
        let account = signer.address();
        let network = &self.client.network().name;

        let snapshot = match self.read_position(contract, account, deadline).await {
            Ok(snapshot) => snapshot,
            Err(ChainError::ContractCallReverted(reason)) => {
                return LifecycleResult::Reverted {
                    reason,
                    handle: None,
                };
            }
            Err(e) => return LifecycleResult::Rejected(Rejection::ReadFailed(e)),
        };

        tracing::info!(
            network = %network,
            account = %account,
            command = %command,
            phase = %snapshot.phase(),
            staked = %snapshot.position.staked,
            reward = %snapshot.position.reward,
            "Position read"
        );

        let intent = match plan(contract, command, &snapshot.position, snapshot.chain_time) {
            Ok(Plan::Submit(intent)) => intent,
            Ok(Plan::NoOp) => {
                tracing::info!(command = %command, "Nothing to do, position unchanged");
                return LifecycleResult::Confirmed {
                    state: snapshot.position,
                    handle: None,
                };
            }
            Err(rejection) => {
                tracing::warn!(command = %command, reason = %rejection, "Command rejected");
                return LifecycleResult::Rejected(rejection);
            }
        };

        let handle = match self
            .submitter
            .submit(&intent, &self.client, signer, deadline)
            .await
        {
            Ok(handle) => handle,
            Err(e) => return LifecycleResult::Rejected(e.into()),
        };

        self.settle(contract, Some(command), snapshot, handle, deadline)
            .await
    }

    /// Track a transaction submitted by an earlier invocation instead of resubmitting.
    ///
    /// `command` is the command that produced the transaction, when known.
    pub async fn resume(
        &self,
        contract: Address,
        command: Option<&Command>,
        account: Address,
        handle: TransactionHandle,
        deadline: &Deadline,
    ) -> LifecycleResult {
        tracing::info!(tx_hash = %handle.tx_hash, command = ?command, "Resuming transaction");

        let snapshot = match self.read_position(contract, account, deadline).await {
            Ok(snapshot) => snapshot,
            // The read reverted, not the transaction: it stays untracked.
            Err(ChainError::ContractCallReverted(reason)) => {
                return LifecycleResult::Reverted {
                    reason,
                    handle: None,
                };
            }
            Err(e) => return LifecycleResult::Rejected(Rejection::ReadFailed(e)),
        };

        self.settle(contract, command, snapshot, handle, deadline)
            .await
    }

    /// Deploy a contract from its init code.
    pub async fn deploy(
        &self,
        init_code: Bytes,
        signer: &dyn TransactionSigner,
        deadline: &Deadline,
    ) -> DeployResult {
        let intent = TransactionIntent::deploy(init_code);
        let handle = match self
            .submitter
            .submit(&intent, &self.client, signer, deadline)
            .await
        {
            Ok(handle) => handle,
            Err(e) => return DeployResult::Rejected(e.into()),
        };

        self.resume_deploy(signer.address(), handle, deadline).await
    }

    /// Track a deployment submitted by an earlier invocation.
    pub async fn resume_deploy(
        &self,
        deployer: Address,
        handle: TransactionHandle,
        deadline: &Deadline,
    ) -> DeployResult {
        let confirmations = self.client.network().confirmations;
        match self
            .tracker
            .track(&handle, &self.client, confirmations, deadline)
            .await
        {
            TrackOutcome::Confirmed {
                contract_address, ..
            } => {
                // Receipts of some nodes omit the field; CREATE addresses are derivable.
                let address = contract_address.unwrap_or_else(|| deployer.create(handle.nonce));
                tracing::info!(address = %address, tx_hash = %handle.tx_hash, "Contract deployed");
                DeployResult::Deployed { address, handle }
            }
            TrackOutcome::Reverted { reason, .. } => DeployResult::Reverted { reason, handle },
            TrackOutcome::Dropped => DeployResult::Rejected(Rejection::Dropped(handle.tx_hash)),
            TrackOutcome::TimedOut => DeployResult::TimedOut(handle),
        }
    }

    async fn settle(
        &self,
        contract: Address,
        command: Option<&Command>,
        before: PositionSnapshot,
        handle: TransactionHandle,
        deadline: &Deadline,
    ) -> LifecycleResult {
        let confirmations = self.client.network().confirmations;
        match self
            .tracker
            .track(&handle, &self.client, confirmations, deadline)
            .await
        {
            TrackOutcome::Confirmed { .. } => {
                let account = before.position.staker;
                let state = match self.read_position(contract, account, deadline).await {
                    Ok(after) => after.position,
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            tx_hash = %handle.tx_hash,
                            "Failed to re-read the position, reporting a local projection"
                        );
                        match command {
                            Some(command) => project(&before.position, command, before.chain_time),
                            None => before.position,
                        }
                    }
                };
                LifecycleResult::Confirmed {
                    state,
                    handle: Some(handle),
                }
            }
            TrackOutcome::Reverted { reason, .. } => LifecycleResult::Reverted {
                reason,
                handle: Some(handle),
            },
            TrackOutcome::Dropped => LifecycleResult::Rejected(Rejection::Dropped(handle.tx_hash)),
            TrackOutcome::TimedOut => LifecycleResult::TimedOut(handle),
        }
    }

    async fn with_read_retries<T, F, Fut>(
        &self,
        deadline: &Deadline,
        read: F,
    ) -> Result<T, ChainError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ChainError>>,
    {
        let mut backoff = self.submitter.policy().backoff();
        loop {
            match read().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => match backoff.next() {
                    Some(delay) if deadline.allows(delay) => {
                        tracing::warn!(error = %e, delay_ms = delay.as_millis() as u64, "Read failed, retrying");
                        if !deadline.sleep(delay).await {
                            return Err(e);
                        }
                    }
                    _ => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
    }
}
