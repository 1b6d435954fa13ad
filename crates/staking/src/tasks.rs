//! Named tasks exposed by the command line.
//!
//! The registry is built once at startup. Each handler closes over the shared
//! [`StakingOrchestrator`] and receives a [`TaskContext`] describing the invocation.

use std::{collections::BTreeMap, future::Future, path::PathBuf, sync::Arc};

use alloy_core::primitives::{Address, B256, Bytes, U256};
use anyhow::{Context, Result};
use derive_more::From;
use futures::future::{BoxFuture, FutureExt};

use crate::{
    AccountLock, ChainClient, Deadline, DeployResult, Deployments, LifecycleResult,
    PendingEntry, PendingJournal, StakingOrchestrator, TransactionSigner,
    deployments::{deployments_path, load_artifact_bytecode},
    error::Rejection,
    orchestrator::Command,
};

/// Everything a task needs to know about the invocation it runs in.
#[derive(Clone)]
pub struct TaskContext {
    /// Identifier of the resolved network.
    pub network: String,
    pub signer: Arc<dyn TransactionSigner>,
    /// Staking contract, when one could be resolved.
    pub contract: Option<Address>,
    pub deadline: Deadline,
    /// Directory holding the journal, the deployments file and the locks.
    pub state_dir: PathBuf,
    /// Submit even if a transaction from an earlier invocation is still pending.
    pub force: bool,
}

impl TaskContext {
    pub fn account(&self) -> Address {
        self.signer.address()
    }

    fn contract(&self) -> Result<Address> {
        self.contract.with_context(|| {
            format!(
                "No staking contract known for network '{}'; pass --contract, set \
                 staking_contract in the configuration, or run deploy first",
                self.network
            )
        })
    }

    fn journal(&self) -> PendingJournal {
        PendingJournal::open(&self.state_dir)
    }
}

/// Task arguments parsed by the command line. Each task reads the fields it needs.
#[derive(Debug, Clone, Default)]
pub struct TaskArgs {
    pub amount: Option<U256>,
    pub beneficiary: Option<Address>,
    pub data: Option<Bytes>,
    pub value: Option<U256>,
    pub artifact: Option<PathBuf>,
    pub tx_hash: Option<B256>,
}

/// What a task produced.
#[derive(Debug, Clone, PartialEq, Eq, From)]
pub enum TaskOutcome {
    Lifecycle(LifecycleResult),
    Deploy(DeployResult),
    /// Read-only information, as label/value pairs.
    Report(Vec<(String, String)>),
}

impl TaskOutcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Lifecycle(result) => result.exit_code(),
            Self::Deploy(result) => result.exit_code(),
            Self::Report(_) => 0,
        }
    }
}

type TaskHandler = Box<dyn Fn(TaskContext, TaskArgs) -> BoxFuture<'static, Result<TaskOutcome>> + Send + Sync>;

/// Explicit mapping from task name to handler.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: BTreeMap<&'static str, TaskHandler>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&mut self, name: &'static str, handler: F)
    where
        F: Fn(TaskContext, TaskArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TaskOutcome>> + Send + 'static,
    {
        self.tasks
            .insert(name, Box::new(move |ctx, args| handler(ctx, args).boxed()));
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.tasks.keys().copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Run task `name` while holding the lock of the invocation's (network, account).
    pub async fn run(&self, name: &str, ctx: TaskContext, args: TaskArgs) -> Result<TaskOutcome> {
        let handler = self
            .tasks
            .get(name)
            .with_context(|| format!("Unknown task '{}'", name))?;

        let _lock = AccountLock::acquire(&ctx.state_dir, &ctx.network, ctx.account())?;
        tracing::debug!(task = name, network = %ctx.network, account = %ctx.account(), "Running task");
        handler(ctx, args).await
    }

    /// The standard task set, bound to `orchestrator`.
    pub fn standard<C: ChainClient + 'static>(orchestrator: Arc<StakingOrchestrator<C>>) -> Self {
        let mut registry = Self::new();

        let orch = orchestrator.clone();
        registry.register("stake", move |ctx, args| {
            let orch = orch.clone();
            async move {
                let amount = args.amount.context("stake requires an amount")?;
                run_lifecycle(&orch, &ctx, Command::Stake { amount }).await
            }
        });

        let orch = orchestrator.clone();
        registry.register("claim", move |ctx, _| {
            let orch = orch.clone();
            async move { run_lifecycle(&orch, &ctx, Command::Claim).await }
        });

        let orch = orchestrator.clone();
        registry.register("unstake", move |ctx, _| {
            let orch = orch.clone();
            async move { run_lifecycle(&orch, &ctx, Command::RequestUnstake).await }
        });

        let orch = orchestrator.clone();
        registry.register("withdraw", move |ctx, _| {
            let orch = orch.clone();
            async move { run_lifecycle(&orch, &ctx, Command::Withdraw).await }
        });

        let orch = orchestrator.clone();
        registry.register("beneficiary", move |ctx, args| {
            let orch = orch.clone();
            async move {
                match args.beneficiary {
                    Some(beneficiary) => {
                        run_lifecycle(&orch, &ctx, Command::SetBeneficiary { beneficiary }).await
                    }
                    None => {
                        let contract = ctx.contract()?;
                        let beneficiary = orch
                            .read_beneficiary(contract, ctx.account(), &ctx.deadline)
                            .await
                            .context("Failed to read the beneficiary")?;
                        Ok(TaskOutcome::Report(vec![
                            ("account".to_string(), ctx.account().to_string()),
                            ("beneficiary".to_string(), beneficiary.to_string()),
                        ]))
                    }
                }
            }
        });

        let orch = orchestrator.clone();
        registry.register("interact", move |ctx, args| {
            let orch = orch.clone();
            async move {
                let data = args.data.context("interact requires calldata")?;
                let value = args.value.unwrap_or(U256::ZERO);
                run_lifecycle(&orch, &ctx, Command::Interact { data, value }).await
            }
        });

        let orch = orchestrator.clone();
        registry.register("deploy", move |ctx, args| {
            let orch = orch.clone();
            async move {
                let artifact = args.artifact.context("deploy requires an artifact")?;
                let init_code = load_artifact_bytecode(&artifact)?;
                run_deploy(&orch, &ctx, init_code).await
            }
        });

        registry.register("address", |ctx, _| async move {
            let contract = ctx
                .contract
                .map(|address| address.to_string())
                .unwrap_or_else(|| "not configured".to_string());
            Ok(TaskOutcome::Report(vec![
                ("network".to_string(), ctx.network.clone()),
                ("account".to_string(), ctx.account().to_string()),
                ("contract".to_string(), contract),
            ]))
        });

        let orch = orchestrator.clone();
        registry.register("status", move |ctx, _| {
            let orch = orch.clone();
            async move { status(&orch, &ctx).await }
        });

        let orch = orchestrator;
        registry.register("resume", move |ctx, args| {
            let orch = orch.clone();
            async move { resume(&orch, &ctx, args.tx_hash).await }
        });

        registry
    }
}

/// Fail with a rejection if the journal still holds a transaction for this account.
fn pending_guard(ctx: &TaskContext, journal: &PendingJournal) -> Result<Option<Rejection>> {
    let Some(entry) = journal.get(&ctx.network, ctx.account())? else {
        return Ok(None);
    };

    if ctx.force {
        tracing::warn!(
            tx_hash = %entry.handle.tx_hash,
            "Ignoring pending transaction from a previous invocation"
        );
        return Ok(None);
    }

    tracing::warn!(
        tx_hash = %entry.handle.tx_hash,
        "A previous transaction is still pending; run resume or pass --force"
    );
    Ok(Some(Rejection::PendingTransaction(entry.handle.tx_hash)))
}

async fn run_lifecycle<C: ChainClient>(
    orch: &StakingOrchestrator<C>,
    ctx: &TaskContext,
    command: Command,
) -> Result<TaskOutcome> {
    let contract = ctx.contract()?;
    let journal = ctx.journal();

    if let Some(rejection) = pending_guard(ctx, &journal)? {
        return Ok(LifecycleResult::Rejected(rejection).into());
    }

    let result = orch
        .execute(contract, &command, ctx.signer.as_ref(), &ctx.deadline)
        .await;

    if let LifecycleResult::TimedOut(handle) = &result {
        let entry = PendingEntry {
            network: ctx.network.clone(),
            account: ctx.account(),
            contract: Some(contract),
            command: Some(command),
            handle: handle.clone(),
        };
        if let Err(e) = journal.record(entry) {
            tracing::error!(
                error = %e,
                tx_hash = %handle.tx_hash,
                "Failed to journal pending transaction, resume it by hash"
            );
        }
    }

    Ok(result.into())
}

async fn run_deploy<C: ChainClient>(
    orch: &StakingOrchestrator<C>,
    ctx: &TaskContext,
    init_code: Bytes,
) -> Result<TaskOutcome> {
    let journal = ctx.journal();
    if let Some(rejection) = pending_guard(ctx, &journal)? {
        return Ok(DeployResult::Rejected(rejection).into());
    }

    tracing::info!(network = %ctx.network, size = init_code.len(), "Deploying contract");
    let result = orch
        .deploy(init_code, ctx.signer.as_ref(), &ctx.deadline)
        .await;

    match &result {
        DeployResult::Deployed { address, handle } => {
            if let Err(e) = record_deployment(ctx, *address, handle.tx_hash) {
                tracing::error!(error = %e, address = %address, "Failed to record deployment");
            }
        }
        DeployResult::TimedOut(handle) => {
            let entry = PendingEntry {
                network: ctx.network.clone(),
                account: ctx.account(),
                contract: None,
                command: None,
                handle: handle.clone(),
            };
            if let Err(e) = journal.record(entry) {
                tracing::error!(
                    error = %e,
                    tx_hash = %handle.tx_hash,
                    "Failed to journal pending deployment, resume it by hash"
                );
            }
        }
        DeployResult::Reverted { .. } | DeployResult::Rejected(_) => {}
    }

    Ok(result.into())
}

fn record_deployment(ctx: &TaskContext, address: Address, tx_hash: B256) -> Result<()> {
    let path = deployments_path(&ctx.state_dir);
    let mut deployments = Deployments::load_or_default(&path)?;
    deployments.record(&ctx.network, address, tx_hash);
    deployments.save_to_file(&path)
}

async fn status<C: ChainClient>(
    orch: &StakingOrchestrator<C>,
    ctx: &TaskContext,
) -> Result<TaskOutcome> {
    let contract = ctx.contract()?;
    let snapshot = orch
        .read_position(contract, ctx.account(), &ctx.deadline)
        .await
        .context("Failed to read the staking position")?;
    let position = &snapshot.position;

    let mut report = vec![
        ("network".to_string(), ctx.network.clone()),
        ("contract".to_string(), contract.to_string()),
        ("account".to_string(), ctx.account().to_string()),
        ("phase".to_string(), snapshot.phase().to_string()),
        ("staked".to_string(), position.staked.to_string()),
        ("reward".to_string(), position.reward.to_string()),
        ("lock duration".to_string(), format!("{}s", position.lock_duration)),
    ];
    if let Some(requested_at) = position.unstake_requested_at {
        report.push(("unstake requested at".to_string(), requested_at.to_string()));
    }
    if let Some(after) = position.withdrawable_after() {
        report.push(("withdrawable after".to_string(), after.to_string()));
    }
    report.push(("chain time".to_string(), snapshot.chain_time.to_string()));

    if let Some(entry) = ctx.journal().get(&ctx.network, ctx.account())? {
        report.push(("pending".to_string(), entry.handle.tx_hash.to_string()));
    }

    Ok(TaskOutcome::Report(report))
}

async fn resume<C: ChainClient>(
    orch: &StakingOrchestrator<C>,
    ctx: &TaskContext,
    tx_hash: Option<B256>,
) -> Result<TaskOutcome> {
    let journal = ctx.journal();
    let account = ctx.account();

    let entry = match (journal.get(&ctx.network, account)?, tx_hash) {
        (Some(entry), None) => entry,
        (Some(entry), Some(tx_hash)) if entry.handle.tx_hash == tx_hash => entry,
        (Some(entry), Some(tx_hash)) => anyhow::bail!(
            "Transaction {} does not match the pending transaction {}",
            tx_hash,
            entry.handle.tx_hash
        ),
        (None, Some(tx_hash)) => PendingEntry {
            network: ctx.network.clone(),
            account,
            contract: ctx.contract,
            command: None,
            handle: crate::TransactionHandle::new(tx_hash, 0),
        },
        (None, None) => anyhow::bail!(
            "No pending transaction for {} on {}",
            account,
            ctx.network
        ),
    };

    let outcome: TaskOutcome = match entry.contract {
        Some(contract) => {
            let result = orch
                .resume(
                    contract,
                    entry.command.as_ref(),
                    account,
                    entry.handle.clone(),
                    &ctx.deadline,
                )
                .await;
            result.into()
        }
        None => {
            let result = orch
                .resume_deploy(account, entry.handle.clone(), &ctx.deadline)
                .await;
            if let DeployResult::Deployed { address, handle } = &result {
                record_deployment(ctx, *address, handle.tx_hash)?;
            }
            result.into()
        }
    };

    let unresolved = matches!(
        outcome,
        TaskOutcome::Lifecycle(LifecycleResult::TimedOut(_))
            | TaskOutcome::Deploy(DeployResult::TimedOut(_))
    );
    // A failed or reverted read leaves the transaction untracked.
    let untracked = matches!(
        outcome,
        TaskOutcome::Lifecycle(
            LifecycleResult::Rejected(Rejection::ReadFailed(_))
                | LifecycleResult::Reverted { handle: None, .. }
        )
    );
    if !unresolved && !untracked {
        journal.clear(&ctx.network, account)?;
    }

    Ok(outcome)
}
