//! Task registry tests: journaling of timed-out transactions, resume, and reports.

mod common;

use std::{path::Path, sync::Arc, time::Duration};

use alloy_core::primitives::{Address, U256};
use common::{InclusionMode, MockChain, init_test_tracing, signer, staking_contract};
use stakeup_staking::{
    ChainError, Deadline, DeployResult, Deployments, LifecycleResult, PendingJournal, Rejection,
    RetryPolicy, StakingOrchestrator, TaskArgs, TaskContext, TaskOutcome, TaskRegistry,
    TransactionSigner, deployments::deployments_path,
};

fn registry(chain: &MockChain) -> TaskRegistry {
    TaskRegistry::standard(Arc::new(StakingOrchestrator::new(
        chain.clone(),
        RetryPolicy::default(),
    )))
}

fn context(state_dir: &Path, timeout: Duration) -> TaskContext {
    TaskContext {
        network: "mocknet".to_string(),
        signer: signer(),
        contract: Some(staking_contract()),
        deadline: Deadline::after(timeout),
        state_dir: state_dir.to_path_buf(),
        force: false,
    }
}

fn stake_args(amount: u64) -> TaskArgs {
    TaskArgs {
        amount: Some(U256::from(amount)),
        ..Default::default()
    }
}

fn report_value<'a>(outcome: &'a TaskOutcome, label: &str) -> Option<&'a str> {
    let TaskOutcome::Report(lines) = outcome else {
        return None;
    };
    lines
        .iter()
        .find(|(name, _)| name == label)
        .map(|(_, value)| value.as_str())
}

#[test]
fn standard_registry_has_every_task() {
    let names: Vec<_> = registry(&MockChain::new()).names().collect();
    for task in [
        "address",
        "beneficiary",
        "claim",
        "deploy",
        "interact",
        "resume",
        "stake",
        "status",
        "unstake",
        "withdraw",
    ] {
        assert!(names.contains(&task), "missing task {}", task);
    }
}

#[tokio::test(start_paused = true)]
async fn unknown_task_is_an_error() {
    let dir = tempdir::TempDir::new("stakeup-tasks").unwrap();
    let result = registry(&MockChain::new())
        .run(
            "delegate",
            context(dir.path(), Duration::from_secs(60)),
            TaskArgs::default(),
        )
        .await;
    assert!(result.is_err());
}

#[tokio::test(start_paused = true)]
async fn timed_out_stake_is_journaled_and_resumed() {
    init_test_tracing();
    let dir = tempdir::TempDir::new("stakeup-tasks").unwrap();
    let chain = MockChain::new().with_inclusion(InclusionMode::Never);
    let tasks = registry(&chain);
    let account = signer().address();
    let journal = PendingJournal::open(dir.path());

    let outcome = tasks
        .run("stake", context(dir.path(), Duration::from_secs(20)), stake_args(1_000))
        .await
        .unwrap();
    let TaskOutcome::Lifecycle(LifecycleResult::TimedOut(handle)) = &outcome else {
        panic!("expected a timeout, got {:?}", outcome);
    };
    assert_eq!(outcome.exit_code(), 4);

    let entry = journal.get("mocknet", account).unwrap().unwrap();
    assert_eq!(&entry.handle, handle);

    // A second stake must not double-submit while the first is unresolved.
    let outcome = tasks
        .run("stake", context(dir.path(), Duration::from_secs(20)), stake_args(1_000))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        TaskOutcome::Lifecycle(LifecycleResult::Rejected(Rejection::PendingTransaction(
            handle.tx_hash
        )))
    );
    assert_eq!(chain.submissions(), 1);

    chain.set_inclusion(InclusionMode::Confirm);
    let outcome = tasks
        .run(
            "resume",
            context(dir.path(), Duration::from_secs(60)),
            TaskArgs::default(),
        )
        .await
        .unwrap();

    let TaskOutcome::Lifecycle(LifecycleResult::Confirmed { state, .. }) = outcome else {
        panic!("expected confirmation, got {:?}", outcome);
    };
    assert_eq!(state.staked, U256::from(1_000));
    assert_eq!(journal.get("mocknet", account).unwrap(), None);
    assert_eq!(chain.submissions(), 1);
}

#[cfg(unix)]
#[tokio::test(start_paused = true)]
async fn unwritable_journal_still_reports_the_timeout() {
    init_test_tracing();
    let dir = tempdir::TempDir::new("stakeup-tasks").unwrap();
    // A dangling link: the journal reads as empty but every write fails.
    std::os::unix::fs::symlink(
        dir.path().join("missing").join("pending.json"),
        PendingJournal::open(dir.path()).path(),
    )
    .unwrap();
    let chain = MockChain::new().with_inclusion(InclusionMode::Never);

    let outcome = registry(&chain)
        .run("stake", context(dir.path(), Duration::from_secs(20)), stake_args(1_000))
        .await
        .unwrap();

    let TaskOutcome::Lifecycle(LifecycleResult::TimedOut(handle)) = &outcome else {
        panic!("expected a timeout, got {:?}", outcome);
    };
    assert_eq!(handle.nonce, 0);
    assert_eq!(outcome.exit_code(), 4);
    assert_eq!(chain.submissions(), 1);
}

#[tokio::test(start_paused = true)]
async fn resume_keeps_the_entry_when_the_position_read_reverts() {
    let dir = tempdir::TempDir::new("stakeup-tasks").unwrap();
    let chain = MockChain::new().with_inclusion(InclusionMode::Never);
    let tasks = registry(&chain);
    let journal = PendingJournal::open(dir.path());

    tasks
        .run("stake", context(dir.path(), Duration::from_secs(20)), stake_args(1_000))
        .await
        .unwrap();
    let pending = journal.get("mocknet", signer().address()).unwrap().unwrap();

    let chain = chain.with_read_failures(vec![ChainError::ContractCallReverted(
        "not a staking contract".into(),
    )]);
    let outcome = registry(&chain)
        .run(
            "resume",
            context(dir.path(), Duration::from_secs(60)),
            TaskArgs::default(),
        )
        .await
        .unwrap();

    assert_eq!(
        outcome,
        TaskOutcome::Lifecycle(LifecycleResult::Reverted {
            reason: "not a staking contract".into(),
            handle: None,
        })
    );
    assert_eq!(outcome.exit_code(), 3);
    assert_eq!(
        journal.get("mocknet", signer().address()).unwrap(),
        Some(pending)
    );
}

#[tokio::test(start_paused = true)]
async fn force_ignores_pending_transaction() {
    let dir = tempdir::TempDir::new("stakeup-tasks").unwrap();
    let chain = MockChain::new().with_inclusion(InclusionMode::Never);
    let tasks = registry(&chain);

    tasks
        .run("stake", context(dir.path(), Duration::from_secs(20)), stake_args(1_000))
        .await
        .unwrap();

    chain.set_inclusion(InclusionMode::Confirm);
    let mut ctx = context(dir.path(), Duration::from_secs(60));
    ctx.force = true;
    let outcome = tasks.run("stake", ctx, stake_args(500)).await.unwrap();

    assert!(matches!(
        outcome,
        TaskOutcome::Lifecycle(LifecycleResult::Confirmed { .. })
    ));
    assert_eq!(chain.submissions(), 2);
}

#[tokio::test(start_paused = true)]
async fn resume_without_pending_transaction_fails() {
    let dir = tempdir::TempDir::new("stakeup-tasks").unwrap();
    let result = registry(&MockChain::new())
        .run(
            "resume",
            context(dir.path(), Duration::from_secs(60)),
            TaskArgs::default(),
        )
        .await;
    assert!(result.is_err());
}

#[tokio::test(start_paused = true)]
async fn missing_contract_is_an_error() {
    let dir = tempdir::TempDir::new("stakeup-tasks").unwrap();
    let mut ctx = context(dir.path(), Duration::from_secs(60));
    ctx.contract = None;

    let err = registry(&MockChain::new())
        .run("stake", ctx, stake_args(1_000))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("No staking contract"));
}

#[tokio::test(start_paused = true)]
async fn deploy_records_the_address() {
    let dir = tempdir::TempDir::new("stakeup-tasks").unwrap();
    let artifact = dir.path().join("Staking.json");
    std::fs::write(&artifact, r#"{"bytecode": "0x60806040"}"#).unwrap();

    let mut ctx = context(dir.path(), Duration::from_secs(60));
    ctx.contract = None;
    let args = TaskArgs {
        artifact: Some(artifact),
        ..Default::default()
    };

    let outcome = registry(&MockChain::new())
        .run("deploy", ctx, args)
        .await
        .unwrap();

    let TaskOutcome::Deploy(DeployResult::Deployed { address, .. }) = outcome else {
        panic!("expected a deployment, got {:?}", outcome);
    };
    let deployments = Deployments::load_from_file(&deployments_path(dir.path())).unwrap();
    assert_eq!(deployments.address("mocknet"), Some(address));
}

#[tokio::test(start_paused = true)]
async fn status_and_address_reports() {
    let dir = tempdir::TempDir::new("stakeup-tasks").unwrap();
    let chain = MockChain::new().with_position(1_000, 25, Some(60));
    let tasks = registry(&chain);

    let status = tasks
        .run(
            "status",
            context(dir.path(), Duration::from_secs(60)),
            TaskArgs::default(),
        )
        .await
        .unwrap();
    assert_eq!(status.exit_code(), 0);
    assert_eq!(report_value(&status, "phase"), Some("unstaking"));
    assert_eq!(report_value(&status, "staked"), Some("1000"));
    assert_eq!(report_value(&status, "reward"), Some("25"));

    let address = tasks
        .run(
            "address",
            context(dir.path(), Duration::from_secs(60)),
            TaskArgs::default(),
        )
        .await
        .unwrap();
    assert_eq!(
        report_value(&address, "account"),
        Some(signer().address().to_string().as_str())
    );
    assert_eq!(chain.submit_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn beneficiary_reads_and_sets() {
    let dir = tempdir::TempDir::new("stakeup-tasks").unwrap();
    let chain = MockChain::new().with_position(1_000, 0, None);
    let tasks = registry(&chain);
    let beneficiary = Address::repeat_byte(0xbe);

    let outcome = tasks
        .run(
            "beneficiary",
            context(dir.path(), Duration::from_secs(60)),
            TaskArgs {
                beneficiary: Some(beneficiary),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.exit_code(), 0);

    let outcome = tasks
        .run(
            "beneficiary",
            context(dir.path(), Duration::from_secs(60)),
            TaskArgs::default(),
        )
        .await
        .unwrap();
    assert_eq!(
        report_value(&outcome, "beneficiary"),
        Some(beneficiary.to_string().as_str())
    );
}
