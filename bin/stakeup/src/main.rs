//! stakeup drives a staking position through its lifecycle on any configured EVM network.

mod cli;

use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::Table;

use cli::{Cli, SignerArgs, Task};
use stakeup_staking::{
    Deadline, DeployResult, Deployments, JsonRpcClient, LifecycleResult, LocalKeySigner,
    NetworkConfig, NetworkRegistry, StakeupConfig, StakingOrchestrator, TaskContext, TaskOutcome,
    TaskRegistry, TransactionHandle, TransactionSigner, deployments::deployments_path,
};

/// Exit code for configuration and unexpected errors.
const EXIT_FAILURE: u8 = 1;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let config = StakeupConfig::load(cli.config.as_deref())?;
    let registry = NetworkRegistry::from_config(&config)?;

    if let Task::Networks = cli.command {
        print_networks(&registry);
        return Ok(0);
    }

    let network = registry.resolve(&cli.network)?.clone();
    let signer = build_signer(&cli.signer)?;
    let state_dir = match cli.state_dir {
        Some(state_dir) => state_dir,
        None => default_state_dir()?,
    };
    let contract = resolve_contract(cli.contract, &network, &state_dir)?;

    let timeout = cli
        .timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.timeout());
    let (deadline, canceller) = Deadline::after(timeout).with_cancellation();

    // Ctrl+C stops waiting; whatever was submitted stays in flight.
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, giving up on confirmation");
            canceller.cancel();
        }
    });

    let task: &'static str = (&cli.command).into();
    let args = cli.command.args();

    tracing::info!(
        task,
        network = %network.name,
        chain_id = network.chain_id,
        account = %signer.address(),
        contract = ?contract,
        timeout_secs = timeout.as_secs(),
        "Starting task..."
    );

    let client = JsonRpcClient::new(network.clone())?;
    let orchestrator = Arc::new(StakingOrchestrator::new(client, config.retry.clone()));
    let tasks = TaskRegistry::standard(orchestrator);

    let ctx = TaskContext {
        network: network.name.clone(),
        signer,
        contract,
        deadline,
        state_dir,
        force: cli.force,
    };

    let outcome = tasks.run(task, ctx, args).await?;
    print_outcome(&outcome);

    Ok(outcome.exit_code())
}

fn build_signer(args: &SignerArgs) -> Result<Arc<dyn TransactionSigner>> {
    let signer = match (&args.private_key, &args.mnemonic) {
        (Some(private_key), _) => LocalKeySigner::from_private_key(private_key)?,
        (None, Some(mnemonic)) => LocalKeySigner::from_mnemonic(mnemonic, args.account_index)?,
        (None, None) => anyhow::bail!(
            "No signing key: pass --private-key or --mnemonic (or set STAKEUP_PRIVATE_KEY / STAKEUP_MNEMONIC)"
        ),
    };
    Ok(Arc::new(signer))
}

fn default_state_dir() -> Result<PathBuf> {
    dirs::data_local_dir()
        .map(|dir| dir.join("stakeup"))
        .context("Could not determine the local data directory, pass --state-dir")
}

/// Contract from the command line, then the network configuration, then the last deployment.
fn resolve_contract(
    explicit: Option<Address>,
    network: &NetworkConfig,
    state_dir: &std::path::Path,
) -> Result<Option<Address>> {
    if let Some(contract) = explicit.or(network.staking_contract) {
        return Ok(Some(contract));
    }

    let deployments = Deployments::load_or_default(&deployments_path(state_dir))?;
    Ok(deployments.address(&network.name))
}

fn print_networks(registry: &NetworkRegistry) {
    let mut table = Table::new();
    table.set_header(vec![
        "Network",
        "Chain ID",
        "RPC URL",
        "Confirmations",
        "Staking contract",
    ]);

    for network in registry.iter() {
        table.add_row(vec![
            network.name.clone(),
            network.chain_id.to_string(),
            network.rpc_url.to_string(),
            network.confirmations.to_string(),
            network
                .staking_contract
                .map(|address| address.to_string())
                .unwrap_or_else(|| "-".to_string()),
        ]);
    }

    println!("{table}");
}

fn print_handle(handle: &TransactionHandle) {
    println!("Transaction: {} (nonce {})", handle.tx_hash, handle.nonce);
    if handle.retries > 0 {
        println!("Accepted after {} retries", handle.retries);
    }
}

fn print_timed_out(handle: &TransactionHandle) {
    print_handle(handle);
    println!("Not confirmed before the deadline; the transaction may still be included.");
    println!("Run `stakeup resume {}` to keep tracking it.", handle.tx_hash);
}

fn print_outcome(outcome: &TaskOutcome) {
    match outcome {
        TaskOutcome::Report(lines) => {
            let mut table = Table::new();
            for (label, value) in lines {
                table.add_row(vec![label.as_str(), value.as_str()]);
            }
            println!("{table}");
        }
        TaskOutcome::Lifecycle(result) => match result {
            LifecycleResult::Confirmed { state, handle } => {
                match handle {
                    Some(handle) => print_handle(handle),
                    None => println!("Nothing to submit"),
                }
                let mut table = Table::new();
                table.set_header(vec!["Staker", "Staked", "Reward", "Unstake requested at"]);
                table.add_row(vec![
                    state.staker.to_string(),
                    state.staked.to_string(),
                    state.reward.to_string(),
                    state
                        .unstake_requested_at
                        .map(|at| at.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                ]);
                println!("{table}");
            }
            LifecycleResult::Reverted { reason, handle } => {
                if let Some(handle) = handle {
                    print_handle(handle);
                }
                eprintln!("Reverted: {}", reason);
            }
            LifecycleResult::TimedOut(handle) => print_timed_out(handle),
            LifecycleResult::Rejected(rejection) => eprintln!("Rejected: {}", rejection),
        },
        TaskOutcome::Deploy(result) => match result {
            DeployResult::Deployed { address, handle } => {
                print_handle(handle);
                println!("Staking contract deployed at {}", address);
            }
            DeployResult::Reverted { reason, handle } => {
                print_handle(handle);
                eprintln!("Deployment reverted: {}", reason);
            }
            DeployResult::TimedOut(handle) => print_timed_out(handle),
            DeployResult::Rejected(rejection) => eprintln!("Rejected: {}", rejection),
        },
    }
}
