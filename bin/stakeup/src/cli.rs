use std::path::PathBuf;

use alloy_core::primitives::{Address, B256, Bytes, U256};
use clap::{Args, Parser, Subcommand};
use stakeup_staking::TaskArgs;
use tracing::level_filters::LevelFilter;

/// Default network when none is given.
const DEFAULT_NETWORK: &str = "localnet";

#[derive(Parser)]
#[command(name = "stakeup")]
#[command(
    author,
    version,
    about = "Drive a staking position through stake, claim, unstake and withdraw on any EVM network"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, global = true, env = "STAKEUP_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// The network to run against, as named in the configuration.
    #[arg(short, long, global = true, env = "STAKEUP_NETWORK", default_value = DEFAULT_NETWORK)]
    pub network: String,

    /// Path to a Stakeup.toml configuration file.
    ///
    /// If not provided, ./Stakeup.toml is used when present.
    #[arg(long, alias = "conf", global = true, env = "STAKEUP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address of the staking contract.
    ///
    /// Overrides the address from the configuration and the deployments file.
    #[arg(long, global = true, env = "STAKEUP_CONTRACT")]
    pub contract: Option<Address>,

    /// Directory holding pending transactions, deployments and locks.
    ///
    /// Defaults to the platform's local data directory.
    #[arg(long, global = true, env = "STAKEUP_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Overall deadline in seconds, submission and confirmation included.
    #[arg(long, global = true, env = "STAKEUP_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Submit even if a transaction from a previous run is still pending.
    #[arg(long, global = true, env = "STAKEUP_FORCE")]
    pub force: bool,

    #[clap(flatten)]
    pub signer: SignerArgs,

    #[command(subcommand)]
    pub command: Task,
}

/// Where the signing key comes from.
#[derive(Debug, Clone, Args)]
pub struct SignerArgs {
    /// Hex-encoded private key of the staking account.
    #[arg(
        long,
        global = true,
        env = "STAKEUP_PRIVATE_KEY",
        hide_env_values = true,
        conflicts_with = "mnemonic"
    )]
    pub private_key: Option<String>,

    /// BIP-39 mnemonic of the staking account.
    #[arg(long, global = true, env = "STAKEUP_MNEMONIC", hide_env_values = true)]
    pub mnemonic: Option<String>,

    /// Index of the account derived from the mnemonic.
    #[arg(long, global = true, env = "STAKEUP_ACCOUNT_INDEX", default_value_t = 0)]
    pub account_index: u32,
}

#[derive(Debug, Clone, Subcommand, strum::IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Task {
    /// Stake an amount (wei, or with an ether/gwei suffix).
    Stake {
        #[arg(value_parser = parse_amount)]
        amount: U256,
    },

    /// Claim the accrued reward.
    Claim,

    /// Request to unstake, starting the lock period.
    Unstake,

    /// Withdraw the stake once the lock period is over.
    Withdraw,

    /// Show the reward beneficiary, or set it when an address is given.
    Beneficiary { address: Option<Address> },

    /// Send raw calldata to the staking contract.
    Interact {
        /// Hex-encoded calldata.
        #[arg(long)]
        data: Bytes,

        /// Value attached to the call.
        #[arg(long, value_parser = parse_amount)]
        value: Option<U256>,
    },

    /// Deploy the staking contract from a compiled artifact.
    Deploy {
        /// Hardhat or Foundry artifact JSON.
        #[arg(long)]
        artifact: PathBuf,
    },

    /// Show the staking account and the resolved contract.
    Address,

    /// Show the staking position and its phase.
    Status,

    /// Keep tracking a transaction left pending by a previous run.
    Resume { tx_hash: Option<B256> },

    /// List the configured networks.
    Networks,
}

impl Task {
    /// The arguments handed to the task handler.
    pub fn args(&self) -> TaskArgs {
        match self {
            Task::Stake { amount } => TaskArgs {
                amount: Some(*amount),
                ..Default::default()
            },
            Task::Beneficiary { address } => TaskArgs {
                beneficiary: *address,
                ..Default::default()
            },
            Task::Interact { data, value } => TaskArgs {
                data: Some(data.clone()),
                value: *value,
                ..Default::default()
            },
            Task::Deploy { artifact } => TaskArgs {
                artifact: Some(artifact.clone()),
                ..Default::default()
            },
            Task::Resume { tx_hash } => TaskArgs {
                tx_hash: *tx_hash,
                ..Default::default()
            },
            Task::Claim
            | Task::Unstake
            | Task::Withdraw
            | Task::Address
            | Task::Status
            | Task::Networks => TaskArgs::default(),
        }
    }
}

/// Parse an amount in wei, or in gwei/ether with a unit suffix (`1.5ether`, `20 gwei`).
pub fn parse_amount(value: &str) -> Result<U256, String> {
    let value = value.trim().to_lowercase();
    let (number, decimals) = if let Some(number) = value.strip_suffix("ether") {
        (number.trim(), 18)
    } else if let Some(number) = value.strip_suffix("gwei") {
        (number.trim(), 9)
    } else if let Some(number) = value.strip_suffix("wei") {
        (number.trim(), 0)
    } else {
        (value.as_str(), 0)
    };

    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if fraction.len() > decimals {
        return Err(format!("'{}' has more than {} decimals", value, decimals));
    }

    let digits = format!("{}{:0<width$}", whole, fraction, width = decimals);
    U256::from_str_radix(&digits, 10).map_err(|e| format!("invalid amount '{}': {}", value, e))
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1000").unwrap(), U256::from(1_000));
        assert_eq!(parse_amount("1000wei").unwrap(), U256::from(1_000));
        assert_eq!(parse_amount("20 gwei").unwrap(), U256::from(20_000_000_000u64));
        assert_eq!(
            parse_amount("1.5ether").unwrap(),
            U256::from(1_500_000_000_000_000_000u128)
        );
        assert!(parse_amount("1.5").is_err());
        assert!(parse_amount("0.0000000001gwei").is_err());
        assert!(parse_amount("ten").is_err());
    }

    #[test]
    fn test_task_names_match_registry() {
        let name: &'static str = (&Task::Unstake).into();
        assert_eq!(name, "unstake");

        let cli = Cli::try_parse_from([
            "stakeup",
            "stake",
            "2ether",
            "--network",
            "zeta_testnet",
            "--private-key",
            "0x01",
        ])
        .unwrap();
        assert_eq!(cli.network, "zeta_testnet");
        let name: &'static str = (&cli.command).into();
        assert_eq!(name, "stake");
        assert_eq!(
            cli.command.args().amount,
            Some(U256::from(2_000_000_000_000_000_000u128))
        );
    }
}
