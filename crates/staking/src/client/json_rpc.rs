//! [`ChainClient`] over a plain Ethereum JSON-RPC endpoint.

use std::time::Duration;

use alloy_core::primitives::{Address, B256, Bytes, U256};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ChainClient, InclusionOutcome};
use crate::{
    FeePolicy, NetworkConfig, StakePosition, TransactionHandle, TransactionIntent,
    TransactionSigner, UnsignedTransaction,
    abi::{self, Token, staking},
    error::ChainError,
    rpc::{self, BlockInfo},
};

/// Headroom added on top of `eth_estimateGas`, in percent.
const GAS_ESTIMATE_HEADROOM_PERCENT: u64 = 20;

/// Receipt fields used to classify an included transaction.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Receipt {
    #[serde(deserialize_with = "rpc::deserialize_u64_from_hex")]
    block_number: u64,
    #[serde(deserialize_with = "rpc::deserialize_u64_from_hex")]
    status: u64,
    #[serde(default)]
    contract_address: Option<Address>,
}

/// Transaction fields needed to replay a reverted call.
#[derive(Debug, Deserialize)]
struct TransactionView {
    from: Address,
    #[serde(default)]
    to: Option<Address>,
    input: Bytes,
    value: U256,
}

/// Chain client talking to `network.rpc_url` over HTTP.
#[derive(Debug, Clone)]
pub struct JsonRpcClient {
    network: NetworkConfig,
    http: reqwest::Client,
}

impl JsonRpcClient {
    pub fn new(network: NetworkConfig) -> anyhow::Result<Self> {
        let http = rpc::create_client(network.rpc_timeout)?;
        Ok(Self { network, http })
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, ChainError> {
        rpc::json_rpc_call(&self.http, self.network.rpc_url.as_str(), method, params).await
    }

    async fn eth_call(
        &self,
        from: Option<Address>,
        to: Address,
        data: Bytes,
        value: U256,
        block: &str,
    ) -> Result<Bytes, ChainError> {
        let mut request = json!({ "to": to, "data": data });
        if let Some(from) = from {
            request["from"] = json!(from);
        }
        if !value.is_zero() {
            request["value"] = json!(value);
        }
        self.call("eth_call", vec![request, json!(block)]).await
    }

    async fn view(&self, to: Address, data: Bytes, words: usize) -> Result<Vec<U256>, ChainError> {
        let output = self.eth_call(None, to, data, U256::ZERO, "latest").await?;
        abi::decode_words(&output, words)
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        let number: String = self.call("eth_blockNumber", vec![]).await?;
        rpc::parse_hex_u64(&number)
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        match self.network.fee_policy {
            FeePolicy::Fixed { gas_price } => Ok(u128::from(gas_price)),
            FeePolicy::Estimated { multiplier_percent } => {
                let price: String = self.call("eth_gasPrice", vec![]).await?;
                let price = rpc::parse_hex_u128(&price)?;
                Ok(price.saturating_mul(u128::from(multiplier_percent)) / 100)
            }
        }
    }

    async fn gas_limit(
        &self,
        from: Address,
        intent: &TransactionIntent,
        data: &Bytes,
    ) -> Result<u64, ChainError> {
        if let Some(gas_limit) = self.network.gas_limit {
            return Ok(gas_limit);
        }

        let mut request = json!({ "from": from, "data": data, "value": intent.value });
        if let Some(to) = intent.to {
            request["to"] = json!(to);
        }

        let estimate: String = self.call("eth_estimateGas", vec![request]).await?;
        let estimate = rpc::parse_hex_u64(&estimate)?;
        Ok(estimate.saturating_add(estimate * GAS_ESTIMATE_HEADROOM_PERCENT / 100))
    }

    /// Replay a failed transaction at its inclusion block.
    async fn replay(&self, tx_hash: B256, block_height: u64) -> Result<(), ChainError> {
        let tx: Option<TransactionView> = self
            .call("eth_getTransactionByHash", vec![json!(tx_hash)])
            .await?;
        let Some(TransactionView {
            from,
            to: Some(to),
            input,
            value,
        }) = tx
        else {
            return Ok(());
        };

        self.eth_call(Some(from), to, input, value, &format!("0x{:x}", block_height))
            .await
            .map(|_| ())
    }

    /// Recover the revert reason of a failed transaction.
    async fn revert_reason(&self, tx_hash: B256, block_height: u64) -> String {
        match self.replay(tx_hash, block_height).await {
            Err(ChainError::ContractCallReverted(reason)) => reason,
            Ok(()) => "execution reverted".to_string(),
            Err(e) => {
                tracing::debug!(error = %e, tx_hash = %tx_hash, "Failed to replay reverted transaction");
                "execution reverted (reason unavailable)".to_string()
            }
        }
    }

    async fn check_inclusion(
        &self,
        tx_hash: B256,
        confirmations: u64,
    ) -> Result<InclusionOutcome, ChainError> {
        let receipt: Option<Receipt> = self
            .call("eth_getTransactionReceipt", vec![json!(tx_hash)])
            .await?;

        let Some(receipt) = receipt else {
            let tx: Option<Value> = self
                .call("eth_getTransactionByHash", vec![json!(tx_hash)])
                .await?;
            return Ok(match tx {
                Some(_) => InclusionOutcome::TimedOut,
                None => InclusionOutcome::Dropped,
            });
        };

        let head = self.block_number().await?;
        let depth = head.saturating_sub(receipt.block_number) + 1;
        if depth < confirmations {
            tracing::trace!(
                tx_hash = %tx_hash,
                depth,
                confirmations,
                "Transaction included, waiting for confirmations"
            );
            return Ok(InclusionOutcome::TimedOut);
        }

        let success = receipt.status == 1;
        let reason = if success {
            None
        } else {
            Some(self.revert_reason(tx_hash, receipt.block_number).await)
        };

        Ok(InclusionOutcome::Included {
            block_height: receipt.block_number,
            success,
            reason,
            contract_address: receipt.contract_address,
        })
    }
}

impl ChainClient for JsonRpcClient {
    fn network(&self) -> &NetworkConfig {
        &self.network
    }

    async fn read_state(
        &self,
        contract: Address,
        account: Address,
    ) -> Result<StakePosition, ChainError> {
        let position_call = abi::encode_call(staking::POSITION_OF, &[Token::Address(account)]);
        let lock_call = abi::encode_call(staking::LOCK_DURATION, &[]);

        let (position, lock) = tokio::try_join!(
            self.view(contract, position_call, 3),
            self.view(contract, lock_call, 1),
        )?;

        let unstake_requested_at = match abi::word_to_u64(position[2])? {
            0 => None,
            timestamp => Some(timestamp),
        };

        Ok(StakePosition {
            staker: account,
            staked: position[0],
            reward: position[1],
            unstake_requested_at,
            lock_duration: abi::word_to_u64(lock[0])?,
        })
    }

    async fn chain_time(&self) -> Result<u64, ChainError> {
        let block: BlockInfo = self
            .call("eth_getBlockByNumber", vec![json!("latest"), json!(false)])
            .await?;
        tracing::trace!(block = block.number, timestamp = block.timestamp, "Chain head");
        Ok(block.timestamp)
    }

    async fn pending_nonce(&self, account: Address) -> Result<u64, ChainError> {
        let nonce: String = self
            .call(
                "eth_getTransactionCount",
                vec![json!(account), json!("pending")],
            )
            .await?;
        rpc::parse_hex_u64(&nonce)
    }

    async fn submit(
        &self,
        intent: &TransactionIntent,
        signer: &dyn TransactionSigner,
    ) -> Result<TransactionHandle, ChainError> {
        let from = signer.address();
        let nonce = match intent.nonce {
            Some(nonce) => nonce,
            None => self.pending_nonce(from).await?,
        };
        let data = intent.calldata();

        let gas_price = self.gas_price().await?;
        let gas_limit = self.gas_limit(from, intent, &data).await?;

        let tx = UnsignedTransaction {
            chain_id: self.network.chain_id,
            nonce,
            gas_price,
            gas_limit,
            to: intent.to,
            value: intent.value,
            data,
        };
        let signed = signer.sign(&tx)?;

        tracing::debug!(
            network = %self.network.name,
            call = intent.call.name(),
            nonce,
            gas_price,
            gas_limit,
            tx_hash = %signed.hash,
            "Broadcasting transaction"
        );

        let result: Result<B256, ChainError> = self
            .call("eth_sendRawTransaction", vec![json!(signed.raw)])
            .await;

        let tx_hash = match result {
            Ok(tx_hash) => tx_hash,
            // The node already holds this exact transaction: it was accepted earlier.
            Err(ChainError::NonceConflict(message))
                if message.to_lowercase().contains("already known") =>
            {
                signed.hash
            }
            Err(ChainError::RpcUnavailable(reason)) => {
                return Err(ChainError::BroadcastUnconfirmed {
                    tx_hash: signed.hash,
                    nonce,
                    reason,
                });
            }
            Err(e) => return Err(e),
        };

        if tx_hash != signed.hash {
            tracing::warn!(
                expected = %signed.hash,
                returned = %tx_hash,
                "Node returned an unexpected transaction hash"
            );
        }

        Ok(TransactionHandle::new(tx_hash, nonce))
    }

    async fn await_inclusion(
        &self,
        tx_hash: B256,
        confirmations: u64,
        timeout: Duration,
    ) -> Result<InclusionOutcome, ChainError> {
        match tokio::time::timeout(timeout, self.check_inclusion(tx_hash, confirmations)).await {
            Ok(outcome) => outcome,
            Err(_) => Ok(InclusionOutcome::TimedOut),
        }
    }

    async fn transaction_known(&self, tx_hash: B256) -> Result<bool, ChainError> {
        let tx: Option<Value> = self
            .call("eth_getTransactionByHash", vec![json!(tx_hash)])
            .await?;
        Ok(tx.is_some())
    }

    async fn beneficiary_of(
        &self,
        contract: Address,
        account: Address,
    ) -> Result<Address, ChainError> {
        let data = abi::encode_call(staking::BENEFICIARY_OF, &[Token::Address(account)]);
        let words = self.view(contract, data, 1).await?;
        Ok(abi::word_to_address(words[0]))
    }
}
