//! Shared utilities for talking to Ethereum JSON-RPC endpoints.

use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{abi, error::ChainError};

/// JSON-RPC error code for `execution reverted` (EIP-1474 / geth).
const EXECUTION_REVERTED_CODE: i64 = 3;
/// JSON-RPC error code for `limit exceeded` (EIP-1474).
const LIMIT_EXCEEDED_CODE: i64 = -32005;

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client(timeout: Duration) -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")
}

/// Make a JSON-RPC call and deserialize the result.
///
/// Transport failures, timeouts and server-side HTTP errors are reported as
/// [`ChainError::RpcUnavailable`]; error objects returned by the node are classified with
/// [`classify_rpc_error`].
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<T, ChainError> {
    let response = client
        .post(url)
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .map_err(|e| ChainError::RpcUnavailable(format!("{} request failed: {}", method, e)))?;

    let status = response.status();
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(ChainError::RpcUnavailable(format!(
            "{} returned HTTP {}",
            method, status
        )));
    }

    let result: Value = response.json().await.map_err(|e| {
        ChainError::RpcUnavailable(format!("failed to read {} response: {}", method, e))
    })?;

    if let Some(error) = result.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let data = error.get("data");
        return Err(classify_rpc_error(code, message, data));
    }

    let result_value = result
        .get("result")
        .ok_or_else(|| ChainError::Malformed(format!("no result in {} response", method)))?
        .clone();

    serde_json::from_value(result_value)
        .map_err(|e| ChainError::Malformed(format!("failed to deserialize {} result: {}", method, e)))
}

/// Map a JSON-RPC error object onto the [`ChainError`] taxonomy.
pub fn classify_rpc_error(code: i64, message: &str, data: Option<&Value>) -> ChainError {
    let lower = message.to_lowercase();

    if code == EXECUTION_REVERTED_CODE || lower.contains("execution reverted") {
        let reason = data
            .and_then(revert_data)
            .and_then(|bytes| abi::decode_revert_reason(&bytes))
            .unwrap_or_else(|| {
                message
                    .trim_start_matches("execution reverted")
                    .trim_start_matches(':')
                    .trim()
                    .to_string()
            });
        let reason = if reason.is_empty() {
            "execution reverted".to_string()
        } else {
            reason
        };
        return ChainError::ContractCallReverted(reason);
    }

    if lower.contains("insufficient funds") {
        return ChainError::InsufficientFunds(message.to_string());
    }

    if lower.contains("nonce too low")
        || lower.contains("nonce too high")
        || lower.contains("already known")
        || lower.contains("known transaction")
        || lower.contains("replacement transaction underpriced")
    {
        return ChainError::NonceConflict(message.to_string());
    }

    if code == LIMIT_EXCEEDED_CODE
        || lower.contains("rate limit")
        || lower.contains("too many requests")
        || lower.contains("header not found")
        || lower.contains("timeout")
    {
        return ChainError::RpcUnavailable(message.to_string());
    }

    ChainError::Rpc {
        code,
        message: message.to_string(),
    }
}

/// Extract revert bytes from the `data` member of an error object.
///
/// Nodes either put the hex string there directly or nest it under `data`.
fn revert_data(data: &Value) -> Option<Vec<u8>> {
    let hex_str = match data {
        Value::String(s) => s.as_str(),
        Value::Object(map) => map.get("data")?.as_str()?,
        _ => return None,
    };
    hex::decode(hex_str.trim_start_matches("0x")).ok()
}

/// Parse a `0x`-prefixed hex quantity.
pub fn parse_hex_u64(value: &str) -> Result<u64, ChainError> {
    u64::from_str_radix(value.trim_start_matches("0x"), 16)
        .map_err(|e| ChainError::Malformed(format!("invalid hex quantity '{}': {}", value, e)))
}

/// Parse a `0x`-prefixed hex quantity that may exceed 64 bits.
pub fn parse_hex_u128(value: &str) -> Result<u128, ChainError> {
    u128::from_str_radix(value.trim_start_matches("0x"), 16)
        .map_err(|e| ChainError::Malformed(format!("invalid hex quantity '{}': {}", value, e)))
}

/// Deserialize a u64 from a hex string (with 0x prefix).
pub(crate) fn deserialize_u64_from_hex<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16).map_err(serde::de::Error::custom)
}

/// Block header fields read from `eth_getBlockByNumber`.
#[derive(Debug, Deserialize)]
pub(crate) struct BlockInfo {
    #[serde(deserialize_with = "deserialize_u64_from_hex")]
    pub number: u64,
    #[serde(deserialize_with = "deserialize_u64_from_hex")]
    pub timestamp: u64,
}
