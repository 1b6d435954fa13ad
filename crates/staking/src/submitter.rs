//! Transaction submission with bounded retries.

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    ChainClient, Deadline, TransactionHandle, TransactionIntent, TransactionSigner,
    error::{ChainError, Rejection},
};

/// Retry budget of the [`TransactionSubmitter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_factor")]
    pub factor: f32,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_factor() -> f32 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            factor: default_factor(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// Jittered exponential delays between attempts; yields `max_attempts - 1` values,
    /// none above `max_delay_ms`.
    pub fn backoff(&self) -> impl Iterator<Item = Duration> + use<> {
        let cap = Duration::from_millis(self.max_delay_ms);
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.base_delay_ms))
            .with_max_delay(cap)
            .with_factor(self.factor)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
            .with_jitter()
            .build()
            // Jitter is added on top of the capped delay.
            .map(move |delay| delay.min(cap))
    }
}

/// Why the submitter gave up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// A fatal error, or a transient one that outlived the retry budget.
    #[error("{source} (after {attempts} attempt(s))")]
    Failed { attempts: u32, source: ChainError },

    /// The deadline does not leave room for another attempt.
    #[error("deadline reached after {attempts} attempt(s)")]
    DeadlineExceeded {
        attempts: u32,
        last: Option<ChainError>,
    },
}

impl From<SubmitError> for Rejection {
    fn from(error: SubmitError) -> Self {
        match error {
            SubmitError::Failed { attempts, source } => {
                Rejection::SubmissionFailed { attempts, source }
            }
            SubmitError::DeadlineExceeded { .. } => Rejection::DeadlineExceeded,
        }
    }
}

/// Builds and broadcasts transactions through a [`ChainClient`].
#[derive(Debug, Clone, Default)]
pub struct TransactionSubmitter {
    policy: RetryPolicy,
}

impl TransactionSubmitter {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Submit `intent`, retrying `RpcUnavailable` and `NonceConflict` with backoff.
    ///
    /// Every attempt re-derives the nonce from the chain, except the first one when the
    /// intent carries a nonce hint. A broadcast that failed in transit may still have
    /// reached the node, so before each retry the submitter looks those transactions up
    /// and adopts the first one the node knows instead of signing a duplicate.
    pub async fn submit<C: ChainClient>(
        &self,
        intent: &TransactionIntent,
        client: &C,
        signer: &dyn TransactionSigner,
        deadline: &Deadline,
    ) -> Result<TransactionHandle, SubmitError> {
        let mut backoff = self.policy.backoff();
        let mut attempts = 0u32;
        let mut unconfirmed: Vec<TransactionHandle> = Vec::new();

        loop {
            if deadline.is_expired() {
                return Err(SubmitError::DeadlineExceeded {
                    attempts,
                    last: None,
                });
            }

            let error = match accepted_earlier(&unconfirmed, client).await {
                Ok(Some(handle)) => {
                    tracing::info!(
                        call = intent.call.name(),
                        tx_hash = %handle.tx_hash,
                        nonce = handle.nonce,
                        attempts,
                        "Unconfirmed broadcast reached the node"
                    );
                    return Ok(handle);
                }
                Ok(None) => {
                    attempts += 1;
                    let hint = if attempts == 1 { intent.nonce } else { None };

                    match attempt(intent, hint, client, signer).await {
                        Ok(mut handle) => {
                            handle.retries = attempts - 1;
                            tracing::info!(
                                call = intent.call.name(),
                                tx_hash = %handle.tx_hash,
                                nonce = handle.nonce,
                                attempts,
                                "Transaction submitted"
                            );
                            return Ok(handle);
                        }
                        Err(ChainError::BroadcastUnconfirmed {
                            tx_hash,
                            nonce,
                            reason,
                        }) => {
                            let mut handle = TransactionHandle::new(tx_hash, nonce);
                            handle.retries = attempts - 1;
                            unconfirmed.push(handle);
                            ChainError::BroadcastUnconfirmed {
                                tx_hash,
                                nonce,
                                reason,
                            }
                        }
                        Err(e) if e.is_transient() => e,
                        Err(e) => {
                            tracing::error!(call = intent.call.name(), error = %e, attempts, "Submission failed");
                            return Err(SubmitError::Failed {
                                attempts,
                                source: e,
                            });
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Failed to look up unconfirmed broadcasts");
                    e
                }
            };

            let Some(delay) = backoff.next() else {
                tracing::error!(
                    call = intent.call.name(),
                    error = %error,
                    attempts,
                    "Retry budget exhausted"
                );
                return Err(SubmitError::Failed {
                    attempts,
                    source: error,
                });
            };

            if !deadline.allows(delay) {
                return Err(SubmitError::DeadlineExceeded {
                    attempts,
                    last: Some(error),
                });
            }

            tracing::warn!(
                call = intent.call.name(),
                error = %error,
                attempt = attempts,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Transient submission failure, retrying"
            );

            if !deadline.sleep(delay).await {
                return Err(SubmitError::DeadlineExceeded {
                    attempts,
                    last: Some(error),
                });
            }
        }
    }
}

async fn attempt<C: ChainClient>(
    intent: &TransactionIntent,
    nonce_hint: Option<u64>,
    client: &C,
    signer: &dyn TransactionSigner,
) -> Result<TransactionHandle, ChainError> {
    let nonce = match nonce_hint {
        Some(nonce) => nonce,
        None => client.pending_nonce(signer.address()).await?,
    };
    client.submit(&intent.with_nonce(nonce), signer).await
}

/// First of the `unconfirmed` broadcasts the node knows about.
async fn accepted_earlier<C: ChainClient>(
    unconfirmed: &[TransactionHandle],
    client: &C,
) -> Result<Option<TransactionHandle>, ChainError> {
    for handle in unconfirmed {
        if client.transaction_known(handle.tx_hash).await? {
            return Ok(Some(handle.clone()));
        }
    }
    Ok(None)
}
