//! Ledger gateway
//!
//! The narrow slice of JSON-RPC the engines need. [`RpcGateway`] talks to a
//! real cluster; tests script their own implementation of the trait.

use async_trait::async_trait;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_client::rpc_request::{RpcError, RpcResponseErrorData};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;

use crate::{Error, Result};

/// A blockhash and the last block height at which transactions using it land
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatestBlockhash {
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
}

/// What the cluster knows about a submitted signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureStatus {
    pub slot: u64,
    /// Execution error, if the transaction failed
    pub err: Option<String>,
    /// Reached the gateway's commitment level
    pub confirmed: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions {
    pub skip_preflight: bool,
    /// Let the RPC node rebroadcast this many times
    pub max_retries: Option<usize>,
}

#[async_trait]
pub trait LedgerGateway: Send + Sync {
    async fn latest_blockhash(&self) -> Result<LatestBlockhash>;

    async fn minimum_balance_for_rent_exemption(&self, data_len: usize) -> Result<u64>;

    async fn send_transaction(&self, transaction: &Transaction, options: SendOptions) -> Result<Signature>;

    /// `None` while the cluster has not seen the signature
    async fn signature_status(&self, signature: &Signature) -> Result<Option<SignatureStatus>>;

    async fn block_height(&self) -> Result<u64>;
}

/// Gateway over a Solana JSON-RPC endpoint
pub struct RpcGateway {
    client: RpcClient,
    commitment: CommitmentConfig,
}

impl RpcGateway {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self::with_commitment(rpc_url, CommitmentConfig::confirmed())
    }

    pub fn with_commitment(rpc_url: impl Into<String>, commitment: CommitmentConfig) -> Self {
        let rpc_url = rpc_url.into();
        tracing::debug!(%rpc_url, commitment = ?commitment.commitment, "rpc gateway");
        Self {
            client: RpcClient::new_with_commitment(rpc_url, commitment),
            commitment,
        }
    }

    pub fn url(&self) -> String {
        self.client.url()
    }
}

#[async_trait]
impl LedgerGateway for RpcGateway {
    async fn latest_blockhash(&self) -> Result<LatestBlockhash> {
        let (blockhash, last_valid_block_height) = self
            .client
            .get_latest_blockhash_with_commitment(self.commitment)
            .await
            .map_err(classify)?;
        Ok(LatestBlockhash {
            blockhash,
            last_valid_block_height,
        })
    }

    async fn minimum_balance_for_rent_exemption(&self, data_len: usize) -> Result<u64> {
        self.client
            .get_minimum_balance_for_rent_exemption(data_len)
            .await
            .map_err(classify)
    }

    async fn send_transaction(&self, transaction: &Transaction, options: SendOptions) -> Result<Signature> {
        let config = RpcSendTransactionConfig {
            skip_preflight: options.skip_preflight,
            preflight_commitment: Some(self.commitment.commitment),
            max_retries: options.max_retries,
            ..RpcSendTransactionConfig::default()
        };
        self.client
            .send_transaction_with_config(transaction, config)
            .await
            .map_err(classify)
    }

    async fn signature_status(&self, signature: &Signature) -> Result<Option<SignatureStatus>> {
        let response = self
            .client
            .get_signature_statuses(&[*signature])
            .await
            .map_err(classify)?;

        Ok(response.value.into_iter().next().flatten().map(|status| SignatureStatus {
            slot: status.slot,
            confirmed: status.satisfies_commitment(self.commitment),
            err: status.err.map(|e| e.to_string()),
        }))
    }

    async fn block_height(&self) -> Result<u64> {
        self.client
            .get_block_height_with_commitment(self.commitment)
            .await
            .map_err(classify)
    }
}

/// Sort a client error into transport trouble or a ledger verdict
fn classify(err: ClientError) -> Error {
    match err.kind() {
        ClientErrorKind::Io(_) | ClientErrorKind::Reqwest(_) => Error::Transport(err.to_string()),
        ClientErrorKind::RpcError(RpcError::RpcRequestError(message)) => Error::Transport(message.clone()),
        ClientErrorKind::RpcError(RpcError::RpcResponseError { message, data, .. }) => {
            let logs = match data {
                RpcResponseErrorData::SendTransactionPreflightFailure(result) => {
                    result.logs.clone().unwrap_or_default()
                }
                _ => Vec::new(),
            };
            Error::Rejected {
                reason: message.clone(),
                logs,
            }
        }
        ClientErrorKind::TransactionError(e) => Error::rejected(e.to_string()),
        _ => Error::rejected(err.to_string()),
    }
}
