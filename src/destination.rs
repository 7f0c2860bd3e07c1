//! Destination Module
//!
//! Where proofs are submitted. A destination either wraps an in-process
//! [`VersionedStore`] or drives the state sync contract on an EVM chain.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::abi::{self, Token};
use crate::config::SubmissionConfig;
use crate::evm_client::{EvmClient, EvmReceipt, RpcError};
use crate::registry::ChainEntry;
use crate::store::{StoreError, VersionedStore};
use crate::types::{Address, ChainId};

#[derive(Debug, Error)]
pub enum SubmitError {
    /// The store refused the proof; never retried
    #[error("rejected by destination: {0}")]
    Rejected(#[from] StoreError),
    /// The destination could not be reached or did not confirm; retried
    #[error("destination transport failure: {0}")]
    Transport(String),
}

/// Confirmation of an applied proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub chain_id: ChainId,
    /// Transaction hash for on-chain destinations
    pub tx_hash: Option<String>,
    /// Version now stored, when the destination reports it
    pub version: Option<u64>,
}

/// A chain that accepts `apply_remote` submissions.
#[async_trait]
pub trait StateSyncDestination: Send + Sync {
    fn chain_id(&self) -> ChainId;

    async fn apply_remote(&self, proof: &[u8]) -> Result<SubmitReceipt, SubmitError>;
}

// ============================================================================
// IN-PROCESS DESTINATION
// ============================================================================

pub struct LocalDestination {
    store: Arc<VersionedStore>,
}

impl LocalDestination {
    pub fn new(store: Arc<VersionedStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<VersionedStore> {
        &self.store
    }
}

#[async_trait]
impl StateSyncDestination for LocalDestination {
    fn chain_id(&self) -> ChainId {
        self.store.chain_id()
    }

    async fn apply_remote(&self, proof: &[u8]) -> Result<SubmitReceipt, SubmitError> {
        let receipt = self.store.apply_remote(proof).await?;
        Ok(SubmitReceipt {
            chain_id: self.store.chain_id(),
            tx_hash: None,
            version: Some(receipt.version),
        })
    }
}

// ============================================================================
// EVM DESTINATION
// ============================================================================

/// Submits `setValueFromSource(bytes)` to the contract on an EVM chain.
///
/// Transactions are signed by the node's unlocked `sender` account.
pub struct EvmDestination {
    chain_id: ChainId,
    contract_addr: Address,
    sender: Address,
    client: EvmClient,
    confirmation_poll: Duration,
    confirmation_timeout: Duration,
}

impl EvmDestination {
    pub fn new(chain: &ChainEntry, sender: Address, submission: &SubmissionConfig) -> anyhow::Result<Self> {
        Ok(Self {
            chain_id: chain.chain_id,
            contract_addr: chain.contract_addr,
            sender,
            client: EvmClient::new(&chain.rpc_url)?,
            confirmation_poll: Duration::from_millis(submission.confirmation_poll_ms),
            confirmation_timeout: Duration::from_millis(submission.confirmation_timeout_ms),
        })
    }

    /// Runs the call without sending it, surfacing store rejections.
    async fn preflight(&self, calldata: &[u8]) -> Result<(), SubmitError> {
        self.client
            .call(Some(self.sender), self.contract_addr, calldata)
            .await
            .map(|_| ())
            .map_err(classify)
    }
}

/// Version carried by the `ValueUpdated` log of a successful apply.
fn applied_version(receipt: &EvmReceipt) -> Option<u64> {
    let topic = abi::event_topic(abi::VALUE_UPDATED_EVENT);
    receipt.logs.iter().find_map(|log| {
        let topics = log.topic_bytes().ok()?;
        if topics.first() != Some(&topic) {
            return None;
        }
        let data = log.data_bytes().ok()?;
        abi::decode_u64(&abi::word_at(&data, abi::WORD).ok()?).ok()
    })
}

/// Maps revert data to the store error it encodes; anything else is transport.
fn classify(err: RpcError) -> SubmitError {
    if let Some(store_err) = err.revert_data().and_then(|data| StoreError::from_revert_data(&data)) {
        return SubmitError::Rejected(store_err);
    }
    SubmitError::Transport(err.to_string())
}

#[async_trait]
impl StateSyncDestination for EvmDestination {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    async fn apply_remote(&self, proof: &[u8]) -> Result<SubmitReceipt, SubmitError> {
        let calldata = abi::encode_call(abi::SET_VALUE_FROM_SOURCE_FN, &[Token::Bytes(proof.to_vec())]);

        self.preflight(&calldata).await?;

        let tx_hash = self
            .client
            .send_transaction(self.sender, self.contract_addr, &calldata)
            .await
            .map_err(classify)?;
        debug!("setValueFromSource sent: dst_chain={}, tx={}", self.chain_id, tx_hash);

        let receipt = self
            .client
            .wait_for_receipt(&tx_hash, self.confirmation_poll, self.confirmation_timeout)
            .await
            .map_err(|e| SubmitError::Transport(e.to_string()))?;

        if receipt.is_success() {
            return Ok(SubmitReceipt {
                chain_id: self.chain_id,
                tx_hash: Some(tx_hash),
                version: applied_version(&receipt),
            });
        }

        // Reverted on chain. Replay the call to learn why; a racing relay
        // path typically makes it AlreadyApplied or StaleVersion by now.
        match self.preflight(&calldata).await {
            Err(SubmitError::Rejected(e)) => Err(SubmitError::Rejected(e)),
            _ => Err(SubmitError::Transport(format!("transaction {} reverted", tx_hash))),
        }
    }
}
