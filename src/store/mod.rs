//! Versioned Store
//!
//! Per-chain key-value map with owner and version tracking and a replay guard
//! for remote applies. Pure state and invariant enforcement: no I/O. Proof
//! validation is delegated to an [`EventValidator`] supplied by the embedding
//! environment.
//!
//! ## Invariants
//!
//! - A key's version strictly increases on every successful write or apply.
//!   Counters never wrap: exhausting one fails the operation.
//! - The owner is bound by the first write or apply and never changes.
//! - A proof hash, once used, stays used; replays are rejected.
//!
//! Every read-check-write for one hashed key runs under that key's own async
//! mutex. A proof hash embeds the hashed key, so two applies of the same
//! proof always contend on the same lock.

pub mod error;
pub mod event;

pub use error::StoreError;
pub use event::{StoreEvent, WriteEvent};

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::types::{Address, ChainId, HashedKey, ProofHash};

// ============================================================================
// PROOF VALIDATION SEAM
// ============================================================================

/// Fields recovered from a proof by the chain's event validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedEvent {
    pub source_chain_id: ChainId,
    pub source_contract: Address,
    pub topics: Vec<[u8; 32]>,
    pub data: Vec<u8>,
}

/// Verifies a proof and returns the source event it attests to.
///
/// Implementations return `StoreError::InvalidProof` for proofs they reject.
pub trait EventValidator: Send + Sync {
    fn validate_event(&self, proof: &[u8]) -> Result<ValidatedEvent, StoreError>;
}

// ============================================================================
// RECORDS AND RECEIPTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub value: Vec<u8>,
    pub owner: Address,
    pub version: u64,
}

/// Result of a local write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReceipt {
    pub hashed_key: HashedKey,
    pub nonce: u64,
    pub version: u64,
}

/// Result of a successful remote apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReceipt {
    pub hashed_key: HashedKey,
    pub proof_hash: ProofHash,
    pub source_chain_id: ChainId,
    pub version: u64,
}

type Slot = Arc<Mutex<Option<Record>>>;

// ============================================================================
// STORE
// ============================================================================

/// One chain's copy of the versioned key-value state.
pub struct VersionedStore {
    chain_id: ChainId,
    contract_addr: Address,
    validator: Arc<dyn EventValidator>,
    slots: RwLock<HashMap<HashedKey, Slot>>,
    nonces: Mutex<HashMap<Address, u64>>,
    used_proofs: RwLock<HashSet<ProofHash>>,
    events: RwLock<Vec<StoreEvent>>,
}

impl VersionedStore {
    pub fn new(chain_id: ChainId, contract_addr: Address, validator: Arc<dyn EventValidator>) -> Self {
        Self {
            chain_id,
            contract_addr,
            validator,
            slots: RwLock::new(HashMap::new()),
            nonces: Mutex::new(HashMap::new()),
            used_proofs: RwLock::new(HashSet::new()),
            events: RwLock::new(Vec::new()),
        }
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn contract_addr(&self) -> Address {
        self.contract_addr
    }

    /// Returns the slot for `hashed_key`, creating an empty one if needed.
    async fn slot(&self, hashed_key: &HashedKey) -> Slot {
        if let Some(slot) = self.slots.read().await.get(hashed_key) {
            return slot.clone();
        }
        self.slots
            .write()
            .await
            .entry(*hashed_key)
            .or_default()
            .clone()
    }

    async fn existing_slot(&self, hashed_key: &HashedKey) -> Option<Slot> {
        self.slots.read().await.get(hashed_key).cloned()
    }

    /// Local write by `owner`.
    ///
    /// Fails with `NotOwner` if the key is bound to someone else. The returned
    /// nonce is the owner's nonce before this write, so the first write
    /// reports 0.
    pub async fn write(&self, owner: Address, key: &str, value: Vec<u8>) -> Result<WriteReceipt, StoreError> {
        let hashed_key = HashedKey::new(&owner, key);
        let slot = self.slot(&hashed_key).await;
        let mut record = slot.lock().await;

        if let Some(existing) = record.as_ref() {
            if existing.owner != owner {
                return Err(StoreError::NotOwner {
                    hashed_key,
                    owner: existing.owner,
                });
            }
        }

        let version = record
            .as_ref()
            .map(|r| r.version)
            .unwrap_or(0)
            .checked_add(1)
            .ok_or(StoreError::CounterExhausted("version"))?;
        let nonce = {
            let mut nonces = self.nonces.lock().await;
            let counter = nonces.entry(owner).or_insert(0);
            let current = *counter;
            *counter = current
                .checked_add(1)
                .ok_or(StoreError::CounterExhausted("nonce"))?;
            current
        };

        *record = Some(Record {
            value: value.clone(),
            owner,
            version,
        });

        self.events.write().await.push(StoreEvent::ValueSet(WriteEvent {
            sender: owner,
            hashed_key,
            key: key.to_string(),
            value,
            nonce,
            version,
        }));

        debug!(
            "Local write: chain={}, key={}, owner={}, version={}, nonce={}",
            self.chain_id, hashed_key, owner, version, nonce
        );

        Ok(WriteReceipt {
            hashed_key,
            nonce,
            version,
        })
    }

    /// Applies a write proven to have happened on another chain.
    pub async fn apply_remote(&self, proof: &[u8]) -> Result<ApplyReceipt, StoreError> {
        let validated = self.validator.validate_event(proof)?;
        let event = WriteEvent::from_log(&validated.topics, &validated.data)?;
        let proof_hash = ProofHash::compute(
            validated.source_chain_id,
            &validated.source_contract,
            &event.hashed_key,
            event.nonce,
        );

        let slot = self.slot(&event.hashed_key).await;
        let mut record = slot.lock().await;

        if self.used_proofs.read().await.contains(&proof_hash) {
            return Err(StoreError::AlreadyApplied(proof_hash));
        }

        let current = record.as_ref().map(|r| r.version).unwrap_or(0);
        if let Some(existing) = record.as_ref() {
            if existing.owner != event.sender {
                return Err(StoreError::NotOwner {
                    hashed_key: event.hashed_key,
                    owner: existing.owner,
                });
            }
        }
        if event.version <= current {
            return Err(StoreError::StaleVersion {
                incoming: event.version,
                current,
            });
        }
        // Keep the owner's next local write representable.
        if event.version == u64::MAX {
            return Err(StoreError::CounterExhausted("version"));
        }

        self.used_proofs.write().await.insert(proof_hash);
        let owner = record.as_ref().map(|r| r.owner).unwrap_or(event.sender);
        *record = Some(Record {
            value: event.value.clone(),
            owner,
            version: event.version,
        });

        self.events.write().await.push(StoreEvent::ValueUpdated {
            hashed_key: event.hashed_key,
            value: event.value,
            version: event.version,
        });

        debug!(
            "Remote apply: chain={}, src_chain={}, key={}, version={}",
            self.chain_id, validated.source_chain_id, event.hashed_key, event.version
        );

        Ok(ApplyReceipt {
            hashed_key: event.hashed_key,
            proof_hash,
            source_chain_id: validated.source_chain_id,
            version: event.version,
        })
    }

    pub async fn read(&self, owner: &Address, key: &str) -> Option<Vec<u8>> {
        let slot = self.existing_slot(&HashedKey::new(owner, key)).await?;
        let record = slot.lock().await;
        record.as_ref().map(|r| r.value.clone())
    }

    /// 0 if the key was never written.
    pub async fn current_version(&self, hashed_key: &HashedKey) -> u64 {
        match self.existing_slot(hashed_key).await {
            Some(slot) => slot.lock().await.as_ref().map(|r| r.version).unwrap_or(0),
            None => 0,
        }
    }

    pub async fn owner_of(&self, hashed_key: &HashedKey) -> Option<Address> {
        let slot = self.existing_slot(hashed_key).await?;
        let record = slot.lock().await;
        record.as_ref().map(|r| r.owner)
    }

    /// The nonce the owner's next write will report.
    pub async fn nonce_of(&self, owner: &Address) -> u64 {
        self.nonces.lock().await.get(owner).copied().unwrap_or(0)
    }

    pub async fn is_proof_used(&self, proof_hash: &ProofHash) -> bool {
        self.used_proofs.read().await.contains(proof_hash)
    }

    /// Emitted events in order.
    pub async fn events(&self) -> Vec<StoreEvent> {
        self.events.read().await.clone()
    }
}
