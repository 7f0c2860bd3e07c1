//! Store errors and their on-chain custom-error encoding.

use thiserror::Error;

use crate::abi::{self, Token};
use crate::types::{Address, HashedKey, ProofHash};

/// Rejection reasons raised by a versioned store.
///
/// None of these are retried. `AlreadyApplied` and `StaleVersion` are benign:
/// another relay path already delivered the same or a newer write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("key {hashed_key} is owned by {owner}")]
    NotOwner { hashed_key: HashedKey, owner: Address },
    #[error("event signature is not ValueSet")]
    InvalidSignature,
    #[error("proof {0} already applied")]
    AlreadyApplied(ProofHash),
    #[error("stale version: incoming {incoming}, current {current}")]
    StaleVersion { incoming: u64, current: u64 },
    #[error("invalid proof: {0}")]
    InvalidProof(String),
    /// A version or nonce counter is at `u64::MAX` and cannot advance.
    #[error("{0} counter exhausted")]
    CounterExhausted(&'static str),
}

impl StoreError {
    /// True for outcomes that mean the destination is already up to date.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            StoreError::AlreadyApplied(_) | StoreError::StaleVersion { .. }
        )
    }

    /// Short label used in task records and stats.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::NotOwner { .. } => "not_owner",
            StoreError::InvalidSignature => "invalid_signature",
            StoreError::AlreadyApplied(_) => "already_applied",
            StoreError::StaleVersion { .. } => "stale_version",
            StoreError::InvalidProof(_) => "invalid_proof",
            StoreError::CounterExhausted(_) => "counter_exhausted",
        }
    }

    /// Encodes the error as contract revert data.
    pub fn to_revert_data(&self) -> Vec<u8> {
        match self {
            StoreError::NotOwner { hashed_key, owner } => abi::encode_call(
                abi::NOT_OWNER_ERROR,
                &[Token::Word(hashed_key.0), Token::Word(owner.to_topic())],
            ),
            StoreError::InvalidSignature => abi::selector(abi::INVALID_EVENT_SIGNATURE_ERROR).to_vec(),
            StoreError::AlreadyApplied(proof_hash) => {
                abi::encode_call(abi::PROOF_ALREADY_USED_ERROR, &[Token::Word(proof_hash.0)])
            }
            StoreError::StaleVersion { incoming, current } => abi::encode_call(
                abi::STALE_VERSION_ERROR,
                &[Token::Uint(*incoming), Token::Uint(*current)],
            ),
            StoreError::InvalidProof(reason) => abi::encode_call("Error(string)", &[Token::String(reason.clone())]),
            StoreError::CounterExhausted(_) => {
                abi::encode_call("Error(string)", &[Token::String(self.to_string())])
            }
        }
    }

    /// Maps contract revert data back to a store error.
    ///
    /// Accepts both the argument-carrying custom errors and their bare
    /// `Name()` forms; fields a bare form does not carry read as zero.
    /// Returns `None` for revert data that is not a store rejection.
    pub fn from_revert_data(data: &[u8]) -> Option<StoreError> {
        let (sel, args) = abi::split_revert(data)?;

        if sel == abi::selector(abi::NOT_OWNER_ERROR) {
            let hashed_key = abi::word_at(args, 0).ok()?;
            let owner = abi::word_at(args, abi::WORD).ok()?;
            return Some(StoreError::NotOwner {
                hashed_key: HashedKey(hashed_key),
                owner: Address::from_topic(&owner),
            });
        }
        if sel == abi::selector(abi::PROOF_ALREADY_USED_ERROR) {
            let proof_hash = abi::word_at(args, 0).ok()?;
            return Some(StoreError::AlreadyApplied(ProofHash(proof_hash)));
        }
        if sel == abi::selector(abi::STALE_VERSION_ERROR) {
            let incoming = abi::decode_u64(&abi::word_at(args, 0).ok()?).ok()?;
            let current = abi::decode_u64(&abi::word_at(args, abi::WORD).ok()?).ok()?;
            return Some(StoreError::StaleVersion { incoming, current });
        }
        if sel == abi::selector(abi::INVALID_EVENT_SIGNATURE_ERROR) {
            return Some(StoreError::InvalidSignature);
        }
        if sel == abi::selector("NotOwner()") {
            return Some(StoreError::NotOwner {
                hashed_key: HashedKey([0u8; 32]),
                owner: Address::default(),
            });
        }
        if sel == abi::selector("ProofAlreadyUsed()") {
            return Some(StoreError::AlreadyApplied(ProofHash([0u8; 32])));
        }
        if sel == abi::selector("StaleVersion()") {
            return Some(StoreError::StaleVersion {
                incoming: 0,
                current: 0,
            });
        }
        if sel == abi::selector("Error(string)") {
            let reason = abi::decode_dynamic(args, 0).ok()?;
            return Some(StoreError::InvalidProof(
                String::from_utf8_lossy(&reason).into_owned(),
            ));
        }
        None
    }
}
