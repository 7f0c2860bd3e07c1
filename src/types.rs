//! Protocol Types
//!
//! Identities, storage keys and the task tuples that flow between the event
//! watcher, the dispatcher and the proof oracle.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Numeric chain identifier (EVM chain id).
pub type ChainId = u32;

/// Computes keccak256 over `data`.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

// ============================================================================
// HEX PARSING
// ============================================================================

/// Error returned when a hex string cannot be turned into a fixed-size value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HexParseError {
    #[error("invalid hex string '{0}'")]
    InvalidHex(String),
    #[error("expected at most {expected} bytes, got {actual}")]
    TooLong { expected: usize, actual: usize },
}

/// Parses a hex string (with or without 0x prefix) into `N` bytes.
///
/// Short inputs are left-padded with zeros, so `0xaa` parses as an address
/// ending in `aa`. Nodes and wallets routinely strip leading zeros.
pub fn parse_fixed_hex<const N: usize>(input: &str) -> Result<[u8; N], HexParseError> {
    let trimmed = input.trim();
    let clean = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let padded = if clean.len() % 2 == 1 {
        format!("0{}", clean)
    } else {
        clean.to_string()
    };
    let bytes = hex::decode(&padded).map_err(|_| HexParseError::InvalidHex(input.to_string()))?;
    if bytes.len() > N {
        return Err(HexParseError::TooLong {
            expected: N,
            actual: bytes.len(),
        });
    }
    let mut out = [0u8; N];
    out[N - bytes.len()..].copy_from_slice(&bytes);
    Ok(out)
}

/// Implements hex formatting, parsing and string-based serde for a byte newtype.
macro_rules! hex_newtype {
    ($name:ident, $len:expr) => {
        impl $name {
            /// Parses from a hex string (0x prefix optional, left-padded if short).
            pub fn from_hex(input: &str) -> Result<Self, HexParseError> {
                parse_fixed_hex::<$len>(input).map(Self)
            }

            /// Lowercase hex with 0x prefix.
            pub fn to_hex(&self) -> String {
                format!("0x{}", hex::encode(self.0))
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl FromStr for $name {
            type Err = HexParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = HexParseError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::from_hex(&value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.to_hex()
            }
        }
    };
}

// ============================================================================
// IDENTITIES AND KEYS
// ============================================================================

/// 20-byte account or contract address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(pub [u8; 20]);

hex_newtype!(Address, 20);

impl Address {
    /// Address left-padded to a 32-byte event topic.
    pub fn to_topic(&self) -> [u8; 32] {
        let mut topic = [0u8; 32];
        topic[12..].copy_from_slice(&self.0);
        topic
    }

    /// Takes the low 20 bytes of a 32-byte topic or ABI word.
    pub fn from_topic(topic: &[u8; 32]) -> Self {
        let mut addr = [0u8; 20];
        addr.copy_from_slice(&topic[12..]);
        Self(addr)
    }
}

/// Storage key shared by every chain: keccak256(owner || key).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HashedKey(pub [u8; 32]);

hex_newtype!(HashedKey, 32);

impl HashedKey {
    /// Packed encoding of (address, string), matching `abi.encodePacked`.
    pub fn new(owner: &Address, key: &str) -> Self {
        let mut packed = Vec::with_capacity(20 + key.len());
        packed.extend_from_slice(&owner.0);
        packed.extend_from_slice(key.as_bytes());
        Self(keccak256(&packed))
    }
}

/// Replay-protection digest identifying one logical cross-chain write.
///
/// Built from the source chain, the source contract, the hashed key and the
/// writer's nonce. The destination chain is not part of it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProofHash(pub [u8; 32]);

hex_newtype!(ProofHash, 32);

impl ProofHash {
    pub fn compute(
        source_chain_id: ChainId,
        source_contract: &Address,
        hashed_key: &HashedKey,
        nonce: u64,
    ) -> Self {
        let mut packed = Vec::with_capacity(4 + 20 + 32 + 32);
        packed.extend_from_slice(&source_chain_id.to_be_bytes());
        packed.extend_from_slice(&source_contract.0);
        packed.extend_from_slice(&hashed_key.0);
        packed.extend_from_slice(&[0u8; 24]);
        packed.extend_from_slice(&nonce.to_be_bytes());
        Self(keccak256(&packed))
    }
}

// ============================================================================
// EVENT LOCATORS AND TASKS
// ============================================================================

/// Identifies one source-chain log for the proof oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Locator {
    pub source_chain_id: ChainId,
    pub block_number: u64,
    /// Index of the transaction within its block
    pub tx_index: u32,
    /// Index of the log among the transaction's own logs
    pub log_index: u32,
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "src_chain={}, block={}, tx_index={}, log_index={}",
            self.source_chain_id, self.block_number, self.tx_index, self.log_index
        )
    }
}

/// One (source event, destination chain) pair queued for proof and submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncTask {
    pub source_chain_id: ChainId,
    pub block_number: u64,
    pub tx_index: u32,
    pub log_index: u32,
    pub destination_chain_id: ChainId,
}

impl SyncTask {
    pub fn new(locator: Locator, destination_chain_id: ChainId) -> Self {
        Self {
            source_chain_id: locator.source_chain_id,
            block_number: locator.block_number,
            tx_index: locator.tx_index,
            log_index: locator.log_index,
            destination_chain_id,
        }
    }

    pub fn locator(&self) -> Locator {
        Locator {
            source_chain_id: self.source_chain_id,
            block_number: self.block_number,
            tx_index: self.tx_index,
            log_index: self.log_index,
        }
    }
}

impl fmt::Display for SyncTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "src_chain={}, dst_chain={}, block={}, tx_index={}, log_index={}",
            self.source_chain_id,
            self.destination_chain_id,
            self.block_number,
            self.tx_index,
            self.log_index
        )
    }
}

/// Watcher dedup key: (chain, block hash, transaction hash, block-level log index).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventKey {
    pub chain_id: ChainId,
    pub block_hash: String,
    pub transaction_hash: String,
    pub log_index: u64,
}

impl EventKey {
    /// Hashes are lowercased so keys compare equal regardless of node formatting.
    pub fn new(chain_id: ChainId, block_hash: &str, transaction_hash: &str, log_index: u64) -> Self {
        Self {
            chain_id,
            block_hash: block_hash.to_lowercase(),
            transaction_hash: transaction_hash.to_lowercase(),
            log_index,
        }
    }
}
