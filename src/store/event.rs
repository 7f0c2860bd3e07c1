//! Events emitted by the versioned store.

use serde::{Deserialize, Serialize};

use super::error::StoreError;
use crate::abi::{self, Token};
use crate::types::{Address, HashedKey};

/// A `ValueSet` event: one local write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteEvent {
    pub sender: Address,
    pub hashed_key: HashedKey,
    pub key: String,
    #[serde(with = "hex_bytes")]
    pub value: Vec<u8>,
    pub nonce: u64,
    pub version: u64,
}

impl WriteEvent {
    /// Log topics: `[selector, sender left-padded, hashed_key]`.
    pub fn topics(&self) -> Vec<[u8; 32]> {
        vec![
            abi::event_topic(abi::VALUE_SET_EVENT),
            self.sender.to_topic(),
            self.hashed_key.0,
        ]
    }

    /// ABI-encoded `(string key, bytes value, uint256 nonce, uint256 version)`.
    pub fn data(&self) -> Vec<u8> {
        abi::encode(&[
            Token::String(self.key.clone()),
            Token::Bytes(self.value.clone()),
            Token::Uint(self.nonce),
            Token::Uint(self.version),
        ])
    }

    /// Parses a `ValueSet` log.
    ///
    /// A missing or foreign `topics[0]` is `InvalidSignature`. Anything else
    /// that does not decode, or a hashed key that does not match
    /// keccak256(sender || key), is `InvalidProof`.
    pub fn from_log(topics: &[[u8; 32]], data: &[u8]) -> Result<Self, StoreError> {
        match topics.first() {
            Some(topic) if *topic == abi::event_topic(abi::VALUE_SET_EVENT) => {}
            _ => return Err(StoreError::InvalidSignature),
        }
        if topics.len() < 3 {
            return Err(StoreError::InvalidProof(format!(
                "expected 3 topics, got {}",
                topics.len()
            )));
        }
        if topics[1][..12].iter().any(|b| *b != 0) {
            return Err(StoreError::InvalidProof(
                "sender topic is not a left-padded address".to_string(),
            ));
        }

        let sender = Address::from_topic(&topics[1]);
        let hashed_key = HashedKey(topics[2]);
        let decoded = abi::decode_write_data(data)
            .map_err(|e| StoreError::InvalidProof(format!("event data: {}", e)))?;

        if HashedKey::new(&sender, &decoded.key) != hashed_key {
            return Err(StoreError::InvalidProof(format!(
                "hashed key {} does not match sender {} and key '{}'",
                hashed_key, sender, decoded.key
            )));
        }

        Ok(Self {
            sender,
            hashed_key,
            key: decoded.key,
            value: decoded.value,
            nonce: decoded.nonce,
            version: decoded.version,
        })
    }
}

/// Everything a store emits, in emission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum StoreEvent {
    ValueSet(WriteEvent),
    ValueUpdated {
        hashed_key: HashedKey,
        #[serde(with = "hex_bytes")]
        value: Vec<u8>,
        version: u64,
    },
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)
    }
}
