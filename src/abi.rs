//! Minimal Solidity ABI codec
//!
//! Covers exactly what the state sync contract interface needs: the
//! `ValueSet` event payload, `setValueFromSource(bytes)` calldata and the
//! custom-error revert payloads. Integers are limited to 64 bits; any
//! uint256 with non-zero high bytes is rejected.

use thiserror::Error;

use crate::types::keccak256;

/// ABI word size in bytes.
pub const WORD: usize = 32;

pub const VALUE_SET_EVENT: &str = "ValueSet(address,bytes32,string,bytes,uint256,uint256)";
pub const VALUE_UPDATED_EVENT: &str = "ValueUpdated(bytes32,bytes,uint256)";
pub const SET_VALUE_FROM_SOURCE_FN: &str = "setValueFromSource(bytes)";

pub const NOT_OWNER_ERROR: &str = "NotOwner(bytes32,address)";
pub const INVALID_EVENT_SIGNATURE_ERROR: &str = "InvalidEventSignature()";
pub const PROOF_ALREADY_USED_ERROR: &str = "ProofAlreadyUsed(bytes32)";
pub const STALE_VERSION_ERROR: &str = "StaleVersion(uint256,uint256)";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbiError {
    #[error("data too short: need {needed} bytes at offset {offset}, have {len}")]
    OutOfBounds {
        offset: usize,
        needed: usize,
        len: usize,
    },
    #[error("integer does not fit in 64 bits")]
    Overflow,
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
}

/// A value to be ABI-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Uint(u64),
    Word([u8; 32]),
    Bytes(Vec<u8>),
    String(String),
}

/// Event topic for a canonical event signature.
pub fn event_topic(signature: &str) -> [u8; 32] {
    keccak256(signature.as_bytes())
}

/// 4-byte function or error selector.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

pub fn encode_u64(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

fn padded_len(len: usize) -> usize {
    len.div_ceil(WORD) * WORD
}

/// Encodes a tuple of tokens with the standard head/tail layout.
pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let head_len = tokens.len() * WORD;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        match token {
            Token::Uint(value) => head.extend_from_slice(&encode_u64(*value)),
            Token::Word(word) => head.extend_from_slice(word),
            Token::Bytes(_) | Token::String(_) => {
                head.extend_from_slice(&encode_u64((head_len + tail.len()) as u64));
                let bytes: &[u8] = match token {
                    Token::Bytes(b) => b,
                    Token::String(s) => s.as_bytes(),
                    _ => &[],
                };
                tail.extend_from_slice(&encode_u64(bytes.len() as u64));
                tail.extend_from_slice(bytes);
                tail.resize(tail.len() + padded_len(bytes.len()) - bytes.len(), 0);
            }
        }
    }
    head.extend_from_slice(&tail);
    head
}

/// Selector followed by the encoded arguments.
pub fn encode_call(signature: &str, tokens: &[Token]) -> Vec<u8> {
    let mut out = selector(signature).to_vec();
    out.extend_from_slice(&encode(tokens));
    out
}

/// Reads the 32-byte word at `offset`.
pub fn word_at(data: &[u8], offset: usize) -> Result<[u8; 32], AbiError> {
    let out_of_bounds = AbiError::OutOfBounds {
        offset,
        needed: WORD,
        len: data.len(),
    };
    let end = offset.checked_add(WORD).ok_or_else(|| out_of_bounds.clone())?;
    let slice = data.get(offset..end).ok_or(out_of_bounds)?;
    let mut word = [0u8; 32];
    word.copy_from_slice(slice);
    Ok(word)
}

pub fn decode_u64(word: &[u8; 32]) -> Result<u64, AbiError> {
    if word[..24].iter().any(|b| *b != 0) {
        return Err(AbiError::Overflow);
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&word[24..]);
    Ok(u64::from_be_bytes(buf))
}

fn decode_usize(word: &[u8; 32]) -> Result<usize, AbiError> {
    usize::try_from(decode_u64(word)?).map_err(|_| AbiError::Overflow)
}

/// Reads the dynamic `bytes`/`string` whose head slot sits at `head_offset`.
pub fn decode_dynamic(data: &[u8], head_offset: usize) -> Result<Vec<u8>, AbiError> {
    let offset = decode_usize(&word_at(data, head_offset)?)?;
    let len = decode_usize(&word_at(data, offset)?)?;
    let start = offset.checked_add(WORD).ok_or(AbiError::Overflow)?;
    let end = start.checked_add(len).ok_or(AbiError::Overflow)?;
    data.get(start..end)
        .map(<[u8]>::to_vec)
        .ok_or(AbiError::OutOfBounds {
            offset: start,
            needed: len,
            len: data.len(),
        })
}

/// Non-indexed payload of the `ValueSet` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteData {
    pub key: String,
    pub value: Vec<u8>,
    pub nonce: u64,
    pub version: u64,
}

/// Decodes `(string key, bytes value, uint256 nonce, uint256 version)`.
pub fn decode_write_data(data: &[u8]) -> Result<WriteData, AbiError> {
    let key = String::from_utf8(decode_dynamic(data, 0)?).map_err(|_| AbiError::InvalidUtf8)?;
    let value = decode_dynamic(data, WORD)?;
    let nonce = decode_u64(&word_at(data, 2 * WORD)?)?;
    let version = decode_u64(&word_at(data, 3 * WORD)?)?;
    Ok(WriteData {
        key,
        value,
        nonce,
        version,
    })
}

/// Splits revert data into its 4-byte selector and argument payload.
pub fn split_revert(data: &[u8]) -> Option<([u8; 4], &[u8])> {
    if data.len() < 4 {
        return None;
    }
    let mut sel = [0u8; 4];
    sel.copy_from_slice(&data[..4]);
    Some((sel, &data[4..]))
}
