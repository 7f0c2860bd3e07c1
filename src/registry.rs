//! Chain Registry
//!
//! Static chain id -> endpoint + contract mapping, built once from
//! configuration and read-only afterwards.

use std::collections::BTreeMap;

use crate::config::{Config, ConfigError};
use crate::types::{Address, ChainId};

/// One configured chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEntry {
    pub name: String,
    pub chain_id: ChainId,
    pub rpc_url: String,
    pub contract_addr: Address,
    pub start_block: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    chains: BTreeMap<ChainId, ChainEntry>,
}

impl ChainRegistry {
    /// Builds the registry from validated configuration.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let entries = config
            .chains
            .iter()
            .map(|chain| {
                let contract_addr = Address::from_hex(&chain.contract_addr).map_err(|e| {
                    ConfigError::Invalid(format!("chain '{}' has invalid contract_addr: {}", chain.name, e))
                })?;
                Ok(ChainEntry {
                    name: chain.name.clone(),
                    chain_id: chain.chain_id,
                    rpc_url: chain.rpc_url.clone(),
                    contract_addr,
                    start_block: chain.start_block,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Self::new(entries)
    }

    /// Fails on duplicate chain ids.
    pub fn new(entries: Vec<ChainEntry>) -> Result<Self, ConfigError> {
        let mut chains = BTreeMap::new();
        for entry in entries {
            let chain_id = entry.chain_id;
            if chains.insert(chain_id, entry).is_some() {
                return Err(ConfigError::Invalid(format!("duplicate chain ID {}", chain_id)));
            }
        }
        Ok(Self { chains })
    }

    pub fn get(&self, chain_id: ChainId) -> Option<&ChainEntry> {
        self.chains.get(&chain_id)
    }

    /// All entries ordered by chain id.
    pub fn chains(&self) -> impl Iterator<Item = &ChainEntry> {
        self.chains.values()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}
