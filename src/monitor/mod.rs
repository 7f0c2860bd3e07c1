//! Event Watcher Module
//!
//! One watcher per source chain polls `ValueSet` logs from the state sync
//! contract in bounded block windows, deduplicates them, resolves each log's
//! transaction index and receipt-local log index, and hands the resulting
//! [`SourceEvent`] to the dispatcher queue.

pub mod journal;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::abi;
use crate::config::RelayerConfig;
use crate::evm_client::{EvmClient, EvmLog, LogFilter};
use crate::registry::ChainEntry;
use crate::store::WriteEvent;
use crate::types::{Address, EventKey, Locator};
pub use journal::DedupJournal;

// ============================================================================
// EVENT DATA STRUCTURES
// ============================================================================

/// A `ValueSet` log observed on a source chain, ready for fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEvent {
    /// Locator handed to the proof oracle
    pub locator: Locator,
    /// Dedup key of the log
    pub key: EventKey,
    /// Contract that emitted the log
    pub source_contract: Address,
    /// Decoded event payload
    pub event: WriteEvent,
}

#[derive(Debug, Clone, Copy)]
pub struct WatcherSettings {
    pub polling_interval: Duration,
    /// Maximum number of blocks per `eth_getLogs` window
    pub block_range: u64,
}

impl WatcherSettings {
    pub fn from_config(config: &RelayerConfig) -> Self {
        Self {
            polling_interval: Duration::from_millis(config.polling_interval_ms),
            block_range: config.block_range.max(1),
        }
    }
}

// ============================================================================
// DEDUP SET
// ============================================================================

/// Delivered event keys, shared by all watchers.
///
/// Held in memory for the process lifetime and optionally mirrored to a
/// [`DedupJournal`] so a restart does not redeliver.
pub struct SeenEvents {
    keys: RwLock<HashSet<EventKey>>,
    journal: Option<DedupJournal>,
}

impl SeenEvents {
    pub fn in_memory() -> Self {
        Self {
            keys: RwLock::new(HashSet::new()),
            journal: None,
        }
    }

    /// Loads previously delivered keys from the journal at `path`.
    pub async fn with_journal(path: impl AsRef<Path>) -> Result<Self> {
        let (journal, keys) = DedupJournal::open(path).await?;
        info!(
            "Loaded {} delivered events from journal {}",
            keys.len(),
            journal.path().display()
        );
        Ok(Self {
            keys: RwLock::new(keys),
            journal: Some(journal),
        })
    }

    pub async fn contains(&self, key: &EventKey) -> bool {
        self.keys.read().await.contains(key)
    }

    /// Records `key` as delivered. Returns false if it already was.
    pub async fn insert(&self, key: EventKey) -> Result<bool> {
        let mut keys = self.keys.write().await;
        if keys.contains(&key) {
            return Ok(false);
        }
        if let Some(ref journal) = self.journal {
            journal.append(&key).await?;
        }
        keys.insert(key);
        Ok(true)
    }

    pub async fn len(&self) -> usize {
        self.keys.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.keys.read().await.is_empty()
    }
}

// ============================================================================
// EVENT WATCHER
// ============================================================================

/// Polls one source chain for `ValueSet` logs.
pub struct EventWatcher {
    chain: ChainEntry,
    client: EvmClient,
    settings: WatcherSettings,
    seen: Arc<SeenEvents>,
    sender: mpsc::Sender<SourceEvent>,
    /// Next block to scan; resolved from the chain head on first poll when
    /// no start block is configured
    next_block: Option<u64>,
}

impl EventWatcher {
    pub fn new(
        chain: ChainEntry,
        settings: WatcherSettings,
        seen: Arc<SeenEvents>,
        sender: mpsc::Sender<SourceEvent>,
    ) -> Result<Self> {
        let client = EvmClient::new(&chain.rpc_url)
            .with_context(|| format!("Failed to create EVM client for chain {}", chain.chain_id))?;
        let next_block = chain.start_block;
        Ok(Self {
            chain,
            client,
            settings,
            seen,
            sender,
            next_block,
        })
    }

    pub fn chain_id(&self) -> u32 {
        self.chain.chain_id
    }

    /// Next block the watcher will scan, once known.
    pub fn next_block(&self) -> Option<u64> {
        self.next_block
    }

    /// Polls until the dispatcher queue closes.
    pub async fn run(mut self) -> Result<()> {
        info!(
            "Starting event watcher: chain={} ({}), contract={}",
            self.chain.chain_id, self.chain.name, self.chain.contract_addr
        );

        loop {
            if self.sender.is_closed() {
                info!("Dispatcher queue closed, stopping watcher for chain {}", self.chain.chain_id);
                return Ok(());
            }

            match self.poll_once().await {
                Ok(0) => {}
                Ok(count) => debug!("Delivered {} events from chain {}", count, self.chain.chain_id),
                Err(e) => error!("Poll failed on chain {}: {:#}", self.chain.chain_id, e),
            }

            tokio::time::sleep(self.settings.polling_interval).await;
        }
    }

    /// Scans one block window and delivers new events. Returns how many were
    /// delivered.
    ///
    /// If a log cannot be resolved, the window stops at that log's block and
    /// the next poll resumes there.
    pub async fn poll_once(&mut self) -> Result<usize> {
        let head = self
            .client
            .block_number()
            .await
            .with_context(|| format!("Failed to read block number on chain {}", self.chain.chain_id))?;

        let from = match self.next_block {
            Some(block) => block,
            None => {
                info!("Chain {}: no start block configured, starting at head {}", self.chain.chain_id, head);
                self.next_block = Some(head);
                head
            }
        };
        if from > head {
            return Ok(0);
        }
        let to = head.min(from.saturating_add(self.settings.block_range - 1));

        let filter = LogFilter {
            address: self.chain.contract_addr,
            topic0: abi::event_topic(abi::VALUE_SET_EVENT),
            from_block: from,
            to_block: to,
        };
        let mut logs = self
            .client
            .get_logs(&filter)
            .await
            .with_context(|| format!("Failed to query logs on chain {} [{}, {}]", self.chain.chain_id, from, to))?;
        logs.sort_by_key(|log| (log.block_number().unwrap_or(u64::MAX), log.log_index().unwrap_or(u64::MAX)));

        let mut delivered = 0;
        for log in &logs {
            if log.removed {
                debug!("Skipping removed log on chain {}", self.chain.chain_id);
                continue;
            }
            match self.deliver(log).await {
                Ok(true) => delivered += 1,
                Ok(false) => {}
                Err(e) => {
                    let resume = log.block_number().unwrap_or(from);
                    warn!(
                        "Failed to resolve log on chain {} at block {}, resuming there next poll: {:#}",
                        self.chain.chain_id, resume, e
                    );
                    self.next_block = Some(resume);
                    return Ok(delivered);
                }
            }
        }

        self.next_block = Some(to + 1);
        Ok(delivered)
    }

    /// Resolves and enqueues one log. Returns false for logs that are already
    /// seen or can never be relayed; only failures a later poll may clear are
    /// errors.
    ///
    /// The key is recorded before the send, so an event reaches the
    /// dispatcher at most once.
    async fn deliver(&self, log: &EvmLog) -> Result<bool> {
        let Some(key) = self.event_key(log) else {
            return Ok(false);
        };
        if self.seen.contains(&key).await {
            return Ok(false);
        }

        let (block_number, event) = match Self::decode(log) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(
                    "Ignoring unreadable ValueSet log: chain={}, tx={}, log_index={}: {:#}",
                    self.chain.chain_id, key.transaction_hash, key.log_index, e
                );
                self.seen.insert(key).await?;
                return Ok(false);
            }
        };

        let tx_hash = key.transaction_hash.as_str();
        let receipt = self
            .client
            .get_transaction_receipt(tx_hash)
            .await?
            .with_context(|| format!("receipt for {} not available yet", tx_hash))?;
        let tx_index = u32::try_from(receipt.transaction_index()?).context("transaction index exceeds u32")?;
        let local_index = receipt
            .logs
            .iter()
            .position(|l| l.log_index().ok() == Some(key.log_index))
            .with_context(|| format!("log {} missing from receipt of {}", key.log_index, tx_hash))?;
        let local_index = u32::try_from(local_index).context("log index exceeds u32")?;

        let locator = Locator {
            source_chain_id: self.chain.chain_id,
            block_number,
            tx_index,
            log_index: local_index,
        };

        info!(
            "ValueSet observed: {}, key={}, version={}, nonce={}",
            locator, event.hashed_key, event.version, event.nonce
        );

        self.seen.insert(key.clone()).await?;
        self.sender
            .send(SourceEvent {
                locator,
                key,
                source_contract: self.chain.contract_addr,
                event,
            })
            .await
            .map_err(|_| anyhow::anyhow!("dispatcher queue closed"))?;
        Ok(true)
    }

    /// Dedup key of a log, or None if the node omitted its position.
    fn event_key(&self, log: &EvmLog) -> Option<EventKey> {
        match (log.log_index(), log.block_hash.as_deref(), log.transaction_hash.as_deref()) {
            (Ok(log_index), Some(block_hash), Some(tx_hash)) => {
                Some(EventKey::new(self.chain.chain_id, block_hash, tx_hash, log_index))
            }
            _ => {
                warn!("Ignoring log with no usable position on chain {}", self.chain.chain_id);
                None
            }
        }
    }

    fn decode(log: &EvmLog) -> Result<(u64, WriteEvent)> {
        let block_number = log.block_number()?;
        let event = WriteEvent::from_log(&log.topic_bytes()?, &log.data_bytes()?)?;
        Ok((block_number, event))
    }
}
