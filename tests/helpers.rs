//! Shared test helpers
//!
//! Dummy constants, an in-process proof format with its validator, scripted
//! and gated proof sources, flaky and gated destinations, config builders.

#![allow(dead_code)]

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use state_sync_relayer::config::{ChainConfig, Config};
use state_sync_relayer::destination::{StateSyncDestination, SubmitError, SubmitReceipt};
use state_sync_relayer::monitor::SourceEvent;
use state_sync_relayer::proof_oracle::{OracleError, ProofPolling, ProofSource};
use state_sync_relayer::relay::{DispatcherSettings, RetryPolicy};
use state_sync_relayer::store::{EventValidator, StoreError, StoreEvent, ValidatedEvent, VersionedStore, WriteEvent};
use state_sync_relayer::types::{Address, ChainId, EventKey, Locator};

// ============================================================================
// DUMMY CONSTANTS
// ============================================================================

pub const DUMMY_CHAIN_X: ChainId = 10;
pub const DUMMY_CHAIN_Y: ChainId = 20;
pub const DUMMY_CHAIN_Z: ChainId = 30;

/// State sync contract address, identical on every test chain
pub const DUMMY_CONTRACT_ADDR: &str = "0x00000000000000000000000000000000000000c0";
/// The writer used throughout the scenarios
pub const DUMMY_WRITER_ADDR: &str = "0x00000000000000000000000000000000000000aa";
pub const DUMMY_OTHER_WRITER_ADDR: &str = "0x00000000000000000000000000000000000000bb";
/// Relayer account that signs destination transactions
pub const DUMMY_SENDER_ADDR: &str = "0x00000000000000000000000000000000000000ee";

pub const DUMMY_API_KEY: &str = "test-proof-api-key";
pub const DUMMY_BLOCK_HASH: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";
pub const DUMMY_TX_HASH: &str = "0x2222222222222222222222222222222222222222222222222222222222222222";

pub fn writer() -> Address {
    Address::from_hex(DUMMY_WRITER_ADDR).unwrap()
}

pub fn other_writer() -> Address {
    Address::from_hex(DUMMY_OTHER_WRITER_ADDR).unwrap()
}

pub fn contract() -> Address {
    Address::from_hex(DUMMY_CONTRACT_ADDR).unwrap()
}

// ============================================================================
// TEST PROOF FORMAT
// ============================================================================

/// JSON stand-in for a real attestation: the validator trusts whatever the
/// proof claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestProof {
    pub source_chain_id: ChainId,
    pub source_contract: String,
    pub topics: Vec<String>,
    pub data: String,
}

pub struct TestProofValidator;

impl EventValidator for TestProofValidator {
    fn validate_event(&self, proof: &[u8]) -> Result<ValidatedEvent, StoreError> {
        let parsed: TestProof =
            serde_json::from_slice(proof).map_err(|e| StoreError::InvalidProof(format!("unreadable proof: {}", e)))?;
        let source_contract = Address::from_hex(&parsed.source_contract)
            .map_err(|e| StoreError::InvalidProof(format!("bad contract: {}", e)))?;
        let topics = parsed
            .topics
            .iter()
            .map(|t| {
                let bytes = hex::decode(t.trim_start_matches("0x"))
                    .map_err(|e| StoreError::InvalidProof(format!("bad topic: {}", e)))?;
                <[u8; 32]>::try_from(bytes.as_slice())
                    .map_err(|_| StoreError::InvalidProof("topic is not 32 bytes".to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let data = hex::decode(parsed.data.trim_start_matches("0x"))
            .map_err(|e| StoreError::InvalidProof(format!("bad data: {}", e)))?;
        Ok(ValidatedEvent {
            source_chain_id: parsed.source_chain_id,
            source_contract,
            topics,
            data,
        })
    }
}

pub fn make_proof_from_parts(source_chain_id: ChainId, source_contract: Address, topics: &[[u8; 32]], data: &[u8]) -> Vec<u8> {
    serde_json::to_vec(&TestProof {
        source_chain_id,
        source_contract: source_contract.to_hex(),
        topics: topics.iter().map(|t| format!("0x{}", hex::encode(t))).collect(),
        data: format!("0x{}", hex::encode(data)),
    })
    .unwrap()
}

/// Proof attesting that `event` was emitted by the contract on `source_chain_id`.
pub fn make_proof(source_chain_id: ChainId, event: &WriteEvent) -> Vec<u8> {
    make_proof_from_parts(source_chain_id, contract(), &event.topics(), &event.data())
}

pub fn new_store(chain_id: ChainId) -> Arc<VersionedStore> {
    Arc::new(VersionedStore::new(chain_id, contract(), Arc::new(TestProofValidator)))
}

/// Writes on `store` and returns the emitted `ValueSet` event.
pub async fn write_event(store: &VersionedStore, owner: Address, key: &str, value: &[u8]) -> WriteEvent {
    store.write(owner, key, value.to_vec()).await.unwrap();
    match store.events().await.pop() {
        Some(StoreEvent::ValueSet(event)) => event,
        other => panic!("expected ValueSet, got {:?}", other),
    }
}

/// Wraps a write event as if the watcher had observed it at `block_number`.
pub fn source_event(source_chain_id: ChainId, block_number: u64, event: WriteEvent) -> SourceEvent {
    SourceEvent {
        locator: Locator {
            source_chain_id,
            block_number,
            tx_index: 0,
            log_index: 0,
        },
        key: EventKey::new(source_chain_id, DUMMY_BLOCK_HASH, DUMMY_TX_HASH, block_number),
        source_contract: contract(),
        event,
    }
}

// ============================================================================
// SCRIPTED PROOF SOURCE
// ============================================================================

/// Proof source answering from a per-locator script. The last scripted
/// answer repeats once the script runs out.
#[derive(Default)]
pub struct ScriptedProofSource {
    scripts: Mutex<HashMap<Locator, VecDeque<Result<Vec<u8>, OracleError>>>>,
    calls: AtomicUsize,
}

impl ScriptedProofSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, locator: Locator, answers: Vec<Result<Vec<u8>, OracleError>>) {
        self.scripts.lock().unwrap().insert(locator, answers.into());
    }

    /// Scripts a proof for `event` that always succeeds.
    pub fn prove(&self, event: &SourceEvent) {
        let proof = make_proof(event.locator.source_chain_id, &event.event);
        self.script(event.locator, vec![Ok(proof)]);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProofSource for ScriptedProofSource {
    async fn fetch_proof(&self, locator: &Locator, _polling: &ProofPolling) -> Result<Vec<u8>, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut scripts = self.scripts.lock().unwrap();
        let script = scripts
            .get_mut(locator)
            .ok_or_else(|| OracleError::ProofFailed {
                job_id: 0,
                reason: format!("no script for {}", locator),
            })?;
        if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script.front().cloned().unwrap()
        }
    }

    async fn in_flight(&self) -> usize {
        0
    }
}

// ============================================================================
// FLAKY DESTINATION
// ============================================================================

/// Fails the first `failures` submissions with a transport error, then
/// forwards to the inner destination.
pub struct FlakyDestination {
    inner: Arc<dyn StateSyncDestination>,
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyDestination {
    pub fn new(inner: Arc<dyn StateSyncDestination>, failures: usize) -> Self {
        Self {
            inner,
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateSyncDestination for FlakyDestination {
    fn chain_id(&self) -> ChainId {
        self.inner.chain_id()
    }

    async fn apply_remote(&self, proof: &[u8]) -> Result<SubmitReceipt, SubmitError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(SubmitError::Transport(format!("simulated outage #{}", call + 1)));
        }
        self.inner.apply_remote(proof).await
    }
}

// ============================================================================
// GATES
// ============================================================================

/// Closed until `open()`; once open, stays open.
#[derive(Default)]
pub struct Gate {
    open: AtomicBool,
    notify: Notify,
    waiting: AtomicUsize,
}

impl Gate {
    pub async fn wait(&self) {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        loop {
            let notified = self.notify.notified();
            if self.open.load(Ordering::SeqCst) {
                break;
            }
            notified.await;
        }
        self.waiting.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Callers currently blocked in `wait()`.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Resolves once `count` callers are blocked in `wait()`.
    pub async fn until_waiting(&self, count: usize) {
        while self.waiting() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

/// Scripted proof source that holds every request for `gated` until the
/// gate opens.
pub struct GatedProofSource {
    pub proofs: ScriptedProofSource,
    pub gate: Gate,
    gated: Locator,
}

impl GatedProofSource {
    pub fn new(gated: Locator) -> Self {
        Self {
            proofs: ScriptedProofSource::new(),
            gate: Gate::default(),
            gated,
        }
    }
}

#[async_trait]
impl ProofSource for GatedProofSource {
    async fn fetch_proof(&self, locator: &Locator, polling: &ProofPolling) -> Result<Vec<u8>, OracleError> {
        if *locator == self.gated {
            self.gate.wait().await;
        }
        self.proofs.fetch_proof(locator, polling).await
    }

    async fn in_flight(&self) -> usize {
        self.gate.waiting()
    }
}

/// Holds every submission until the gate opens, then forwards.
pub struct GatedDestination {
    inner: Arc<dyn StateSyncDestination>,
    pub gate: Gate,
}

impl GatedDestination {
    pub fn new(inner: Arc<dyn StateSyncDestination>) -> Self {
        Self {
            inner,
            gate: Gate::default(),
        }
    }
}

#[async_trait]
impl StateSyncDestination for GatedDestination {
    fn chain_id(&self) -> ChainId {
        self.inner.chain_id()
    }

    async fn apply_remote(&self, proof: &[u8]) -> Result<SubmitReceipt, SubmitError> {
        self.gate.wait().await;
        self.inner.apply_remote(proof).await
    }
}

// ============================================================================
// CONFIG BUILDERS
// ============================================================================

/// Dispatcher settings with no waiting: zero poll delays, 1ms backoff.
pub fn fast_dispatcher_settings() -> DispatcherSettings {
    DispatcherSettings {
        polling: ProofPolling {
            first_delay: Duration::ZERO,
            poll_interval: Duration::ZERO,
            max_attempts: 3,
        },
        oracle_retry: RetryPolicy {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        },
        submit_retry: RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        },
        max_concurrent_tasks: 8,
        task_history: 100,
    }
}

pub fn chain_config(name: &str, chain_id: ChainId, rpc_url: &str) -> ChainConfig {
    ChainConfig {
        name: name.to_string(),
        chain_id,
        rpc_url: rpc_url.to_string(),
        contract_addr: DUMMY_CONTRACT_ADDR.to_string(),
        start_block: Some(0),
    }
}

/// Three-chain config pointing at local endpoints.
pub fn build_test_config() -> Config {
    let mut config = Config::default();
    config.chains = vec![
        chain_config("Chain X", DUMMY_CHAIN_X, "http://127.0.0.1:18545"),
        chain_config("Chain Y", DUMMY_CHAIN_Y, "http://127.0.0.1:18546"),
        chain_config("Chain Z", DUMMY_CHAIN_Z, "http://127.0.0.1:18547"),
    ];
    config.submission.sender_addr = Some(DUMMY_SENDER_ADDR.to_string());
    config
}
