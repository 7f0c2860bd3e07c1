//! State Sync Relayer Library
//!
//! Propagates versioned key-value writes from one chain to every other
//! configured chain. Watchers observe `ValueSet` events, the dispatcher
//! obtains a proof for each from the proof oracle and submits it to every
//! destination's store, which applies it at most once and only in version
//! order.

pub mod abi;
pub mod api;
pub mod config;
pub mod destination;
pub mod evm_client;
pub mod monitor;
pub mod proof_oracle;
pub mod registry;
pub mod relay;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use config::{Config, ConfigError};
pub use destination::{EvmDestination, LocalDestination, StateSyncDestination, SubmitError};
pub use monitor::{EventWatcher, SeenEvents, SourceEvent};
pub use proof_oracle::{OracleError, ProofOracleClient, ProofPolling, ProofResult, ProofSource};
pub use registry::{ChainEntry, ChainRegistry};
pub use relay::{Dispatcher, DispatcherSettings, TaskOutcome, TaskRecord};
pub use store::{EventValidator, StoreError, ValidatedEvent, VersionedStore};
pub use types::{Address, ChainId, HashedKey, Locator, ProofHash, SyncTask};
