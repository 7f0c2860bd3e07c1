//! Configuration Management Module
//!
//! Loads and validates the relayer configuration: the chain registry entries,
//! proof oracle endpoint, submission policy, relayer tuning and API settings.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::types::Address;

/// Default config file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/state-sync.toml";
/// Testnet config file location, selected with `--testnet`.
pub const TESTNET_CONFIG_PATH: &str = "config/state-sync_testnet.toml";
/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "STATE_SYNC_CONFIG_PATH";

// ============================================================================
// ERRORS
// ============================================================================

/// Fatal startup errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "Configuration file '{0}' not found. Please copy the template:\n\
         cp config/state-sync.template.toml config/state-sync.toml\n\
         Then edit config/state-sync.toml with your actual values."
    )]
    NotFound(PathBuf),
    #[error("failed to read configuration file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Configuration error: {0}")]
    Invalid(String),
    #[error("Environment variable '{0}' not set. Please set it with your proof service API key.")]
    MissingEnv(String),
}

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

/// Main configuration structure containing all service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Relayer tuning (polling, queue and concurrency limits)
    #[serde(default)]
    pub relayer: RelayerConfig,
    /// Proof oracle endpoint and polling policy
    pub oracle: OracleConfig,
    /// Destination submission policy
    #[serde(default)]
    pub submission: SubmissionConfig,
    /// Status API server configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Every chain running the state sync contract; each one is both a
    /// source and a destination for the others
    pub chains: Vec<ChainConfig>,
}

/// One chain registry entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Human-readable name for the chain
    pub name: String,
    /// Chain ID (e.g., 31337 for Hardhat, 1 for Ethereum mainnet)
    pub chain_id: u32,
    /// JSON-RPC endpoint URL
    pub rpc_url: String,
    /// Address of the state sync contract
    pub contract_addr: String,
    /// First block to scan; the watcher starts at the chain head when unset
    #[serde(default)]
    pub start_block: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayerConfig {
    /// Watcher polling interval
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,
    /// Maximum number of blocks per `eth_getLogs` window
    #[serde(default = "default_block_range")]
    pub block_range: u64,
    /// Capacity of the watcher -> dispatcher queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Maximum number of destination submissions running at once. Pipelines
    /// waiting on a proof do not count against it.
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    /// Number of finished task records kept for the status API
    #[serde(default = "default_task_history")]
    pub task_history: usize,
    /// Append-only journal of delivered events; in-memory dedup only when unset
    #[serde(default)]
    pub dedup_journal_path: Option<String>,
}

/// Proof oracle endpoint and polling policy.
///
/// The API key is read at runtime from the environment variable named here;
/// the config file never holds the key itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// JSON-RPC endpoint of the proof service
    pub url: String,
    /// Environment variable name containing the bearer API key
    /// Default: "PROOF_API_KEY"
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Wait between requesting a proof and the first poll
    #[serde(default = "default_first_delay_ms")]
    pub first_delay_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Polls before a job is declared timed out
    #[serde(default = "default_poll_max_attempts")]
    pub max_attempts: u32,
    /// Extra proof attempts when the oracle is unreachable
    #[serde(default = "default_request_retries")]
    pub request_retries: u32,
    /// HTTP timeout for a single oracle call
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl OracleConfig {
    /// Loads the API key from the environment variable.
    pub fn get_api_key(&self) -> Result<String, ConfigError> {
        std::env::var(&self.api_key_env).map_err(|_| ConfigError::MissingEnv(self.api_key_env.clone()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionConfig {
    /// Account the destination node signs `setValueFromSource` with
    #[serde(default)]
    pub sender_addr: Option<String>,
    /// Submission attempts per (task, destination) before giving up
    #[serde(default = "default_submit_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Receipt polling interval after a transaction is sent
    #[serde(default = "default_confirmation_poll_ms")]
    pub confirmation_poll_ms: u64,
    #[serde(default = "default_confirmation_timeout_ms")]
    pub confirmation_timeout_ms: u64,
}

/// API server configuration for external communication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Host address to bind the API server to
    pub host: String,
    /// Port number to bind the API server to
    pub port: u16,
    /// Allowed CORS origins for cross-origin requests
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_polling_interval_ms() -> u64 {
    2000
}

fn default_block_range() -> u64 {
    500
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_max_concurrent_tasks() -> usize {
    64
}

fn default_task_history() -> usize {
    1000
}

fn default_api_key_env() -> String {
    "PROOF_API_KEY".to_string()
}

fn default_first_delay_ms() -> u64 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_poll_max_attempts() -> u32 {
    60
}

fn default_request_retries() -> u32 {
    3
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_submit_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_confirmation_poll_ms() -> u64 {
    1000
}

fn default_confirmation_timeout_ms() -> u64 {
    120_000
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            polling_interval_ms: default_polling_interval_ms(),
            block_range: default_block_range(),
            queue_capacity: default_queue_capacity(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            task_history: default_task_history(),
            dedup_journal_path: None,
        }
    }
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            sender_addr: None,
            max_attempts: default_submit_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            confirmation_poll_ms: default_confirmation_poll_ms(),
            confirmation_timeout_ms: default_confirmation_timeout_ms(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3340,
            cors_origins: vec!["http://localhost:3340".to_string()],
        }
    }
}

// ============================================================================
// CONFIGURATION LOADING AND MANAGEMENT
// ============================================================================

impl Config {
    /// Validates the configuration.
    ///
    /// This function ensures that:
    /// - At least two chains are configured and every chain ID is unique
    /// - Every RPC and oracle URL parses
    /// - Every contract and sender address parses
    /// - Attempt counts, queue capacity and concurrency are at least 1
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chains.len() < 2 {
            return Err(ConfigError::Invalid(format!(
                "at least two chains are required, found {}",
                self.chains.len()
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for chain in &self.chains {
            if !seen.insert(chain.chain_id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate chain ID {} ('{}'). Each chain must have a unique chain ID.",
                    chain.chain_id, chain.name
                )));
            }
            url::Url::parse(&chain.rpc_url).map_err(|e| {
                ConfigError::Invalid(format!("chain '{}' has invalid rpc_url '{}': {}", chain.name, chain.rpc_url, e))
            })?;
            Address::from_hex(&chain.contract_addr).map_err(|e| {
                ConfigError::Invalid(format!(
                    "chain '{}' has invalid contract_addr '{}': {}",
                    chain.name, chain.contract_addr, e
                ))
            })?;
        }

        url::Url::parse(&self.oracle.url)
            .map_err(|e| ConfigError::Invalid(format!("invalid oracle url '{}': {}", self.oracle.url, e)))?;

        if let Some(ref sender) = self.submission.sender_addr {
            Address::from_hex(sender)
                .map_err(|e| ConfigError::Invalid(format!("invalid submission.sender_addr '{}': {}", sender, e)))?;
        }

        if self.oracle.max_attempts == 0 {
            return Err(ConfigError::Invalid("oracle.max_attempts must be at least 1".to_string()));
        }
        if self.submission.max_attempts == 0 {
            return Err(ConfigError::Invalid("submission.max_attempts must be at least 1".to_string()));
        }
        if self.relayer.queue_capacity == 0 {
            return Err(ConfigError::Invalid("relayer.queue_capacity must be at least 1".to_string()));
        }
        if self.relayer.max_concurrent_tasks == 0 {
            return Err(ConfigError::Invalid("relayer.max_concurrent_tasks must be at least 1".to_string()));
        }
        if self.relayer.block_range == 0 {
            return Err(ConfigError::Invalid("relayer.block_range must be at least 1".to_string()));
        }

        Ok(())
    }

    /// Loads configuration from `STATE_SYNC_CONFIG_PATH`, falling back to
    /// `config/state-sync.toml`.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&config_path)
    }

    /// Loads and validates configuration from an explicit path.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for Config {
    /// Two local Hardhat-style chains and a local oracle. Placeholder values,
    /// suitable for development and tests only.
    fn default() -> Self {
        Self {
            relayer: RelayerConfig::default(),
            oracle: OracleConfig {
                url: "http://127.0.0.1:8545/proofs".to_string(),
                api_key_env: default_api_key_env(),
                first_delay_ms: default_first_delay_ms(),
                poll_interval_ms: default_poll_interval_ms(),
                max_attempts: default_poll_max_attempts(),
                request_retries: default_request_retries(),
                request_timeout_ms: default_request_timeout_ms(),
            },
            submission: SubmissionConfig::default(),
            api: ApiConfig::default(),
            chains: vec![
                ChainConfig {
                    name: "Chain X".to_string(),
                    chain_id: 31337,
                    rpc_url: "http://127.0.0.1:8545".to_string(),
                    contract_addr: "0x5FbDB2315678afecb367f032d93F642f64180aa3".to_string(),
                    start_block: Some(0),
                },
                ChainConfig {
                    name: "Chain Y".to_string(),
                    chain_id: 31338,
                    rpc_url: "http://127.0.0.1:8546".to_string(),
                    contract_addr: "0x5FbDB2315678afecb367f032d93F642f64180aa3".to_string(),
                    start_block: Some(0),
                },
            ],
        }
    }
}
