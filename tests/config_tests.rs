//! Unit tests for configuration loading and validation

use std::path::PathBuf;

use state_sync_relayer::config::{Config, ConfigError};
use state_sync_relayer::registry::ChainRegistry;

mod helpers;
use helpers::{build_test_config, chain_config, DUMMY_CHAIN_X, DUMMY_CHAIN_Y, DUMMY_CHAIN_Z};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

const MINIMAL_CONFIG: &str = r#"
[oracle]
url = "https://proofs.example.com/rpc"

[[chains]]
name = "Chain X"
chain_id = 10
rpc_url = "http://127.0.0.1:18545"
contract_addr = "0x00000000000000000000000000000000000000c0"
start_block = 5

[[chains]]
name = "Chain Y"
chain_id = 20
rpc_url = "http://127.0.0.1:18546"
contract_addr = "0x00000000000000000000000000000000000000c0"
"#;

fn write_config(dir: &tempfile::TempDir, content: &str) -> PathBuf {
    let path = dir.path().join("state-sync.toml");
    std::fs::write(&path, content).unwrap();
    path
}

fn assert_invalid(config: &Config, needle: &str) {
    match config.validate() {
        Err(ConfigError::Invalid(msg)) => assert!(msg.contains(needle), "unexpected message: {}", msg),
        other => panic!("expected Invalid containing '{}', got {:?}", needle, other),
    }
}

// ============================================================================
// LOADING TESTS
// ============================================================================

/// Test that a minimal file loads with defaults filled in
/// What is tested: load_from() and serde defaults for omitted sections
/// Why: Operators only need to specify the oracle and chains
#[test]
fn test_load_minimal_config_applies_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load_from(write_config(&dir, MINIMAL_CONFIG)).unwrap();

    assert_eq!(config.chains.len(), 2);
    assert_eq!(config.chains[0].start_block, Some(5));
    assert_eq!(config.chains[1].start_block, None);
    assert_eq!(config.oracle.api_key_env, "PROOF_API_KEY");
    assert_eq!(config.oracle.first_delay_ms, 10_000);
    assert_eq!(config.oracle.max_attempts, 60);
    assert_eq!(config.oracle.request_retries, 3);
    assert_eq!(config.submission.max_attempts, 5);
    assert_eq!(config.submission.sender_addr, None);
    assert_eq!(config.relayer.block_range, 500);
    assert_eq!(config.relayer.dedup_journal_path, None);
    assert_eq!(config.api.port, 3340);
}

/// Test that the shipped template is a valid configuration
/// What is tested: config/state-sync.template.toml parses and validates
/// Why: The template is what operators copy first
#[test]
fn test_template_config_is_valid() {
    let config = Config::load_from("config/state-sync.template.toml").unwrap();

    assert_eq!(config.chains.len(), 3);
    assert!(config.submission.sender_addr.is_some());
    assert_eq!(config.chains[2].start_block, None);
    assert_eq!(ChainRegistry::from_config(&config).unwrap().len(), 3);
}

/// Test that a missing file points the operator at the template
/// What is tested: NotFound error and its message
/// Why: First-run setup should say exactly what to do
#[test]
fn test_missing_file_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");

    let err = Config::load_from(&path).unwrap_err();

    assert!(matches!(err, ConfigError::NotFound(ref p) if *p == path));
    assert!(err.to_string().contains("state-sync.template.toml"));
}

/// Test that broken TOML is a parse error
/// What is tested: Parse error variant
/// Why: Syntax errors must fail startup rather than fall back to defaults
#[test]
fn test_malformed_toml_is_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load_from(write_config(&dir, "[oracle\nurl = ")).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

// ============================================================================
// VALIDATION TESTS
// ============================================================================

/// Test that the default and test configs validate
/// What is tested: validate() on known-good configs
/// Why: Baseline for the negative cases below
#[test]
fn test_valid_configs_pass() {
    Config::default().validate().unwrap();
    build_test_config().validate().unwrap();
}

/// Test that chain IDs must be unique
/// What is tested: Duplicate chain_id rejection
/// Why: The registry keys destinations by chain ID
#[test]
fn test_duplicate_chain_id_rejected() {
    let mut config = build_test_config();
    config.chains[2].chain_id = DUMMY_CHAIN_X;
    assert_invalid(&config, "duplicate chain ID");
}

/// Test that at least two chains are required
/// What is tested: Single-chain rejection
/// Why: A lone chain has nowhere to relay to
#[test]
fn test_single_chain_rejected() {
    let mut config = build_test_config();
    config.chains.truncate(1);
    assert_invalid(&config, "at least two chains");
}

/// Test that addresses and URLs are checked
/// What is tested: Bad contract, sender and RPC URL
/// Why: Typos surface at startup, not at the first relay
#[test]
fn test_bad_addresses_and_urls_rejected() {
    let mut config = build_test_config();
    config.chains[1].contract_addr = "0xnothex".to_string();
    assert_invalid(&config, "contract_addr");

    let mut config = build_test_config();
    config.submission.sender_addr = Some("not-an-address".to_string());
    assert_invalid(&config, "sender_addr");

    let mut config = build_test_config();
    config.chains[0] = chain_config("Chain X", DUMMY_CHAIN_X, "not a url");
    assert_invalid(&config, "rpc_url");
}

/// Test that zero limits are rejected
/// What is tested: max_attempts, queue_capacity and block_range lower bounds
/// Why: A zero limit would stall the pipeline
#[test]
fn test_zero_limits_rejected() {
    let mut config = build_test_config();
    config.submission.max_attempts = 0;
    assert_invalid(&config, "submission.max_attempts");

    let mut config = build_test_config();
    config.relayer.queue_capacity = 0;
    assert_invalid(&config, "queue_capacity");

    let mut config = build_test_config();
    config.relayer.block_range = 0;
    assert_invalid(&config, "block_range");
}

// ============================================================================
// API KEY TESTS
// ============================================================================

/// Test that the API key is read from the configured variable
/// What is tested: get_api_key() with and without the variable set
/// Why: The key never lives in the config file
#[test]
fn test_api_key_from_env() {
    let mut config = build_test_config();

    config.oracle.api_key_env = "STATE_SYNC_TEST_UNSET_KEY".to_string();
    std::env::remove_var("STATE_SYNC_TEST_UNSET_KEY");
    assert!(matches!(
        config.oracle.get_api_key(),
        Err(ConfigError::MissingEnv(name)) if name == "STATE_SYNC_TEST_UNSET_KEY"
    ));

    config.oracle.api_key_env = "STATE_SYNC_TEST_SET_KEY".to_string();
    std::env::set_var("STATE_SYNC_TEST_SET_KEY", "secret");
    assert_eq!(config.oracle.get_api_key().unwrap(), "secret");
}

// ============================================================================
// REGISTRY TESTS
// ============================================================================

/// Test that the registry holds every configured chain
/// What is tested: from_config() entries with parsed contract addresses
/// Why: Watchers and destinations are built from these entries
#[test]
fn test_registry_entries() {
    let registry = ChainRegistry::from_config(&build_test_config()).unwrap();

    let ids: Vec<_> = registry.chains().map(|c| c.chain_id).collect();
    assert_eq!(ids, vec![DUMMY_CHAIN_X, DUMMY_CHAIN_Y, DUMMY_CHAIN_Z]);
    let z = registry.get(DUMMY_CHAIN_Z).unwrap();
    assert_eq!(z.contract_addr.to_hex(), helpers::DUMMY_CONTRACT_ADDR);
    assert_eq!(z.rpc_url, "http://127.0.0.1:18547");
    assert!(registry.get(99).is_none());
}
