//! State Sync Relayer Service
//!
//! Watches every configured chain for `ValueSet` events and relays each write
//! to all other chains through the proof oracle.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

use state_sync_relayer::api::ApiServer;
use state_sync_relayer::config::{Config, CONFIG_PATH_ENV, TESTNET_CONFIG_PATH};
use state_sync_relayer::destination::{EvmDestination, StateSyncDestination};
use state_sync_relayer::monitor::{EventWatcher, SeenEvents, WatcherSettings};
use state_sync_relayer::proof_oracle::ProofOracleClient;
use state_sync_relayer::registry::ChainRegistry;
use state_sync_relayer::relay::{Dispatcher, DispatcherSettings};
use state_sync_relayer::types::Address;

// ============================================================================
// MAIN APPLICATION ENTRY POINT
// ============================================================================

/// Main application entry point.
///
/// This function:
/// 1. Initializes logging and tracing
/// 2. Loads configuration from TOML file
/// 3. Builds the registry, proof oracle client and destinations
/// 4. Starts one watcher per chain, the dispatcher and the status API
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    info!("Starting State Sync Relayer");

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        println!("State Sync Relayer");
        println!();
        println!("Usage: state-sync-relayer [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --testnet, -t     Use testnet configuration ({})", TESTNET_CONFIG_PATH);
        println!("  --config <path>   Use custom config file path (overrides --testnet)");
        println!("  --help, -h        Show this help message");
        println!();
        println!("Environment variables:");
        println!("  {}    Path to config file", CONFIG_PATH_ENV);
        println!("  PROOF_API_KEY             Proof service API key (name set by oracle.api_key_env)");
        return Ok(());
    }

    let mut config_path = None;
    let mut i = 1; // Skip program name
    while i < args.len() {
        if args[i] == "--config" && i + 1 < args.len() {
            config_path = Some(args[i + 1].clone());
            i += 1;
        }
        i += 1;
    }

    if let Some(path) = config_path {
        std::env::set_var(CONFIG_PATH_ENV, &path);
        info!("Using custom config: {}", path);
    } else if args.iter().any(|arg| arg == "--testnet" || arg == "-t") {
        std::env::set_var(CONFIG_PATH_ENV, TESTNET_CONFIG_PATH);
        info!("Using testnet configuration");
    }

    let config = Config::load()?;
    info!("Configuration loaded successfully");

    let registry = ChainRegistry::from_config(&config)?;
    let api_key = config.oracle.get_api_key()?;
    let oracle = Arc::new(ProofOracleClient::new(
        &config.oracle.url,
        &api_key,
        Duration::from_millis(config.oracle.request_timeout_ms),
    )?);

    let sender_addr = config
        .submission
        .sender_addr
        .as_deref()
        .context("submission.sender_addr must be set to submit proofs")?;
    let sender = Address::from_hex(sender_addr).context("Invalid submission.sender_addr")?;

    let mut destinations: Vec<Arc<dyn StateSyncDestination>> = Vec::new();
    for chain in registry.chains() {
        destinations.push(Arc::new(EvmDestination::new(chain, sender, &config.submission)?));
    }

    let seen = Arc::new(match config.relayer.dedup_journal_path {
        Some(ref path) => SeenEvents::with_journal(path).await?,
        None => SeenEvents::in_memory(),
    });

    let dispatcher = Arc::new(Dispatcher::new(
        oracle,
        destinations,
        DispatcherSettings::from_config(&config),
    ));

    let (sender_tx, receiver) = mpsc::channel(config.relayer.queue_capacity.max(1));
    let settings = WatcherSettings::from_config(&config.relayer);
    for chain in registry.chains() {
        let watcher = EventWatcher::new(chain.clone(), settings, seen.clone(), sender_tx.clone())?;
        tokio::spawn(async move {
            let chain_id = watcher.chain_id();
            if let Err(e) = watcher.run().await {
                error!("Watcher for chain {} stopped: {:#}", chain_id, e);
            }
        });
    }
    drop(sender_tx);

    let api = ApiServer::new(config.api.clone(), dispatcher.clone(), seen.clone());
    tokio::spawn(async move {
        if let Err(e) = api.run().await {
            error!("API server stopped: {:#}", e);
        }
    });

    info!("State sync relayer initialized with {} chains", registry.len());

    tokio::select! {
        _ = dispatcher.run(receiver) => {}
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
    }

    Ok(())
}
