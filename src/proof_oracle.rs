//! Proof Oracle Client
//!
//! Talks to the external proof-generation service over JSON-RPC 2.0 with
//! bearer authentication. A proof is requested for a source-chain log locator,
//! then polled until the service reports it complete or failed.
//!
//! ## Protocol
//!
//! - `log_requestProof([chain_id, block_number, tx_index, log_index]) -> job_id`
//! - `log_queryProof([job_id]) -> { status, proof?, error? }` where `status` is
//!   one of `pending`, `generating`, `complete`, `error` and `proof` is base64.

use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::OracleConfig;
use crate::types::Locator;

pub type JobId = u64;

// ============================================================================
// ERRORS AND RESULTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    /// Transport failure, non-2xx response or JSON-RPC error object
    #[error("proof oracle unavailable: {0}")]
    Unavailable(String),
    #[error("proof job {job_id} still pending after {attempts} polls")]
    ProofTimeout { job_id: JobId, attempts: u32 },
    #[error("proof job {job_id} failed: {reason}")]
    ProofFailed { job_id: JobId, reason: String },
    /// Response arrived but could not be understood
    #[error("malformed oracle response: {0}")]
    Malformed(String),
}

/// Outcome of a single poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProofResult {
    Pending,
    Complete(Vec<u8>),
    Failed(String),
}

/// Polling schedule for one proof job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofPolling {
    pub first_delay: Duration,
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl ProofPolling {
    pub fn from_config(config: &OracleConfig) -> Self {
        Self {
            first_delay: Duration::from_millis(config.first_delay_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_attempts: config.max_attempts,
        }
    }
}

/// Anything that can turn a locator into proof bytes.
#[async_trait]
pub trait ProofSource: Send + Sync {
    async fn fetch_proof(&self, locator: &Locator, polling: &ProofPolling) -> Result<Vec<u8>, OracleError>;

    /// Jobs requested but not yet finished.
    async fn in_flight(&self) -> usize;
}

// ============================================================================
// WIRE STRUCTURES
// ============================================================================

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: Vec<serde_json::Value>,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct QueryProofResult {
    status: String,
    #[serde(default)]
    proof: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

// ============================================================================
// CLIENT
// ============================================================================

pub struct ProofOracleClient {
    client: Client,
    url: String,
    api_key: String,
    in_flight: Mutex<HashMap<JobId, Locator>>,
}

impl ProofOracleClient {
    pub fn new(url: &str, api_key: &str, request_timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            url: url.to_string(),
            api_key: api_key.to_string(),
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    async fn rpc<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<T, OracleError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: 1,
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| OracleError::Unavailable(format!("{} request failed: {}", method, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OracleError::Unavailable(format!("{} returned HTTP {}", method, status)));
        }

        let body: JsonRpcResponse<T> = response
            .json()
            .await
            .map_err(|e| OracleError::Malformed(format!("{} response: {}", method, e)))?;

        if let Some(error) = body.error {
            return Err(OracleError::Unavailable(format!(
                "{} error: {} (code: {})",
                method, error.message, error.code
            )));
        }

        body.result
            .ok_or_else(|| OracleError::Malformed(format!("{} response has no result", method)))
    }

    /// Submits a proof job for `locator` and records it as in flight.
    pub async fn request_proof(&self, locator: &Locator) -> Result<JobId, OracleError> {
        let params = vec![
            serde_json::json!(locator.source_chain_id),
            serde_json::json!(locator.block_number),
            serde_json::json!(locator.tx_index),
            serde_json::json!(locator.log_index),
        ];
        let raw: serde_json::Value = self.rpc("log_requestProof", params).await?;
        let job_id = match &raw {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
        .ok_or_else(|| OracleError::Malformed(format!("job id {} is not an integer", raw)))?;

        self.in_flight.lock().await.insert(job_id, *locator);
        debug!("Proof job {} created for {}", job_id, locator);
        Ok(job_id)
    }

    /// Polls a job once. Terminal results clear the in-flight entry.
    pub async fn poll_proof(&self, job_id: JobId) -> Result<ProofResult, OracleError> {
        let result: QueryProofResult = self
            .rpc("log_queryProof", vec![serde_json::json!(job_id)])
            .await?;

        let outcome = match result.status.as_str() {
            "pending" | "generating" => return Ok(ProofResult::Pending),
            "complete" => {
                let encoded = result
                    .proof
                    .ok_or_else(|| OracleError::Malformed(format!("job {} complete without proof", job_id)))?;
                let proof = base64::engine::general_purpose::STANDARD
                    .decode(encoded.trim())
                    .map_err(|e| OracleError::Malformed(format!("job {} proof is not base64: {}", job_id, e)))?;
                ProofResult::Complete(proof)
            }
            "error" => ProofResult::Failed(
                result
                    .error
                    .unwrap_or_else(|| "proof generation failed".to_string()),
            ),
            other => {
                return Err(OracleError::Malformed(format!(
                    "job {} has unknown status '{}'",
                    job_id, other
                )))
            }
        };

        self.in_flight.lock().await.remove(&job_id);
        Ok(outcome)
    }

    /// Requests a proof and polls it to completion.
    ///
    /// Waits `first_delay` before the first poll, then polls every
    /// `poll_interval` up to `max_attempts` times. A poll that fails with
    /// `Unavailable` still counts as an attempt.
    pub async fn await_proof(&self, locator: &Locator, polling: &ProofPolling) -> Result<Vec<u8>, OracleError> {
        let job_id = self.request_proof(locator).await?;
        tokio::time::sleep(polling.first_delay).await;

        for attempt in 1..=polling.max_attempts {
            match self.poll_proof(job_id).await {
                Ok(ProofResult::Complete(proof)) => return Ok(proof),
                Ok(ProofResult::Failed(reason)) => return Err(OracleError::ProofFailed { job_id, reason }),
                Ok(ProofResult::Pending) => {
                    debug!(
                        "Proof job {} pending ({}/{}): {}",
                        job_id, attempt, polling.max_attempts, locator
                    );
                }
                Err(OracleError::Unavailable(msg)) => {
                    warn!(
                        "Proof job {} poll failed ({}/{}): {}",
                        job_id, attempt, polling.max_attempts, msg
                    );
                }
                Err(e) => {
                    self.in_flight.lock().await.remove(&job_id);
                    return Err(e);
                }
            }
            if attempt < polling.max_attempts {
                tokio::time::sleep(polling.poll_interval).await;
            }
        }

        self.in_flight.lock().await.remove(&job_id);
        Err(OracleError::ProofTimeout {
            job_id,
            attempts: polling.max_attempts,
        })
    }

    pub async fn in_flight_jobs(&self) -> HashMap<JobId, Locator> {
        self.in_flight.lock().await.clone()
    }
}

#[async_trait]
impl ProofSource for ProofOracleClient {
    async fn fetch_proof(&self, locator: &Locator, polling: &ProofPolling) -> Result<Vec<u8>, OracleError> {
        self.await_proof(locator, polling).await
    }

    async fn in_flight(&self) -> usize {
        self.in_flight.lock().await.len()
    }
}
