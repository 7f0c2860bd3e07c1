//! Unit tests for the proof oracle client
//!
//! These tests run the client against a WireMock JSON-RPC server.

use base64::Engine;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use state_sync_relayer::proof_oracle::{OracleError, ProofOracleClient, ProofPolling, ProofResult, ProofSource};
use state_sync_relayer::types::Locator;

mod helpers;
use helpers::{DUMMY_API_KEY, DUMMY_CHAIN_X};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn locator() -> Locator {
    Locator {
        source_chain_id: DUMMY_CHAIN_X,
        block_number: 100,
        tx_index: 3,
        log_index: 1,
    }
}

fn client(server: &MockServer) -> ProofOracleClient {
    ProofOracleClient::new(&server.uri(), DUMMY_API_KEY, Duration::from_secs(5)).unwrap()
}

fn fast_polling(max_attempts: u32) -> ProofPolling {
    ProofPolling {
        first_delay: Duration::ZERO,
        poll_interval: Duration::from_millis(1),
        max_attempts,
    }
}

async fn mount_request_proof(server: &MockServer, job_id: u64) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "log_requestProof"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": job_id
        })))
        .mount(server)
        .await;
}

fn query_response(result: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": result
    }))
}

// ============================================================================
// REQUEST TESTS
// ============================================================================

/// Test that a proof request carries the locator and bearer key
/// What is tested: log_requestProof params and Authorization header
/// Why: The oracle identifies the log by (chain, block, tx index, local log index)
#[tokio::test]
async fn test_request_proof_sends_locator_and_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("authorization", format!("Bearer {}", DUMMY_API_KEY).as_str()))
        .and(body_partial_json(json!({
            "method": "log_requestProof",
            "params": [DUMMY_CHAIN_X, 100, 3, 1]
        })))
        .respond_with(query_response(json!(42)))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let job_id = client.request_proof(&locator()).await.unwrap();

    assert_eq!(job_id, 42);
    assert_eq!(client.in_flight().await, 1);
    assert_eq!(client.in_flight_jobs().await.get(&42), Some(&locator()));
}

/// Test that HTTP failures and JSON-RPC errors map to Unavailable
/// What is tested: request_proof error classification
/// Why: Unavailable is the only oracle error the dispatcher retries
#[tokio::test]
async fn test_request_proof_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let result = client(&server).request_proof(&locator()).await;
    assert!(matches!(result, Err(OracleError::Unavailable(_))));

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32000, "message": "rate limited"}
        })))
        .mount(&server)
        .await;
    let client = client(&server);
    let result = client.request_proof(&locator()).await;
    assert!(matches!(result, Err(OracleError::Unavailable(msg)) if msg.contains("rate limited")));
    assert_eq!(client.in_flight().await, 0);
}

// ============================================================================
// POLL TESTS
// ============================================================================

/// Test that every query status maps to the right ProofResult
/// What is tested: pending, generating, complete and error statuses
/// Why: The base64 proof must come back as raw bytes
#[tokio::test]
async fn test_poll_proof_statuses() {
    let proof = vec![0xde, 0xad, 0xbe, 0xef];
    let encoded = base64::engine::general_purpose::STANDARD.encode(&proof);

    let cases: Vec<(serde_json::Value, Result<ProofResult, OracleError>)> = vec![
        (json!({"status": "pending"}), Ok(ProofResult::Pending)),
        (json!({"status": "generating"}), Ok(ProofResult::Pending)),
        (
            json!({"status": "complete", "proof": encoded}),
            Ok(ProofResult::Complete(proof.clone())),
        ),
        (
            json!({"status": "error", "error": "log not found"}),
            Ok(ProofResult::Failed("log not found".to_string())),
        ),
    ];

    for (body, expected) in cases {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "log_queryProof", "params": [7]})))
            .respond_with(query_response(body))
            .mount(&server)
            .await;
        assert_eq!(client(&server).poll_proof(7).await, expected);
    }
}

/// Test that a complete status without usable proof bytes is malformed
/// What is tested: Missing proof, bad base64 and unknown status
/// Why: Garbage responses must not be submitted as proofs
#[tokio::test]
async fn test_poll_proof_malformed() {
    for body in [
        json!({"status": "complete"}),
        json!({"status": "complete", "proof": "***"}),
        json!({"status": "exploded"}),
    ] {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(query_response(body))
            .mount(&server)
            .await;
        assert!(matches!(
            client(&server).poll_proof(7).await,
            Err(OracleError::Malformed(_))
        ));
    }
}

// ============================================================================
// AWAIT TESTS
// ============================================================================

/// Test that await_proof polls through pending until complete
/// What is tested: Request, pending polls, then completion
/// Why: Proof generation is slow; pending must not be terminal
#[tokio::test]
async fn test_await_proof_completes_after_pending() {
    let server = MockServer::start().await;
    mount_request_proof(&server, 9).await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "log_queryProof"})))
        .respond_with(query_response(json!({"status": "pending"})))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "log_queryProof"})))
        .respond_with(query_response(json!({"status": "complete", "proof": "AQID"})))
        .mount(&server)
        .await;

    let client = client(&server);
    let proof = client.await_proof(&locator(), &fast_polling(5)).await.unwrap();

    assert_eq!(proof, vec![1, 2, 3]);
    assert_eq!(client.in_flight().await, 0);
}

/// Test that an error status fails immediately
/// What is tested: ProofFailed after a single poll
/// Why: A failed proof job will never succeed; no further polls
#[tokio::test]
async fn test_await_proof_fails_fast_on_error_status() {
    let server = MockServer::start().await;
    mount_request_proof(&server, 11).await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "log_queryProof"})))
        .respond_with(query_response(json!({"status": "error", "error": "reorged"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let result = client.await_proof(&locator(), &fast_polling(10)).await;

    assert_eq!(
        result,
        Err(OracleError::ProofFailed {
            job_id: 11,
            reason: "reorged".to_string()
        })
    );
    assert_eq!(client.in_flight().await, 0);
}

/// Test that exhausting poll attempts yields ProofTimeout
/// What is tested: max_attempts bound on pending polls
/// Why: A stuck job must not hold a pipeline forever
#[tokio::test]
async fn test_await_proof_times_out() {
    let server = MockServer::start().await;
    mount_request_proof(&server, 12).await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "log_queryProof"})))
        .respond_with(query_response(json!({"status": "generating"})))
        .expect(3)
        .mount(&server)
        .await;

    let client = client(&server);
    let result = client.await_proof(&locator(), &fast_polling(3)).await;

    assert_eq!(result, Err(OracleError::ProofTimeout { job_id: 12, attempts: 3 }));
    assert_eq!(client.in_flight().await, 0);
}

/// Test that a failing poll consumes an attempt but polling continues
/// What is tested: Unavailable during polling followed by completion
/// Why: Transient oracle hiccups must not abandon a nearly finished job
#[tokio::test]
async fn test_await_proof_survives_failed_poll() {
    let server = MockServer::start().await;
    mount_request_proof(&server, 13).await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "log_queryProof"})))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "log_queryProof"})))
        .respond_with(query_response(json!({"status": "complete", "proof": "AQID"})))
        .mount(&server)
        .await;

    let recovering_client = client(&server);
    assert_eq!(
        recovering_client.await_proof(&locator(), &fast_polling(2)).await.unwrap(),
        vec![1, 2, 3]
    );

    // With a single attempt the failed poll is the last one
    let server = MockServer::start().await;
    mount_request_proof(&server, 14).await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "log_queryProof"})))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;
    let client = client(&server);
    assert_eq!(
        client.await_proof(&locator(), &fast_polling(1)).await,
        Err(OracleError::ProofTimeout { job_id: 14, attempts: 1 })
    );
}
