//! Status API structures and handlers

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use warp::{
    http::{Method, StatusCode},
    Filter, Rejection, Reply,
};

use crate::config::ApiConfig;
use crate::monitor::SeenEvents;
use crate::relay::{Dispatcher, DispatcherStats};

// ============================================================================
// SHARED REQUEST/RESPONSE STRUCTURES
// ============================================================================

/// Standardized response structure for all API endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the request was successful
    pub success: bool,
    /// Response data (if successful)
    pub data: Option<T>,
    /// Error message (if failed)
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Body of `GET /stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    #[serde(flatten)]
    pub dispatcher: DispatcherStats,
    /// Events delivered by the watchers (including journal-loaded ones)
    pub delivered_events: usize,
}

// ============================================================================
// HANDLERS
// ============================================================================

pub async fn get_tasks_handler(dispatcher: Arc<Dispatcher>) -> Result<impl Reply, Rejection> {
    let history = dispatcher.history().await;
    Ok(warp::reply::json(&ApiResponse::ok(history)))
}

pub async fn get_stats_handler(
    dispatcher: Arc<Dispatcher>,
    seen: Arc<SeenEvents>,
) -> Result<impl Reply, Rejection> {
    let report = StatusReport {
        dispatcher: dispatcher.stats().await,
        delivered_events: seen.len().await,
    };
    Ok(warp::reply::json(&ApiResponse::ok(report)))
}

fn with_dispatcher(
    dispatcher: Arc<Dispatcher>,
) -> impl Filter<Extract = (Arc<Dispatcher>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || dispatcher.clone())
}

fn with_seen(
    seen: Arc<SeenEvents>,
) -> impl Filter<Extract = (Arc<SeenEvents>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || seen.clone())
}

// ============================================================================
// CORS CONFIGURATION
// ============================================================================

/// Creates a CORS filter based on the configured allowed origins.
fn create_cors_filter(allowed_origins: &[String]) -> warp::cors::Builder {
    let methods = vec![Method::GET, Method::OPTIONS];

    if allowed_origins.iter().any(|o| o == "*") {
        warp::cors()
            .allow_any_origin()
            .allow_methods(methods)
            .allow_headers(vec!["content-type"])
    } else {
        let origins: Vec<&str> = allowed_origins.iter().map(|s| s.as_str()).collect();
        warp::cors()
            .allow_origins(origins)
            .allow_methods(methods)
            .allow_headers(vec!["content-type"])
    }
}

// ============================================================================
// REJECTION HANDLER
// ============================================================================

/// Converts warp rejections into `ApiResponse` errors.
pub async fn handle_rejection(rej: Rejection) -> Result<impl Reply, std::convert::Infallible> {
    let (status, message) = if rej.is_not_found() {
        (StatusCode::NOT_FOUND, "Endpoint not found".to_string())
    } else if rej.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else {
        error!("Unhandled rejection: {:?}", rej);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(message),
        }),
        status,
    ))
}

// ============================================================================
// API SERVER IMPLEMENTATION
// ============================================================================

/// Read-only status API for the relayer.
pub struct ApiServer {
    config: ApiConfig,
    dispatcher: Arc<Dispatcher>,
    seen: Arc<SeenEvents>,
}

impl ApiServer {
    pub fn new(config: ApiConfig, dispatcher: Arc<Dispatcher>, seen: Arc<SeenEvents>) -> Self {
        Self {
            config,
            dispatcher,
            seen,
        }
    }

    /// Serves until the process exits.
    pub async fn run(&self) -> Result<()> {
        info!("Starting API server on {}:{}", self.config.host, self.config.port);

        let routes = self.create_routes();
        let addr: std::net::SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .context("Failed to parse API server address")?;

        warp::serve(routes).run(addr).await;
        Ok(())
    }

    pub(crate) fn create_routes(
        &self,
    ) -> impl Filter<Extract = impl Reply, Error = std::convert::Infallible> + Clone {
        let health = warp::path("health").and(warp::get()).map(|| {
            warp::reply::json(&ApiResponse::ok("State sync relayer is running".to_string()))
        });

        let tasks = warp::path("tasks")
            .and(warp::get())
            .and(with_dispatcher(self.dispatcher.clone()))
            .and_then(get_tasks_handler);

        let stats = warp::path("stats")
            .and(warp::get())
            .and(with_dispatcher(self.dispatcher.clone()))
            .and(with_seen(self.seen.clone()))
            .and_then(get_stats_handler);

        health
            .or(tasks)
            .or(stats)
            .with(create_cors_filter(&self.config.cors_origins))
            .recover(handle_rejection)
    }

    /// Exposes the routes for integration tests.
    pub fn test_routes(&self) -> impl Filter<Extract = impl Reply, Error = std::convert::Infallible> + Clone {
        self.create_routes()
    }
}
