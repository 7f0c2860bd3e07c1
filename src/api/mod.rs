//! REST API Server Module
//!
//! Read-only status endpoints: service health, recent task outcomes and
//! aggregate relay counters.

mod generic;

pub use generic::{ApiResponse, ApiServer, StatusReport};
