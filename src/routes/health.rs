//! Health check endpoint
//!
//! Liveness only: the registry is built before the listener binds, so a
//! running process always has at least one root.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::server::AppState;

use super::envelope::json_response;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: &'static str,
    /// Uptime in seconds
    pub uptime: u64,
    /// Loaded root labels
    pub roots: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_label: Option<String>,
    /// Signing requests currently being processed
    pub in_flight: usize,
}

pub fn health_check(state: &AppState) -> Response<Full<Bytes>> {
    let in_flight = state
        .args
        .max_in_flight
        .saturating_sub(state.admission.available_permits());
    let body = HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        roots: state.registry.labels().into_iter().map(String::from).collect(),
        default_label: state.args.default_label().map(String::from),
        in_flight,
    };
    json_response(StatusCode::OK, &body)
}
