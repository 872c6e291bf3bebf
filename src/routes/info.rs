//! Root information endpoint
//!
//! `GET|POST /api/v1/cfssl/info` returns the issuing certificate and policy
//! summary of one root. Read-only and not subject to root ACLs.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::server::AppState;
use crate::types::{CaError, Result};

use super::envelope::{error_response, json_response, Envelope};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InfoRequest {
    #[serde(default)]
    pub label: String,
}

/// `result` of an info call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InfoResult {
    pub certificate: String,
    pub usages: Vec<String>,
    pub ext_usages: Vec<String>,
    /// humantime rendering, e.g. "90days"
    pub max_validity: String,
}

/// `GET` with `?label=...`
pub fn handle_query(state: &AppState, query: &str) -> Response<Full<Bytes>> {
    let request = match parse_query(query) {
        Ok(request) => request,
        Err(e) => return error_response(&e),
    };
    respond(lookup(state, &request))
}

/// `POST` with a JSON body; an empty body selects the default label
pub fn handle_body(state: &AppState, body: &[u8]) -> Response<Full<Bytes>> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        InfoRequest::default()
    } else {
        match serde_json::from_slice::<InfoRequest>(body) {
            Ok(request) => request,
            Err(e) => return error_response(&CaError::from(e)),
        }
    };
    respond(lookup(state, &request))
}

fn respond(result: Result<InfoResult>) -> Response<Full<Bytes>> {
    match result {
        Ok(info) => json_response(StatusCode::OK, &Envelope::success(info)),
        Err(e) => error_response(&e),
    }
}

/// Describe the requested root
pub fn lookup(state: &AppState, request: &InfoRequest) -> Result<InfoResult> {
    let label = if request.label.is_empty() {
        state.args.default_label().ok_or_else(|| {
            CaError::UnknownLabel("no label given and no default label configured".to_string())
        })?
    } else {
        request.label.as_str()
    };
    let root = state
        .registry
        .lookup(label)
        .ok_or_else(|| CaError::UnknownLabel(format!("'{}'", label)))?;

    let policy = root.policy();
    Ok(InfoResult {
        certificate: root.signer.certificate_pem().to_string(),
        usages: policy.key_usages().map(|u| u.to_string()).collect(),
        ext_usages: policy.ext_key_usages().map(|u| u.to_string()).collect(),
        max_validity: humantime::format_duration(policy.max_validity()).to_string(),
    })
}

fn parse_query(query: &str) -> Result<InfoRequest> {
    let mut request = InfoRequest::default();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if key == "label" {
            // form encoding: '+' is a space, '%2B' a literal plus
            let value = value.replace('+', " ");
            request.label = urlencoding::decode(&value)
                .map_err(|e| CaError::MalformedRequest(format!("invalid label encoding: {}", e)))?
                .into_owned();
        }
    }
    Ok(request)
}
