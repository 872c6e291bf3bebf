//! Authenticated signing endpoint
//!
//! `POST /api/v1/cfssl/authsign`. Each request moves through
//! `received -> label resolved -> authorized -> signed -> responded`; any
//! stage before `signed` may reject it. Access control and token checks run
//! strictly before any cryptographic work.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::acl;
use crate::auth;
use crate::server::AppState;
use crate::signer::{ProfileOverrides, Signed, SigningRequest};
use crate::types::{CaError, Result};

use super::envelope::{json_response, Envelope};

/// Request body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthSignRequest {
    /// Root label; empty selects the default label
    #[serde(default)]
    pub label: String,

    /// PEM certificate request
    pub request: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_overrides: Option<ProfileOverrides>,

    /// base64 HMAC, required by roots with an auth key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// `result` of a successful signing call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignResult {
    pub certificate: String,
}

/// HTTP entry point
pub async fn handle(state: &AppState, peer: IpAddr, body: &[u8]) -> Response<Full<Bytes>> {
    let (status, envelope) = dispatch(state, peer, body).await;
    json_response(status, &envelope)
}

/// Run one signing call end to end and produce exactly one envelope
pub async fn dispatch(state: &AppState, peer: IpAddr, body: &[u8]) -> (StatusCode, Envelope) {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("authsign", %request_id, %peer);

    async move {
        debug!("Received");
        match authsign(state, peer, body).await {
            Ok(signed) => {
                let mut envelope = Envelope::success(SignResult {
                    certificate: signed.issued.certificate_pem,
                });
                if let Some(ref e) = signed.persistence_error {
                    envelope = envelope.with_message(e);
                }
                debug!("Responded");
                (StatusCode::OK, envelope)
            }
            Err(e) => {
                match e {
                    CaError::SigningFailure(_) | CaError::Internal(_) | CaError::Overloaded(_) => {
                        warn!(kind = e.kind(), error = %e, "Rejected")
                    }
                    _ => info!(kind = e.kind(), error = %e, "Rejected"),
                }
                (e.status_code(), Envelope::failure(&e))
            }
        }
    }
    .instrument(span)
    .await
}

async fn authsign(state: &AppState, peer: IpAddr, body: &[u8]) -> Result<Signed> {
    let _permit = state
        .admission
        .try_acquire()
        .map_err(|_| CaError::Overloaded("too many signing requests in flight".to_string()))?;

    let request: AuthSignRequest = serde_json::from_slice(body)?;
    if request.request.trim().is_empty() {
        return Err(CaError::MalformedRequest(
            "missing certificate request".to_string(),
        ));
    }

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
    debug!(label = %label, "Label resolved");

    if !acl::is_permitted(root.acl.as_ref(), peer) {
        let err = CaError::Unauthorized(format!("{} may not use root '{}'", peer, label));
        root.signer.record_denial(peer, &request.request, &err).await;
        return Err(err);
    }

    if let Some(ref key) = root.auth_key {
        if let Err(err) = auth::verify_token(
            key,
            &request.request,
            request.profile_overrides.as_ref(),
            request.token.as_deref(),
        ) {
            root.signer.record_denial(peer, &request.request, &err).await;
            return Err(err);
        }
    }
    debug!(label = %label, "Authorized");

    let signed = root
        .signer
        .sign(SigningRequest {
            csr: request.request,
            overrides: request.profile_overrides.unwrap_or_default(),
            remote_address: peer,
        })
        .await?;
    debug!(label = %label, serial = %signed.issued.serial, "Signed");
    Ok(signed)
}
