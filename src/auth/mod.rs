//! Authenticated signing tokens
//!
//! A root with an `auth_key` only signs requests that carry
//! `token = base64(HMAC-SHA256(auth_key, request || overrides))`, where
//! `overrides` is the compact JSON of the parsed `profile_overrides` (fields in
//! declaration order, unset fields omitted) and is left out entirely when the
//! request has none.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::signer::ProfileOverrides;
use crate::types::{CaError, Result};

type HmacSha256 = Hmac<Sha256>;

fn mac_for(key: &[u8], csr: &str, overrides: Option<&ProfileOverrides>) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| CaError::Internal(format!("invalid HMAC key: {}", e)))?;
    mac.update(csr.as_bytes());
    if let Some(overrides) = overrides {
        let encoded = serde_json::to_string(overrides)
            .map_err(|e| CaError::Internal(format!("cannot encode overrides: {}", e)))?;
        mac.update(encoded.as_bytes());
    }
    Ok(mac)
}

/// Compute the token a client must send
pub fn compute_token(key: &[u8], csr: &str, overrides: Option<&ProfileOverrides>) -> Result<String> {
    let mac = mac_for(key, csr, overrides)?;
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Check a presented token in constant time
pub fn verify_token(
    key: &[u8],
    csr: &str,
    overrides: Option<&ProfileOverrides>,
    token: Option<&str>,
) -> Result<()> {
    let token = token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| CaError::Unauthorized("request token required".to_string()))?;
    let tag = BASE64
        .decode(token)
        .map_err(|_| CaError::Unauthorized("request token is not base64".to_string()))?;

    mac_for(key, csr, overrides)?
        .verify_slice(&tag)
        .map_err(|_| CaError::Unauthorized("request token mismatch".to_string()))
}
