//! Certificate issuance for one root
//!
//! `csr` turns a PEM request into what policy evaluates; `service` holds the
//! per-root `Signer` that applies the policy and produces the certificate.

pub mod csr;
pub mod service;

pub use csr::{fingerprint, parse_csr, request_fingerprint, ParsedCsr, SubjectFields};
pub use service::{
    AuditSink, Issued, KeyFamily, ProfileOverrides, Signed, Signer, SigningRequest,
    DEFAULT_AUDIT_TIMEOUT,
};
