//! Issuance audit trail
//!
//! Every successful issuance produces one [`AuditRecord`]. Roots that opt in
//! with `audit_denials` also get a record for each rejected request. Stores
//! are append-only and shared by all concurrent requests for a root, so
//! implementations must be `Send + Sync` and tolerate concurrent appends.
//!
//! Persistence is best effort: a failed write is logged and reported to the
//! caller as a side condition, it never revokes a certificate that was
//! already signed.

pub mod file;
pub mod mongo;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::types::Result;

pub use file::FileAuditStore;
pub use mongo::MongoAuditStore;

/// Outcome recorded for a signing attempt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Issued,
    Denied,
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditOutcome::Issued => write!(f, "issued"),
            AuditOutcome::Denied => write!(f, "denied"),
        }
    }
}

/// One entry of the audit trail
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditRecord {
    /// Unique record identifier
    pub id: Uuid,
    pub outcome: AuditOutcome,
    /// Hex serial of the issued certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    pub label: String,
    /// When the certificate was issued (or the request was denied)
    pub issued_at: DateTime<Utc>,
    pub requester_address: String,
    /// SHA-256 of the request, hex
    pub csr_fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_after: Option<DateTime<Utc>>,
    /// Error kind for denials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditRecord {
    /// Record a successful issuance
    pub fn issued(label: &str, serial: String, requester: IpAddr, csr_fingerprint: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            outcome: AuditOutcome::Issued,
            serial: Some(serial),
            label: label.to_string(),
            issued_at: Utc::now(),
            requester_address: requester.to_string(),
            csr_fingerprint,
            not_before: None,
            not_after: None,
            reason: None,
        }
    }

    /// Record a rejected request
    pub fn denied(label: &str, requester: IpAddr, csr_fingerprint: String, reason: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            outcome: AuditOutcome::Denied,
            serial: None,
            label: label.to_string(),
            issued_at: Utc::now(),
            requester_address: requester.to_string(),
            csr_fingerprint,
            not_before: None,
            not_after: None,
            reason: Some(reason.to_string()),
        }
    }

    /// Set the validity window of the issued certificate
    pub fn with_validity(mut self, not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> Self {
        self.not_before = Some(not_before);
        self.not_after = Some(not_after);
        self
    }

    /// Convert to JSONL line
    pub fn to_jsonl(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Append-only audit persistence
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Persist one record
    async fn record(&self, record: &AuditRecord) -> Result<()>;

    /// Human-readable target, for startup logs
    fn describe(&self) -> String;
}

/// In-process audit store, for development and tests
#[derive(Default)]
pub struct MemoryAuditStore {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far
    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn record(&self, record: &AuditRecord) -> Result<()> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
