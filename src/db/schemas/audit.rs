//! Audit record document schema
//!
//! One document per issued certificate, plus one per denial when the root
//! audits denials. Serials are unique per root; denials carry no serial and
//! are left out of that index.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::audit::{AuditOutcome, AuditRecord};
use crate::db::mongo::IntoIndexes;

/// Default collection name for audit records
pub const AUDIT_COLLECTION: &str = "issued_certificates";

/// Audit record stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuditDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Record UUID
    pub record_id: String,

    pub outcome: AuditOutcome,

    /// Hex serial; absent for denials
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,

    /// Root label
    pub label: String,

    pub issued_at: DateTime,

    pub requester_address: String,

    pub csr_fingerprint: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_after: Option<DateTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<&AuditRecord> for AuditDoc {
    fn from(record: &AuditRecord) -> Self {
        Self {
            _id: None,
            record_id: record.id.to_string(),
            outcome: record.outcome,
            serial: record.serial.clone(),
            label: record.label.clone(),
            issued_at: DateTime::from_chrono(record.issued_at),
            requester_address: record.requester_address.clone(),
            csr_fingerprint: record.csr_fingerprint.clone(),
            not_before: record.not_before.map(DateTime::from_chrono),
            not_after: record.not_after.map(DateTime::from_chrono),
            reason: record.reason.clone(),
        }
    }
}

impl IntoIndexes for AuditDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Serial uniqueness per root
            (
                doc! { "label": 1, "serial": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .partial_filter_expression(doc! { "serial": { "$exists": true } })
                        .name("label_serial_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "issued_at": -1 },
                Some(
                    IndexOptions::builder()
                        .name("issued_at_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "csr_fingerprint": 1 },
                Some(
                    IndexOptions::builder()
                        .name("csr_fingerprint_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    #[test]
    fn test_denial_doc_omits_serial() {
        let addr: IpAddr = "10.0.0.1".parse().unwrap();
        let record = AuditRecord::denied("primary", addr, "ab".into(), "unauthorized");
        let doc = bson::to_document(&AuditDoc::from(&record)).unwrap();
        assert!(!doc.contains_key("serial"));
        assert!(!doc.contains_key("_id"));
        assert_eq!(doc.get_str("outcome").unwrap(), "denied");
    }

    #[test]
    fn test_issued_doc_keeps_validity() {
        let addr: IpAddr = "10.0.0.1".parse().unwrap();
        let now = chrono::Utc::now();
        let record = AuditRecord::issued("primary", "0f".into(), addr, "ab".into())
            .with_validity(now, now + chrono::Duration::days(1));
        let doc = AuditDoc::from(&record);
        assert_eq!(doc.serial.as_deref(), Some("0f"));
        assert!(doc.not_before.unwrap() < doc.not_after.unwrap());
        assert_eq!(doc.record_id, record.id.to_string());
    }

    #[test]
    fn test_unique_serial_index() {
        let indices = AuditDoc::into_indices();
        let (keys, opts) = &indices[0];
        assert!(keys.contains_key("label"));
        assert!(keys.contains_key("serial"));
        assert_eq!(opts.as_ref().unwrap().unique, Some(true));
    }
}
