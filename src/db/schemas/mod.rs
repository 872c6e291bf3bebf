//! MongoDB document schemas

mod audit;

pub use audit::{AuditDoc, AUDIT_COLLECTION};
