//! multirootca - multi-root certificate authority signing service
//!
//! Holds several independent CA identities ("roots"), each with its own key,
//! issuing certificate, signing policy, optional caller whitelist and
//! optional audit store, and signs certificate requests against them over
//! HTTP.
//!
//! ## Request path
//!
//! - **roots**: registry built once at startup from the roots file
//! - **routes::authsign**: resolves the label, checks the ACL and token
//! - **signer**: verifies the CSR, applies the policy, issues
//! - **audit**: records what was issued (memory, JSONL file or MongoDB)

pub mod acl;
pub mod audit;
pub mod auth;
pub mod config;
pub mod db;
pub mod logging;
pub mod policy;
pub mod roots;
pub mod routes;
pub mod server;
pub mod signer;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{CaError, Result};
