//! Root configuration and the registry built from it

pub mod config;
pub mod registry;

pub use config::{AuditTarget, RootEntry, RootsConfig};
pub use registry::{BuildOptions, Root, RootRegistry};
