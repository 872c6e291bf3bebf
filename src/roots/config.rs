//! Roots file
//!
//! One TOML table per root under `[roots.<label>]`. Relative key, certificate
//! and audit paths resolve against the directory holding the file.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::db::schemas::AUDIT_COLLECTION;
use crate::policy::PolicyConfig;
use crate::types::{CaError, Result};

/// Parsed roots file
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RootsConfig {
    #[serde(default)]
    pub roots: BTreeMap<String, RootEntry>,

    /// Directory relative paths resolve against
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// One root as written in the roots file
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RootEntry {
    /// PKCS#8 (or SEC1 / PKCS#1) PEM private key
    pub private_key: PathBuf,

    /// Issuing certificate, PEM
    pub certificate: PathBuf,

    /// Permitted caller ranges; absent means any caller
    #[serde(default)]
    pub acl: Option<Vec<String>>,

    /// Hex HMAC key for authenticated signing
    #[serde(default)]
    pub auth_key: Option<String>,

    /// Also audit rejected requests
    #[serde(default)]
    pub audit_denials: bool,

    /// Longest an audit write may delay a response (humantime, default "5s")
    #[serde(default)]
    pub audit_timeout: Option<String>,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub audit: Option<AuditTarget>,
}

/// Where a root's audit records go
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AuditTarget {
    /// In-process only, lost on restart
    Memory,
    /// JSONL file
    File { path: PathBuf },
    /// MongoDB collection
    Mongodb {
        uri: String,
        #[serde(default = "default_database")]
        database: String,
        #[serde(default = "default_collection")]
        collection: String,
    },
}

fn default_database() -> String {
    "multirootca".to_string()
}

fn default_collection() -> String {
    AUDIT_COLLECTION.to_string()
}

impl RootsConfig {
    /// Read and parse a roots file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CaError::Config(format!("cannot read roots file {}: {}", path.display(), e)))?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self::from_toml(&contents, base_dir)
    }

    /// Parse roots from TOML text
    pub fn from_toml(contents: &str, base_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut config: RootsConfig = toml::from_str(contents)?;
        config.base_dir = base_dir.into();

        if config.roots.is_empty() {
            return Err(CaError::Config("roots file declares no roots".to_string()));
        }
        if let Some(label) = config.roots.keys().find(|l| l.trim().is_empty()) {
            return Err(CaError::Config(format!("invalid root label '{}'", label)));
        }
        Ok(config)
    }

    /// Resolve a path from the roots file
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}
