//! Root registry
//!
//! Built once before the listener binds, then only read. Lookups are plain
//! map reads with no locking.

use rcgen::KeyPair;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use super::config::{AuditTarget, RootEntry, RootsConfig};
use crate::acl::AccessControl;
use crate::audit::{AuditStore, FileAuditStore, MemoryAuditStore, MongoAuditStore};
use crate::db::MongoClient;
use crate::policy::{parse_duration, Policy};
use crate::signer::{AuditSink, Signer};
use crate::types::{CaError, Result};

/// One loaded CA identity
#[derive(Clone)]
pub struct Root {
    pub signer: Signer,
    pub acl: Option<AccessControl>,
    /// HMAC key for authenticated signing
    pub auth_key: Option<Vec<u8>>,
}

impl Root {
    pub fn label(&self) -> &str {
        self.signer.label()
    }

    pub fn policy(&self) -> &Arc<Policy> {
        self.signer.policy()
    }
}

impl fmt::Debug for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Root")
            .field("signer", &self.signer)
            .field("acl", &self.acl)
            .field("authenticated", &self.auth_key.is_some())
            .finish()
    }
}

/// How strictly to treat the roots file
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Leave out roots that fail to load instead of aborting
    pub skip_invalid: bool,
    /// Treat a root without ACL as a configuration error
    pub require_acl: bool,
}

/// Immutable label to root mapping
#[derive(Debug, Clone, Default)]
pub struct RootRegistry {
    roots: BTreeMap<String, Root>,
}

impl RootRegistry {
    /// Load every configured root.
    ///
    /// Roots are processed in label order. The first failure aborts unless
    /// `skip_invalid` is set; an empty result is always an error.
    pub async fn build(config: &RootsConfig, options: &BuildOptions) -> Result<Self> {
        let mut mongo_clients: HashMap<(String, String), MongoClient> = HashMap::new();
        let mut roots = BTreeMap::new();

        for (label, entry) in &config.roots {
            match load_root(label, entry, config, options, &mut mongo_clients).await {
                Ok(root) => {
                    info!(
                        label = %label,
                        family = %root.signer.family(),
                        acl = %root.acl.as_ref().map(ToString::to_string).unwrap_or_else(|| "none".to_string()),
                        audit = %root.signer.audit_target().unwrap_or_else(|| "none".to_string()),
                        authenticated = root.auth_key.is_some(),
                        "Loaded root"
                    );
                    roots.insert(label.clone(), root);
                }
                Err(e) if options.skip_invalid => {
                    warn!(label = %label, error = %e, "Skipping root that failed to load");
                }
                Err(e) => return Err(e),
            }
        }

        if roots.is_empty() {
            return Err(CaError::Config("no usable roots".to_string()));
        }
        Ok(Self { roots })
    }

    /// Assemble a registry from already loaded roots
    pub fn from_roots(roots: impl IntoIterator<Item = Root>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for root in roots {
            let label = root.label().to_string();
            if map.insert(label.clone(), root).is_some() {
                return Err(CaError::Config(format!("duplicate root label '{}'", label)));
            }
        }
        Ok(Self { roots: map })
    }

    pub fn lookup(&self, label: &str) -> Option<&Root> {
        self.roots.get(label)
    }

    /// Labels in sorted order
    pub fn labels(&self) -> Vec<&str> {
        self.roots.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

async fn load_root(
    label: &str,
    entry: &RootEntry,
    config: &RootsConfig,
    options: &BuildOptions,
    mongo_clients: &mut HashMap<(String, String), MongoClient>,
) -> Result<Root> {
    let acl = match entry.acl {
        Some(ref entries) => {
            let acl = AccessControl::parse(entries)
                .map_err(|e| CaError::Config(format!("root '{}': {}", label, e)))?;
            if acl.is_empty() {
                warn!(label = %label, "Root has an empty ACL; every request will be refused");
            }
            Some(acl)
        }
        None if options.require_acl => {
            return Err(CaError::Config(format!(
                "root '{}' has no ACL and --require-acl is set",
                label
            )));
        }
        None => {
            warn!(label = %label, "Root has no ACL; any caller may request certificates");
            None
        }
    };

    let auth_key = entry
        .auth_key
        .as_deref()
        .map(|k| {
            hex::decode(k.trim())
                .map_err(|e| CaError::Config(format!("root '{}': auth_key is not hex: {}", label, e)))
        })
        .transpose()?;
    if matches!(auth_key, Some(ref k) if k.is_empty()) {
        return Err(CaError::Config(format!("root '{}': auth_key is empty", label)));
    }

    let policy = Policy::try_from(&entry.policy)
        .map_err(|e| CaError::Config(format!("root '{}': {}", label, e)))?;

    let key_path = config.resolve(&entry.private_key);
    let key_pem = tokio::fs::read_to_string(&key_path).await.map_err(|e| {
        CaError::Config(format!(
            "root '{}': cannot read private key {}: {}",
            label,
            key_path.display(),
            e
        ))
    })?;
    let key = KeyPair::from_pem(&key_pem).map_err(|e| match e {
        rcgen::Error::UnsupportedSignatureAlgorithm => CaError::UnsupportedKeyType {
            label: label.to_string(),
            algorithm: "unrecognised".to_string(),
        },
        other => CaError::Config(format!("root '{}': cannot load private key: {}", label, other)),
    })?;

    let cert_path = config.resolve(&entry.certificate);
    let cert_pem = tokio::fs::read_to_string(&cert_path).await.map_err(|e| {
        CaError::Config(format!(
            "root '{}': cannot read certificate {}: {}",
            label,
            cert_path.display(),
            e
        ))
    })?;

    let audit = match entry.audit {
        Some(ref target) => {
            let mut sink = AuditSink::new(
                open_store(label, target, config, mongo_clients).await?,
                entry.audit_denials,
            );
            if let Some(ref timeout) = entry.audit_timeout {
                sink.write_timeout = parse_duration("audit_timeout", timeout)
                    .map_err(|e| CaError::Config(format!("root '{}': {}", label, e)))?;
                if sink.write_timeout.is_zero() {
                    return Err(CaError::Config(format!(
                        "root '{}': audit_timeout must be positive",
                        label
                    )));
                }
            }
            Some(sink)
        }
        None => {
            if entry.audit_denials {
                warn!(label = %label, "audit_denials set without an audit store; ignored");
            }
            None
        }
    };

    let signer = Signer::new(label, key, &cert_pem, Arc::new(policy), audit)?;

    Ok(Root {
        signer,
        acl,
        auth_key,
    })
}

async fn open_store(
    label: &str,
    target: &AuditTarget,
    config: &RootsConfig,
    mongo_clients: &mut HashMap<(String, String), MongoClient>,
) -> Result<Arc<dyn AuditStore>> {
    let store: Arc<dyn AuditStore> = match target {
        AuditTarget::Memory => Arc::new(MemoryAuditStore::new()),
        AuditTarget::File { path } => Arc::new(FileAuditStore::open(config.resolve(path)).await?),
        AuditTarget::Mongodb {
            uri,
            database,
            collection,
        } => {
            let key = (uri.clone(), database.clone());
            let client = match mongo_clients.get(&key) {
                Some(client) => client.clone(),
                None => {
                    let client = MongoClient::new(uri, database).await.map_err(|e| {
                        CaError::Config(format!("root '{}': audit database unavailable: {}", label, e))
                    })?;
                    mongo_clients.insert(key, client.clone());
                    client
                }
            };
            Arc::new(MongoAuditStore::open(&client, collection).await?)
        }
    };
    Ok(store)
}
