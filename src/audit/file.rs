//! JSONL file audit store
//!
//! One JSON object per line, appended and flushed per record. Appends from
//! concurrent requests are serialised by a per-file mutex.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

use super::{AuditRecord, AuditStore};
use crate::types::{CaError, Result};

/// Audit store appending to a JSONL file
#[derive(Clone)]
pub struct FileAuditStore {
    inner: Arc<Mutex<File>>,
    path: PathBuf,
}

impl FileAuditStore {
    /// Open (or create) the audit file for appending
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    CaError::Config(format!("cannot create audit directory {}: {}", parent.display(), e))
                })?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| CaError::Config(format!("cannot open audit file {}: {}", path.display(), e)))?;

        info!("Audit logging initialized to {}", path.display());
        Ok(Self {
            inner: Arc::new(Mutex::new(file)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditStore for FileAuditStore {
    async fn record(&self, record: &AuditRecord) -> Result<()> {
        let mut line = record
            .to_jsonl()
            .map_err(|e| CaError::Persistence(format!("cannot serialize audit record: {}", e)))?;
        line.push('\n');

        let mut file = self.inner.lock().await;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| CaError::Persistence(format!("write to {} failed: {}", self.path.display(), e)))?;
        file.flush()
            .await
            .map_err(|e| CaError::Persistence(format!("flush of {} failed: {}", self.path.display(), e)))?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}
