//! MongoDB audit store

use async_trait::async_trait;

use super::{AuditRecord, AuditStore};
use crate::db::schemas::AuditDoc;
use crate::db::{MongoClient, MongoCollection};
use crate::types::Result;

/// Audit store writing one document per record
#[derive(Clone)]
pub struct MongoAuditStore {
    collection: MongoCollection<AuditDoc>,
    db_name: String,
}

impl MongoAuditStore {
    /// Open the collection and ensure its indexes exist
    pub async fn open(client: &MongoClient, collection: &str) -> Result<Self> {
        let collection = client.collection::<AuditDoc>(collection).await?;
        Ok(Self {
            collection,
            db_name: client.db_name().to_string(),
        })
    }
}

#[async_trait]
impl AuditStore for MongoAuditStore {
    async fn record(&self, record: &AuditRecord) -> Result<()> {
        self.collection.insert_one(&AuditDoc::from(record)).await
    }

    fn describe(&self) -> String {
        format!("mongodb:{}.{}", self.db_name, self.collection.name())
    }
}
