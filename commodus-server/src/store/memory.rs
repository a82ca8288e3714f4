//! In-memory implementation of `LedgerStore`.
//!
//! All records are lost on restart.

use std::collections::HashMap;

use async_trait::async_trait;
use commodus_core::{ApprovalRecord, RevisionHash, RevisionKey};
use tokio::sync::RwLock;

use super::{LedgerStore, StoreError};

/// Records grouped by proposal, then by revision.
pub struct InMemoryStore {
    records: RwLock<HashMap<RevisionKey, HashMap<RevisionHash, ApprovalRecord>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn get(
        &self,
        key: &RevisionKey,
        revision_hash: &RevisionHash,
    ) -> Result<Option<ApprovalRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .get(key)
            .and_then(|revisions| revisions.get(revision_hash))
            .cloned())
    }

    async fn put(&self, key: &RevisionKey, record: ApprovalRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        records
            .entry(key.clone())
            .or_default()
            .insert(record.revision_hash.clone(), record);
        Ok(())
    }

    async fn delete_all(&self, key: &RevisionKey) -> Result<usize, StoreError> {
        let mut records = self.records.write().await;
        Ok(records.remove(key).map(|revisions| revisions.len()).unwrap_or(0))
    }

    async fn get_all(&self) -> Result<Vec<(RevisionKey, ApprovalRecord)>, StoreError> {
        let records = self.records.read().await;
        let mut all: Vec<(RevisionKey, ApprovalRecord)> = records
            .iter()
            .flat_map(|(key, revisions)| {
                revisions
                    .values()
                    .map(move |record| (key.clone(), record.clone()))
            })
            .collect();
        all.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| a.1.revision_hash.cmp(&b.1.revision_hash))
        });
        Ok(all)
    }
}
