//! Ledger access serialized per proposal.
//!
//! Every read-modify-write of a proposal's records happens while holding that
//! proposal's lock, so two comments arriving at once for the same pull request
//! cannot both read the old count and lose one of the updates. Different
//! proposals never contend.

use std::collections::HashMap;
use std::sync::Arc;

use commodus_core::{ApprovalRecord, RevisionHash, RevisionKey};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::store::{LedgerStore, StoreError};

pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    locks: RwLock<HashMap<RevisionKey, Arc<Mutex<()>>>>,
}

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            locks: RwLock::new(HashMap::new()),
        }
    }

    async fn get_or_create_lock(&self, key: &RevisionKey) -> Arc<Mutex<()>> {
        // Fast path: check if lock already exists
        {
            let locks = self.locks.read().await;
            if let Some(lock) = locks.get(key) {
                return lock.clone();
            }
        }

        // Slow path: create lock (double-check after acquiring write lock)
        let mut locks = self.locks.write().await;
        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire exclusive access to one proposal's records.
    pub async fn lock(&self, key: &RevisionKey) -> ProposalGuard<'_> {
        let lock = self.get_or_create_lock(key).await;
        let guard = lock.lock_owned().await;
        ProposalGuard {
            ledger: self,
            key: key.clone(),
            _guard: guard,
        }
    }

    /// Unlocked read, for callers that only observe.
    pub async fn lookup(
        &self,
        key: &RevisionKey,
        revision_hash: &RevisionHash,
    ) -> Result<Option<ApprovalRecord>, StoreError> {
        self.store.get(key, revision_hash).await
    }

    pub async fn all(&self) -> Result<Vec<(RevisionKey, ApprovalRecord)>, StoreError> {
        self.store.get_all().await
    }

    #[cfg(test)]
    pub(crate) async fn tracked_locks(&self) -> usize {
        self.locks.read().await.len()
    }
}

/// Exclusive handle on one proposal's records; released on drop.
pub struct ProposalGuard<'a> {
    ledger: &'a Ledger,
    key: RevisionKey,
    _guard: OwnedMutexGuard<()>,
}

impl ProposalGuard<'_> {
    pub fn key(&self) -> &RevisionKey {
        &self.key
    }

    pub async fn get(
        &self,
        revision_hash: &RevisionHash,
    ) -> Result<Option<ApprovalRecord>, StoreError> {
        self.ledger.store.get(&self.key, revision_hash).await
    }

    pub async fn put(&self, record: ApprovalRecord) -> Result<(), StoreError> {
        self.ledger.store.put(&self.key, record).await
    }

    /// Delete all of the proposal's records and forget its lock if no one
    /// else is waiting for it.
    pub async fn delete_all(self) -> Result<usize, StoreError> {
        let removed = self.ledger.store.delete_all(&self.key).await?;
        self.release().await;
        Ok(removed)
    }

    /// Release the lock, dropping its map entry when no other task holds a
    /// handle to it. Used when the proposal turns out to have no records.
    pub async fn release(self) {
        let mut locks = self.ledger.locks.write().await;
        // One reference in the map, one in our own guard. Anything more is a
        // task queued in `lock`, which must keep contending on this mutex.
        let idle = locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) <= 2);
        if idle {
            locks.remove(&self.key);
        }
    }
}
