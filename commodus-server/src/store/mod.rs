//! Ledger persistence.
//!
//! `LedgerStore` abstracts storage of approval records so that the lifecycle
//! manager does not care whether records live in memory or in SQLite.
//! Implementations do not serialize read-modify-write sequences themselves;
//! `crate::ledger::Ledger` holds a per-proposal lock around them.

mod memory;
mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use commodus_core::{ApprovalRecord, RevisionHash, RevisionKey};
use thiserror::Error;

/// Errors from ledger storage. Always retryable from the caller's view.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("ledger storage failed during {operation}: {message}")]
    Storage { operation: String, message: String },

    #[error("corrupt ledger data: {0}")]
    Corruption(String),
}

impl StoreError {
    pub fn storage(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn corruption(what: impl Into<String>) -> Self {
        Self::Corruption(what.into())
    }
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Record for one revision of a proposal, or `None` if not tracked.
    async fn get(
        &self,
        key: &RevisionKey,
        revision_hash: &RevisionHash,
    ) -> Result<Option<ApprovalRecord>, StoreError>;

    /// Store a record (upsert on `(key, record.revision_hash)`).
    async fn put(&self, key: &RevisionKey, record: ApprovalRecord) -> Result<(), StoreError>;

    /// Delete every revision tracked under `key`. Returns how many were removed.
    async fn delete_all(&self, key: &RevisionKey) -> Result<usize, StoreError>;

    /// Every tracked record, for the status endpoint and the CLI.
    async fn get_all(&self) -> Result<Vec<(RevisionKey, ApprovalRecord)>, StoreError>;
}
