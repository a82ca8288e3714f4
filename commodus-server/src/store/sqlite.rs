//! SQLite implementation of `LedgerStore`.
//!
//! This provides persistent storage that survives service restarts.
//!
//! # Schema Versioning
//!
//! The database has a `schema_version` table that tracks the schema version.
//! When the schema needs to change, increment `CURRENT_SCHEMA_VERSION` and add
//! a migration in `run_migrations()`. Migrations run sequentially from the
//! current version to the target version.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use commodus_core::{ApprovalRecord, RevisionHash, RevisionKey, UserId};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;
use tracing::warn;

use super::{LedgerStore, StoreError};

/// Current schema version. Increment this when making schema changes and add
/// corresponding migration logic in `run_migrations()`.
pub(crate) const CURRENT_SCHEMA_VERSION: i64 = 1;

/// SQLite-backed ledger store.
///
/// Uses `tokio::task::spawn_blocking` to run synchronous rusqlite operations
/// without blocking the async runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

/// Raw column values of one `approval_records` row.
struct RecordRow {
    repo: String,
    pr_number: i64,
    revision_hash: String,
    approval_count: i64,
    creator_id: i64,
    voters_json: String,
}

impl RecordRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            repo: row.get(0)?,
            pr_number: row.get(1)?,
            revision_hash: row.get(2)?,
            approval_count: row.get(3)?,
            creator_id: row.get(4)?,
            voters_json: row.get(5)?,
        })
    }

    fn into_record(self) -> Result<(RevisionKey, ApprovalRecord), StoreError> {
        let pr_number = u64::try_from(self.pr_number)
            .map_err(|_| StoreError::corruption(format!("pr_number {}", self.pr_number)))?;
        let approval_count = u32::try_from(self.approval_count).map_err(|_| {
            StoreError::corruption(format!("approval_count {}", self.approval_count))
        })?;
        let creator_id = u64::try_from(self.creator_id)
            .map_err(|_| StoreError::corruption(format!("creator_id {}", self.creator_id)))?;
        let voters: BTreeSet<UserId> = serde_json::from_str(&self.voters_json)
            .map_err(|e| StoreError::corruption(format!("voters JSON: {}", e)))?;

        Ok((
            RevisionKey::new(self.repo, pr_number),
            ApprovalRecord {
                revision_hash: RevisionHash(self.revision_hash),
                approval_count,
                voters,
                creator_id: UserId(creator_id),
            },
        ))
    }
}

/// SQLite integers are signed; ids above `i64::MAX` cannot be stored.
fn sql_int(operation: &str, what: &str, value: u64) -> Result<i64, StoreError> {
    i64::try_from(value)
        .map_err(|_| StoreError::storage(operation, format!("{} {} out of range", what, value)))
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StoreError> {
    conn.lock()
        .map_err(|_| StoreError::storage("lock connection", "connection mutex poisoned"))
}

impl SqliteStore {
    /// Create a new SQLite store at the given path.
    ///
    /// Creates the database file and schema if they don't exist.
    /// Runs any pending migrations if the database exists but has an older schema.
    ///
    /// # Durability
    ///
    /// The database is configured with:
    /// - `journal_mode = WAL` for better concurrency and crash safety
    /// - `synchronous = FULL` for maximum durability
    /// - `busy_timeout = 5000ms` to handle concurrent access (e.g. the CLI) gracefully
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();

        // Ensure parent directory exists (unless it's :memory: or empty path)
        let path_str = path_ref.to_string_lossy();
        let is_in_memory = path_str == ":memory:";
        if !is_in_memory && !path_str.is_empty() {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        StoreError::storage(
                            "create database directory",
                            format!("{}: {}", parent.display(), e),
                        )
                    })?;
                }
            }
        }

        let conn = Connection::open(path_ref)
            .map_err(|e| StoreError::storage("open database", e.to_string()))?;

        #[cfg(unix)]
        if !is_in_memory && !path_str.is_empty() {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            if let Err(e) = std::fs::set_permissions(path_ref, permissions) {
                warn!(
                    "Failed to set restrictive permissions on database file: {}",
                    e
                );
            }
        }

        // SQLite can silently keep DELETE mode on filesystems without shared
        // memory support; in-memory databases report "memory".
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| StoreError::storage("set journal_mode", e.to_string()))?;

        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory"));

        if !journal_mode_ok {
            return Err(StoreError::storage(
                "configure journal_mode",
                format!(
                    "Failed to enable WAL mode: SQLite returned '{}' instead of 'wal'",
                    journal_mode
                ),
            ));
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            "#,
        )
        .map_err(|e| StoreError::storage("configure pragmas", e.to_string()))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| StoreError::storage("create schema_version table", e.to_string()))?;

        // 0 if table is empty = fresh database
        let current_version: i64 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::storage("get schema version", e.to_string()))?
            .unwrap_or(0);

        Self::run_migrations(&conn, current_version)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run migrations from `from_version` to `CURRENT_SCHEMA_VERSION`.
    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), StoreError> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(StoreError::storage(
                "schema version",
                format!(
                    "Database schema version {} is newer than supported version {}. \
                     Please upgrade the application.",
                    from_version, CURRENT_SCHEMA_VERSION
                ),
            ));
        }

        if from_version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS approval_records (
                    repo TEXT NOT NULL,
                    pr_number INTEGER NOT NULL,
                    revision_hash TEXT NOT NULL,
                    approval_count INTEGER NOT NULL CHECK (approval_count >= 0),
                    creator_id INTEGER NOT NULL,
                    voters_json TEXT NOT NULL DEFAULT '[]',
                    updated_at INTEGER NOT NULL,
                    PRIMARY KEY (repo, pr_number, revision_hash)
                );
                "#,
            )
            .map_err(|e| StoreError::storage("migration v1", e.to_string()))?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| StoreError::storage("update schema version", e.to_string()))?;

        Ok(())
    }

    /// Create a new in-memory SQLite store (for testing).
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, StoreError> {
        Self::new(":memory:")
    }

    #[cfg(test)]
    pub(crate) fn schema_version(&self) -> Result<i64, StoreError> {
        let conn = lock(&self.conn)?;
        conn.query_row(
            "SELECT version FROM schema_version WHERE id = 1",
            [],
            |row| row.get(0),
        )
        .map_err(|e| StoreError::storage("get schema version", e.to_string()))
    }
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn get(
        &self,
        key: &RevisionKey,
        revision_hash: &RevisionHash,
    ) -> Result<Option<ApprovalRecord>, StoreError> {
        let conn = self.conn.clone();
        let repo = key.repo.clone();
        let pr_number = sql_int("get", "pr_number", key.number)?;
        let hash = revision_hash.0.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;

            let row = conn
                .query_row(
                    "SELECT repo, pr_number, revision_hash, approval_count, creator_id, voters_json
                     FROM approval_records
                     WHERE repo = ?1 AND pr_number = ?2 AND revision_hash = ?3",
                    params![repo, pr_number, hash],
                    RecordRow::from_row,
                )
                .optional()
                .map_err(|e| StoreError::storage("get", e.to_string()))?;

            row.map(|row| row.into_record().map(|(_, record)| record))
                .transpose()
        })
        .await
        .map_err(|e| StoreError::storage("get", e.to_string()))?
    }

    async fn put(&self, key: &RevisionKey, record: ApprovalRecord) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        let repo = key.repo.clone();
        let pr_number = sql_int("put", "pr_number", key.number)?;
        let creator_id = sql_int("put", "creator_id", record.creator_id.0)?;
        let voters_json = serde_json::to_string(&record.voters)
            .map_err(|e| StoreError::storage("serialize voters", e.to_string()))?;
        let updated_at = chrono::Utc::now().timestamp();

        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let conn = lock(&conn)?;
            conn.execute(
                "INSERT INTO approval_records
                    (repo, pr_number, revision_hash, approval_count, creator_id, voters_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (repo, pr_number, revision_hash) DO UPDATE SET
                    approval_count = excluded.approval_count,
                    creator_id = excluded.creator_id,
                    voters_json = excluded.voters_json,
                    updated_at = excluded.updated_at",
                params![
                    repo,
                    pr_number,
                    record.revision_hash.0,
                    i64::from(record.approval_count),
                    creator_id,
                    voters_json,
                    updated_at
                ],
            )
            .map_err(|e| StoreError::storage("put", e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::storage("put", e.to_string()))?
    }

    async fn delete_all(&self, key: &RevisionKey) -> Result<usize, StoreError> {
        let conn = self.conn.clone();
        let repo = key.repo.clone();
        let pr_number = sql_int("delete_all", "pr_number", key.number)?;

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            conn.execute(
                "DELETE FROM approval_records WHERE repo = ?1 AND pr_number = ?2",
                params![repo, pr_number],
            )
            .map_err(|e| StoreError::storage("delete_all", e.to_string()))
        })
        .await
        .map_err(|e| StoreError::storage("delete_all", e.to_string()))?
    }

    async fn get_all(&self) -> Result<Vec<(RevisionKey, ApprovalRecord)>, StoreError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || -> Result<Vec<_>, StoreError> {
            let conn = lock(&conn)?;
            let mut stmt = conn
                .prepare(
                    "SELECT repo, pr_number, revision_hash, approval_count, creator_id, voters_json
                     FROM approval_records
                     ORDER BY repo, pr_number, revision_hash",
                )
                .map_err(|e| StoreError::storage("get_all", e.to_string()))?;

            let rows = stmt
                .query_map([], RecordRow::from_row)
                .map_err(|e| StoreError::storage("get_all", e.to_string()))?;

            let mut records = Vec::new();
            for row in rows {
                let row = row.map_err(|e| StoreError::storage("get_all", e.to_string()))?;
                records.push(row.into_record()?);
            }
            Ok(records)
        })
        .await
        .map_err(|e| StoreError::storage("get_all", e.to_string()))?
    }
}
