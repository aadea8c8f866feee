//! Durable logging of structured errors.
//!
//! An [`ErrorPersister`] writes one [`ErrorLogRow`] per error through an
//! [`ErrorStore`]. Each write happens inside its own transaction, which is
//! rolled back if the insert fails. Every failure on this path is logged
//! and swallowed, so persisting can never turn a handled error into an
//! unhandled one.

mod jsonl;
mod memory;

pub use jsonl::JsonlStore;
pub use memory::MemoryStore;

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::StructuredError;

/// Errors raised by store implementations.
///
/// These never leave [`ErrorPersister::persist`].
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The table name cannot be used by this store.
    #[error("Invalid table name: {0}")]
    InvalidTable(String),

    /// Failure reported by the backing system.
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// One persisted error, with every column as text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLogRow {
    /// UTC date, `YYYY-MM-DD`.
    pub date: String,
    /// UTC time, `HH:MM:SS`.
    pub time: String,
    pub message: String,
    /// Decimal status code.
    pub status: String,
    pub code: String,
    pub target: Option<String>,
    /// JSON-encoded details, `null` when absent.
    pub details: String,
    pub module: Option<String>,
    /// JSON-encoded internal payload.
    pub internal: String,
    pub stack: Option<String>,
}

impl ErrorLogRow {
    /// Serializes an error as it was at `at`.
    pub fn from_error(error: &StructuredError, at: DateTime<Utc>) -> StoreResult<Self> {
        Ok(Self {
            date: at.format("%Y-%m-%d").to_string(),
            time: at.format("%H:%M:%S").to_string(),
            message: error.message.clone(),
            status: error.status.to_string(),
            code: error.code.clone(),
            target: error.target.clone(),
            details: serde_json::to_string(&error.details)?,
            module: error.module.clone(),
            internal: serde_json::to_string(&error.internal)?,
            stack: error.stack.clone(),
        })
    }
}

/// A transactional destination for error rows.
#[async_trait]
pub trait ErrorStore: Send + Sync {
    /// Short name used in log output.
    fn name(&self) -> &str;

    /// Opens a transaction.
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>>;
}

/// An open transaction on an [`ErrorStore`].
#[async_trait]
pub trait StoreTransaction: Send {
    /// Stages one row for `table`.
    async fn insert(&mut self, table: &str, row: &ErrorLogRow) -> StoreResult<()>;

    /// Makes staged rows durable.
    async fn commit(self: Box<Self>) -> StoreResult<()>;

    /// Discards staged rows.
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

/// Writes structured errors to an [`ErrorStore`].
#[derive(Clone)]
pub struct ErrorPersister {
    store: Arc<dyn ErrorStore>,
}

impl std::fmt::Debug for ErrorPersister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorPersister")
            .field("store", &self.store.name())
            .finish()
    }
}

impl ErrorPersister {
    pub fn new(store: Arc<dyn ErrorStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ErrorStore> {
        &self.store
    }

    /// Writes `error` to `table` in a single transaction.
    ///
    /// Makes exactly one attempt. Returns whether the row was committed.
    /// Failures are logged, never returned.
    pub async fn persist(&self, error: &StructuredError, table: &str) -> bool {
        match self.try_persist(error, table).await {
            Ok(()) => {
                tracing::debug!(
                    store = self.store.name(),
                    table,
                    code = %error.code,
                    "Persisted error"
                );
                true
            }
            Err(e) => {
                tracing::warn!(
                    store = self.store.name(),
                    table,
                    code = %error.code,
                    error = %e,
                    "Failed to persist error"
                );
                false
            }
        }
    }

    async fn try_persist(&self, error: &StructuredError, table: &str) -> StoreResult<()> {
        let row = ErrorLogRow::from_error(error, Utc::now())?;
        let mut tx = self.store.begin().await?;

        if let Err(insert_error) = tx.insert(table, &row).await {
            if let Err(rollback_error) = tx.rollback().await {
                tracing::warn!(
                    store = self.store.name(),
                    table,
                    error = %rollback_error,
                    "Rollback failed"
                );
            }
            return Err(insert_error);
        }

        tx.commit().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::error::ErrorDetail;

    /// Store whose inserts always fail, counting commits and rollbacks.
    #[derive(Default)]
    struct FailingInsertStore {
        commits: Arc<AtomicUsize>,
        rollbacks: Arc<AtomicUsize>,
    }

    struct FailingTx {
        commits: Arc<AtomicUsize>,
        rollbacks: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ErrorStore for FailingInsertStore {
        fn name(&self) -> &str {
            "failing"
        }

        async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
            Ok(Box::new(FailingTx {
                commits: Arc::clone(&self.commits),
                rollbacks: Arc::clone(&self.rollbacks),
            }))
        }
    }

    #[async_trait]
    impl StoreTransaction for FailingTx {
        async fn insert(&mut self, _table: &str, _row: &ErrorLogRow) -> StoreResult<()> {
            Err(StoreError::Backend("table is read-only".to_string()))
        }

        async fn commit(self: Box<Self>) -> StoreResult<()> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> StoreResult<()> {
            self.rollbacks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct UnavailableStore;

    #[async_trait]
    impl ErrorStore for UnavailableStore {
        fn name(&self) -> &str {
            "unavailable"
        }

        async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
            Err(StoreError::Backend("connection refused".to_string()))
        }
    }

    fn sample_error() -> StructuredError {
        StructuredError::validation()
            .message("Email is required")
            .target("email")
            .detail(ErrorDetail::new("missing").with_target("email"))
            .module("accounts")
            .internal(json!({"user": "alice"}))
            .stack("at accounts::create")
            .build()
    }

    #[test]
    fn test_row_from_error() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let row = ErrorLogRow::from_error(&sample_error(), at).unwrap();

        assert_eq!(row.date, "2024-03-09");
        assert_eq!(row.time, "07:05:01");
        assert_eq!(row.status, "400");
        assert_eq!(row.code, "VALIDATION_ERR");
        assert_eq!(row.target.as_deref(), Some("email"));
        assert_eq!(row.module.as_deref(), Some("accounts"));
        assert_eq!(row.stack.as_deref(), Some("at accounts::create"));

        let details: serde_json::Value = serde_json::from_str(&row.details).unwrap();
        assert_eq!(details[0]["message"], "missing");
        let internal: serde_json::Value = serde_json::from_str(&row.internal).unwrap();
        assert_eq!(internal["user"], "alice");
    }

    #[test]
    fn test_row_without_details_encodes_null() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let row = ErrorLogRow::from_error(&StructuredError::new("x"), at).unwrap();
        assert_eq!(row.details, "null");
        assert_eq!(row.internal, "{}");
    }

    #[tokio::test]
    async fn test_persist_commits_to_memory_store() {
        let store = Arc::new(MemoryStore::new());
        let persister = ErrorPersister::new(store.clone());

        assert!(persister.persist(&sample_error(), "ERROR_LOG").await);

        let rows = store.rows("ERROR_LOG").await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].message, "Email is required");
    }

    #[tokio::test]
    async fn test_failed_insert_rolls_back_instead_of_committing() {
        let store = Arc::new(FailingInsertStore::default());
        let persister = ErrorPersister::new(store.clone());

        assert!(!persister.persist(&sample_error(), "ERROR_LOG").await);
        assert_eq!(store.commits.load(Ordering::SeqCst), 0);
        assert_eq!(store.rollbacks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_begin_is_swallowed() {
        let persister = ErrorPersister::new(Arc::new(UnavailableStore));
        assert!(!persister.persist(&sample_error(), "ERROR_LOG").await);
    }

    #[test]
    fn test_store_error_display() {
        assert_eq!(
            StoreError::InvalidTable("../x".to_string()).to_string(),
            "Invalid table name: ../x"
        );
        assert_eq!(
            StoreError::Backend("connection reset".to_string()).to_string(),
            "Store backend error: connection reset"
        );
    }
}
