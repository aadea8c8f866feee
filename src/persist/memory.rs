//! In-process error store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{ErrorLogRow, ErrorStore, StoreResult, StoreTransaction};

type Tables = HashMap<String, Vec<ErrorLogRow>>;

/// Keeps committed rows in memory, grouped by table.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed rows of `table`, oldest first.
    pub async fn rows(&self, table: &str) -> Vec<ErrorLogRow> {
        self.tables
            .lock()
            .await
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of committed rows across all tables.
    pub async fn len(&self) -> usize {
        self.tables.lock().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ErrorStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        Ok(Box::new(MemoryTransaction {
            tables: Arc::clone(&self.tables),
            staged: Vec::new(),
        }))
    }
}

struct MemoryTransaction {
    tables: Arc<Mutex<Tables>>,
    staged: Vec<(String, ErrorLogRow)>,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn insert(&mut self, table: &str, row: &ErrorLogRow) -> StoreResult<()> {
        self.staged.push((table.to_string(), row.clone()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTransaction { tables, staged } = *self;
        let mut tables = tables.lock().await;
        for (table, row) in staged {
            tables.entry(table).or_default().push(row);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StructuredError;
    use chrono::Utc;

    fn row(message: &str) -> ErrorLogRow {
        ErrorLogRow::from_error(&StructuredError::new(message), Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn test_commit_makes_rows_visible() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert("LOG", &row("a")).await.unwrap();
        tx.insert("LOG", &row("b")).await.unwrap();

        assert!(store.is_empty().await);
        tx.commit().await.unwrap();

        let rows = store.rows("LOG").await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].message, "a");
        assert_eq!(rows[1].message, "b");
    }

    #[tokio::test]
    async fn test_rollback_discards_rows() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert("LOG", &row("a")).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(store.is_empty().await);
        assert!(store.rows("LOG").await.is_empty());
    }
}
