//! Append-only JSON lines error store.
//!
//! Each table is a `<table>.jsonl` file inside the store directory. A
//! transaction only buffers rows. Commit appends them and syncs the file
//! before returning. Each row goes out as a single write of the line and its
//! newline, and commits through one store are serialized, so concurrent
//! commits never share a line.

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{ErrorLogRow, ErrorStore, StoreError, StoreResult, StoreTransaction};

const TABLE_EXTENSION: &str = "jsonl";

/// Durable error store writing one JSON document per line.
#[derive(Debug, Clone)]
pub struct JsonlStore {
    dir: PathBuf,
    commit_lock: Arc<Mutex<()>>,
}

impl JsonlStore {
    /// Opens a store in `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            commit_lock: Arc::default(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file backing `table`.
    pub fn table_path(&self, table: &str) -> StoreResult<PathBuf> {
        validate_table(table)?;
        Ok(self.dir.join(format!("{}.{}", table, TABLE_EXTENSION)))
    }

    /// Reads back every committed row of `table`, oldest first.
    ///
    /// A table that was never written is empty.
    pub fn read(&self, table: &str) -> StoreResult<Vec<ErrorLogRow>> {
        let path = self.table_path(table)?;
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Io(e)),
        };

        let mut rows = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            rows.push(serde_json::from_str(&line)?);
        }
        Ok(rows)
    }
}

fn validate_table(table: &str) -> StoreResult<()> {
    let valid = !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        && !table.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidTable(table.to_string()))
    }
}

#[async_trait]
impl ErrorStore for JsonlStore {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        Ok(Box::new(JsonlTransaction {
            store: self.clone(),
            staged: Vec::new(),
        }))
    }
}

struct JsonlTransaction {
    store: JsonlStore,
    staged: Vec<(PathBuf, String)>,
}

#[async_trait]
impl StoreTransaction for JsonlTransaction {
    async fn insert(&mut self, table: &str, row: &ErrorLogRow) -> StoreResult<()> {
        let path = self.store.table_path(table)?;
        let line = serde_json::to_string(row)?;
        self.staged.push((path, line));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let JsonlTransaction { store, staged } = *self;
        tokio::task::spawn_blocking(move || {
            let _guard = store
                .commit_lock
                .lock()
                .map_err(|_| StoreError::Backend("commit lock poisoned".to_string()))?;
            append_all(&staged)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("commit task failed: {}", e)))?
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

fn append_all(staged: &[(PathBuf, String)]) -> StoreResult<()> {
    for (path, line) in staged {
        let mut record = String::with_capacity(line.len() + 1);
        record.push_str(line);
        record.push('\n');

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(record.as_bytes())?;
        file.sync_all()?;
    }
    Ok(())
}
