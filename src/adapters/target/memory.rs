//! In-memory target databases

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::core::{
    DatabaseConnection, IndexerResult, StorageError, TargetDatabase, TargetDatabaseFactory,
};
use crate::domain::models::{TargetRow, WriteBatch, WriteSummary};

/// Target that keeps rows per table, keyed by natural key
///
/// Batches are all-or-nothing, like a transaction on a real target.
#[derive(Default)]
pub struct MemoryTarget {
    tables: RwLock<HashMap<&'static str, BTreeMap<String, TargetRow>>>,
    rejected_tables: RwLock<HashSet<&'static str>>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every batch touching `table` fail
    pub async fn reject_table(&self, table: &'static str) {
        self.rejected_tables.write().await.insert(table);
    }

    pub async fn accept_all(&self) {
        self.rejected_tables.write().await.clear();
    }

    pub async fn row_count(&self, table: &str) -> usize {
        self.tables.read().await.get(table).map_or(0, BTreeMap::len)
    }

    pub async fn rows(&self, table: &str) -> Vec<TargetRow> {
        self.tables
            .read()
            .await
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TargetDatabase for MemoryTarget {
    async fn ensure_schema(&self) -> IndexerResult<()> {
        Ok(())
    }

    async fn write_batch(&self, batch: &WriteBatch) -> IndexerResult<WriteSummary> {
        let rejected = self.rejected_tables.read().await;
        if let Some(row) = batch.rows.iter().find(|row| rejected.contains(row.table())) {
            return Err(StorageError::Target(format!("insert into {} rejected", row.table())).into());
        }

        let mut tables = self.tables.write().await;
        let mut summary = WriteSummary::default();
        for row in &batch.rows {
            let table = tables.entry(row.table()).or_default();
            let key = row.natural_key();
            if table.contains_key(&key) {
                summary.skipped += 1;
            } else {
                table.insert(key, row.clone());
                summary.inserted += 1;
            }
        }
        Ok(summary)
    }
}

/// Hands out one `MemoryTarget` per connection id
#[derive(Default)]
pub struct MemoryTargetFactory {
    targets: RwLock<HashMap<Uuid, Arc<MemoryTarget>>>,
}

impl MemoryTargetFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The target behind a connection, created on first use
    pub async fn target(&self, connection_id: Uuid) -> Arc<MemoryTarget> {
        self.targets
            .write()
            .await
            .entry(connection_id)
            .or_insert_with(|| Arc::new(MemoryTarget::new()))
            .clone()
    }
}

#[async_trait]
impl TargetDatabaseFactory for MemoryTargetFactory {
    async fn connect(&self, connection: &DatabaseConnection) -> IndexerResult<Arc<dyn TargetDatabase>> {
        let target: Arc<dyn TargetDatabase> = self.target(connection.id).await;
        Ok(target)
    }
}
