//! In-process warehouse with the same lock, partition and conflict rules as the
//! Postgres one. Backs the pipeline tests.

use async_trait::async_trait;
use chainhouse_core::WriteError;
use chrono::{DateTime, Utc};
use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::schema::EntitySchema;
use crate::value::Record;
use crate::writer::{MonthPartition, TableRef, TableSession, Warehouse};

#[derive(Debug, Clone)]
struct MemTable {
    schema: &'static EntitySchema,
    partitions: BTreeSet<MonthPartition>,
    keys: HashSet<String>,
    rows: Vec<Record>,
}

impl MemTable {
    fn new(schema: &'static EntitySchema) -> Self {
        Self {
            schema,
            partitions: BTreeSet::new(),
            keys: HashSet::new(),
            rows: Vec::new(),
        }
    }
}

type Slot = Arc<Mutex<Option<MemTable>>>;

#[derive(Debug, Default)]
struct Inner {
    tables: StdMutex<HashMap<String, Slot>>,
    /// Faults armed for the next session on a table.
    faults: StdMutex<HashMap<String, Faults>>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Faults {
    /// Successful insert calls allowed before failing.
    fail_after: Option<usize>,
    /// Pause before every insert call.
    delay: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryWarehouse {
    inner: Arc<Inner>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, table: &str) -> Slot {
        let mut tables = self
            .inner
            .tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tables.entry(table.to_string()).or_default().clone()
    }

    fn arm(&self, table: &str, update: impl FnOnce(&mut Faults)) {
        let mut faults = self
            .inner
            .faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        update(faults.entry(table.to_string()).or_default());
    }

    /// Make the next session on `table` fail after `after` successful insert calls.
    pub fn inject_write_failure(&self, table: &str, after: usize) {
        self.arm(table, |faults| faults.fail_after = Some(after));
    }

    /// Make every insert call of the next session on `table` sleep for `delay` first.
    pub fn delay_writes(&self, table: &str, delay: Duration) {
        self.arm(table, |faults| faults.delay = Some(delay));
    }

    fn take_faults(&self, table: &str) -> Faults {
        self.inner
            .faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(table)
            .unwrap_or_default()
    }

    /// Committed rows of `table` in physical order; empty if it does not exist.
    pub async fn rows(&self, table: &str) -> Vec<Record> {
        let slot = self.slot(table);
        let guard = slot.lock().await;
        guard.as_ref().map(|t| t.rows.clone()).unwrap_or_default()
    }

    pub async fn partitions(&self, table: &str) -> Vec<MonthPartition> {
        let slot = self.slot(table);
        let guard = slot.lock().await;
        guard
            .as_ref()
            .map(|t| t.partitions.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn exists(&self, table: &str) -> bool {
        self.slot(table).lock().await.is_some()
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    type Session = MemorySession;

    async fn open(&self, table: &TableRef) -> Result<MemorySession, WriteError> {
        let guard = self.slot(&table.name).lock_owned().await;
        let staged = guard.clone();
        Ok(MemorySession {
            table: table.clone(),
            guard,
            staged,
            faults: self.take_faults(&table.name),
            inserts: 0,
        })
    }
}

/// Works on a staged copy; `commit` publishes it, dropping discards it.
pub struct MemorySession {
    table: TableRef,
    guard: OwnedMutexGuard<Option<MemTable>>,
    staged: Option<MemTable>,
    faults: Faults,
    inserts: usize,
}

impl MemorySession {
    fn staged(&mut self) -> Result<&mut MemTable, WriteError> {
        self.staged
            .as_mut()
            .ok_or_else(|| WriteError::MissingTable(self.table.name.clone()))
    }
}

#[async_trait]
impl TableSession for MemorySession {
    async fn watermark(&mut self) -> Result<Option<DateTime<Utc>>, WriteError> {
        Ok(self
            .staged
            .as_ref()
            .and_then(|t| t.rows.iter().map(Record::watermark).max()))
    }

    async fn stored_keys(&mut self, keys: &[String]) -> Result<HashSet<String>, WriteError> {
        Ok(match &self.staged {
            Some(table) => keys
                .iter()
                .filter(|k| table.keys.contains(*k))
                .cloned()
                .collect(),
            None => HashSet::new(),
        })
    }

    async fn recreate(&mut self) -> Result<(), WriteError> {
        self.staged = Some(MemTable::new(self.table.schema));
        Ok(())
    }

    async fn ensure_table(&mut self) -> Result<(), WriteError> {
        if self.staged.is_none() {
            self.staged = Some(MemTable::new(self.table.schema));
        }
        Ok(())
    }

    async fn ensure_partitions(&mut self, partitions: &[MonthPartition]) -> Result<(), WriteError> {
        self.staged()?.partitions.extend(partitions.iter().copied());
        Ok(())
    }

    async fn insert(&mut self, rows: &[Record]) -> Result<u64, WriteError> {
        if let Some(delay) = self.faults.delay {
            tokio::time::sleep(delay).await;
        }
        if self.faults.fail_after.is_some_and(|after| self.inserts >= after) {
            return Err(WriteError::Database(format!(
                "injected write failure on {}",
                self.table.name
            )));
        }
        self.inserts += 1;

        let name = self.table.name.clone();
        let table = self.staged()?;
        if let Some(column) = rows.iter().find_map(|r| r.nonconforming_column(table.schema)) {
            return Err(WriteError::TypeMismatch {
                column: column.to_string(),
            });
        }
        if let Some(row) = rows
            .iter()
            .find(|r| !table.partitions.contains(&MonthPartition::of(r.watermark())))
        {
            return Err(WriteError::MissingPartition {
                table: name,
                partition: MonthPartition::of(row.watermark()).suffix(),
            });
        }

        let mut inserted = 0;
        for row in rows {
            if table.keys.insert(row.key().to_string()) {
                table.rows.push(row.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn commit(mut self) -> Result<(), WriteError> {
        *self.guard = self.staged.take();
        Ok(())
    }
}
