//! Warehouse Writer: the storage seam plus the ordered, chunked write of a plan.

use async_trait::async_trait;
use chainhouse_core::WriteError;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use std::{cmp::Ordering, collections::HashSet, fmt};

use crate::schema::{EntitySchema, Layout};
use crate::value::Record;

// ─── Partitions ─────────────────────────────────────────────────────────────

/// One calendar month of the watermark column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonthPartition {
    year: i32,
    month: u32,
}

impl MonthPartition {
    pub fn of(ts: DateTime<Utc>) -> Self {
        Self {
            year: ts.year(),
            month: ts.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// Table-name suffix, e.g. `p202401`.
    pub fn suffix(&self) -> String {
        format!("p{:04}{:02}", self.year, self.month)
    }

    /// Half-open range `[first day of month, first day of next month)`.
    pub fn bounds(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let (next_year, next_month) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        let start = NaiveDate::from_ymd_opt(self.year, self.month, 1)?;
        let end = NaiveDate::from_ymd_opt(next_year, next_month, 1)?;
        Some((
            start.and_hms_opt(0, 0, 0)?.and_utc(),
            end.and_hms_opt(0, 0, 0)?.and_utc(),
        ))
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        Self::of(ts) == *self
    }
}

impl fmt::Display for MonthPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Distinct partitions touched by `records`, ascending.
pub fn partitions_of(records: &[Record]) -> Vec<MonthPartition> {
    let mut partitions: Vec<_> = records
        .iter()
        .map(|r| MonthPartition::of(r.watermark()))
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    partitions.sort_unstable();
    partitions
}

// ─── Storage seam ───────────────────────────────────────────────────────────

/// A target table and the schema it stores.
#[derive(Debug, Clone)]
pub struct TableRef {
    pub schema: &'static EntitySchema,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: &'static EntitySchema, name: impl Into<String>) -> Self {
        Self {
            schema,
            name: name.into(),
        }
    }
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    type Session: TableSession;

    /// Begin a load session on `table`. The session holds the table's load lock
    /// until it is committed or dropped; dropping it discards every change.
    async fn open(&self, table: &TableRef) -> Result<Self::Session, WriteError>;
}

/// One atomic load against one table.
#[async_trait]
pub trait TableSession: Send {
    /// Latest stored watermark; `None` when the table is absent or empty.
    async fn watermark(&mut self) -> Result<Option<DateTime<Utc>>, WriteError>;

    /// The subset of `keys` already stored.
    async fn stored_keys(&mut self, keys: &[String]) -> Result<HashSet<String>, WriteError>;

    /// Drop the table if it exists and create it empty.
    async fn recreate(&mut self) -> Result<(), WriteError>;

    /// Create the table if it does not exist.
    async fn ensure_table(&mut self) -> Result<(), WriteError>;

    async fn ensure_partitions(&mut self, partitions: &[MonthPartition]) -> Result<(), WriteError>;

    /// Append rows, refusing any whose key is already stored. Returns rows inserted.
    async fn insert(&mut self, rows: &[Record]) -> Result<u64, WriteError>;

    /// Largest batch a single `insert` call accepts.
    fn max_batch(&self) -> usize {
        usize::MAX
    }

    async fn commit(self) -> Result<(), WriteError>;
}

// ─── Ordered write ──────────────────────────────────────────────────────────

/// Physical write order: `(partition, natural order…, uniqueness key)`.
pub fn physical_cmp(layout: &Layout, a: &Record, b: &Record) -> Ordering {
    MonthPartition::of(a.watermark())
        .cmp(&MonthPartition::of(b.watermark()))
        .then_with(|| {
            layout
                .order_by
                .iter()
                .map(|&i| a.values()[i].sort_cmp(&b.values()[i]))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.key().cmp(b.key()))
}

/// Rows written so far by one run, kept even when the write fails.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteProgress {
    pub inserted: u64,
    /// Rows the store refused as duplicates.
    pub refused: u64,
    pub chunks: u64,
}

/// Sort `records` into physical order and insert them in chunks.
pub async fn write_ordered<S: TableSession>(
    session: &mut S,
    layout: &Layout,
    mut records: Vec<Record>,
    chunk_size: usize,
    progress: &mut WriteProgress,
) -> Result<(), WriteError> {
    if records.is_empty() {
        return Ok(());
    }

    records.sort_by(|a, b| physical_cmp(layout, a, b));
    session.ensure_partitions(&partitions_of(&records)).await?;

    let chunk_size = chunk_size.clamp(1, session.max_batch().max(1));
    for chunk in records.chunks(chunk_size) {
        let inserted = session.insert(chunk).await?;
        progress.inserted += inserted;
        progress.refused += chunk.len() as u64 - inserted.min(chunk.len() as u64);
        progress.chunks += 1;
        tracing::debug!(rows = chunk.len(), inserted, total = progress.inserted, "Wrote chunk");
    }
    Ok(())
}
