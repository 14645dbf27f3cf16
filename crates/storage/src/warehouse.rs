use async_trait::async_trait;
use chainhouse_core::WriteError;
use chainhouse_ingest::{MonthPartition, Record, TableRef, TableSession, Warehouse};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use std::collections::HashSet;

use crate::ddl;
use crate::row::{PgValue, to_row};

/// Postgres caps a statement at 65535 bind parameters.
const MAX_BIND_PARAMS: usize = 65_535;

/// Keys per `= ANY($1)` lookup.
const KEY_LOOKUP_CHUNK: usize = 10_000;

fn db(err: sqlx::Error) -> WriteError {
    WriteError::Database(err.to_string())
}

/// PostgreSQL warehouse: one schema (namespace) holding the entity tables.
#[derive(Debug, Clone)]
pub struct PgWarehouse {
    pool: PgPool,
    namespace: String,
}

impl PgWarehouse {
    pub fn new(pool: PgPool, namespace: impl Into<String>) -> Self {
        Self {
            pool,
            namespace: namespace.into(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Create the namespace if needed. Run once before any session is opened.
    pub async fn prepare(&self) -> Result<(), WriteError> {
        sqlx::query(&ddl::create_namespace(&self.namespace))
            .execute(&self.pool)
            .await
            .map_err(db)?;
        tracing::info!(namespace = %self.namespace, "Warehouse namespace ready");
        Ok(())
    }
}

#[async_trait]
impl Warehouse for PgWarehouse {
    type Session = PgSession;

    /// Begins a transaction and takes a transaction-scoped advisory lock on the
    /// table, so concurrent runs against one table queue up behind each other.
    async fn open(&self, table: &TableRef) -> Result<PgSession, WriteError> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(format!("{}.{}", self.namespace, table.name))
            .execute(&mut *tx)
            .await
            .map_err(db)?;

        tracing::debug!(namespace = %self.namespace, table = %table.name, "Acquired load lock");

        Ok(PgSession {
            tx,
            namespace: self.namespace.clone(),
            table: table.clone(),
            partitions: HashSet::new(),
        })
    }
}

/// A load in flight. Dropping it without `commit` rolls the transaction back.
pub struct PgSession {
    tx: Transaction<'static, Postgres>,
    namespace: String,
    table: TableRef,
    /// Partitions created or confirmed in this transaction.
    partitions: HashSet<MonthPartition>,
}

impl PgSession {
    async fn exists(&mut self) -> Result<bool, WriteError> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = $1 AND table_name = $2
            )
            "#,
        )
        .bind(&self.namespace)
        .bind(&self.table.name)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db)
    }

    async fn execute(&mut self, sql: &str) -> Result<(), WriteError> {
        sqlx::query(sql)
            .execute(&mut *self.tx)
            .await
            .map_err(db)?;
        Ok(())
    }

    async fn create(&mut self) -> Result<(), WriteError> {
        let schema = self.table.schema;
        self.execute(&ddl::create_table(&self.namespace, &self.table.name, schema))
            .await?;
        self.execute(&ddl::create_order_index(&self.namespace, &self.table.name, schema))
            .await
    }
}

#[async_trait]
impl TableSession for PgSession {
    async fn watermark(&mut self) -> Result<Option<DateTime<Utc>>, WriteError> {
        if !self.exists().await? {
            return Ok(None);
        }
        let sql = ddl::max_watermark(&self.namespace, &self.table.name, self.table.schema);
        sqlx::query_scalar::<_, Option<DateTime<Utc>>>(&sql)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(db)
    }

    async fn stored_keys(&mut self, keys: &[String]) -> Result<HashSet<String>, WriteError> {
        let mut stored = HashSet::new();
        if keys.is_empty() || !self.exists().await? {
            return Ok(stored);
        }
        let sql = ddl::select_stored_keys(&self.namespace, &self.table.name, self.table.schema);
        for chunk in keys.chunks(KEY_LOOKUP_CHUNK) {
            let found = sqlx::query_scalar::<_, String>(&sql)
                .bind(chunk)
                .fetch_all(&mut *self.tx)
                .await
                .map_err(db)?;
            stored.extend(found);
        }
        Ok(stored)
    }

    async fn recreate(&mut self) -> Result<(), WriteError> {
        self.execute(&ddl::drop_table(&self.namespace, &self.table.name))
            .await?;
        self.partitions.clear();
        self.create().await?;
        tracing::info!(namespace = %self.namespace, table = %self.table.name, "Recreated table");
        Ok(())
    }

    async fn ensure_table(&mut self) -> Result<(), WriteError> {
        self.create().await
    }

    async fn ensure_partitions(&mut self, partitions: &[MonthPartition]) -> Result<(), WriteError> {
        for partition in partitions {
            if self.partitions.contains(partition) {
                continue;
            }
            let sql = ddl::create_partition(&self.namespace, &self.table.name, partition)
                .ok_or_else(|| WriteError::MissingPartition {
                    table: self.table.name.clone(),
                    partition: partition.suffix(),
                })?;
            self.execute(&sql).await?;
            self.partitions.insert(*partition);
            tracing::debug!(table = %self.table.name, partition = %partition, "Partition ready");
        }
        Ok(())
    }

    /// One multi-value INSERT. Rows whose key already exists are refused by
    /// `ON CONFLICT DO NOTHING`; the returned count excludes them.
    async fn insert(&mut self, rows: &[Record]) -> Result<u64, WriteError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let fields = self.table.schema.fields;
        let bound = rows
            .iter()
            .map(|record| to_row(fields, record))
            .collect::<Result<Vec<_>, _>>()?;

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(ddl::insert_head(
            &self.namespace,
            &self.table.name,
            self.table.schema,
        ));
        qb.push_values(bound, |mut b, row: Vec<PgValue>| {
            for value in row {
                value.push(&mut b);
            }
        });
        qb.push(" ON CONFLICT DO NOTHING");

        let result = qb.build().execute(&mut *self.tx).await.map_err(db)?;
        Ok(result.rows_affected())
    }

    fn max_batch(&self) -> usize {
        MAX_BIND_PARAMS / self.table.schema.fields.len().max(1)
    }

    async fn commit(self) -> Result<(), WriteError> {
        self.tx.commit().await.map_err(db)
    }
}
