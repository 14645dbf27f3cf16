//! SQL text generated from the schema registry.
//!
//! Identifiers are always quoted: several columns (`from`, `to`, `type`) are
//! reserved words.

use chainhouse_ingest::{EntitySchema, IntWidth, MonthPartition, SemanticType};

/// Quote an identifier for PostgreSQL.
pub fn ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `"namespace"."table"`
pub fn qualified(namespace: &str, table: &str) -> String {
    format!("{}.{}", ident(namespace), ident(table))
}

/// Storage type of a column. Wide integers are text; arrays of scalars are native
/// arrays; anything with nested structs is JSONB.
pub fn column_type(ty: &SemanticType) -> &'static str {
    match ty {
        SemanticType::Int(IntWidth::I32) => "INTEGER",
        SemanticType::Int(IntWidth::I64) => "BIGINT",
        SemanticType::WideInt | SemanticType::Text | SemanticType::Hex(_) => "TEXT",
        SemanticType::Bool => "BOOLEAN",
        SemanticType::Timestamp => "TIMESTAMPTZ",
        SemanticType::Array(elem) => match elem {
            SemanticType::Int(IntWidth::I32) => "INTEGER[]",
            SemanticType::Int(IntWidth::I64) => "BIGINT[]",
            SemanticType::WideInt | SemanticType::Text | SemanticType::Hex(_) => "TEXT[]",
            SemanticType::Bool => "BOOLEAN[]",
            SemanticType::Timestamp => "TIMESTAMPTZ[]",
            SemanticType::Array(_) | SemanticType::Struct(_) => "JSONB",
        },
        SemanticType::Struct(_) => "JSONB",
    }
}

pub fn create_namespace(namespace: &str) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", ident(namespace))
}

/// Parent table, range-partitioned by month on the watermark column.
pub fn create_table(namespace: &str, table: &str, schema: &EntitySchema) -> String {
    let mut lines: Vec<String> = schema
        .fields
        .iter()
        .map(|field| {
            let column = ident(field.name);
            let mut line = format!("    {column} {}", column_type(&field.ty));
            if !field.nullable {
                line.push_str(" NOT NULL");
            }
            if field.ty == SemanticType::WideInt {
                line.push_str(&format!(" CHECK ({column} ~ '^-?[0-9]+$')"));
            }
            line
        })
        .collect();

    lines.push(format!(
        "    CONSTRAINT {} UNIQUE ({}, {})",
        ident(&format!("{table}_{}_key", schema.unique_key)),
        ident(schema.unique_key),
        ident(schema.watermark),
    ));

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{}\n) PARTITION BY RANGE ({})",
        qualified(namespace, table),
        lines.join(",\n"),
        ident(schema.watermark),
    )
}

/// Physical ordering index: `(natural order…, uniqueness key)`.
pub fn create_order_index(namespace: &str, table: &str, schema: &EntitySchema) -> String {
    let columns: Vec<String> = schema
        .order_by
        .iter()
        .chain(std::iter::once(&schema.unique_key))
        .map(|c| ident(c))
        .collect();
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
        ident(&format!("{table}_order_idx")),
        qualified(namespace, table),
        columns.join(", "),
    )
}

pub fn drop_table(namespace: &str, table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", qualified(namespace, table))
}

pub fn partition_name(table: &str, partition: &MonthPartition) -> String {
    format!("{table}_{}", partition.suffix())
}

/// `None` when the month has no representable bounds.
pub fn create_partition(namespace: &str, table: &str, partition: &MonthPartition) -> Option<String> {
    let (start, end) = partition.bounds()?;
    Some(format!(
        "CREATE TABLE IF NOT EXISTS {} PARTITION OF {} FOR VALUES FROM ('{}') TO ('{}')",
        qualified(namespace, &partition_name(table, partition)),
        qualified(namespace, table),
        start.to_rfc3339(),
        end.to_rfc3339(),
    ))
}

pub fn max_watermark(namespace: &str, table: &str, schema: &EntitySchema) -> String {
    format!(
        "SELECT MAX({}) FROM {}",
        ident(schema.watermark),
        qualified(namespace, table)
    )
}

/// Bind `$1` as a text array of keys.
pub fn select_stored_keys(namespace: &str, table: &str, schema: &EntitySchema) -> String {
    let key = ident(schema.unique_key);
    format!(
        "SELECT DISTINCT {key} FROM {} WHERE {key} = ANY($1)",
        qualified(namespace, table)
    )
}

/// Head of the multi-row insert; the `VALUES` list is pushed by the caller.
pub fn insert_head(namespace: &str, table: &str, schema: &EntitySchema) -> String {
    let columns: Vec<String> = schema.fields.iter().map(|f| ident(f.name)).collect();
    format!(
        "INSERT INTO {} ({}) ",
        qualified(namespace, table),
        columns.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainhouse_ingest::schema::{BLOCKS, RECEIPTS, TRANSACTIONS};
    use chrono::DateTime;

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(ident("to"), "\"to\"");
        assert_eq!(ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(qualified("raw", "blocks"), "\"raw\".\"blocks\"");
    }

    #[test]
    fn table_is_partitioned_by_watermark_with_unique_key() {
        let sql = create_table("raw", "transactions", &TRANSACTIONS);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"raw\".\"transactions\" ("));
        assert!(sql.ends_with(") PARTITION BY RANGE (\"datetime\")"));
        assert!(sql.contains(
            "CONSTRAINT \"transactions_hash_key\" UNIQUE (\"hash\", \"datetime\")"
        ));
        assert!(sql.contains("    \"to\" TEXT,\n"));
        assert!(sql.contains("    \"hash\" TEXT NOT NULL,\n"));
        assert!(sql.contains("    \"value\" TEXT NOT NULL CHECK (\"value\" ~ '^-?[0-9]+$'),\n"));
        assert!(sql.contains("    \"transaction_index\" INTEGER NOT NULL,\n"));
        assert!(sql.contains("    \"blob_versioned_hashes\" TEXT[]"));
    }

    #[test]
    fn nested_logs_are_jsonb() {
        let sql = create_table("raw", "receipts", &RECEIPTS);
        assert!(sql.contains("    \"logs\" JSONB NOT NULL,\n"));
        assert!(sql.contains("\"datetime\" TIMESTAMPTZ NOT NULL"));
    }

    #[test]
    fn order_index_ends_with_the_key() {
        assert_eq!(
            create_order_index("raw", "receipts", &RECEIPTS),
            "CREATE INDEX IF NOT EXISTS \"receipts_order_idx\" ON \"raw\".\"receipts\" \
             (\"block_number\", \"transaction_index\", \"transaction_hash\")"
        );
    }

    #[test]
    fn monthly_partition_bounds() {
        let ts = DateTime::from_timestamp(1_706_745_600, 0).unwrap(); // 2024-02-01
        let sql = create_partition("raw", "blocks", &MonthPartition::of(ts)).unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"raw\".\"blocks_p202402\" PARTITION OF \"raw\".\"blocks\" \
             FOR VALUES FROM ('2024-02-01T00:00:00+00:00') TO ('2024-03-01T00:00:00+00:00')"
        );
    }

    #[test]
    fn insert_lists_every_column_in_registry_order() {
        let head = insert_head("raw", "blocks", &BLOCKS);
        assert!(head.starts_with("INSERT INTO \"raw\".\"blocks\" (\"number\", \"hash\", "));
        assert_eq!(head.matches(", ").count(), BLOCKS.fields.len() - 1);
    }
}
