//! Schema Registry: the canonical typed layout of every entity kind.
//!
//! Coercion, planning and writing are driven entirely by these tables. Adding a
//! column or an entity kind is a registry edit; nothing downstream branches on
//! [`EntityKind`].

use chainhouse_core::EntityKind;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntWidth {
    I32,
    I64,
}

impl IntWidth {
    pub fn bits(self) -> u32 {
        match self {
            Self::I32 => 32,
            Self::I64 => 64,
        }
    }
}

/// Length constraint of a hex byte string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HexLen {
    Fixed(usize),
    Any,
}

impl HexLen {
    pub fn bytes(self) -> Option<usize> {
        match self {
            Self::Fixed(n) => Some(n),
            Self::Any => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticType {
    /// Signed machine integer of the given width, range-checked on coercion.
    Int(IntWidth),
    /// Integer that may exceed 64 bits (gas, wei, difficulty, nonces), stored as
    /// canonical decimal text.
    WideInt,
    Text,
    /// Hex byte string, stored lower-case with a `0x` prefix.
    Hex(HexLen),
    Bool,
    Timestamp,
    Array(&'static SemanticType),
    Struct(&'static [FieldSpec]),
}

impl SemanticType {
    /// Short name used in error messages and reports.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Int(IntWidth::I32) => "int32",
            Self::Int(IntWidth::I64) => "int64",
            Self::WideInt => "wide integer",
            Self::Text => "text",
            Self::Hex(HexLen::Fixed(20)) => "address",
            Self::Hex(HexLen::Fixed(32)) => "hash",
            Self::Hex(_) => "hex bytes",
            Self::Bool => "boolean",
            Self::Timestamp => "timestamp",
            Self::Array(_) => "array",
            Self::Struct(_) => "object",
        }
    }

    pub fn is_scalar(&self) -> bool {
        !matches!(self, Self::Array(_) | Self::Struct(_))
    }
}

/// One column: its name, the raw keys it is read from (first present wins), its
/// type and whether it may be null.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub source: &'static [&'static str],
    pub ty: SemanticType,
    pub nullable: bool,
}

const fn required(
    name: &'static str,
    source: &'static [&'static str],
    ty: SemanticType,
) -> FieldSpec {
    FieldSpec {
        name,
        source,
        ty,
        nullable: false,
    }
}

const fn nullable(
    name: &'static str,
    source: &'static [&'static str],
    ty: SemanticType,
) -> FieldSpec {
    FieldSpec {
        name,
        source,
        ty,
        nullable: true,
    }
}

const I32: SemanticType = SemanticType::Int(IntWidth::I32);
const I64: SemanticType = SemanticType::Int(IntWidth::I64);
const WIDE: SemanticType = SemanticType::WideInt;
const ADDRESS: SemanticType = SemanticType::Hex(HexLen::Fixed(20));
const HASH: SemanticType = SemanticType::Hex(HexLen::Fixed(32));
const BLOOM: SemanticType = SemanticType::Hex(HexLen::Fixed(256));
const NONCE: SemanticType = SemanticType::Hex(HexLen::Fixed(8));
const DATA: SemanticType = SemanticType::Hex(HexLen::Any);
const TS: SemanticType = SemanticType::Timestamp;
const BOOL: SemanticType = SemanticType::Bool;

const HASHES: SemanticType = SemanticType::Array(&HASH);

static LOG_FIELDS: [FieldSpec; 9] = [
    required("address", &["address"], ADDRESS),
    required("topics", &["topics"], HASHES),
    required("data", &["data"], DATA),
    required("log_index", &["log_index", "logIndex"], I32),
    nullable("transaction_index", &["transaction_index", "transactionIndex"], I32),
    nullable("transaction_hash", &["transaction_hash", "transactionHash"], HASH),
    nullable("block_number", &["block_number", "blockNumber"], I64),
    nullable("block_hash", &["block_hash", "blockHash"], HASH),
    nullable("removed", &["removed"], BOOL),
];
static LOG: SemanticType = SemanticType::Struct(&LOG_FIELDS);

static BLOCK_FIELDS: [FieldSpec; 25] = [
    required("number", &["number"], I64),
    required("hash", &["hash"], HASH),
    required("parent_hash", &["parent_hash", "parentHash"], HASH),
    required("timestamp", &["timestamp"], I64),
    required("datetime", &["timestamp"], TS),
    nullable("nonce", &["nonce"], NONCE),
    nullable("sha3_uncles", &["sha3_uncles", "sha3Uncles"], HASH),
    nullable("logs_bloom", &["logs_bloom", "logsBloom"], BLOOM),
    nullable("transactions_root", &["transactions_root", "transactionsRoot"], HASH),
    nullable("state_root", &["state_root", "stateRoot"], HASH),
    nullable("receipts_root", &["receipts_root", "receiptsRoot"], HASH),
    nullable("miner", &["miner"], ADDRESS),
    nullable("mix_hash", &["mix_hash", "mixHash"], HASH),
    nullable("difficulty", &["difficulty"], WIDE),
    nullable("total_difficulty", &["total_difficulty", "totalDifficulty"], WIDE),
    nullable("size", &["size"], I64),
    nullable("extra_data", &["extra_data", "extraData"], DATA),
    required("gas_limit", &["gas_limit", "gasLimit"], WIDE),
    required("gas_used", &["gas_used", "gasUsed"], WIDE),
    nullable("base_fee_per_gas", &["base_fee_per_gas", "baseFeePerGas"], WIDE),
    nullable("uncles", &["uncles"], HASHES),
    nullable("withdrawals_root", &["withdrawals_root", "withdrawalsRoot"], HASH),
    nullable("blob_gas_used", &["blob_gas_used", "blobGasUsed"], WIDE),
    nullable("excess_blob_gas", &["excess_blob_gas", "excessBlobGas"], WIDE),
    nullable(
        "parent_beacon_block_root",
        &["parent_beacon_block_root", "parentBeaconBlockRoot"],
        HASH,
    ),
];

static TRANSACTION_FIELDS: [FieldSpec; 19] = [
    required("hash", &["hash"], HASH),
    required("block_hash", &["block_hash", "blockHash"], HASH),
    required("block_number", &["block_number", "blockNumber"], I64),
    required("block_timestamp", &["block_timestamp", "blockTimestamp"], I64),
    required("datetime", &["block_timestamp", "blockTimestamp"], TS),
    required("transaction_index", &["transaction_index", "transactionIndex"], I32),
    required("from", &["from"], ADDRESS),
    nullable("to", &["to"], ADDRESS),
    required("value", &["value"], WIDE),
    required("gas", &["gas"], WIDE),
    nullable("gas_price", &["gas_price", "gasPrice"], WIDE),
    nullable("max_fee_per_gas", &["max_fee_per_gas", "maxFeePerGas"], WIDE),
    nullable(
        "max_priority_fee_per_gas",
        &["max_priority_fee_per_gas", "maxPriorityFeePerGas"],
        WIDE,
    ),
    nullable("max_fee_per_blob_gas", &["max_fee_per_blob_gas", "maxFeePerBlobGas"], WIDE),
    required("nonce", &["nonce"], WIDE),
    required("input", &["input"], DATA),
    nullable("type", &["type"], I32),
    nullable("chain_id", &["chain_id", "chainId"], WIDE),
    nullable(
        "blob_versioned_hashes",
        &["blob_versioned_hashes", "blobVersionedHashes"],
        HASHES,
    ),
];

static RECEIPT_FIELDS: [FieldSpec; 19] = [
    required("transaction_hash", &["transaction_hash", "transactionHash"], HASH),
    required("transaction_index", &["transaction_index", "transactionIndex"], I32),
    required("block_hash", &["block_hash", "blockHash"], HASH),
    required("block_number", &["block_number", "blockNumber"], I64),
    required("block_timestamp", &["block_timestamp", "blockTimestamp"], I64),
    required("datetime", &["block_timestamp", "blockTimestamp"], TS),
    required("from", &["from"], ADDRESS),
    nullable("to", &["to"], ADDRESS),
    nullable("contract_address", &["contract_address", "contractAddress"], ADDRESS),
    required("cumulative_gas_used", &["cumulative_gas_used", "cumulativeGasUsed"], WIDE),
    required("gas_used", &["gas_used", "gasUsed"], WIDE),
    nullable("effective_gas_price", &["effective_gas_price", "effectiveGasPrice"], WIDE),
    required("logs", &["logs"], SemanticType::Array(&LOG)),
    nullable("logs_bloom", &["logs_bloom", "logsBloom"], BLOOM),
    nullable("status", &["status"], I32),
    nullable("root", &["root"], HASH),
    nullable("type", &["type"], I32),
    nullable("blob_gas_used", &["blob_gas_used", "blobGasUsed"], WIDE),
    nullable("blob_gas_price", &["blob_gas_price", "blobGasPrice"], WIDE),
];

pub static BLOCKS: EntitySchema = EntitySchema {
    kind: EntityKind::Blocks,
    fields: &BLOCK_FIELDS,
    unique_key: "hash",
    watermark: "datetime",
    order_by: &["number"],
};

pub static TRANSACTIONS: EntitySchema = EntitySchema {
    kind: EntityKind::Transactions,
    fields: &TRANSACTION_FIELDS,
    unique_key: "hash",
    watermark: "datetime",
    order_by: &["block_number", "transaction_index"],
};

pub static RECEIPTS: EntitySchema = EntitySchema {
    kind: EntityKind::Receipts,
    fields: &RECEIPT_FIELDS,
    unique_key: "transaction_hash",
    watermark: "datetime",
    order_by: &["block_number", "transaction_index"],
};

/// The declared layout of one entity kind.
#[derive(Debug, PartialEq, Eq)]
pub struct EntitySchema {
    pub kind: EntityKind,
    pub fields: &'static [FieldSpec],
    /// Column whose value is unique per row.
    pub unique_key: &'static str,
    /// Timestamp column used as partition key and incremental cutoff.
    pub watermark: &'static str,
    /// Natural order within a partition; the uniqueness key is appended as tie-break.
    pub order_by: &'static [&'static str],
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("{kind}: duplicate column `{column}`")]
    DuplicateColumn { kind: EntityKind, column: &'static str },

    #[error("{kind}: column `{column}` is not declared")]
    UnknownColumn { kind: EntityKind, column: &'static str },

    #[error("{kind}: column `{column}` must be non-nullable")]
    NullableKeyColumn { kind: EntityKind, column: &'static str },

    #[error("{kind}: column `{column}` must be {expected}")]
    WrongKeyType {
        kind: EntityKind,
        column: &'static str,
        expected: &'static str,
    },

    #[error("{kind}: column `{column}` declares no source keys")]
    NoSource { kind: EntityKind, column: &'static str },
}

/// Column positions resolved once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub key: usize,
    pub watermark: usize,
    pub order_by: Vec<usize>,
}

impl EntitySchema {
    pub fn for_kind(kind: EntityKind) -> &'static EntitySchema {
        match kind {
            EntityKind::Blocks => &BLOCKS,
            EntityKind::Transactions => &TRANSACTIONS,
            EntityKind::Receipts => &RECEIPTS,
        }
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == column)
    }

    pub fn field(&self, column: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|f| f.name == column)
    }

    /// Check the registry entry is usable and resolve its key columns.
    pub fn layout(&self) -> Result<Layout, SchemaError> {
        let kind = self.kind;

        let mut seen = HashSet::new();
        for field in self.fields {
            if !seen.insert(field.name) {
                return Err(SchemaError::DuplicateColumn {
                    kind,
                    column: field.name,
                });
            }
            if field.source.is_empty() {
                return Err(SchemaError::NoSource {
                    kind,
                    column: field.name,
                });
            }
        }

        let resolve = |column: &'static str| {
            self.position(column)
                .ok_or(SchemaError::UnknownColumn { kind, column })
        };

        let key = resolve(self.unique_key)?;
        let key_field = &self.fields[key];
        if key_field.nullable {
            return Err(SchemaError::NullableKeyColumn {
                kind,
                column: self.unique_key,
            });
        }
        if !matches!(key_field.ty, SemanticType::Hex(_) | SemanticType::Text) {
            return Err(SchemaError::WrongKeyType {
                kind,
                column: self.unique_key,
                expected: "text or hex",
            });
        }

        let watermark = resolve(self.watermark)?;
        let watermark_field = &self.fields[watermark];
        if watermark_field.nullable {
            return Err(SchemaError::NullableKeyColumn {
                kind,
                column: self.watermark,
            });
        }
        if watermark_field.ty != SemanticType::Timestamp {
            return Err(SchemaError::WrongKeyType {
                kind,
                column: self.watermark,
                expected: "a timestamp",
            });
        }

        let order_by = self
            .order_by
            .iter()
            .copied()
            .map(resolve)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Layout {
            key,
            watermark,
            order_by,
        })
    }
}

/// Every registered entity schema.
pub fn registry() -> [&'static EntitySchema; 3] {
    EntityKind::ALL.map(EntitySchema::for_kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_registry_entry_resolves() {
        for schema in registry() {
            let layout = schema.layout().unwrap();
            assert_eq!(schema.fields[layout.key].name, schema.unique_key);
            assert_eq!(schema.fields[layout.watermark].ty, SemanticType::Timestamp);
            assert_eq!(layout.order_by.len(), schema.order_by.len());
        }
    }

    #[test]
    fn kinds_map_to_their_own_schema() {
        for kind in EntityKind::ALL {
            assert_eq!(EntitySchema::for_kind(kind).kind, kind);
        }
    }

    #[test]
    fn nullable_columns_follow_the_data_model() {
        let tx = &TRANSACTIONS;
        assert!(tx.field("to").unwrap().nullable);
        assert!(tx.field("max_fee_per_gas").unwrap().nullable);
        assert!(!tx.field("value").unwrap().nullable);
        assert_eq!(tx.field("value").unwrap().ty, SemanticType::WideInt);

        let receipts = &RECEIPTS;
        assert!(receipts.field("contract_address").unwrap().nullable);
        assert!(matches!(
            receipts.field("logs").unwrap().ty,
            SemanticType::Array(SemanticType::Struct(_))
        ));

        assert!(BLOCKS.field("base_fee_per_gas").unwrap().nullable);
        assert!(!BLOCKS.field("hash").unwrap().nullable);
    }

    #[test]
    fn layout_rejects_a_nullable_uniqueness_key() {
        static FIELDS: [FieldSpec; 2] = [
            nullable("id", &["id"], SemanticType::Text),
            required("at", &["at"], SemanticType::Timestamp),
        ];
        let broken = EntitySchema {
            kind: EntityKind::Blocks,
            fields: &FIELDS,
            unique_key: "id",
            watermark: "at",
            order_by: &[],
        };
        assert_eq!(
            broken.layout(),
            Err(SchemaError::NullableKeyColumn {
                kind: EntityKind::Blocks,
                column: "id"
            })
        );
    }

    #[test]
    fn layout_rejects_unknown_order_columns() {
        static FIELDS: [FieldSpec; 2] = [
            required("id", &["id"], SemanticType::Text),
            required("at", &["at"], SemanticType::Timestamp),
        ];
        let broken = EntitySchema {
            kind: EntityKind::Receipts,
            fields: &FIELDS,
            unique_key: "id",
            watermark: "at",
            order_by: &["height"],
        };
        assert!(matches!(
            broken.layout(),
            Err(SchemaError::UnknownColumn { column: "height", .. })
        ));
    }
}
