//! Type Coercion Layer: raw JSON fields to registry-typed values.

use chainhouse_core::{CoercionError, CoercionReason};
use chainhouse_evm::{HexError, Quantity, QuantityError, normalize_hex};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Number, Value as Json};

use crate::raw::{RawField, RawRecord, json_kind};
use crate::schema::{EntitySchema, FieldSpec, HexLen, IntWidth, Layout, SchemaError, SemanticType};
use crate::value::{Record, Value};

/// Coerces raw records of one entity kind.
#[derive(Debug, Clone)]
pub struct Coercer {
    schema: &'static EntitySchema,
    layout: Layout,
}

impl Coercer {
    pub fn new(schema: &'static EntitySchema) -> Result<Self, SchemaError> {
        Ok(Self {
            schema,
            layout: schema.layout()?,
        })
    }

    pub fn schema(&self) -> &'static EntitySchema {
        self.schema
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Coerce every column. The first failing column rejects the whole record;
    /// nothing is defaulted.
    pub fn coerce(&self, raw: &RawRecord) -> Result<Record, CoercionError> {
        let values = self
            .schema
            .fields
            .iter()
            .map(|field| coerce_field(field, raw.field(field.source)))
            .collect::<Result<Vec<_>, _>>()?;

        Record::new(&self.layout, values, raw.origin.clone()).ok_or_else(|| {
            CoercionError::new(self.schema.unique_key, CoercionReason::MissingRequired)
        })
    }
}

/// Apply the nullability rule, then the type rule.
pub fn coerce_field(field: &FieldSpec, raw: RawField<'_>) -> Result<Value, CoercionError> {
    match raw {
        RawField::Absent | RawField::Null if field.nullable => Ok(Value::Null),
        RawField::Absent | RawField::Null => Err(CoercionError::new(
            field.name,
            CoercionReason::MissingRequired,
        )),
        RawField::Present(json) => coerce_value(&field.ty, json).map_err(|e| e.under(field.name)),
    }
}

/// Coerce a present (non-null) JSON value. Errors carry a path relative to the value.
pub fn coerce_value(ty: &SemanticType, json: &Json) -> Result<Value, CoercionError> {
    let leaf = |reason| CoercionError::new("", reason);
    let unexpected = |expected| {
        leaf(CoercionReason::UnexpectedType {
            expected,
            found: json_kind(json),
        })
    };

    match ty {
        SemanticType::Int(width) => {
            let quantity = match json {
                Json::Number(n) => number_quantity(n),
                Json::String(s) => Quantity::parse(s).map_err(|e| quantity_reason(s, e)),
                _ => return Err(unexpected("integer")),
            }
            .map_err(leaf)?;
            narrow(&quantity, *width).map(Value::Int).map_err(leaf)
        }

        SemanticType::WideInt => {
            let quantity = match json {
                Json::Number(n) => number_quantity(n),
                Json::String(s) => Quantity::parse(s).map_err(|e| quantity_reason(s, e)),
                _ => return Err(unexpected("integer")),
            }
            .map_err(leaf)?;
            Ok(Value::Wide(quantity.to_decimal()))
        }

        SemanticType::Text => match json {
            Json::String(s) => Ok(Value::Text(s.clone())),
            _ => Err(unexpected("string")),
        },

        SemanticType::Hex(len) => match json {
            Json::String(s) => hex(s, *len).map(Value::Text).map_err(leaf),
            _ => Err(unexpected("hex string")),
        },

        SemanticType::Bool => match json {
            Json::Bool(b) => Ok(Value::Bool(*b)),
            _ => Err(unexpected("boolean")),
        },

        SemanticType::Timestamp => timestamp(json)
            .map(Value::Timestamp)
            .map_err(leaf),

        SemanticType::Array(elem) => {
            let Json::Array(items) = json else {
                return Err(unexpected("array"));
            };
            items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    let index = format!("[{i}]");
                    match item {
                        Json::Null => Err(CoercionError::new(
                            index,
                            CoercionReason::MissingRequired,
                        )),
                        item => coerce_value(elem, item).map_err(|e| e.under(&index)),
                    }
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }

        SemanticType::Struct(fields) => {
            let Json::Object(object) = json else {
                return Err(unexpected("object"));
            };
            fields
                .iter()
                .map(|field| coerce_field(field, RawField::lookup(object, field.source)))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Struct)
        }
    }
}

/// JSON numbers keep their literal text (`arbitrary_precision`), so large literals
/// are parsed exactly and fractional or exponent forms are refused.
fn number_quantity(n: &Number) -> Result<Quantity, CoercionReason> {
    if let Some(i) = n.as_i64() {
        return Ok(Quantity::from(i));
    }
    let text = n.to_string();
    Quantity::parse(&text).map_err(|e| quantity_reason(&text, e))
}

fn quantity_reason(raw: &str, err: QuantityError) -> CoercionReason {
    match err {
        QuantityError::Empty | QuantityError::InvalidDigits(_) => {
            CoercionReason::InvalidInteger(raw.to_string())
        }
        QuantityError::TooWide(value) => CoercionReason::Overflow { value, bits: 256 },
        QuantityError::OutOfRange { value, bits } => CoercionReason::Overflow { value, bits },
    }
}

fn narrow(quantity: &Quantity, width: IntWidth) -> Result<i64, CoercionReason> {
    quantity
        .to_signed(width.bits())
        .map_err(|e| quantity_reason(&quantity.to_decimal(), e))
}

fn hex(raw: &str, len: HexLen) -> Result<String, CoercionReason> {
    normalize_hex(raw, len.bytes()).map_err(|e| match e {
        HexError::Invalid(_) => CoercionReason::InvalidHex(raw.to_string()),
        HexError::WrongLength { expected, found } => {
            CoercionReason::WrongLength { expected, found }
        }
    })
}

/// Unix seconds (number, decimal or hex quantity), RFC 3339, or `YYYY-MM-DD HH:MM:SS` UTC.
fn timestamp(json: &Json) -> Result<DateTime<Utc>, CoercionReason> {
    let invalid = |raw: &str| CoercionReason::InvalidTimestamp(raw.to_string());

    let seconds = match json {
        Json::Number(n) => number_quantity(n)
            .and_then(|q| narrow(&q, IntWidth::I64))
            .map_err(|_| invalid(&n.to_string()))?,
        Json::String(s) => {
            if let Ok(q) = Quantity::parse(s) {
                narrow(&q, IntWidth::I64).map_err(|_| invalid(s))?
            } else if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return Ok(ts.with_timezone(&Utc));
            } else if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Ok(naive.and_utc());
            } else {
                return Err(invalid(s));
            }
        }
        other => {
            return Err(CoercionReason::UnexpectedType {
                expected: "timestamp",
                found: json_kind(other),
            });
        }
    };

    DateTime::from_timestamp(seconds, 0).ok_or_else(|| invalid(&seconds.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{BLOCKS, RECEIPTS, TRANSACTIONS};
    use crate::value::Origin;
    use serde_json::json;
    use std::{path::Path, sync::Arc};

    const HASH_A: &str = "0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
    const ADDR: &str = "0x00000000219ab540356cBB839Cbe05303d7705Fa";
    const U256_MAX: &str =
        "115792089237316195423570985008687907853269984665640564039457584007913129639935";

    fn raw(value: Json) -> RawRecord {
        RawRecord {
            origin: Origin {
                file: Arc::from(Path::new("test.jsonl")),
                line: 1,
            },
            fields: value.as_object().cloned().unwrap(),
        }
    }

    fn transaction() -> Json {
        json!({
            "hash": HASH_A,
            "blockHash": "0x".to_string() + &"b".repeat(64),
            "blockNumber": "0x10",
            "block_timestamp": 1_700_000_000,
            "transactionIndex": 3,
            "from": ADDR,
            "value": U256_MAX,
            "gas": "21000",
            "nonce": "0x0",
            "input": "0x",
        })
    }

    #[test]
    fn coerces_a_transaction_and_keeps_wide_values_exact() {
        let coercer = Coercer::new(&TRANSACTIONS).unwrap();
        let record = coercer.coerce(&raw(transaction())).unwrap();

        assert_eq!(record.key(), HASH_A.to_lowercase());
        assert_eq!(record.watermark().timestamp(), 1_700_000_000);
        assert_eq!(
            record.get(&TRANSACTIONS, "value"),
            Some(&Value::Wide(U256_MAX.to_string()))
        );
        assert_eq!(record.get(&TRANSACTIONS, "block_number"), Some(&Value::Int(16)));
        assert_eq!(
            record.get(&TRANSACTIONS, "from"),
            Some(&Value::Text(ADDR.to_lowercase()))
        );
    }

    #[test]
    fn absent_nullable_field_is_null_not_empty() {
        let coercer = Coercer::new(&TRANSACTIONS).unwrap();
        let record = coercer.coerce(&raw(transaction())).unwrap();
        assert_eq!(record.get(&TRANSACTIONS, "to"), Some(&Value::Null));
    }

    #[test]
    fn missing_required_field_rejects_the_record() {
        let mut tx = transaction();
        tx.as_object_mut().unwrap().remove("hash");
        let err = Coercer::new(&TRANSACTIONS)
            .unwrap()
            .coerce(&raw(tx))
            .unwrap_err();
        assert_eq!(err.field, "hash");
        assert_eq!(err.reason, CoercionReason::MissingRequired);

        let mut tx = transaction();
        tx["gas"] = Json::Null;
        let err = Coercer::new(&TRANSACTIONS)
            .unwrap()
            .coerce(&raw(tx))
            .unwrap_err();
        assert_eq!(err.field, "gas");
    }

    #[test]
    fn wide_integers_refuse_non_digits() {
        for bad in [
            json!("12abc"),
            json!("1.5"),
            json!(1.5),
            json!(1e3),
            json!(true),
            json!(" 42"),
            json!("42 "),
            json!("\t7\n"),
        ] {
            assert!(coerce_value(&SemanticType::WideInt, &bad).is_err(), "{bad}");
            assert!(coerce_value(&SemanticType::Int(IntWidth::I64), &bad).is_err(), "{bad}");
        }
        assert_eq!(
            coerce_value(&SemanticType::WideInt, &json!("-0042")).unwrap(),
            Value::Wide("-42".into())
        );
    }

    #[test]
    fn wide_integer_literals_are_not_rounded() {
        let literal: Json = serde_json::from_str(U256_MAX).unwrap();
        assert_eq!(
            coerce_value(&SemanticType::WideInt, &literal).unwrap(),
            Value::Wide(U256_MAX.into())
        );
    }

    #[test]
    fn narrow_integers_are_range_checked() {
        let err = coerce_value(&SemanticType::Int(IntWidth::I32), &json!("0x80000000")).unwrap_err();
        assert!(matches!(err.reason, CoercionReason::Overflow { bits: 32, .. }));
        let err = coerce_value(&SemanticType::Int(IntWidth::I64), &json!(U256_MAX)).unwrap_err();
        assert!(matches!(err.reason, CoercionReason::Overflow { bits: 64, .. }));
    }

    #[test]
    fn hex_fields_are_normalized_or_rejected() {
        let address = SemanticType::Hex(HexLen::Fixed(20));
        assert_eq!(
            coerce_value(&address, &json!(ADDR)).unwrap(),
            Value::Text(ADDR.to_lowercase())
        );
        let err = coerce_value(&address, &json!("0x1234")).unwrap_err();
        assert_eq!(
            err.reason,
            CoercionReason::WrongLength {
                expected: 20,
                found: 2
            }
        );
        assert!(coerce_value(&address, &json!("0xZZ00000000000000000000000000000000000000")).is_err());
    }

    #[test]
    fn booleans_must_be_native() {
        assert_eq!(coerce_value(&SemanticType::Bool, &json!(false)).unwrap(), Value::Bool(false));
        assert!(coerce_value(&SemanticType::Bool, &json!(0)).is_err());
        assert!(coerce_value(&SemanticType::Bool, &json!(1)).is_err());
        assert!(coerce_value(&SemanticType::Bool, &json!("true")).is_err());
    }

    #[test]
    fn timestamps_accept_seconds_and_text_forms() {
        let expected = DateTime::from_timestamp(1_438_269_988, 0).unwrap();
        for form in [
            json!(1_438_269_988),
            json!("1438269988"),
            json!("0x55ba4224"),
            json!("2015-07-30T15:26:28Z"),
            json!("2015-07-30 15:26:28"),
        ] {
            assert_eq!(
                coerce_value(&SemanticType::Timestamp, &form).unwrap(),
                Value::Timestamp(expected),
                "{form}"
            );
        }
        for bad in [json!("yesterday"), json!(" 1438269988"), json!("1438269988\n")] {
            assert!(coerce_value(&SemanticType::Timestamp, &bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn log_order_and_nested_paths_are_preserved() {
        let topic = |c: char| format!("0x{}", c.to_string().repeat(64));
        let log = |i: i64| {
            json!({
                "address": ADDR,
                "topics": [topic('1'), topic('2')],
                "data": "0x",
                "logIndex": i,
                "removed": false,
            })
        };
        let logs = RECEIPTS.field("logs").unwrap();

        let value = coerce_field(logs, RawField::Present(&json!([log(7), log(2), log(5)]))).unwrap();
        let Value::Array(items) = value else {
            panic!("logs must coerce to an array");
        };
        let indices: Vec<_> = items
            .iter()
            .map(|item| match item {
                Value::Struct(values) => values[3].clone(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(indices, vec![Value::Int(7), Value::Int(2), Value::Int(5)]);

        let mut broken = log(1);
        broken["topics"][1] = json!("0x12");
        let err = coerce_field(logs, RawField::Present(&json!([log(0), broken]))).unwrap_err();
        assert_eq!(err.field, "logs[1].topics[1]");
    }

    #[test]
    fn block_without_hash_is_rejected() {
        let block = json!({
            "number": 1,
            "parentHash": HASH_A,
            "timestamp": "0x55ba4224",
            "gasLimit": "0x1388",
            "gasUsed": "0x0",
        });
        let err = Coercer::new(&BLOCKS).unwrap().coerce(&raw(block)).unwrap_err();
        assert_eq!(err.field, "hash");
    }
}
