use chainhouse_core::WriteError;
use chainhouse_ingest::{FieldSpec, IntWidth, Record, SemanticType, Value};
use chrono::{DateTime, Utc};
use sqlx::{Postgres, query_builder::Separated};

/// A column value in the Rust type sqlx binds for its Postgres column type.
/// Nulls stay typed so the bind matches the column.
#[derive(Debug, Clone, PartialEq)]
pub enum PgValue {
    Int(Option<i32>),
    BigInt(Option<i64>),
    Text(Option<String>),
    Bool(Option<bool>),
    Timestamp(Option<DateTime<Utc>>),
    IntArray(Option<Vec<i32>>),
    BigIntArray(Option<Vec<i64>>),
    TextArray(Option<Vec<String>>),
    BoolArray(Option<Vec<bool>>),
    TimestampArray(Option<Vec<DateTime<Utc>>>),
    Json(Option<serde_json::Value>),
}

impl PgValue {
    pub fn push(self, row: &mut Separated<'_, '_, Postgres, &'static str>) {
        match self {
            Self::Int(v) => row.push_bind(v),
            Self::BigInt(v) => row.push_bind(v),
            Self::Text(v) => row.push_bind(v),
            Self::Bool(v) => row.push_bind(v),
            Self::Timestamp(v) => row.push_bind(v),
            Self::IntArray(v) => row.push_bind(v),
            Self::BigIntArray(v) => row.push_bind(v),
            Self::TextArray(v) => row.push_bind(v),
            Self::BoolArray(v) => row.push_bind(v),
            Self::TimestampArray(v) => row.push_bind(v),
            Self::Json(v) => row.push_bind(v),
        };
    }
}

/// Convert one record into bindable values, in registry column order.
pub fn to_row(fields: &[FieldSpec], record: &Record) -> Result<Vec<PgValue>, WriteError> {
    if fields.len() != record.values().len() {
        return Err(WriteError::TypeMismatch {
            column: format!("<{} of {} columns>", record.values().len(), fields.len()),
        });
    }
    fields
        .iter()
        .zip(record.values())
        .map(|(field, value)| {
            if !field.nullable && value.is_null() {
                return Err(mismatch(field));
            }
            to_pg(&field.ty, value).ok_or_else(|| mismatch(field))
        })
        .collect()
}

fn mismatch(field: &FieldSpec) -> WriteError {
    WriteError::TypeMismatch {
        column: field.name.to_string(),
    }
}

fn to_pg(ty: &SemanticType, value: &Value) -> Option<PgValue> {
    if !value.conforms(ty) {
        return None;
    }
    Some(match ty {
        SemanticType::Int(IntWidth::I32) => PgValue::Int(match value {
            Value::Int(n) => Some(i32::try_from(*n).ok()?),
            _ => None,
        }),
        SemanticType::Int(IntWidth::I64) => PgValue::BigInt(int(value)),
        SemanticType::WideInt | SemanticType::Text | SemanticType::Hex(_) => {
            PgValue::Text(value.as_str().map(str::to_string))
        }
        SemanticType::Bool => PgValue::Bool(match value {
            Value::Bool(b) => Some(*b),
            _ => None,
        }),
        SemanticType::Timestamp => PgValue::Timestamp(value.as_timestamp()),
        SemanticType::Array(elem) if elem.is_scalar() => match elem {
            SemanticType::Int(IntWidth::I32) => {
                PgValue::IntArray(array(value, |v| int(v).and_then(|n| i32::try_from(n).ok()))?)
            }
            SemanticType::Int(IntWidth::I64) => PgValue::BigIntArray(array(value, int)?),
            SemanticType::Bool => PgValue::BoolArray(array(value, |v| match v {
                Value::Bool(b) => Some(*b),
                _ => None,
            })?),
            SemanticType::Timestamp => PgValue::TimestampArray(array(value, Value::as_timestamp)?),
            _ => PgValue::TextArray(array(value, |v| v.as_str().map(str::to_string))?),
        },
        SemanticType::Array(_) | SemanticType::Struct(_) => {
            PgValue::Json((!value.is_null()).then(|| value.to_json(ty)))
        }
    })
}

/// `Some(None)` for a null array; `None` if any element fails `item`.
fn array<T>(value: &Value, item: impl Fn(&Value) -> Option<T>) -> Option<Option<Vec<T>>> {
    match value {
        Value::Array(items) => items.iter().map(item).collect::<Option<Vec<_>>>().map(Some),
        _ => Some(None),
    }
}

fn int(value: &Value) -> Option<i64> {
    match value {
        Value::Int(n) => Some(*n),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainhouse_ingest::schema::{RECEIPTS, TRANSACTIONS};

    #[test]
    fn nulls_bind_with_their_column_type() {
        let to = TRANSACTIONS.field("to").unwrap();
        assert_eq!(to_pg(&to.ty, &Value::Null), Some(PgValue::Text(None)));
        let kind = TRANSACTIONS.field("type").unwrap();
        assert_eq!(to_pg(&kind.ty, &Value::Null), Some(PgValue::Int(None)));
        let hashes = TRANSACTIONS.field("blob_versioned_hashes").unwrap();
        assert_eq!(to_pg(&hashes.ty, &Value::Null), Some(PgValue::TextArray(None)));
    }

    #[test]
    fn wide_integers_bind_as_text() {
        let value = TRANSACTIONS.field("value").unwrap();
        assert_eq!(
            to_pg(&value.ty, &Value::Wide("340282366920938463463374607431768211456".into())),
            Some(PgValue::Text(Some(
                "340282366920938463463374607431768211456".into()
            )))
        );
    }

    #[test]
    fn hash_arrays_become_text_arrays() {
        let hashes = TRANSACTIONS.field("blob_versioned_hashes").unwrap();
        let value = Value::Array(vec![Value::Text("0x01".into()), Value::Text("0x02".into())]);
        assert_eq!(
            to_pg(&hashes.ty, &value),
            Some(PgValue::TextArray(Some(vec!["0x01".into(), "0x02".into()])))
        );
    }

    #[test]
    fn logs_bind_as_json() {
        let logs = RECEIPTS.field("logs").unwrap();
        let bound = to_pg(&logs.ty, &Value::Array(vec![])).unwrap();
        assert_eq!(bound, PgValue::Json(Some(serde_json::json!([]))));
    }

    #[test]
    fn mismatched_values_are_refused() {
        let kind = TRANSACTIONS.field("type").unwrap();
        assert_eq!(to_pg(&kind.ty, &Value::Int(i64::MAX)), None);
        assert_eq!(to_pg(&kind.ty, &Value::Text("2".into())), None);
    }
}
