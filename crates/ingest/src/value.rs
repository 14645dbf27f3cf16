use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value as Json};
use std::{cmp::Ordering, path::Path, sync::Arc};

use crate::schema::{EntitySchema, Layout, SemanticType};

/// A coerced column value. The variant always matches the column's [`SemanticType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Int(i64),
    /// Canonical signed decimal text of a wide integer.
    Wide(String),
    /// Text and normalized hex strings.
    Text(String),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Array(Vec<Value>),
    /// Positional, aligned with the struct type's field list.
    Struct(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) | Self::Wide(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    /// Whether this value has the shape `ty` stores. Nulls are checked by the caller.
    pub fn conforms(&self, ty: &SemanticType) -> bool {
        match (self, ty) {
            (Self::Null, _) => true,
            (Self::Int(_), SemanticType::Int(_))
            | (Self::Wide(_), SemanticType::WideInt)
            | (Self::Text(_), SemanticType::Text | SemanticType::Hex(_))
            | (Self::Bool(_), SemanticType::Bool)
            | (Self::Timestamp(_), SemanticType::Timestamp) => true,
            (Self::Array(items), SemanticType::Array(elem)) => {
                items.iter().all(|v| !v.is_null() && v.conforms(elem))
            }
            (Self::Struct(values), SemanticType::Struct(fields)) => {
                values.len() == fields.len()
                    && fields
                        .iter()
                        .zip(values)
                        .all(|(f, v)| (f.nullable || !v.is_null()) && v.conforms(&f.ty))
            }
            _ => false,
        }
    }

    /// JSON rendering used for nested (JSONB) columns and for report output.
    /// Wide integers stay strings so no consumer narrows them through `f64`.
    pub fn to_json(&self, ty: &SemanticType) -> Json {
        match (self, ty) {
            (Self::Null, _) => Json::Null,
            (Self::Int(n), _) => Json::from(*n),
            (Self::Wide(s), _) | (Self::Text(s), _) => Json::String(s.clone()),
            (Self::Bool(b), _) => Json::Bool(*b),
            (Self::Timestamp(ts), _) => {
                Json::String(ts.to_rfc3339_opts(SecondsFormat::Secs, true))
            }
            (Self::Array(items), SemanticType::Array(elem)) => {
                Json::Array(items.iter().map(|v| v.to_json(elem)).collect())
            }
            (Self::Struct(values), SemanticType::Struct(fields)) => {
                let mut object = Map::new();
                for (field, value) in fields.iter().zip(values) {
                    object.insert(field.name.to_string(), value.to_json(&field.ty));
                }
                Json::Object(object)
            }
            (Self::Array(items), _) => Json::Array(
                items
                    .iter()
                    .map(|v| v.to_json(&SemanticType::Text))
                    .collect(),
            ),
            (Self::Struct(values), _) => Json::Array(
                values
                    .iter()
                    .map(|v| v.to_json(&SemanticType::Text))
                    .collect(),
            ),
        }
    }

    /// Ordering used for the physical write order. Nulls sort first; wide integers
    /// compare numerically.
    pub fn sort_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Null, _) => Ordering::Less,
            (_, Self::Null) => Ordering::Greater,
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Wide(a), Self::Wide(b)) => cmp_decimal(a, b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

/// Compare canonical decimal strings without parsing them.
fn cmp_decimal(a: &str, b: &str) -> Ordering {
    let (a_neg, a_digits) = a.strip_prefix('-').map_or((false, a), |d| (true, d));
    let (b_neg, b_digits) = b.strip_prefix('-').map_or((false, b), |d| (true, d));
    let magnitude = a_digits
        .len()
        .cmp(&b_digits.len())
        .then_with(|| a_digits.cmp(b_digits));
    match (a_neg, b_neg) {
        (false, false) => magnitude,
        (true, true) => magnitude.reverse(),
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
    }
}

/// Where a record came from: source file and 1-based line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub file: Arc<Path>,
    pub line: usize,
}

/// A fully typed row, positionally aligned with its entity schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    key: String,
    watermark: DateTime<Utc>,
    values: Vec<Value>,
    origin: Origin,
}

impl Record {
    /// Assemble a record, lifting the key and watermark out of `values`.
    /// Returns `None` when either is not populated with the right variant.
    pub fn new(layout: &Layout, values: Vec<Value>, origin: Origin) -> Option<Self> {
        let key = values.get(layout.key)?.as_str()?.to_string();
        let watermark = values.get(layout.watermark)?.as_timestamp()?;
        Some(Self {
            key,
            watermark,
            values,
            origin,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn watermark(&self) -> DateTime<Utc> {
        self.watermark
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn get(&self, schema: &EntitySchema, column: &str) -> Option<&Value> {
        schema.position(column).and_then(|i| self.values.get(i))
    }

    /// First column whose value breaks its declared type or nullability.
    pub fn nonconforming_column(&self, schema: &EntitySchema) -> Option<&'static str> {
        if self.values.len() != schema.fields.len() {
            return Some(schema.unique_key);
        }
        schema
            .fields
            .iter()
            .zip(&self.values)
            .find(|(field, value)| (!field.nullable && value.is_null()) || !value.conforms(&field.ty))
            .map(|(field, _)| field.name)
    }

    /// The record as a JSON object keyed by column name.
    pub fn to_json(&self, schema: &EntitySchema) -> Json {
        let mut object = Map::new();
        for (field, value) in schema.fields.iter().zip(&self.values) {
            object.insert(field.name.to_string(), value.to_json(&field.ty));
        }
        Json::Object(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_comparison_is_numeric() {
        assert_eq!(cmp_decimal("9", "10"), Ordering::Less);
        assert_eq!(cmp_decimal("-9", "-10"), Ordering::Greater);
        assert_eq!(cmp_decimal("-1", "0"), Ordering::Less);
        assert_eq!(cmp_decimal("123", "123"), Ordering::Equal);
    }

    #[test]
    fn conformance_follows_the_declared_type() {
        use crate::schema::{HexLen, IntWidth};
        static HASH: SemanticType = SemanticType::Hex(HexLen::Fixed(32));
        assert!(Value::Text("0xab".into()).conforms(&HASH));
        assert!(!Value::Int(1).conforms(&SemanticType::WideInt));
        assert!(Value::Null.conforms(&SemanticType::Int(IntWidth::I32)));
        assert!(!Value::Array(vec![Value::Null]).conforms(&SemanticType::Array(&HASH)));
    }

    #[test]
    fn nulls_sort_first() {
        assert_eq!(Value::Null.sort_cmp(&Value::Int(-5)), Ordering::Less);
        assert_eq!(Value::Int(3).sort_cmp(&Value::Null), Ordering::Greater);
    }
}
