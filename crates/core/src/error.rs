use std::path::PathBuf;
use thiserror::Error;

/// Failure to read raw source files. Fatal to the run for that entity kind.
#[derive(Debug, Error)]
pub enum SourceReadError {
    #[error("source directory {} does not exist", .0.display())]
    MissingDirectory(PathBuf),

    #[error("source path {} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("I/O error reading {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}:{}: invalid JSON: {}", .path.display(), .line, .source)]
    MalformedLine {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("{}:{}: expected a JSON object, found {}", .path.display(), .line, .found)]
    NotAnObject {
        path: PathBuf,
        line: usize,
        found: &'static str,
    },

    #[error("read cancelled")]
    Cancelled,
}

/// Why a single field failed to coerce.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoercionReason {
    #[error("missing required field")]
    MissingRequired,

    #[error("expected {expected}, found {found}")]
    UnexpectedType {
        expected: &'static str,
        found: &'static str,
    },

    #[error("invalid integer {0:?}")]
    InvalidInteger(String),

    #[error("value {value} does not fit in a signed {bits}-bit integer")]
    Overflow { value: String, bits: u32 },

    #[error("invalid hex {0:?}")]
    InvalidHex(String),

    #[error("expected {expected} bytes, found {found}")]
    WrongLength { expected: usize, found: usize },

    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),
}

/// A record-level coercion failure. Non-fatal: the record is dropped and counted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("field `{field}`: {reason}")]
pub struct CoercionError {
    pub field: String,
    pub reason: CoercionReason,
}

impl CoercionError {
    pub fn new(field: impl Into<String>, reason: CoercionReason) -> Self {
        Self {
            field: field.into(),
            reason,
        }
    }

    /// Prefix the field path with its parent, e.g. `[2]` inside `topics` inside
    /// `logs[0]` reads `logs[0].topics[2]`.
    pub fn under(self, parent: &str) -> Self {
        let field = if self.field.is_empty() {
            parent.to_string()
        } else if self.field.starts_with('[') {
            format!("{parent}{}", self.field)
        } else {
            format!("{parent}.{}", self.field)
        };
        Self {
            field,
            reason: self.reason,
        }
    }
}

/// Storage-layer failure while writing a load. Fatal to the run; never retried here.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("database error: {0}")]
    Database(String),

    #[error("table {table} has no partition for {partition}")]
    MissingPartition { table: String, partition: String },

    #[error("table {0} does not exist")]
    MissingTable(String),

    #[error("row for column `{column}` does not match its declared type")]
    TypeMismatch { column: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown entity kind {0:?}")]
    UnknownEntity(String),

    #[error("unknown load mode {0:?}")]
    UnknownLoadMode(String),

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}
