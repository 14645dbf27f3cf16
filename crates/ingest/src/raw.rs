//! Raw Record Reader: newline-delimited JSON files, one directory per entity kind.

use chainhouse_core::{EntityKind, SourceReadError};
use serde_json::{Map, Value as Json};
use std::{
    fs::File,
    io::{BufRead, BufReader, Lines},
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::value::Origin;

const EXTENSIONS: [&str; 3] = ["json", "jsonl", "ndjson"];

/// A raw field lookup. `Absent` (key missing) and `Null` (explicit JSON null) are
/// kept apart because required and nullable columns treat them differently.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawField<'a> {
    Absent,
    Null,
    Present(&'a Json),
}

impl<'a> RawField<'a> {
    /// Look `keys` up in order; the first key that exists wins, even if it is null.
    pub fn lookup(object: &'a Map<String, Json>, keys: &[&str]) -> Self {
        keys.iter()
            .find_map(|key| object.get(*key))
            .map_or(Self::Absent, |value| match value {
                Json::Null => Self::Null,
                other => Self::Present(other),
            })
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Absent | Self::Null)
    }
}

/// One source line: an untyped JSON object and where it came from.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub origin: Origin,
    pub fields: Map<String, Json>,
}

impl RawRecord {
    pub fn field(&self, keys: &[&str]) -> RawField<'_> {
        RawField::lookup(&self.fields, keys)
    }
}

/// The raw files of one entity kind, in deterministic file-name order.
#[derive(Debug, Clone)]
pub struct RawSource {
    kind: EntityKind,
    dir: PathBuf,
    files: Vec<PathBuf>,
}

impl RawSource {
    /// Enumerate the `*.json`, `*.jsonl` and `*.ndjson` files of `dir`. Hidden files
    /// and subdirectories are ignored.
    pub fn open(dir: impl AsRef<Path>, kind: EntityKind) -> Result<Self, SourceReadError> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            return Err(SourceReadError::MissingDirectory(dir));
        }
        if !dir.is_dir() {
            return Err(SourceReadError::NotADirectory(dir));
        }

        let io_err = |source| SourceReadError::Io {
            path: dir.clone(),
            source,
        };

        let mut files = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            let path = entry.path();
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            let matches_ext = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)));
            if !hidden && matches_ext && entry.file_type().map_err(io_err)?.is_file() {
                files.push(path);
            }
        }
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        tracing::debug!(entity = %kind, dir = %dir.display(), files = files.len(), "Enumerated raw files");

        Ok(Self { kind, dir, files })
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// A fresh lazy pass over every record. Call again to restart from the top.
    pub fn records(&self) -> RawRecords {
        RawRecords {
            pending: self.files.clone().into_iter(),
            current: None,
            done: false,
        }
    }
}

struct OpenFile {
    path: Arc<Path>,
    lines: Lines<BufReader<File>>,
    line: usize,
}

/// Lazy iterator over raw records. The first error ends the iteration.
pub struct RawRecords {
    pending: std::vec::IntoIter<PathBuf>,
    current: Option<OpenFile>,
    done: bool,
}

impl RawRecords {
    fn next_record(&mut self) -> Option<Result<RawRecord, SourceReadError>> {
        loop {
            if self.current.is_none() {
                let path = self.pending.next()?;
                match File::open(&path) {
                    Ok(file) => {
                        self.current = Some(OpenFile {
                            path: Arc::from(path),
                            lines: BufReader::new(file).lines(),
                            line: 0,
                        })
                    }
                    Err(source) => return Some(Err(SourceReadError::Io { path, source })),
                }
            }

            let file = self.current.as_mut()?;
            let Some(line) = file.lines.next() else {
                self.current = None;
                continue;
            };
            file.line += 1;

            let text = match line {
                Ok(text) => text,
                Err(source) => {
                    return Some(Err(SourceReadError::Io {
                        path: file.path.to_path_buf(),
                        source,
                    }));
                }
            };
            if text.trim().is_empty() {
                continue;
            }

            let origin = Origin {
                file: file.path.clone(),
                line: file.line,
            };
            return Some(parse_line(&text, origin));
        }
    }
}

fn parse_line(text: &str, origin: Origin) -> Result<RawRecord, SourceReadError> {
    match serde_json::from_str::<Json>(text) {
        Ok(Json::Object(fields)) => Ok(RawRecord { origin, fields }),
        Ok(other) => Err(SourceReadError::NotAnObject {
            path: origin.file.to_path_buf(),
            line: origin.line,
            found: json_kind(&other),
        }),
        Err(source) => Err(SourceReadError::MalformedLine {
            path: origin.file.to_path_buf(),
            line: origin.line,
            source,
        }),
    }
}

impl Iterator for RawRecords {
    type Item = Result<RawRecord, SourceReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.next_record();
        if !matches!(item, Some(Ok(_))) {
            self.done = true;
        }
        item
    }
}

/// JSON type name for diagnostics.
pub fn json_kind(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn write(dir: &Path, name: &str, body: &str) {
        let mut file = File::create(dir.join(name)).unwrap();
        file.write_all(body.as_bytes()).unwrap();
    }

    #[test]
    fn absent_and_null_are_distinct() {
        let object = json!({ "to": null, "gasPrice": "0x1" });
        let object = object.as_object().unwrap();
        assert_eq!(RawField::lookup(object, &["to"]), RawField::Null);
        assert_eq!(RawField::lookup(object, &["contract_address"]), RawField::Absent);
        assert_eq!(
            RawField::lookup(object, &["gas_price", "gasPrice"]),
            RawField::Present(&json!("0x1"))
        );
    }

    #[test]
    fn reads_matching_files_in_name_order_and_restarts() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.jsonl", "{\"n\":3}\n");
        write(dir.path(), "a.json", "{\"n\":1}\n\n{\"n\":2}\n");
        write(dir.path(), "notes.txt", "not json");
        write(dir.path(), ".partial.json", "{");

        let source = RawSource::open(dir.path(), EntityKind::Blocks).unwrap();
        assert_eq!(source.files().len(), 2);

        let read = |source: &RawSource| -> Vec<(i64, usize)> {
            source
                .records()
                .map(|r| {
                    let r = r.unwrap();
                    (r.fields["n"].as_i64().unwrap(), r.origin.line)
                })
                .collect()
        };
        assert_eq!(read(&source), vec![(1, 1), (2, 3), (3, 1)]);
        assert_eq!(read(&source), read(&source));
    }

    #[test]
    fn invalid_line_stops_the_pass() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "0001.ndjson", "{\"n\":1}\n{\"n\":\n{\"n\":3}\n");

        let source = RawSource::open(dir.path(), EntityKind::Receipts).unwrap();
        let items: Vec<_> = source.records().collect();
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(
            items[1],
            Err(SourceReadError::MalformedLine { line: 2, .. })
        ));
    }

    #[test]
    fn non_object_lines_are_framing_errors() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "x.json", "[1,2]\n");
        let source = RawSource::open(dir.path(), EntityKind::Blocks).unwrap();
        let first = source.records().next().unwrap();
        assert!(matches!(
            first,
            Err(SourceReadError::NotAnObject { found: "array", .. })
        ));
    }

    #[test]
    fn missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            RawSource::open(&missing, EntityKind::Transactions),
            Err(SourceReadError::MissingDirectory(_))
        ));
    }
}
