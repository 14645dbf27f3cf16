use chainhouse_core::{CoercionError, EntityKind, LoadMode};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::value::Origin;

/// Relied upon by every incremental run; surfaced so callers can see it.
pub const ORDERING_ASSUMPTION: &str = "extractor never re-emits records at or behind the stored watermark under a new key";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

/// One rejected record: where it was and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectionSample {
    pub file: String,
    pub line: usize,
    pub field: String,
    pub reason: String,
}

/// Structured summary of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub entity: EntityKind,
    pub table: String,
    pub mode: LoadMode,
    pub status: RunStatus,
    pub files: usize,
    pub read: u64,
    pub coerced: u64,
    pub rejected: u64,
    pub rejection_samples: Vec<RejectionSample>,
    pub candidates: u64,
    pub skipped_watermark: u64,
    pub skipped_duplicate: u64,
    pub inserted: u64,
    /// Whether the inserts are visible. A failed run rolls back whatever it inserted.
    pub committed: bool,
    /// Records behind the watermark that are not stored. Only checked in strict mode.
    pub late_records: Option<u64>,
    pub watermark_before: Option<DateTime<Utc>>,
    pub watermark_after: Option<DateTime<Utc>>,
    pub assumptions: Vec<&'static str>,
    pub elapsed_ms: u64,
}

impl RunReport {
    pub fn new(entity: EntityKind, table: impl Into<String>, mode: LoadMode) -> Self {
        Self {
            entity,
            table: table.into(),
            mode,
            status: RunStatus::Running,
            files: 0,
            read: 0,
            coerced: 0,
            rejected: 0,
            rejection_samples: Vec::new(),
            candidates: 0,
            skipped_watermark: 0,
            skipped_duplicate: 0,
            inserted: 0,
            committed: false,
            late_records: None,
            watermark_before: None,
            watermark_after: None,
            assumptions: Vec::new(),
            elapsed_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
    }
}

/// Counts rejected records and keeps the first `limit` reasons.
#[derive(Debug, Clone)]
pub struct Rejections {
    limit: usize,
    count: u64,
    samples: Vec<RejectionSample>,
}

impl Rejections {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            count: 0,
            samples: Vec::with_capacity(limit.min(64)),
        }
    }

    pub fn record(&mut self, origin: &Origin, err: &CoercionError) {
        self.count += 1;
        if self.samples.len() < self.limit {
            let file = origin.file.display().to_string();
            tracing::warn!(file = %file, line = origin.line, field = %err.field, reason = %err.reason, "Rejected record");
            self.samples.push(RejectionSample {
                file,
                line: origin.line,
                field: err.field.clone(),
                reason: err.reason.to_string(),
            });
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn samples(&self) -> &[RejectionSample] {
        &self.samples
    }

    pub fn into_parts(self) -> (u64, Vec<RejectionSample>) {
        (self.count, self.samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainhouse_core::CoercionReason;
    use std::{path::Path, sync::Arc};

    #[test]
    fn rejections_count_everything_but_sample_a_prefix() {
        let origin = |line| Origin {
            file: Arc::from(Path::new("blocks/0001.jsonl")),
            line,
        };
        let err = CoercionError::new("hash", CoercionReason::MissingRequired);

        let mut rejections = Rejections::new(2);
        for line in 1..=5 {
            rejections.record(&origin(line), &err);
        }

        assert_eq!(rejections.count(), 5);
        let lines: Vec<_> = rejections.samples().iter().map(|s| s.line).collect();
        assert_eq!(lines, vec![1, 2]);
        assert_eq!(rejections.samples()[0].reason, "missing required field");
    }

    #[test]
    fn report_serializes_with_stable_names() {
        let mut report = RunReport::new(EntityKind::Receipts, "receipts", LoadMode::FullRefresh);
        report.status = RunStatus::Succeeded;
        let json: serde_json::Value = serde_json::from_str(&report.to_json()).unwrap();
        assert_eq!(json["entity"], "receipts");
        assert_eq!(json["mode"], "full-refresh");
        assert_eq!(json["status"], "succeeded");
        assert!(json["late_records"].is_null());
    }
}
