//! Incremental Merge Planner. Pure: the caller supplies the stored watermark and
//! the stored keys, and applies the result inside its locked session.

use chainhouse_core::LoadMode;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::value::Record;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PlanReport {
    /// Records admitted by the load mode, before deduplication.
    pub candidates: u64,
    /// Incremental only: records at or behind the stored watermark.
    pub skipped_watermark: u64,
    /// Duplicate keys within the batch plus keys already stored.
    pub skipped_duplicate: u64,
}

#[derive(Debug, Clone)]
pub struct Plan {
    records: Vec<Record>,
    behind: Vec<String>,
    report: PlanReport,
}

/// Select the records a run may write.
///
/// `full-refresh` admits everything; `incremental` admits only records whose
/// watermark is strictly after `watermark` (an empty table admits everything).
/// Within the admitted batch the last record seen for a key wins.
pub fn plan(mode: LoadMode, watermark: Option<DateTime<Utc>>, records: Vec<Record>) -> Plan {
    let cutoff = match mode {
        LoadMode::FullRefresh => None,
        LoadMode::Incremental => watermark,
    };

    let mut report = PlanReport::default();
    let mut admitted = Vec::with_capacity(records.len());
    let mut behind = HashSet::new();
    for record in records {
        match cutoff {
            Some(cutoff) if record.watermark() <= cutoff => {
                report.skipped_watermark += 1;
                behind.insert(record.key().to_string());
            }
            _ => admitted.push(record),
        }
    }
    report.candidates = admitted.len() as u64;

    // Walk backwards so the first occurrence kept is the last one in source order.
    let mut seen = HashSet::with_capacity(admitted.len());
    let mut unique: Vec<Record> = admitted
        .into_iter()
        .rev()
        .filter(|record| seen.insert(record.key().to_string()))
        .collect();
    unique.reverse();
    report.skipped_duplicate = report.candidates - unique.len() as u64;

    let mut behind: Vec<String> = behind.into_iter().collect();
    behind.sort_unstable();

    Plan {
        records: unique,
        behind,
        report,
    }
}

impl Plan {
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn report(&self) -> PlanReport {
        self.report
    }

    /// Keys of the admitted records.
    pub fn keys(&self) -> Vec<String> {
        self.records.iter().map(|r| r.key().to_string()).collect()
    }

    /// Distinct keys of the records skipped for being at or behind the watermark.
    pub fn behind_watermark(&self) -> &[String] {
        &self.behind
    }

    /// How many skipped records are not stored under their key. Non-zero means
    /// the source was re-emitted out of watermark order.
    pub fn late(&self, stored: &HashSet<String>) -> u64 {
        self.behind.iter().filter(|key| !stored.contains(*key)).count() as u64
    }

    /// Drop admitted records whose key is already stored. Inserts never overwrite.
    pub fn drop_stored(&mut self, stored: &HashSet<String>) -> u64 {
        let before = self.records.len();
        self.records.retain(|r| !stored.contains(r.key()));
        let dropped = (before - self.records.len()) as u64;
        self.report.skipped_duplicate += dropped;
        dropped
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Layout;
    use crate::value::{Origin, Value};
    use std::{path::Path, sync::Arc};

    fn layout() -> Layout {
        Layout {
            key: 0,
            watermark: 1,
            order_by: vec![2],
        }
    }

    fn record(key: &str, secs: i64, line: usize) -> Record {
        let values = vec![
            Value::Text(key.to_string()),
            Value::Timestamp(DateTime::from_timestamp(secs, 0).unwrap()),
            Value::Int(line as i64),
        ];
        let origin = Origin {
            file: Arc::from(Path::new("a.jsonl")),
            line,
        };
        Record::new(&layout(), values, origin).unwrap()
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn incremental_admits_only_records_after_the_watermark() {
        let records = vec![record("a", 100, 1), record("b", 200, 2), record("c", 300, 3)];
        let plan = plan(LoadMode::Incremental, Some(ts(200)), records);

        assert_eq!(plan.keys(), vec!["c"]);
        assert_eq!(
            plan.report(),
            PlanReport {
                candidates: 1,
                skipped_watermark: 2,
                skipped_duplicate: 0
            }
        );
        assert_eq!(plan.behind_watermark(), ["a", "b"]);
    }

    #[test]
    fn empty_table_and_full_refresh_admit_everything() {
        let records = vec![record("a", 100, 1), record("b", 200, 2)];
        assert_eq!(plan(LoadMode::Incremental, None, records.clone()).keys().len(), 2);
        let refresh = plan(LoadMode::FullRefresh, Some(ts(500)), records);
        assert_eq!(refresh.keys().len(), 2);
        assert_eq!(refresh.report().skipped_watermark, 0);
    }

    #[test]
    fn last_seen_wins_within_a_batch() {
        let records = vec![record("a", 100, 1), record("b", 100, 2), record("a", 150, 3)];
        let plan = plan(LoadMode::FullRefresh, None, records);

        assert_eq!(plan.keys(), vec!["b", "a"]);
        let kept = &plan.records()[1];
        assert_eq!(kept.origin().line, 3);
        assert_eq!(kept.values()[2], Value::Int(3));
        assert_eq!(plan.report().skipped_duplicate, 1);
    }

    #[test]
    fn stored_keys_are_skipped_never_overwritten() {
        let mut plan = plan(
            LoadMode::Incremental,
            Some(ts(50)),
            vec![record("a", 100, 1), record("b", 100, 2)],
        );
        let stored: HashSet<String> = ["a".to_string()].into();
        assert_eq!(plan.drop_stored(&stored), 1);
        assert_eq!(plan.keys(), vec!["b"]);
        assert_eq!(plan.report().skipped_duplicate, 1);
    }

    #[test]
    fn late_records_are_those_behind_the_watermark_and_unstored() {
        let plan = plan(
            LoadMode::Incremental,
            Some(ts(200)),
            vec![record("old", 100, 1), record("stray", 150, 2), record("new", 300, 3)],
        );
        let stored: HashSet<String> = ["old".to_string()].into();
        assert_eq!(plan.late(&stored), 1);
        assert_eq!(plan.late(&HashSet::new()), 2);
    }
}
