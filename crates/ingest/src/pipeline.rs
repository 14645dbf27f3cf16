//! One load run for one entity kind: Reader → Coercion → Planner → Writer.

use chainhouse_core::{EntityKind, EntitySettings, LoadMode, Settings, SourceReadError, WriteError};
use std::{
    fmt,
    future::Future,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};
use thiserror::Error;

use crate::coerce::Coercer;
use crate::planner;
use crate::raw::RawSource;
use crate::report::{ORDERING_ASSUMPTION, Rejections, RunReport, RunStatus};
use crate::schema::{EntitySchema, Layout, SchemaError};
use crate::value::Record;
use crate::writer::{TableRef, TableSession, Warehouse, WriteProgress, write_ordered};

/// Everything one run needs to know.
#[derive(Debug, Clone)]
pub struct LoadJob {
    pub kind: EntityKind,
    pub source_dir: PathBuf,
    pub table: String,
    pub mode: LoadMode,
    /// Applies to the read stage and to the write stage separately.
    pub timeout: Option<Duration>,
    pub strict_ordering: bool,
    pub rejection_sample: usize,
    pub chunk_size: usize,
}

impl LoadJob {
    pub fn new(
        kind: EntityKind,
        source_dir: impl Into<PathBuf>,
        table: impl Into<String>,
        mode: LoadMode,
    ) -> Self {
        Self {
            kind,
            source_dir: source_dir.into(),
            table: table.into(),
            mode,
            timeout: None,
            strict_ordering: false,
            rejection_sample: 10,
            chunk_size: 1000,
        }
    }

    pub fn from_settings(settings: &Settings, entity: &EntitySettings) -> Self {
        Self {
            kind: entity.kind,
            source_dir: entity.source_dir.clone(),
            table: entity.table.clone(),
            mode: settings.mode,
            timeout: settings.timeout,
            strict_ordering: settings.strict_ordering,
            rejection_sample: settings.rejection_sample_size,
            chunk_size: settings.insert_chunk_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Read,
    Write,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Write => "write",
        })
    }
}

/// A failed run. Every variant but `Schema` carries the report as it stood.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("source read failed: {source}")]
    Source {
        #[source]
        source: SourceReadError,
        report: Box<RunReport>,
    },

    #[error("write failed: {source}")]
    Write {
        #[source]
        source: WriteError,
        report: Box<RunReport>,
    },

    #[error("{stage} stage timed out after {after:?}")]
    Timeout {
        stage: Stage,
        after: Duration,
        report: Box<RunReport>,
    },

    #[error("all {} records were rejected", .report.rejected)]
    NothingCoerced { report: Box<RunReport> },

    #[error("{late} records at or behind the watermark are not stored; source was re-emitted out of order")]
    OutOfOrder { late: u64, report: Box<RunReport> },

    #[error("read task failed: {message}")]
    Task {
        message: String,
        report: Box<RunReport>,
    },
}

impl LoadError {
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            Self::Schema(_) => None,
            Self::Source { report, .. }
            | Self::Write { report, .. }
            | Self::Timeout { report, .. }
            | Self::NothingCoerced { report }
            | Self::OutOfOrder { report, .. }
            | Self::Task { report, .. } => Some(report),
        }
    }
}

/// Why a run stopped, before the report is attached.
#[derive(Debug)]
enum Failure {
    Source(SourceReadError),
    Write(WriteError),
    Timeout { stage: Stage, after: Duration },
    NothingCoerced,
    OutOfOrder(u64),
    Task(String),
}

impl From<WriteError> for Failure {
    fn from(err: WriteError) -> Self {
        Self::Write(err)
    }
}

impl Failure {
    fn with_report(self, report: RunReport) -> LoadError {
        let report = Box::new(report);
        match self {
            Self::Source(source) => LoadError::Source { source, report },
            Self::Write(source) => LoadError::Write { source, report },
            Self::Timeout { stage, after } => LoadError::Timeout {
                stage,
                after,
                report,
            },
            Self::NothingCoerced => LoadError::NothingCoerced { report },
            Self::OutOfOrder(late) => LoadError::OutOfOrder { late, report },
            Self::Task(message) => LoadError::Task { message, report },
        }
    }
}

// ─── Read stage ─────────────────────────────────────────────────────────────

struct ReadOutcome {
    files: usize,
    read: u64,
    records: Vec<Record>,
    rejections: Rejections,
    error: Option<SourceReadError>,
}

/// Blocking: enumerate, read and coerce. Stops at the first source error or when
/// `cancel` is raised, keeping the counts gathered so far.
fn read_and_coerce(
    dir: &Path,
    kind: EntityKind,
    coercer: &Coercer,
    sample: usize,
    cancel: &AtomicBool,
) -> ReadOutcome {
    let mut out = ReadOutcome {
        files: 0,
        read: 0,
        records: Vec::new(),
        rejections: Rejections::new(sample),
        error: None,
    };

    let source = match RawSource::open(dir, kind) {
        Ok(source) => source,
        Err(err) => {
            out.error = Some(err);
            return out;
        }
    };
    out.files = source.files().len();

    for raw in source.records() {
        if cancel.load(Ordering::Relaxed) {
            out.error = Some(SourceReadError::Cancelled);
            break;
        }
        match raw {
            Ok(raw) => {
                out.read += 1;
                match coercer.coerce(&raw) {
                    Ok(record) => out.records.push(record),
                    Err(err) => out.rejections.record(&raw.origin, &err),
                }
            }
            Err(err) => {
                out.error = Some(err);
                break;
            }
        }
    }
    out
}

/// Raises the read stage's cancel flag when the run stops waiting for it, whether
/// by timeout or because the run itself was dropped.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

async fn within<F: Future>(limit: Option<Duration>, fut: F) -> Result<F::Output, Duration> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| limit),
        None => Ok(fut.await),
    }
}

// ─── Pipeline ───────────────────────────────────────────────────────────────

/// Runs one [`LoadJob`] against a warehouse. Safe to re-run after any failure.
#[derive(Debug, Clone)]
pub struct Pipeline<W> {
    warehouse: W,
    job: LoadJob,
}

impl<W: Warehouse> Pipeline<W> {
    pub fn new(warehouse: W, job: LoadJob) -> Self {
        Self { warehouse, job }
    }

    pub fn job(&self) -> &LoadJob {
        &self.job
    }

    pub async fn run(&self) -> Result<RunReport, LoadError> {
        let started = Instant::now();
        let job = &self.job;
        let coercer = Coercer::new(EntitySchema::for_kind(job.kind))?;
        let mut report = RunReport::new(job.kind, &job.table, job.mode);

        tracing::info!(
            entity = %job.kind,
            table = %job.table,
            mode = %job.mode,
            dir = %job.source_dir.display(),
            "Starting load"
        );

        let result = self.execute(coercer, &mut report).await;
        report.elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                report.status = RunStatus::Succeeded;
                tracing::info!(
                    entity = %report.entity,
                    table = %report.table,
                    read = report.read,
                    coerced = report.coerced,
                    rejected = report.rejected,
                    candidates = report.candidates,
                    skipped_watermark = report.skipped_watermark,
                    skipped_duplicate = report.skipped_duplicate,
                    inserted = report.inserted,
                    elapsed_ms = report.elapsed_ms,
                    "Load complete"
                );
                Ok(report)
            }
            Err(failure) => {
                report.status = RunStatus::Failed;
                let err = failure.with_report(report);
                tracing::error!(entity = %job.kind, table = %job.table, error = %err, "Load failed");
                Err(err)
            }
        }
    }

    async fn execute(&self, coercer: Coercer, report: &mut RunReport) -> Result<(), Failure> {
        let job = &self.job;

        let cancel = Arc::new(AtomicBool::new(false));
        let task = {
            let cancel = cancel.clone();
            let coercer = coercer.clone();
            let dir = job.source_dir.clone();
            let (kind, sample) = (job.kind, job.rejection_sample);
            tokio::task::spawn_blocking(move || read_and_coerce(&dir, kind, &coercer, sample, &cancel))
        };

        let cancel_on_drop = CancelOnDrop(cancel);
        let outcome = match within(job.timeout, task).await {
            Ok(joined) => joined.map_err(|e| Failure::Task(e.to_string()))?,
            Err(after) => {
                return Err(Failure::Timeout {
                    stage: Stage::Read,
                    after,
                });
            }
        };
        drop(cancel_on_drop);

        report.files = outcome.files;
        report.read = outcome.read;
        report.coerced = outcome.records.len() as u64;
        let (rejected, samples) = outcome.rejections.into_parts();
        report.rejected = rejected;
        report.rejection_samples = samples;
        tracing::debug!(
            entity = %job.kind,
            files = report.files,
            read = report.read,
            coerced = report.coerced,
            rejected = report.rejected,
            "Read stage finished"
        );

        if let Some(err) = outcome.error {
            return Err(Failure::Source(err));
        }
        if report.coerced == 0 && report.read > 0 {
            return Err(Failure::NothingCoerced);
        }

        let table = TableRef::new(coercer.schema(), job.table.clone());
        let mut progress = WriteProgress::default();
        let written = within(
            job.timeout,
            self.write_stage(&table, coercer.layout(), outcome.records, report, &mut progress),
        )
        .await;
        report.inserted = progress.inserted;

        match written {
            Ok(result) => result,
            Err(after) => Err(Failure::Timeout {
                stage: Stage::Write,
                after,
            }),
        }
    }

    /// Plan and write inside one locked session. Any early return drops the
    /// session, which discards everything it did.
    async fn write_stage(
        &self,
        table: &TableRef,
        layout: &Layout,
        records: Vec<Record>,
        report: &mut RunReport,
        progress: &mut WriteProgress,
    ) -> Result<(), Failure> {
        let job = &self.job;
        let mut session = self.warehouse.open(table).await?;

        match job.mode {
            LoadMode::FullRefresh => {
                report.watermark_before = session.watermark().await?;
                session.recreate().await?;
            }
            LoadMode::Incremental => {
                session.ensure_table().await?;
                report.watermark_before = session.watermark().await?;
            }
        }

        let mut plan = planner::plan(job.mode, report.watermark_before, records);

        if job.mode == LoadMode::Incremental {
            if job.strict_ordering {
                let late = match plan.behind_watermark() {
                    [] => 0,
                    behind => plan.late(&session.stored_keys(behind).await?),
                };
                report.late_records = Some(late);
                if late > 0 {
                    return Err(Failure::OutOfOrder(late));
                }
            } else {
                report.assumptions.push(ORDERING_ASSUMPTION);
                if plan.report().skipped_watermark > 0 {
                    tracing::warn!(
                        entity = %job.kind,
                        skipped = plan.report().skipped_watermark,
                        "Skipped records behind the watermark without checking them"
                    );
                }
            }

            let keys = plan.keys();
            if !keys.is_empty() {
                let stored = session.stored_keys(&keys).await?;
                plan.drop_stored(&stored);
            }
        }

        let summary = plan.report();
        report.candidates = summary.candidates;
        report.skipped_watermark = summary.skipped_watermark;
        report.skipped_duplicate = summary.skipped_duplicate;

        write_ordered(&mut session, layout, plan.into_records(), job.chunk_size, progress).await?;
        report.skipped_duplicate += progress.refused;

        report.watermark_after = session.watermark().await?;
        session.commit().await?;
        report.committed = true;
        Ok(())
    }
}
