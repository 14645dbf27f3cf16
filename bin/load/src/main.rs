//! Chainhouse loader: moves extracted EVM NDJSON files into the warehouse.
//!
//! Flow:
//! 1. Read settings and connect to PostgreSQL
//! 2. Start one pipeline per configured entity kind, concurrently
//! 3. Each pipeline reads, coerces, plans and writes inside one locked transaction
//! 4. Emit every run report as JSON; exit non-zero if any pipeline failed
//!
//! Ctrl-C aborts the in-flight pipelines; their transactions roll back.

use chainhouse_core::{EntityKind, Settings, telemetry};
use chainhouse_ingest::{LoadError, LoadJob, Pipeline, RunReport};
use chainhouse_storage::{self as storage, PgWarehouse};
use eyre::Result;
use tokio::task::JoinSet;

#[tokio::main]
async fn main() -> Result<()> {
    // ── Initialisation ──────────────────────────────────────────────────
    telemetry::init();
    let settings = Settings::from_env()?;

    tracing::info!(
        mode = %settings.mode,
        schema = %settings.warehouse_schema,
        entities = settings.entities.len(),
        "Starting Chainhouse loader"
    );

    let pool = storage::connect(&settings.database_url).await?;
    tracing::info!("Connected to database");

    let warehouse = PgWarehouse::new(pool, settings.warehouse_schema.clone());
    warehouse.prepare().await?;

    // ── Pipelines ───────────────────────────────────────────────────────
    let mut runs = JoinSet::new();
    for entity in &settings.entities {
        let pipeline = Pipeline::new(warehouse.clone(), LoadJob::from_settings(&settings, entity));
        let kind = entity.kind;
        runs.spawn(async move { (kind, pipeline.run().await) });
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut failed: Vec<EntityKind> = Vec::new();
    let mut panicked = 0usize;
    let mut interrupted = false;

    loop {
        tokio::select! {
            _ = &mut shutdown, if !interrupted => {
                tracing::warn!(pending = runs.len(), "Interrupted, rolling back in-flight loads…");
                interrupted = true;
                runs.abort_all();
            }
            joined = runs.join_next() => {
                let Some(joined) = joined else { break };
                match joined {
                    Ok((_, Ok(report))) => emit(&report),
                    Ok((kind, Err(err))) => {
                        failed.push(kind);
                        on_failure(kind, &err);
                    }
                    Err(err) if err.is_cancelled() => {
                        tracing::warn!("Pipeline cancelled before completion");
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "Pipeline task panicked");
                        panicked += 1;
                    }
                }
            }
        }
    }

    if interrupted {
        eyre::bail!("load interrupted; unfinished pipelines were rolled back");
    }
    if !failed.is_empty() || panicked > 0 {
        let names: Vec<&str> = failed.iter().map(|k| k.as_str()).collect();
        eyre::bail!(
            "{} pipeline(s) failed: [{}]",
            failed.len() + panicked,
            names.join(", ")
        );
    }

    tracing::info!("All pipelines finished.");
    Ok(())
}

/// Hand the report to whatever collects logs. One JSON document per run.
fn emit(report: &RunReport) {
    tracing::info!(
        target: "chainhouse::report",
        entity = %report.entity,
        status = ?report.status,
        report = %report.to_json(),
        "Run report"
    );
}

fn on_failure(kind: EntityKind, err: &LoadError) {
    tracing::error!(entity = %kind, error = %err, "Pipeline failed");
    if let Some(report) = err.report() {
        emit(report);
    }
}
