//! Registry-driven ingestion of EVM NDJSON exports.

pub mod coerce;
pub mod memory;
pub mod pipeline;
pub mod planner;
pub mod raw;
pub mod report;
pub mod schema;
pub mod value;
pub mod writer;

pub use coerce::Coercer;
pub use memory::MemoryWarehouse;
pub use pipeline::{LoadError, LoadJob, Pipeline, Stage};
pub use planner::{Plan, PlanReport};
pub use raw::{RawField, RawRecord, RawSource};
pub use report::{RejectionSample, RunReport, RunStatus};
pub use schema::{EntitySchema, FieldSpec, HexLen, IntWidth, Layout, SchemaError, SemanticType};
pub use value::{Origin, Record, Value};
pub use writer::{MonthPartition, TableRef, TableSession, Warehouse, WriteProgress};
