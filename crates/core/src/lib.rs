pub mod config;
pub mod error;
pub mod kind;
pub mod telemetry;

pub use config::{EntitySettings, Settings};
pub use error::{CoercionError, CoercionReason, ConfigError, SourceReadError, WriteError};
pub use kind::{EntityKind, LoadMode};
