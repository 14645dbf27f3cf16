use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::error::ConfigError;

/// The chain entities loaded into the warehouse. One pipeline runs per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Blocks,
    Transactions,
    Receipts,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [Self::Blocks, Self::Transactions, Self::Receipts];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blocks => "blocks",
            Self::Transactions => "transactions",
            Self::Receipts => "receipts",
        }
    }

    /// Upper-case prefix used for per-kind environment variables (`BLOCKS_DIR`, ...).
    pub fn env_prefix(&self) -> &'static str {
        match self {
            Self::Blocks => "BLOCKS",
            Self::Transactions => "TRANSACTIONS",
            Self::Receipts => "RECEIPTS",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block" | "blocks" => Ok(Self::Blocks),
            "transaction" | "transactions" | "tx" | "txs" => Ok(Self::Transactions),
            "receipt" | "receipts" => Ok(Self::Receipts),
            other => Err(ConfigError::UnknownEntity(other.to_string())),
        }
    }
}

/// How a load run treats the target table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadMode {
    /// Only records strictly newer than the stored watermark are admitted.
    Incremental,
    /// The table is dropped, recreated and rebuilt from every source record.
    FullRefresh,
}

impl LoadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incremental => "incremental",
            Self::FullRefresh => "full-refresh",
        }
    }
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "incremental" => Ok(Self::Incremental),
            "full-refresh" | "full_refresh" | "fullrefresh" => Ok(Self::FullRefresh),
            other => Err(ConfigError::UnknownLoadMode(other.to_string())),
        }
    }
}
