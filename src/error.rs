use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

use crate::types::SourceKind;

/// A single site's reach lookup failed. Local to that site.
#[derive(Debug, Clone, Error, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CrosswalkLookupError {
    #[error("lookup service unreachable: {0}")]
    Unreachable(String),
    #[error("lookup for {entity_id} timed out after {after_ms} ms")]
    Timeout { entity_id: String, after_ms: u64 },
    #[error("malformed lookup response: {0}")]
    Malformed(String),
}

/// A source failed for a whole date or batch.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SourceError {
    #[error("{source_kind} source unavailable: {reason}")]
    Unavailable { source_kind: SourceKind, reason: String },
    #[error("{source_kind} source returned malformed data: {reason}")]
    Malformed { source_kind: SourceKind, reason: String },
}

impl SourceError {
    pub fn unavailable(source_kind: SourceKind, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            source_kind,
            reason: reason.into(),
        }
    }

    pub fn malformed(source_kind: SourceKind, reason: impl Into<String>) -> Self {
        Self::Malformed {
            source_kind,
            reason: reason.into(),
        }
    }
}

/// A fetched value dated differently from the requested target date.
/// Recorded and discarded by the reconciler; never merged.
#[derive(Debug, Clone, Error, PartialEq, Serialize)]
#[error("{source_kind} value for {key} is dated {found}, expected {expected}")]
pub struct DateMismatch {
    pub source_kind: SourceKind,
    pub key: String,
    pub expected: NaiveDate,
    pub found: NaiveDate,
}

/// Structural catalog failures. These halt a run.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("site catalog is empty")]
    Empty,
    #[error("duplicate entity id in catalog: {0}")]
    DuplicateEntity(String),
    #[error("failed parsing catalog: {0}")]
    Parse(String),
    #[error("failed reading catalog: {0}")]
    Io(#[from] std::io::Error),
}

/// Observed and predicted sequences handed to the metrics engine differ in length.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("observed and predicted sequences are misaligned ({observed} vs {predicted} values)")]
pub struct MisalignedInput {
    pub observed: usize,
    pub predicted: usize,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("search radius must be positive and finite, got {0}")]
    InvalidRadius(f64),
    #[error("worker pool width must be at least 1")]
    ZeroConcurrency,
    #[error("minimum pair count must be at least 2, got {0}")]
    MinPairsTooSmall(usize),
    #[error("region {label} has an empty or inverted bounding box")]
    InvalidRegion { label: String },
}
