pub mod http;
pub mod nldi;
pub mod nwis;
pub mod table;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::SourceError;
use crate::types::{ObservationRecord, RawObservation, SourceKind};

/// A feed of per-key flow values for a date.
///
/// Implementations return values exactly as reported, including the date the
/// upstream attached to each value and its raw unit. Unit conversion happens
/// once, in [`ingest`].
#[async_trait]
pub trait FlowSource: Send + Sync {
    fn kind(&self) -> SourceKind;
    fn name(&self) -> &str;
    async fn fetch(
        &self,
        keys: &BTreeSet<String>,
        date: NaiveDate,
    ) -> Result<Vec<RawObservation>, SourceError>;
}

#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<Arc<dyn FlowSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: Arc<dyn FlowSource>) -> Self {
        self.register(source);
        self
    }

    /// Registers a source, replacing any earlier one of the same kind.
    pub fn register(&mut self, source: Arc<dyn FlowSource>) {
        self.sources.retain(|existing| existing.kind() != source.kind());
        self.sources.push(source);
    }

    pub fn sources(&self) -> &[Arc<dyn FlowSource>] {
        &self.sources
    }

    pub fn by_kind(&self, kind: SourceKind) -> Option<Arc<dyn FlowSource>> {
        self.sources.iter().find(|s| s.kind() == kind).cloned()
    }

    pub fn kinds(&self) -> Vec<SourceKind> {
        let mut kinds: Vec<SourceKind> = self.sources.iter().map(|s| s.kind()).collect();
        kinds.sort();
        kinds
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum SourceStatus {
    Available,
    Unavailable(String),
}

/// Normalised output of one source for one run.
#[derive(Debug, Clone, Serialize)]
pub struct SourceBatch {
    pub source: SourceKind,
    pub status: SourceStatus,
    pub records: Vec<ObservationRecord>,
    pub rejected: usize,
}

impl SourceBatch {
    pub fn unavailable(source: SourceKind, err: &SourceError) -> Self {
        Self {
            source,
            status: SourceStatus::Unavailable(err.to_string()),
            records: Vec::new(),
            rejected: 0,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == SourceStatus::Available
    }
}

/// Converts raw values to canonical units, dropping non-finite values.
pub fn ingest(source: SourceKind, raw: Vec<RawObservation>) -> SourceBatch {
    let total = raw.len();
    let records: Vec<ObservationRecord> = raw
        .into_iter()
        .filter_map(|value| ObservationRecord::ingest(source, value))
        .collect();
    let rejected = total - records.len();
    if rejected > 0 {
        warn!(source = source.as_slug(), rejected, "dropped non-finite values");
    }
    SourceBatch {
        source,
        status: SourceStatus::Available,
        records,
        rejected,
    }
}

/// Fetches one source and ingests it. Failure yields an unavailable batch so
/// the run can continue with the other sources.
pub async fn fetch_batch(
    source: &dyn FlowSource,
    keys: &BTreeSet<String>,
    date: NaiveDate,
) -> SourceBatch {
    let kind = source.kind();
    if keys.is_empty() {
        info!(source = kind.as_slug(), "no keys to request");
        return ingest(kind, Vec::new());
    }
    match source.fetch(keys, date).await {
        Ok(raw) => {
            let batch = ingest(kind, raw);
            info!(
                source = kind.as_slug(),
                name = source.name(),
                requested = keys.len(),
                received = batch.records.len(),
                "source fetched"
            );
            batch
        }
        Err(err) => {
            warn!(source = kind.as_slug(), name = source.name(), "{err}");
            SourceBatch::unavailable(kind, &err)
        }
    }
}
