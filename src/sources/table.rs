use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::warn;

use crate::error::SourceError;
use crate::sources::FlowSource;
use crate::types::{FlowUnit, RawObservation, ReachId, SourceKind};

#[derive(Debug, Deserialize)]
struct TableRow {
    id: String,
    date: NaiveDate,
    value: Option<f64>,
}

/// Per-key, per-date predictions loaded from an `id,date,value` CSV.
/// Every value in the table is in `unit`.
#[derive(Debug, Clone)]
pub struct FlowTable {
    kind: SourceKind,
    name: String,
    unit: FlowUnit,
    rows: Vec<RawObservation>,
}

impl FlowTable {
    pub fn new(kind: SourceKind, name: impl Into<String>, mut rows: Vec<RawObservation>) -> Self {
        let unit = rows
            .first()
            .map(|row| row.unit)
            .unwrap_or(FlowUnit::CANONICAL);
        for row in &mut rows {
            if let Some(key) = canonical_key(kind, &row.key) {
                row.key = key;
            }
        }
        Self {
            kind,
            name: name.into(),
            unit,
            rows,
        }
    }

    pub fn from_csv_path(path: &Path, kind: SourceKind, unit: FlowUnit) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("failed opening {kind} table: {}", path.display()))?;
        let mut rows = Vec::new();
        let mut unparsed = 0usize;
        for (line, row) in reader.deserialize::<TableRow>().enumerate() {
            let row = row.with_context(|| {
                format!("invalid row {} in {}", line + 2, path.display())
            })?;
            let Some(value) = row.value else {
                continue;
            };
            let key = match canonical_key(kind, &row.id) {
                Some(key) => key,
                None => {
                    if kind == SourceKind::ReachModel {
                        unparsed += 1;
                    }
                    row.id.trim().to_string()
                }
            };
            rows.push(RawObservation::new(key, row.date, value, unit));
        }
        if unparsed > 0 {
            warn!(table = %path.display(), unparsed, "reach-model keys that are not reach ids will never join");
        }
        Ok(Self {
            kind,
            name: path.display().to_string(),
            unit,
            rows,
        })
    }

    pub fn unit(&self) -> FlowUnit {
        self.unit
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn dates(&self) -> BTreeSet<NaiveDate> {
        self.rows.iter().map(|row| row.date).collect()
    }
}

/// Reach-model keys are rewritten into the form the reach join requests
/// (`ReachId`'s display), so `5781369.0` and `5781369` meet.
fn canonical_key(kind: SourceKind, raw: &str) -> Option<String> {
    match kind {
        SourceKind::ReachModel => raw.parse::<ReachId>().ok().map(|id| id.to_string()),
        SourceKind::Model | SourceKind::Gauge => None,
    }
}

#[async_trait]
impl FlowSource for FlowTable {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(
        &self,
        keys: &BTreeSet<String>,
        date: NaiveDate,
    ) -> Result<Vec<RawObservation>, SourceError> {
        if !self.rows.is_empty() && !self.rows.iter().any(|row| row.date == date) {
            return Err(SourceError::unavailable(
                self.kind,
                format!("{} has no values for {date}", self.name),
            ));
        }
        Ok(self
            .rows
            .iter()
            .filter(|row| row.date == date && keys.contains(&row.key))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, d).expect("valid date")
    }

    #[tokio::test]
    async fn fetch_returns_only_requested_keys_for_the_date() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nwm.csv");
        std::fs::write(
            &path,
            "id,date,value\n5781369,2024-07-15,2.5\n5781369,2024-07-14,2.0\n900,2024-07-15,1.0\n901,2024-07-15,\n",
        )
        .expect("write");

        let table = FlowTable::from_csv_path(&path, SourceKind::ReachModel, FlowUnit::CubicMetersPerSecond)
            .expect("load");
        assert_eq!(table.len(), 3);
        assert_eq!(table.unit(), FlowUnit::CubicMetersPerSecond);

        let keys: BTreeSet<String> = ["5781369".to_string()].into_iter().collect();
        let rows = table.fetch(&keys, day(15)).await.expect("fetch");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, 2.5);
        assert_eq!(rows[0].unit, FlowUnit::CubicMetersPerSecond);
    }

    #[tokio::test]
    async fn float_reach_keys_meet_the_reach_join() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nwm.csv");
        std::fs::write(&path, "id,date,value\n5781369.0,2024-07-15,2.5\n 900 ,2024-07-15,1.0\n").expect("write");

        let table = FlowTable::from_csv_path(&path, SourceKind::ReachModel, FlowUnit::CubicMetersPerSecond)
            .expect("load");
        let keys: BTreeSet<String> = [ReachId(5_781_369).to_string(), ReachId(900).to_string()]
            .into_iter()
            .collect();
        let rows = table.fetch(&keys, day(15)).await.expect("fetch");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key, "5781369");
        assert_eq!(rows[0].value, 2.5);
    }

    #[tokio::test]
    async fn model_keys_are_left_as_written() {
        let table = FlowTable::new(
            SourceKind::Model,
            "predictions",
            vec![RawObservation::new("42.0", day(15), 1.0, FlowUnit::CubicFeetPerSecond)],
        );
        let keys: BTreeSet<String> = ["42.0".to_string()].into_iter().collect();
        assert_eq!(table.fetch(&keys, day(15)).await.expect("fetch").len(), 1);
    }

    #[tokio::test]
    async fn table_without_the_target_date_is_unavailable() {
        let table = FlowTable::new(
            SourceKind::Model,
            "predictions",
            vec![RawObservation::new("a", day(14), 1.0, FlowUnit::CubicFeetPerSecond)],
        );
        let keys: BTreeSet<String> = ["a".to_string()].into_iter().collect();
        let err = table.fetch(&keys, day(15)).await.expect_err("no such date");
        assert!(matches!(err, SourceError::Unavailable { .. }));
        assert_eq!(table.dates().len(), 1);
    }
}
