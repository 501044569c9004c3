use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use crate::crosswalk::MatchSet;
use crate::error::DateMismatch;
use crate::sources::{SourceBatch, SourceStatus};
use crate::types::{ComparisonRow, Site, SourceKind};

/// Which site attribute a source's values are keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKey {
    EntityId,
    GaugeId,
    ResolvedReachId,
}

impl JoinKey {
    /// Per-source join rule. The reach model is keyed by the crosswalk's
    /// resolved reach, never by entity id.
    pub fn for_source(source: SourceKind) -> Self {
        match source {
            SourceKind::Model => JoinKey::EntityId,
            SourceKind::Gauge => JoinKey::GaugeId,
            SourceKind::ReachModel => JoinKey::ResolvedReachId,
        }
    }

    pub fn key_for(self, site: &Site, matches: &MatchSet) -> Option<String> {
        match self {
            JoinKey::EntityId => Some(site.entity_id.clone()),
            JoinKey::GaugeId => site.alt_identifiers.gauge_id.clone(),
            JoinKey::ResolvedReachId => matches
                .get(&site.entity_id)
                .and_then(|record| record.join_reach())
                .map(|reach| reach.to_string()),
        }
    }
}

/// Keys to request from `source` for the given sites.
pub fn request_keys(source: SourceKind, sites: &[Site], matches: &MatchSet) -> BTreeSet<String> {
    let join = JoinKey::for_source(source);
    sites
        .iter()
        .filter_map(|site| join.key_for(site, matches))
        .collect()
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceSummary {
    pub available: bool,
    pub received: usize,
    pub joined: usize,
    pub duplicates: usize,
    pub date_mismatches: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileSummary {
    pub target_date: NaiveDate,
    pub sites: usize,
    pub rows: usize,
    pub dropped_sites: usize,
    pub per_source: BTreeMap<SourceKind, SourceSummary>,
    pub sites_by_source_count: BTreeMap<usize, usize>,
    pub date_mismatches: Vec<DateMismatch>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Reconciliation {
    pub rows: Vec<ComparisonRow>,
    pub summary: ReconcileSummary,
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    target_date: NaiveDate,
}

impl Reconciler {
    pub fn new(target_date: NaiveDate) -> Self {
        Self { target_date }
    }

    pub fn target_date(&self) -> NaiveDate {
        self.target_date
    }

    /// Joins every available source into one row per site. Sites with no
    /// value from any source are dropped. Values dated other than the target
    /// date are discarded and reported.
    pub fn reconcile(
        &self,
        sites: &[Site],
        batches: &[SourceBatch],
        matches: &MatchSet,
    ) -> Reconciliation {
        let mut per_source: BTreeMap<SourceKind, SourceSummary> = BTreeMap::new();
        let mut lookups: BTreeMap<SourceKind, HashMap<&str, f64>> = BTreeMap::new();
        let mut date_mismatches = Vec::new();

        for batch in batches {
            if lookups.contains_key(&batch.source) {
                warn!(source = batch.source.as_slug(), "ignoring second batch for source");
                continue;
            }
            let summary = per_source.entry(batch.source).or_default();
            summary.available = batch.status == SourceStatus::Available;
            summary.received = batch.records.len();

            let mut values: HashMap<&str, f64> = HashMap::with_capacity(batch.records.len());
            for record in &batch.records {
                if record.date() != self.target_date {
                    let mismatch = DateMismatch {
                        source_kind: batch.source,
                        key: record.key().to_string(),
                        expected: self.target_date,
                        found: record.date(),
                    };
                    warn!("discarding value: {mismatch}");
                    summary.date_mismatches += 1;
                    date_mismatches.push(mismatch);
                    continue;
                }
                if values.contains_key(record.key()) {
                    summary.duplicates += 1;
                    continue;
                }
                values.insert(record.key(), record.value());
            }
            if summary.duplicates > 0 {
                warn!(
                    source = batch.source.as_slug(),
                    duplicates = summary.duplicates,
                    "kept first value for duplicated keys"
                );
            }
            lookups.insert(batch.source, values);
        }

        let mut rows = Vec::new();
        for site in sites {
            let mut row = ComparisonRow {
                entity_id: site.entity_id.clone(),
                region: site.region.clone(),
                date: self.target_date,
                gauge_id: site.alt_identifiers.gauge_id.clone(),
                reach_id: matches.get(&site.entity_id).and_then(|m| m.join_reach()),
                model_value: None,
                gauge_value: None,
                reach_model_value: None,
            };
            for (source, values) in &lookups {
                let Some(key) = JoinKey::for_source(*source).key_for(site, matches) else {
                    continue;
                };
                let Some(value) = values.get(key.as_str()).copied() else {
                    continue;
                };
                match source {
                    SourceKind::Model => row.model_value = Some(value),
                    SourceKind::Gauge => row.gauge_value = Some(value),
                    SourceKind::ReachModel => row.reach_model_value = Some(value),
                }
                if let Some(summary) = per_source.get_mut(source) {
                    summary.joined += 1;
                }
            }
            if row.source_count() > 0 {
                rows.push(row);
            }
        }

        let mut sites_by_source_count = BTreeMap::new();
        for row in &rows {
            *sites_by_source_count.entry(row.source_count()).or_insert(0) += 1;
        }

        let summary = ReconcileSummary {
            target_date: self.target_date,
            sites: sites.len(),
            rows: rows.len(),
            dropped_sites: sites.len() - rows.len(),
            per_source,
            sites_by_source_count,
            date_mismatches,
        };
        info!(
            date = %summary.target_date,
            sites = summary.sites,
            rows = summary.rows,
            dropped = summary.dropped_sites,
            date_mismatches = summary.date_mismatches.len(),
            "reconciliation complete"
        );
        for (count, sites) in &summary.sites_by_source_count {
            info!(sources = count, sites, "sites by available source count");
        }

        Reconciliation { rows, summary }
    }
}
