use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

use crate::catalog::Catalog;
use crate::crosswalk::{cached_match, CrosswalkBatch, CrosswalkResolver, MatchSet};
use crate::metrics::subsets::{MetricsEngine, SubsetMetrics};
use crate::reconcile::{request_keys, Reconciler, Reconciliation};
use crate::sources::{fetch_batch, SourceBatch, SourceRegistry, SourceStatus};
use crate::types::SourceKind;

/// Counts reported at every stage so partial coverage is visible.
#[derive(Debug, Clone, Serialize)]
pub struct StageCounts {
    pub sites_loaded: usize,
    pub sites_resolved: usize,
    pub cached_matches: usize,
    pub lookup_failures: usize,
    pub records_per_source: BTreeMap<SourceKind, usize>,
    pub unavailable_sources: Vec<SourceKind>,
    pub date_mismatches: usize,
    pub rows: usize,
    pub sites_by_source_count: BTreeMap<usize, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source: SourceKind,
    pub requested: usize,
    pub status: SourceStatus,
    pub records: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub target_date: NaiveDate,
    pub counts: StageCounts,
    pub sources: Vec<SourceReport>,
    pub crosswalk: CrosswalkBatch,
    pub reconciliation: Reconciliation,
    pub metrics: Vec<SubsetMetrics>,
}

/// One fetch, reconcile and evaluate path, parameterised by the registered
/// sources.
pub struct Pipeline {
    resolver: CrosswalkResolver,
    sources: SourceRegistry,
    engine: MetricsEngine,
    regions: Vec<String>,
}

impl Pipeline {
    pub fn new(
        resolver: CrosswalkResolver,
        sources: SourceRegistry,
        engine: MetricsEngine,
        regions: Vec<String>,
    ) -> Self {
        Self {
            resolver,
            sources,
            engine,
            regions,
        }
    }

    pub fn resolver(&self) -> &CrosswalkResolver {
        &self.resolver
    }

    /// Resolves every catalog site, reusing `cached` entries.
    pub async fn resolve(&self, catalog: &Catalog, cached: &MatchSet) -> CrosswalkBatch {
        self.resolver.resolve_missing(catalog.sites(), cached).await
    }

    /// Fetches each registered source for the keys its join needs.
    pub async fn fetch(
        &self,
        catalog: &Catalog,
        matches: &MatchSet,
        target_date: NaiveDate,
    ) -> (Vec<SourceBatch>, Vec<SourceReport>) {
        let mut batches = Vec::new();
        let mut reports = Vec::new();
        for source in self.sources.sources() {
            let kind = source.kind();
            let keys = request_keys(kind, catalog.sites(), matches);
            let batch = fetch_batch(source.as_ref(), &keys, target_date).await;
            reports.push(SourceReport {
                source: kind,
                requested: keys.len(),
                status: batch.status.clone(),
                records: batch.records.len(),
                rejected: batch.rejected,
            });
            batches.push(batch);
        }
        (batches, reports)
    }

    pub async fn run(&self, catalog: &Catalog, target_date: NaiveDate, cached: &MatchSet) -> RunReport {
        info!(sites = catalog.len(), date = %target_date, "starting validation run");

        let cached_matches = catalog
            .sites()
            .iter()
            .filter(|site| cached_match(site, cached).is_some())
            .count();
        let crosswalk = self.resolve(catalog, cached).await;
        let sites_resolved = crosswalk.resolved_count();
        let lookup_failures = crosswalk.failures.len();
        let matches = &crosswalk.records;

        let (batches, sources) = self.fetch(catalog, matches, target_date).await;
        let reconciliation = Reconciler::new(target_date).reconcile(catalog.sites(), &batches, matches);
        let metrics = self.engine.evaluate(&reconciliation.rows, &self.regions);

        let counts = StageCounts {
            sites_loaded: catalog.len(),
            sites_resolved,
            cached_matches,
            lookup_failures,
            records_per_source: sources.iter().map(|s| (s.source, s.records)).collect(),
            unavailable_sources: sources
                .iter()
                .filter(|s| s.status != SourceStatus::Available)
                .map(|s| s.source)
                .collect(),
            date_mismatches: reconciliation.summary.date_mismatches.len(),
            rows: reconciliation.rows.len(),
            sites_by_source_count: reconciliation.summary.sites_by_source_count.clone(),
        };
        info!(
            sites_loaded = counts.sites_loaded,
            sites_resolved = counts.sites_resolved,
            cached = counts.cached_matches,
            lookup_failures = counts.lookup_failures,
            unavailable_sources = counts.unavailable_sources.len(),
            date_mismatches = counts.date_mismatches,
            rows = counts.rows,
            subsets = metrics.len(),
            "validation run complete"
        );

        RunReport {
            target_date,
            counts,
            sources,
            crosswalk,
            reconciliation,
            metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::crosswalk::memory::{InMemoryReachIndex, ReachPoint};
    use crate::crosswalk::{LookupBackend, ResolverOptions, SearchRadius};
    use crate::error::SourceError;
    use crate::metrics::MetricsConfig;
    use crate::sources::table::FlowTable;
    use crate::sources::FlowSource;
    use crate::types::{AltIdentifiers, FlowUnit, RawObservation, ReachId, Site};

    struct Offline;

    #[async_trait]
    impl FlowSource for Offline {
        fn kind(&self) -> SourceKind {
            SourceKind::Gauge
        }

        fn name(&self) -> &str {
            "offline gauges"
        }

        async fn fetch(
            &self,
            _keys: &BTreeSet<String>,
            _date: NaiveDate,
        ) -> Result<Vec<RawObservation>, SourceError> {
            Err(SourceError::unavailable(SourceKind::Gauge, "connection refused"))
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, 15).expect("valid date")
    }

    fn catalog() -> Catalog {
        let sites = vec![
            Site {
                entity_id: "near".to_string(),
                alt_identifiers: AltIdentifiers {
                    gauge_id: Some("08066500".to_string()),
                    reach_id: None,
                },
                longitude: -95.0,
                latitude: 30.0,
                region: "TX".to_string(),
            },
            Site {
                entity_id: "far".to_string(),
                alt_identifiers: AltIdentifiers::default(),
                longitude: -120.0,
                latitude: 38.0,
                region: "CA".to_string(),
            },
        ];
        Catalog::from_sites(sites).expect("catalog")
    }

    fn pipeline(sources: SourceRegistry) -> Pipeline {
        let index = InMemoryReachIndex::new(vec![ReachPoint {
            reach_id: ReachId(1_114_345),
            longitude: -95.001,
            latitude: 30.0,
        }]);
        let options = ResolverOptions::new(
            SearchRadius::meters(500.0).expect("radius"),
            4,
            Duration::from_secs(5),
        )
        .expect("options");
        let resolver = CrosswalkResolver::new(LookupBackend::Spatial(Arc::new(index)), options);
        Pipeline::new(
            resolver,
            sources,
            MetricsEngine::new(MetricsConfig::default()),
            vec!["TX".to_string(), "CA".to_string(), "Other".to_string()],
        )
    }

    #[tokio::test]
    async fn run_survives_an_unavailable_source_and_reports_counts() {
        let model = FlowTable::new(
            SourceKind::Model,
            "model",
            vec![
                RawObservation::new("near", day(), 100.0, FlowUnit::CubicFeetPerSecond),
                RawObservation::new("far", day(), 40.0, FlowUnit::CubicFeetPerSecond),
            ],
        );
        let reach = FlowTable::new(
            SourceKind::ReachModel,
            "reach model",
            vec![
                RawObservation::new("1114345", day(), 2.0, FlowUnit::CubicMetersPerSecond),
                // Keyed like an entity id; must never join.
                RawObservation::new("far", day(), 9.0, FlowUnit::CubicMetersPerSecond),
            ],
        );
        let sources = SourceRegistry::new()
            .with(Arc::new(model))
            .with(Arc::new(Offline))
            .with(Arc::new(reach));

        let report = pipeline(sources).run(&catalog(), day(), &MatchSet::new()).await;

        assert_eq!(report.counts.sites_loaded, 2);
        assert_eq!(report.counts.sites_resolved, 1);
        assert_eq!(report.counts.unavailable_sources, vec![SourceKind::Gauge]);
        assert_eq!(report.counts.rows, 2);

        let near = &report.reconciliation.rows[0];
        assert_eq!(near.entity_id, "near");
        assert_eq!(near.gauge_value, None);
        let reach_value = near.reach_model_value.expect("joined on resolved reach");
        assert!((reach_value - 2.0 * crate::types::CMS_TO_CFS).abs() < 1e-9);

        let far = &report.reconciliation.rows[1];
        assert_eq!(far.reach_model_value, None);
        assert_eq!(report.counts.sites_by_source_count.get(&1), Some(&1));
        assert_eq!(report.counts.sites_by_source_count.get(&2), Some(&1));

        // Three pairs over All plus three regions.
        assert_eq!(report.metrics.len(), 12);
        assert!(report.metrics.iter().all(|m| m.outcome.result().is_none()));
    }

    #[tokio::test]
    async fn cached_matches_skip_lookups() {
        let mut cached = MatchSet::new();
        cached.insert(
            "far".to_string(),
            crate::types::MatchRecord::matched("far", ReachId(42), 10.0, crate::types::MatchMethod::Spatial),
        );
        let report = pipeline(SourceRegistry::new())
            .run(&catalog(), day(), &cached)
            .await;
        assert_eq!(report.counts.cached_matches, 1);
        assert_eq!(report.counts.sites_resolved, 2);
        assert_eq!(report.crosswalk.records["far"].resolved_reach_id, Some(ReachId(42)));
        assert_eq!(report.counts.rows, 0);
    }
}
