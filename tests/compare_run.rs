use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use streamflow_validator::catalog::Catalog;
use streamflow_validator::crosswalk::memory::InMemoryReachIndex;
use streamflow_validator::crosswalk::{CrosswalkResolver, LookupBackend, ResolverOptions, SearchRadius};
use streamflow_validator::error::SourceError;
use streamflow_validator::metrics::subsets::{MetricsEngine, Scope, SourcePair};
use streamflow_validator::metrics::MetricsConfig;
use streamflow_validator::pipeline::{Pipeline, RunReport};
use streamflow_validator::region::RegionClassifier;
use streamflow_validator::snapshot::store::SnapshotStore;
use streamflow_validator::sources::table::FlowTable;
use streamflow_validator::sources::{FlowSource, SourceRegistry};
use streamflow_validator::types::{FlowUnit, RawObservation, SourceKind, CMS_TO_CFS};

const SITES: usize = 12;
const STALE_SITE: usize = 3;
const UNMATCHED_SITE: usize = 11;

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 7, 15).expect("valid date")
}

fn gauge_id(i: usize) -> String {
    format!("0800{i:04}")
}

fn gauge_flow(i: usize) -> f64 {
    100.0 + 20.0 * i as f64
}

/// Gauge feed that reports one station with the previous day's value.
struct StubGauges;

#[async_trait]
impl FlowSource for StubGauges {
    fn kind(&self) -> SourceKind {
        SourceKind::Gauge
    }

    fn name(&self) -> &str {
        "stub gauges"
    }

    async fn fetch(
        &self,
        keys: &BTreeSet<String>,
        date: NaiveDate,
    ) -> Result<Vec<RawObservation>, SourceError> {
        let mut out = Vec::new();
        for i in 0..SITES {
            let id = gauge_id(i);
            if !keys.contains(&id) {
                continue;
            }
            let reported = if i == STALE_SITE {
                date.pred_opt().expect("previous day")
            } else {
                date
            };
            out.push(RawObservation::new(id, reported, gauge_flow(i), FlowUnit::CubicFeetPerSecond));
        }
        Ok(out)
    }
}

fn write_fixtures(dir: &Path) {
    let mut features = Vec::new();
    for i in 0..SITES {
        features.push(format!(
            r#"{{"type":"Feature","properties":{{"UUID":"site-{i:02}","site_id":"{}"}},"geometry":{{"type":"Point","coordinates":[{},30.0]}}}}"#,
            gauge_id(i),
            -100.0 + 0.1 * i as f64
        ));
    }
    let geojson = format!(
        r#"{{"type":"FeatureCollection","features":[{}]}}"#,
        features.join(",")
    );
    std::fs::write(dir.join("pour_points.geojson"), geojson).expect("catalog");

    let mut reaches = String::from("reach_id,longitude,latitude\n");
    let mut model = String::from("id,date,value\n");
    let mut reach_model = String::from("id,date,value\n");
    for i in 0..SITES {
        let lon = -100.0 + 0.1 * i as f64;
        if i != UNMATCHED_SITE {
            writeln!(reaches, "{},{},30.0", 7_000 + i, lon + 0.001).expect("write");
        }
        writeln!(model, "site-{i:02},2024-07-15,{}", gauge_flow(i) * 1.05).expect("write");
        writeln!(
            reach_model,
            "{},2024-07-15,{}",
            7_000 + i,
            gauge_flow(i) * 0.9 / CMS_TO_CFS
        )
        .expect("write");
    }
    // The unmatched site's entity id appears as a reach-model key; it must not join.
    writeln!(reach_model, "site-{UNMATCHED_SITE:02},2024-07-15,1.0").expect("write");
    std::fs::write(dir.join("reach_points.csv"), reaches).expect("reaches");
    std::fs::write(dir.join("model.csv"), model).expect("model");
    std::fs::write(dir.join("reach_model.csv"), reach_model).expect("reach model");
}

fn build_pipeline(dir: &Path, classifier: &RegionClassifier) -> Pipeline {
    let index = InMemoryReachIndex::from_csv_path(&dir.join("reach_points.csv")).expect("index");
    let options = ResolverOptions::new(
        SearchRadius::meters(500.0).expect("radius"),
        3,
        Duration::from_secs(5),
    )
    .expect("options");
    let resolver = CrosswalkResolver::new(LookupBackend::Spatial(Arc::new(index)), options);

    let model = FlowTable::from_csv_path(&dir.join("model.csv"), SourceKind::Model, FlowUnit::CubicFeetPerSecond)
        .expect("model table");
    let reach_model = FlowTable::from_csv_path(
        &dir.join("reach_model.csv"),
        SourceKind::ReachModel,
        FlowUnit::CubicMetersPerSecond,
    )
    .expect("reach model table");
    let sources = SourceRegistry::new()
        .with(Arc::new(model))
        .with(Arc::new(StubGauges))
        .with(Arc::new(reach_model));

    Pipeline::new(
        resolver,
        sources,
        MetricsEngine::new(MetricsConfig::default()),
        classifier.labels(),
    )
}

fn subset<'a>(report: &'a RunReport, pair: SourcePair, scope: &Scope) -> &'a streamflow_validator::metrics::MetricOutcome {
    &report
        .metrics
        .iter()
        .find(|m| m.pair == pair && &m.scope == scope)
        .expect("subset present")
        .outcome
}

#[tokio::test]
async fn full_run_joins_scores_and_persists() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_fixtures(dir.path());
    let classifier = RegionClassifier::default_states();
    let catalog = Catalog::from_geojson_path(&dir.path().join("pour_points.geojson"), &classifier)
        .expect("catalog");
    assert_eq!(catalog.region_counts().get("TX"), Some(&SITES));

    let pipeline = build_pipeline(dir.path(), &classifier);
    let mut store = SnapshotStore::open(&dir.path().join("validator.db")).expect("store");
    let radius = pipeline.resolver().radius();

    let cached = store.load_crosswalk(radius).expect("cache");
    let report = pipeline.run(&catalog, day(), &cached).await;

    assert_eq!(report.counts.sites_loaded, SITES);
    assert_eq!(report.counts.sites_resolved, SITES - 1);
    assert_eq!(report.counts.lookup_failures, 0);
    assert_eq!(report.counts.date_mismatches, 1);
    assert_eq!(report.counts.rows, SITES);
    assert!(report.counts.unavailable_sources.is_empty());

    let stale = &report.reconciliation.rows[STALE_SITE];
    assert_eq!(stale.gauge_value, None);
    let unmatched = &report.reconciliation.rows[UNMATCHED_SITE];
    assert_eq!(unmatched.reach_model_value, None);
    assert_eq!(unmatched.reach_id, None);
    let first = &report.reconciliation.rows[0];
    let reach_cfs = first.reach_model_value.expect("reach value");
    assert!((reach_cfs - gauge_flow(0) * 0.9).abs() < 1e-6);

    let model_vs_gauge = subset(&report, SourcePair::ModelVsGauge, &Scope::All);
    let result = model_vs_gauge.result().expect("enough pairs");
    assert_eq!(result.n, SITES - 1);
    assert!((result.pbias.expect("pbias") - 5.0).abs() < 1e-9);
    assert!((result.r.expect("r") - 1.0).abs() < 1e-12);

    let reach_vs_gauge = subset(&report, SourcePair::ReachModelVsGauge, &Scope::All);
    assert_eq!(reach_vs_gauge.n(), SITES - 2);
    assert!(reach_vs_gauge.result().is_some());

    let nc = subset(&report, SourcePair::ModelVsGauge, &Scope::Region("NC".to_string()));
    assert!(nc.result().is_none());
    assert_eq!(nc.n(), 0);

    store.save_crosswalk(radius, &report.crosswalk).expect("save crosswalk");
    store.insert_metrics(day(), &report.metrics).expect("save metrics");

    // A second run reuses every cached match and reaches the same rows.
    let cached = store.load_crosswalk(radius).expect("cache");
    assert_eq!(cached.len(), SITES);
    let again = pipeline.run(&catalog, day(), &cached).await;
    assert_eq!(again.counts.cached_matches, SITES);
    assert_eq!(again.reconciliation.rows, report.reconciliation.rows);

    let history = store
        .load_metric_history(Some(SourcePair::ModelVsGauge), 100)
        .expect("history");
    assert_eq!(history.len(), classifier.labels().len() + 1);
}
