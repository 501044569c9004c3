// Property tests for unit normalisation and the metrics battery.
// CI: 256 cases (default). Soak: PROPTEST_CASES=10000 cargo test --release

use std::collections::BTreeSet;

use chrono::NaiveDate;
use proptest::prelude::*;
use streamflow_validator::crosswalk::MatchSet;
use streamflow_validator::metrics::{compute, MetricOutcome};
use streamflow_validator::reconcile::Reconciler;
use streamflow_validator::sources::fetch_batch;
use streamflow_validator::sources::table::FlowTable;
use streamflow_validator::types::{
    AltIdentifiers, FlowUnit, MatchMethod, MatchRecord, RawObservation, ReachId, Site, SourceKind,
    CMS_TO_CFS,
};

fn config_256() -> ProptestConfig {
    ProptestConfig {
        cases: std::env::var("PROPTEST_CASES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(256),
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 7, 15).expect("valid date")
}

fn site(idx: usize) -> Site {
    Site {
        entity_id: format!("site-{idx}"),
        alt_identifiers: AltIdentifiers::default(),
        longitude: -95.0,
        latitude: 30.0,
        region: "TX".to_string(),
    }
}

/// Missing values as `None`, otherwise non-negative flows.
fn arb_flow() -> impl Strategy<Value = Option<f64>> {
    prop_oneof![
        4 => (0.0..50_000.0f64).prop_map(Some),
        1 => Just(Some(0.0)),
        1 => Just(None),
    ]
}

proptest! {
    #![proptest_config(config_256())]
    #[test]
    fn reach_model_values_are_converted_exactly_once(
        raw in proptest::collection::vec(0.0..10_000.0f64, 1..30),
    ) {
        let sites: Vec<Site> = (0..raw.len()).map(site).collect();
        let matches: MatchSet = sites
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let record = MatchRecord::matched(
                    s.entity_id.clone(),
                    ReachId(1_000 + i as u64),
                    10.0,
                    MatchMethod::Spatial,
                );
                (s.entity_id.clone(), record)
            })
            .collect();
        let rows: Vec<RawObservation> = raw
            .iter()
            .enumerate()
            .map(|(i, v)| {
                RawObservation::new((1_000 + i).to_string(), day(), *v, FlowUnit::CubicMetersPerSecond)
            })
            .collect();
        let table = FlowTable::new(SourceKind::ReachModel, "reach model", rows);
        let keys: BTreeSet<String> = (0..raw.len()).map(|i| (1_000 + i).to_string()).collect();

        let batch = tokio_test::block_on(fetch_batch(&table, &keys, day()));
        let out = Reconciler::new(day()).reconcile(&sites, &[batch], &matches);

        prop_assert_eq!(out.rows.len(), raw.len());
        for (row, value) in out.rows.iter().zip(&raw) {
            let joined = row.reach_model_value.expect("value joined");
            prop_assert_eq!(joined, value * CMS_TO_CFS);
            if *value > 0.0 {
                prop_assert!(joined < value * CMS_TO_CFS * CMS_TO_CFS);
            }
        }
    }
}

proptest! {
    #![proptest_config(config_256())]
    #[test]
    fn battery_respects_floor_and_bounds(
        pairs in proptest::collection::vec((arb_flow(), arb_flow()), 0..40),
        min_pairs in 2usize..12,
    ) {
        let (observed, predicted): (Vec<Option<f64>>, Vec<Option<f64>>) = pairs.into_iter().unzip();
        let usable = observed
            .iter()
            .zip(&predicted)
            .filter(|(o, p)| o.is_some() && p.is_some())
            .count();

        match compute(&observed, &predicted, min_pairs).expect("aligned") {
            MetricOutcome::InsufficientSample { n, log_n, .. } => {
                prop_assert!(usable < min_pairs);
                prop_assert_eq!(n, usable);
                prop_assert!(log_n <= n);
            }
            MetricOutcome::Computed(m) => {
                prop_assert!(usable >= min_pairs);
                prop_assert_eq!(m.n, usable);
                prop_assert!(m.log_n <= m.n);
                prop_assert!(m.rmse >= 0.0 && m.rmse.is_finite());
                prop_assert!(m.mae <= m.rmse * (1.0 + 1e-12) + 1e-9);
                if let Some(r) = m.r {
                    prop_assert!((-1.0..=1.0).contains(&r));
                    let r2 = m.r2.expect("r2 follows r");
                    prop_assert!((0.0..=1.0).contains(&r2));
                }
                if let Some(nse) = m.nse {
                    prop_assert!(nse <= 1.0 + 1e-12);
                }
                for stat in [m.pbias, m.nse, m.kge, m.log_nse, m.log_rmse].into_iter().flatten() {
                    prop_assert!(stat.is_finite());
                }
                if m.log_n < min_pairs {
                    prop_assert!(m.log_nse.is_none());
                    prop_assert!(m.log_rmse.is_none());
                }
            }
        }
    }
}
