use anyhow::Result;

use crate::crosswalk::MatchSet;
use crate::metrics::subsets::SubsetMetrics;
use crate::metrics::MetricOutcome;
use crate::snapshot::store::MetricHistoryEntry;
use crate::types::ComparisonRow;

fn cell(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.4}")).unwrap_or_default()
}

pub fn rows_to_csv(rows: &[ComparisonRow]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record([
        "entity_id",
        "region",
        "date",
        "gauge_id",
        "reach_id",
        "model_cfs",
        "gauge_cfs",
        "reach_model_cfs",
    ])?;
    for row in rows {
        writer.write_record([
            row.entity_id.clone(),
            row.region.clone(),
            row.date.to_string(),
            row.gauge_id.clone().unwrap_or_default(),
            row.reach_id.map(|id| id.to_string()).unwrap_or_default(),
            cell(row.model_value),
            cell(row.gauge_value),
            cell(row.reach_model_value),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

const OUTCOME_COLUMNS: [&str; 13] = [
    "status", "n", "log_n", "min_pairs", "rmse", "mae", "pbias", "nse", "r", "r2", "kge",
    "log_nse", "log_rmse",
];

fn outcome_cells(outcome: &MetricOutcome, floor: usize) -> Vec<String> {
    match outcome {
        MetricOutcome::Computed(m) => vec![
            "computed".to_string(),
            m.n.to_string(),
            m.log_n.to_string(),
            floor.to_string(),
            cell(Some(m.rmse)),
            cell(Some(m.mae)),
            cell(m.pbias),
            cell(m.nse),
            cell(m.r),
            cell(m.r2),
            cell(m.kge),
            cell(m.log_nse),
            cell(m.log_rmse),
        ],
        MetricOutcome::InsufficientSample { n, log_n, min_pairs } => {
            let mut cells = vec![
                "insufficient_sample".to_string(),
                n.to_string(),
                log_n.to_string(),
                min_pairs.to_string(),
            ];
            cells.resize(OUTCOME_COLUMNS.len(), String::new());
            cells
        }
    }
}

pub fn metrics_to_csv(metrics: &[SubsetMetrics]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    let mut header = vec!["pair", "scope"];
    header.extend(OUTCOME_COLUMNS);
    writer.write_record(&header)?;
    for subset in metrics {
        let mut record = vec![subset.pair.as_slug().to_string(), subset.scope.to_string()];
        record.extend(outcome_cells(&subset.outcome, subset.min_pairs));
        writer.write_record(&record)?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

pub fn history_to_csv(history: &[MetricHistoryEntry]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    let mut header = vec!["target_date", "pair", "scope"];
    header.extend(OUTCOME_COLUMNS);
    header.push("captured_at");
    writer.write_record(&header)?;
    for entry in history {
        let mut record = vec![
            entry.target_date.to_string(),
            entry.pair.clone(),
            entry.scope.clone(),
        ];
        record.extend(outcome_cells(&entry.outcome, entry.min_pairs));
        record.push(entry.captured_at.to_rfc3339());
        writer.write_record(&record)?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

pub fn crosswalk_to_csv(matches: &MatchSet) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record(["entity_id", "reach_id", "distance_m", "resolved", "method"])?;
    for record in matches.values() {
        writer.write_record([
            record.entity_id.clone(),
            record
                .resolved_reach_id
                .map(|id| id.to_string())
                .unwrap_or_default(),
            format!("{:.1}", record.distance_meters),
            record.resolved.to_string(),
            record.method.to_string(),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}
