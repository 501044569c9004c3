use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Row, Table};

use crate::crosswalk::MatchSet;
use crate::metrics::subsets::SubsetMetrics;
use crate::metrics::MetricOutcome;
use crate::output::{fmt_opt, MISSING};
use crate::pipeline::RunReport;
use crate::snapshot::store::MetricHistoryEntry;
use crate::sources::SourceStatus;
use crate::types::ComparisonRow;

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn render_rows_table(rows: &[ComparisonRow]) -> String {
    let mut table = new_table();
    table.set_header(vec![
        "Entity",
        "Region",
        "Gauge",
        "Reach",
        "Model (cfs)",
        "Gauge (cfs)",
        "Reach model (cfs)",
    ]);
    for row in rows {
        table.add_row(vec![
            row.entity_id.clone(),
            row.region.clone(),
            row.gauge_id.clone().unwrap_or_else(|| MISSING.to_string()),
            row.reach_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| MISSING.to_string()),
            fmt_opt(row.model_value, 2),
            fmt_opt(row.gauge_value, 2),
            fmt_opt(row.reach_model_value, 2),
        ]);
    }
    table.to_string()
}

pub fn render_metrics_table(metrics: &[SubsetMetrics]) -> String {
    let mut table = new_table();
    table.set_header(vec![
        "Pair", "Scope", "n", "log n", "RMSE", "MAE", "PBIAS %", "NSE", "r", "R²", "KGE",
        "Log-NSE",
    ]);
    for subset in metrics {
        let mut cells = vec![
            Cell::new(subset.pair.to_string()),
            Cell::new(subset.scope.to_string()),
        ];
        match &subset.outcome {
            MetricOutcome::Computed(m) => {
                let nse_cell = match m.nse {
                    Some(v) if v >= 0.5 => Cell::new(format!("{v:.3}")).fg(Color::Green),
                    Some(v) if v < 0.0 => Cell::new(format!("{v:.3}")).fg(Color::Red),
                    other => Cell::new(fmt_opt(other, 3)),
                };
                cells.extend([
                    Cell::new(m.n),
                    Cell::new(m.log_n),
                    Cell::new(format!("{:.2}", m.rmse)),
                    Cell::new(format!("{:.2}", m.mae)),
                    Cell::new(fmt_opt(m.pbias, 1)),
                    nse_cell,
                    Cell::new(fmt_opt(m.r, 3)),
                    Cell::new(fmt_opt(m.r2, 3)),
                    Cell::new(fmt_opt(m.kge, 3)),
                    Cell::new(fmt_opt(m.log_nse, 3)),
                ]);
            }
            MetricOutcome::InsufficientSample { n, log_n, min_pairs } => {
                cells.extend([
                    Cell::new(n),
                    Cell::new(log_n),
                    Cell::new(format!("insufficient sample (< {min_pairs})")).fg(Color::Yellow),
                ]);
                cells.extend((0..7).map(|_| Cell::new(MISSING)));
            }
        }
        table.add_row(Row::from(cells));
    }
    table.to_string()
}

pub fn render_crosswalk_table(matches: &MatchSet) -> String {
    let mut table = new_table();
    table.set_header(vec!["Entity", "Reach", "Distance (m)", "Method"]);
    for record in matches.values() {
        let method = if record.resolved {
            Cell::new(record.method.to_string()).fg(Color::Green)
        } else {
            Cell::new(record.method.to_string()).fg(Color::Red)
        };
        table.add_row(Row::from(vec![
            Cell::new(&record.entity_id),
            Cell::new(
                record
                    .resolved_reach_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| MISSING.to_string()),
            ),
            Cell::new(if record.resolved {
                format!("{:.1}", record.distance_meters)
            } else {
                MISSING.to_string()
            }),
            method,
        ]));
    }
    table.to_string()
}

pub fn render_history_table(history: &[MetricHistoryEntry]) -> String {
    let mut table = new_table();
    table.set_header(vec!["Date", "Pair", "Scope", "n", "NSE", "KGE", "PBIAS %", "Recorded"]);
    for entry in history {
        let (nse, kge, pbias) = match entry.outcome.result() {
            Some(m) => (fmt_opt(m.nse, 3), fmt_opt(m.kge, 3), fmt_opt(m.pbias, 1)),
            None => (
                format!("insufficient (< {})", entry.min_pairs),
                MISSING.to_string(),
                MISSING.to_string(),
            ),
        };
        table.add_row(vec![
            entry.target_date.to_string(),
            entry.pair.clone(),
            entry.scope.clone(),
            entry.outcome.n().to_string(),
            nse,
            kge,
            pbias,
            entry.captured_at.format("%Y-%m-%d %H:%M").to_string(),
        ]);
    }
    table.to_string()
}

/// Stage counts for a run, one line per stage.
pub fn render_summary_table(report: &RunReport) -> String {
    let counts = &report.counts;
    let mut table = new_table();
    table.set_header(vec!["Stage", "Count"]);
    table.add_row(vec!["Target date".to_string(), report.target_date.to_string()]);
    table.add_row(vec!["Sites loaded".to_string(), counts.sites_loaded.to_string()]);
    table.add_row(vec![
        "Sites resolved".to_string(),
        format!("{} ({} cached)", counts.sites_resolved, counts.cached_matches),
    ]);
    table.add_row(vec!["Lookup failures".to_string(), counts.lookup_failures.to_string()]);
    for source in &report.sources {
        let status = match &source.status {
            SourceStatus::Available => format!("{} of {} requested", source.records, source.requested),
            SourceStatus::Unavailable(reason) => format!("unavailable: {reason}"),
        };
        table.add_row(vec![format!("{} values", source.source), status]);
    }
    table.add_row(vec![
        "Date mismatches discarded".to_string(),
        counts.date_mismatches.to_string(),
    ]);
    table.add_row(vec!["Rows".to_string(), counts.rows.to_string()]);
    for (sources, sites) in &counts.sites_by_source_count {
        table.add_row(vec![format!("Sites with {sources} source(s)"), sites.to_string()]);
    }
    table.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::subsets::{Scope, SourcePair};
    use crate::types::{MatchMethod, MatchRecord, ReachId};

    #[test]
    fn insufficient_sample_is_labelled_not_zeroed() {
        let metrics = vec![SubsetMetrics {
            pair: SourcePair::ReachModelVsGauge,
            scope: Scope::All,
            min_pairs: 10,
            outcome: MetricOutcome::InsufficientSample {
                n: 4,
                log_n: 4,
                min_pairs: 10,
            },
        }];
        let out = render_metrics_table(&metrics);
        assert!(out.contains("insufficient"));
        assert!(!out.contains("0.000"));
    }

    #[test]
    fn unresolved_matches_show_no_distance() {
        let mut matches = MatchSet::new();
        matches.insert(
            "a".to_string(),
            MatchRecord::matched("a", ReachId(77), 42.0, MatchMethod::Spatial),
        );
        matches.insert("b".to_string(), MatchRecord::unresolved("b"));
        let out = render_crosswalk_table(&matches);
        assert!(out.contains("42.0"));
        assert!(out.contains("unresolved"));
    }
}
