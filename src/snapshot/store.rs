use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::crosswalk::{CrosswalkBatch, MatchSet, SearchRadius};
use crate::metrics::subsets::{SourcePair, SubsetMetrics};
use crate::metrics::MetricOutcome;
use crate::snapshot::migrations::BASE_MIGRATION;
use crate::types::{MatchMethod, MatchRecord, ReachId};

#[derive(Debug, Clone, Serialize)]
pub struct MetricHistoryEntry {
    pub target_date: NaiveDate,
    pub pair: String,
    pub scope: String,
    pub min_pairs: usize,
    pub outcome: MetricOutcome,
    pub captured_at: DateTime<Utc>,
}

pub struct SnapshotStore {
    conn: Connection,
}

impl SnapshotStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(BASE_MIGRATION)?;
        Ok(())
    }

    /// Cached match records produced with exactly this radius.
    pub fn load_crosswalk(&self, radius: SearchRadius) -> Result<MatchSet> {
        let mut stmt = self.conn.prepare(
            r#"
SELECT entity_id, reach_id, distance_m, resolved, method
FROM crosswalk_cache
WHERE radius_m = ?1
"#,
        )?;
        let records = stmt
            .query_map(params![radius.as_meters()], row_to_match_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records
            .into_iter()
            .map(|record| (record.entity_id.clone(), record))
            .collect())
    }

    /// Persists a batch under `radius`. Sites whose lookup failed are not
    /// cached so the next run retries them.
    pub fn save_crosswalk(&mut self, radius: SearchRadius, batch: &CrosswalkBatch) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        let mut saved = 0usize;
        {
            let mut stmt = tx.prepare(
                r#"
INSERT OR REPLACE INTO crosswalk_cache(
    entity_id, radius_m, reach_id, distance_m, resolved, method, resolved_at
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
"#,
            )?;
            for (entity_id, record) in &batch.records {
                if batch.failures.contains_key(entity_id) {
                    continue;
                }
                stmt.execute(params![
                    entity_id,
                    radius.as_meters(),
                    record.resolved_reach_id.map(|id| id.0 as i64),
                    record.distance_meters,
                    if record.resolved { 1 } else { 0 },
                    record.method.to_string(),
                    now
                ])?;
                saved += 1;
            }
        }
        tx.commit()?;
        Ok(saved)
    }

    pub fn insert_metrics(&mut self, target_date: NaiveDate, metrics: &[SubsetMetrics]) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
INSERT INTO metric_history(
    target_date, pair, scope, min_pairs, n, log_n, sufficient, result_json, captured_at
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
"#,
            )?;
            for subset in metrics {
                stmt.execute(params![
                    target_date.to_string(),
                    subset.pair.as_slug(),
                    subset.scope.to_string(),
                    subset.min_pairs as i64,
                    subset.outcome.n() as i64,
                    subset.outcome.log_n() as i64,
                    if subset.outcome.result().is_some() { 1 } else { 0 },
                    serde_json::to_string(&subset.outcome)?,
                    now
                ])?;
            }
        }
        tx.commit()?;
        Ok(metrics.len())
    }

    pub fn load_metric_history(
        &self,
        pair: Option<SourcePair>,
        limit: usize,
    ) -> Result<Vec<MetricHistoryEntry>> {
        let sql = if pair.is_some() {
            r#"
SELECT target_date, pair, scope, min_pairs, result_json, captured_at
FROM metric_history
WHERE pair = ?1
ORDER BY target_date DESC, id DESC
LIMIT ?2
"#
        } else {
            r#"
SELECT target_date, pair, scope, min_pairs, result_json, captured_at
FROM metric_history
ORDER BY target_date DESC, id DESC
LIMIT ?1
"#
        };

        let mut stmt = self.conn.prepare(sql)?;
        let raw = if let Some(pair) = pair {
            stmt.query_map(params![pair.as_slug(), limit as i64], row_to_history_raw)?
                .collect::<std::result::Result<Vec<_>, _>>()?
        } else {
            stmt.query_map(params![limit as i64], row_to_history_raw)?
                .collect::<std::result::Result<Vec<_>, _>>()?
        };

        let mut out = Vec::with_capacity(raw.len());
        for row in raw {
            out.push(MetricHistoryEntry {
                target_date: NaiveDate::parse_from_str(&row.target_date, "%Y-%m-%d")?,
                pair: row.pair,
                scope: row.scope,
                min_pairs: row.min_pairs as usize,
                outcome: serde_json::from_str(&row.result_json)?,
                captured_at: DateTime::parse_from_rfc3339(&row.captured_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            });
        }
        Ok(out)
    }
}

struct HistoryRow {
    target_date: String,
    pair: String,
    scope: String,
    min_pairs: i64,
    result_json: String,
    captured_at: String,
}

fn row_to_history_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<HistoryRow> {
    Ok(HistoryRow {
        target_date: row.get(0)?,
        pair: row.get(1)?,
        scope: row.get(2)?,
        min_pairs: row.get(3)?,
        result_json: row.get(4)?,
        captured_at: row.get(5)?,
    })
}

fn row_to_match_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MatchRecord> {
    let method_raw: String = row.get(4)?;
    let method = match method_raw.as_str() {
        "explicit" => MatchMethod::Explicit,
        "spatial" => MatchMethod::Spatial,
        "identifier" => MatchMethod::Identifier,
        _ => MatchMethod::Unresolved,
    };
    let reach_id = row.get::<_, Option<i64>>(1)?.map(|id| ReachId(id as u64));
    let resolved = row.get::<_, i64>(3)? != 0 && reach_id.is_some();
    Ok(MatchRecord {
        entity_id: row.get(0)?,
        resolved_reach_id: reach_id,
        distance_meters: row.get(2)?,
        resolved,
        method: if resolved { method } else { MatchMethod::Unresolved },
    })
}
