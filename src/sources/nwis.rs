//! Gauge observations from the USGS NWIS daily-values service.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::SourceError;
use crate::sources::http::{fetch_json, path_value, to_f64, to_text};
use crate::sources::FlowSource;
use crate::types::{FlowUnit, RawObservation, SourceKind};

/// USGS parameter code for discharge.
pub const PARAM_DISCHARGE: &str = "00060";
pub const DEFAULT_NWIS_DV_URL: &str = "https://waterservices.usgs.gov/nwis/dv/";
/// Stations per request; the service rejects much longer site lists.
pub const DEFAULT_CHUNK_SIZE: usize = 100;

pub struct NwisDailySource {
    client: Client,
    base_url: String,
    chunk_size: usize,
}

impl NwisDailySource {
    pub fn new(client: Client, base_url: impl Into<String>, chunk_size: usize) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            chunk_size: chunk_size.max(1),
        }
    }

    async fn fetch_chunk(
        &self,
        stations: &[&String],
        date: NaiveDate,
    ) -> Result<Vec<RawObservation>, SourceError> {
        let day = date.format("%Y-%m-%d").to_string();
        let sites = stations
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let query = [
            ("format", "json".to_string()),
            ("sites", sites),
            ("startDT", day.clone()),
            ("endDT", day),
            ("parameterCd", PARAM_DISCHARGE.to_string()),
            ("siteStatus", "all".to_string()),
        ];
        let payload = fetch_json(&self.client, &self.base_url, &query)
            .await
            .map_err(|err| SourceError::unavailable(SourceKind::Gauge, format!("{err:#}")))?;
        parse_daily_values(&payload)
    }
}

#[async_trait]
impl FlowSource for NwisDailySource {
    fn kind(&self) -> SourceKind {
        SourceKind::Gauge
    }

    fn name(&self) -> &str {
        "USGS NWIS daily values"
    }

    async fn fetch(
        &self,
        keys: &BTreeSet<String>,
        date: NaiveDate,
    ) -> Result<Vec<RawObservation>, SourceError> {
        let stations: Vec<&String> = keys.iter().collect();
        let mut out = Vec::new();
        let mut failed_chunks = 0usize;
        let mut last_error = None;
        let chunks = stations.chunks(self.chunk_size).count();

        for (idx, chunk) in stations.chunks(self.chunk_size).enumerate() {
            match self.fetch_chunk(chunk, date).await {
                Ok(values) => {
                    debug!(chunk = idx, stations = chunk.len(), values = values.len(), "NWIS chunk");
                    out.extend(values);
                }
                Err(err) => {
                    warn!(chunk = idx, "NWIS chunk failed: {err}");
                    failed_chunks += 1;
                    last_error = Some(err);
                }
            }
        }

        match last_error {
            Some(err) if failed_chunks == chunks => Err(err),
            _ => Ok(out),
        }
    }
}

/// Extracts every value in a daily-values response with the date the service
/// attached to it. Date filtering is left to the reconciler. Negative readings
/// are the service's missing-value sentinel and are skipped here.
pub fn parse_daily_values(payload: &Value) -> Result<Vec<RawObservation>, SourceError> {
    let series = path_value(payload, "value.timeSeries")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            SourceError::malformed(SourceKind::Gauge, "response has no value.timeSeries array")
        })?;

    let mut out = Vec::new();
    let mut sentinels = 0usize;
    for ts in series {
        let Some(site_code) = path_value(ts, "sourceInfo.siteCode.0.value").and_then(to_text) else {
            continue;
        };
        let unit = path_value(ts, "variable.unit.unitCode")
            .and_then(Value::as_str)
            .and_then(|code| code.parse::<FlowUnit>().ok())
            .unwrap_or(FlowUnit::CubicFeetPerSecond);
        let Some(value_sets) = ts.get("values").and_then(Value::as_array) else {
            continue;
        };
        for set in value_sets {
            let Some(values) = set.get("value").and_then(Value::as_array) else {
                continue;
            };
            for entry in values {
                let Some(value) = entry.get("value").and_then(to_f64) else {
                    continue;
                };
                if value < 0.0 {
                    sentinels += 1;
                    continue;
                }
                let Some(date) = entry
                    .get("dateTime")
                    .and_then(Value::as_str)
                    .and_then(|raw| raw.get(..10))
                    .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok())
                else {
                    continue;
                };
                out.push(RawObservation::new(site_code.clone(), date, value, unit));
            }
        }
    }
    if sentinels > 0 {
        debug!(sentinels, "skipped NWIS missing-value sentinels");
    }
    Ok(out)
}
