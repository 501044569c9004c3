//! Gauge-to-reach crosswalk through the NLDI linked-data service.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;

use crate::crosswalk::IdentifierCrosswalk;
use crate::error::CrosswalkLookupError;
use crate::sources::http::{path_value, to_text};
use crate::types::ReachId;

pub const DEFAULT_NLDI_URL: &str = "https://labs.waterdata.usgs.gov/api/nldi/linked-data";

pub struct NldiCrosswalk {
    client: Client,
    base_url: String,
}

impl NldiCrosswalk {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl IdentifierCrosswalk for NldiCrosswalk {
    async fn lookup(&self, external_id: &str) -> Result<Option<ReachId>, CrosswalkLookupError> {
        let url = format!("{}/nwissite/USGS-{}", self.base_url, external_id.trim());
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CrosswalkLookupError::Unreachable(format!("GET {url}: {e}")))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(CrosswalkLookupError::Unreachable(format!(
                "GET {url} returned {status}"
            )));
        }
        let payload: Value = response
            .json()
            .await
            .map_err(|e| CrosswalkLookupError::Malformed(format!("{url}: {e}")))?;
        parse_comid(&payload)
    }
}

/// Reads `features[0].properties.comid`. No features means no match.
pub fn parse_comid(payload: &Value) -> Result<Option<ReachId>, CrosswalkLookupError> {
    let Some(features) = payload.get("features").and_then(Value::as_array) else {
        return Err(CrosswalkLookupError::Malformed(
            "response has no features array".to_string(),
        ));
    };
    if features.is_empty() {
        return Ok(None);
    }
    let Some(raw) = path_value(payload, "features.0.properties.comid").and_then(to_text) else {
        return Ok(None);
    };
    raw.parse::<ReachId>()
        .map(Some)
        .map_err(|e| CrosswalkLookupError::Malformed(e.to_string()))
}
