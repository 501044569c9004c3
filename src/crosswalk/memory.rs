use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::crosswalk::{ReachCandidate, SpatialIndex};
use crate::error::CrosswalkLookupError;
use crate::types::ReachId;

const EARTH_RADIUS_M: f64 = 6_371_008.8;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ReachPoint {
    pub reach_id: ReachId,
    pub longitude: f64,
    pub latitude: f64,
}

/// Brute-force index over one representative point per reach.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReachIndex {
    reaches: Vec<ReachPoint>,
}

impl InMemoryReachIndex {
    pub fn new(reaches: Vec<ReachPoint>) -> Self {
        Self { reaches }
    }

    /// Loads `reach_id,longitude,latitude` rows.
    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("failed opening reach table: {}", path.display()))?;
        let mut reaches = Vec::new();
        for (line, row) in reader.deserialize::<ReachPoint>().enumerate() {
            let point = row.with_context(|| {
                format!("invalid reach row {} in {}", line + 2, path.display())
            })?;
            reaches.push(point);
        }
        Ok(Self::new(reaches))
    }

    pub fn len(&self) -> usize {
        self.reaches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reaches.is_empty()
    }

    pub fn within(&self, longitude: f64, latitude: f64, radius_m: f64) -> Vec<ReachCandidate> {
        let mut out: Vec<ReachCandidate> = self
            .reaches
            .iter()
            .map(|reach| ReachCandidate {
                reach_id: reach.reach_id,
                distance_meters: haversine_m(longitude, latitude, reach.longitude, reach.latitude),
            })
            .filter(|c| c.distance_meters.is_finite() && c.distance_meters <= radius_m)
            .collect();
        out.sort_by(|a, b| {
            a.distance_meters
                .total_cmp(&b.distance_meters)
                .then_with(|| a.reach_id.cmp(&b.reach_id))
        });
        out
    }
}

#[async_trait]
impl SpatialIndex for InMemoryReachIndex {
    async fn nearest(
        &self,
        longitude: f64,
        latitude: f64,
        radius_m: f64,
    ) -> Result<Vec<ReachCandidate>, CrosswalkLookupError> {
        Ok(self.within(longitude, latitude, radius_m))
    }
}

/// Great-circle distance in metres.
pub fn haversine_m(lon_a: f64, lat_a: f64, lon_b: f64, lat_b: f64) -> f64 {
    let (phi_a, phi_b) = (lat_a.to_radians(), lat_b.to_radians());
    let d_phi = (lat_b - lat_a).to_radians();
    let d_lambda = (lon_b - lon_a).to_radians();
    let h = (d_phi / 2.0).sin().powi(2) + phi_a.cos() * phi_b.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}
