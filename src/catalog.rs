use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::CatalogError;
use crate::region::RegionClassifier;
use crate::sources::http::to_text;
use crate::types::{AltIdentifiers, ReachId, Site};

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    properties: Map<String, Value>,
    geometry: Option<Geometry>,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    coordinates: Vec<f64>,
}

/// The run's site collection. Non-empty, unique entity ids, loaded once.
#[derive(Debug, Clone)]
pub struct Catalog {
    sites: Vec<Site>,
}

impl Catalog {
    pub fn from_sites(sites: Vec<Site>) -> Result<Self, CatalogError> {
        if sites.is_empty() {
            return Err(CatalogError::Empty);
        }
        let mut seen = BTreeSet::new();
        for site in &sites {
            if !seen.insert(site.entity_id.as_str()) {
                return Err(CatalogError::DuplicateEntity(site.entity_id.clone()));
            }
        }
        Ok(Self { sites })
    }

    /// Loads pour-point features (`UUID`, `site_id`, optional `comid`).
    /// Features without an id or a point geometry are skipped.
    pub fn from_geojson_str(data: &str, classifier: &RegionClassifier) -> Result<Self, CatalogError> {
        let collection: FeatureCollection =
            serde_json::from_str(data).map_err(|e| CatalogError::Parse(e.to_string()))?;
        let total = collection.features.len();
        let mut sites = Vec::with_capacity(total);
        for feature in collection.features {
            let Some(site) = site_from_feature(&feature, classifier) else {
                continue;
            };
            sites.push(site);
        }
        if sites.len() < total {
            warn!(skipped = total - sites.len(), "catalog features without id or point geometry");
        }
        let catalog = Self::from_sites(sites)?;
        info!(
            sites = catalog.len(),
            gauged = catalog.gauge_ids().len(),
            "site catalog loaded"
        );
        Ok(catalog)
    }

    pub fn from_geojson_path(path: &Path, classifier: &RegionClassifier) -> Result<Self, CatalogError> {
        let data = std::fs::read_to_string(path)?;
        Self::from_geojson_str(&data, classifier)
    }

    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn get(&self, entity_id: &str) -> Option<&Site> {
        self.sites.iter().find(|s| s.entity_id == entity_id)
    }

    pub fn gauge_ids(&self) -> BTreeSet<String> {
        self.sites
            .iter()
            .filter_map(|s| s.alt_identifiers.gauge_id.clone())
            .collect()
    }

    pub fn region_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for site in &self.sites {
            *counts.entry(site.region.clone()).or_insert(0) += 1;
        }
        counts
    }
}

fn site_from_feature(feature: &Feature, classifier: &RegionClassifier) -> Option<Site> {
    let entity_id = property_text(&feature.properties, &["UUID", "uuid", "entity_id"])?;
    let coords = &feature.geometry.as_ref()?.coordinates;
    let (longitude, latitude) = match coords.as_slice() {
        [lon, lat, ..] if lon.is_finite() && lat.is_finite() => (*lon, *lat),
        _ => return None,
    };
    let gauge_id = property_text(&feature.properties, &["site_id", "gauge_id"]);
    let reach_id = property_text(&feature.properties, &["comid", "reach_id"])
        .and_then(|raw| raw.parse::<ReachId>().ok());
    Some(Site {
        entity_id,
        alt_identifiers: AltIdentifiers { gauge_id, reach_id },
        longitude,
        latitude,
        region: classifier.classify(longitude, latitude).to_string(),
    })
}

fn property_text(properties: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| properties.get(*key))
        .find_map(to_text)
}
