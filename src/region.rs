use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_OTHER_LABEL: &str = "Other";

/// Axis-aligned lon/lat box. Edges are exclusive: a point exactly on an edge
/// is outside the box.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegionBox {
    pub label: String,
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl RegionBox {
    pub fn new(label: &str, min_lon: f64, max_lon: f64, min_lat: f64, max_lat: f64) -> Self {
        Self {
            label: label.to_string(),
            min_lon,
            max_lon,
            min_lat,
            max_lat,
        }
    }

    pub fn contains(&self, longitude: f64, latitude: f64) -> bool {
        longitude > self.min_lon
            && longitude < self.max_lon
            && latitude > self.min_lat
            && latitude < self.max_lat
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let finite = [self.min_lon, self.max_lon, self.min_lat, self.max_lat]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.min_lon >= self.max_lon || self.min_lat >= self.max_lat {
            return Err(ConfigError::InvalidRegion {
                label: self.label.clone(),
            });
        }
        Ok(())
    }
}

/// Total classifier over a declared list of boxes.
///
/// Boxes are expected not to overlap. If they do, the first box in
/// declaration order that contains the point wins.
#[derive(Debug, Clone)]
pub struct RegionClassifier {
    boxes: Vec<RegionBox>,
    other_label: String,
}

impl RegionClassifier {
    pub fn new(boxes: Vec<RegionBox>, other_label: impl Into<String>) -> Result<Self, ConfigError> {
        for region in &boxes {
            region.validate()?;
        }
        Ok(Self {
            boxes,
            other_label: other_label.into(),
        })
    }

    /// Texas, California and North Carolina, the three evaluation states.
    pub fn default_states() -> Self {
        Self {
            boxes: default_region_boxes(),
            other_label: DEFAULT_OTHER_LABEL.to_string(),
        }
    }

    pub fn classify(&self, longitude: f64, latitude: f64) -> &str {
        self.boxes
            .iter()
            .find(|region| region.contains(longitude, latitude))
            .map(|region| region.label.as_str())
            .unwrap_or(self.other_label.as_str())
    }

    pub fn other_label(&self) -> &str {
        &self.other_label
    }

    /// Every label the classifier can return, declaration order first and
    /// the fallback label last.
    pub fn labels(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(self.boxes.len() + 1);
        for region in &self.boxes {
            if !out.contains(&region.label) {
                out.push(region.label.clone());
            }
        }
        if !out.contains(&self.other_label) {
            out.push(self.other_label.clone());
        }
        out
    }
}

pub fn default_region_boxes() -> Vec<RegionBox> {
    vec![
        RegionBox::new("TX", -107.0, -93.0, 25.0, 37.0),
        RegionBox::new("CA", -125.0, -114.0, 32.0, 42.0),
        RegionBox::new("NC", -85.0, -75.0, 33.0, 37.0),
    ]
}
