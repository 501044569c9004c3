use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Cubic metres per second to cubic feet per second.
pub const CMS_TO_CFS: f64 = 35.3147;

/// Identifier of a river reach in the distributed model's network (an NHD COMID).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ReachId(pub u64);

impl Display for ReachId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
#[error("invalid reach id: {0}")]
pub struct ReachIdParseError(pub String);

impl FromStr for ReachId {
    type Err = ReachIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        // Some feeds publish COMIDs as floats ("5781369.0").
        let digits = trimmed.strip_suffix(".0").unwrap_or(trimmed);
        digits
            .parse::<u64>()
            .map(ReachId)
            .map_err(|_| ReachIdParseError(s.to_string()))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AltIdentifiers {
    pub gauge_id: Option<String>,
    pub reach_id: Option<ReachId>,
}

/// A forecast location from the site catalog. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Site {
    pub entity_id: String,
    pub alt_identifiers: AltIdentifiers,
    pub longitude: f64,
    pub latitude: f64,
    pub region: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Explicit,
    Spatial,
    Identifier,
    Unresolved,
}

impl Display for MatchMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let display = match self {
            Self::Explicit => "explicit",
            Self::Spatial => "spatial",
            Self::Identifier => "identifier",
            Self::Unresolved => "unresolved",
        };
        write!(f, "{display}")
    }
}

/// Outcome of resolving one site to a reach.
///
/// `resolved == true` implies `resolved_reach_id.is_some()` and
/// `distance_meters <= radius` for the radius the record was produced with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchRecord {
    pub entity_id: String,
    pub resolved_reach_id: Option<ReachId>,
    pub distance_meters: f64,
    pub resolved: bool,
    pub method: MatchMethod,
}

impl MatchRecord {
    pub fn unresolved(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            resolved_reach_id: None,
            distance_meters: 0.0,
            resolved: false,
            method: MatchMethod::Unresolved,
        }
    }

    pub fn matched(
        entity_id: impl Into<String>,
        reach_id: ReachId,
        distance_meters: f64,
        method: MatchMethod,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            resolved_reach_id: Some(reach_id),
            distance_meters: distance_meters.max(0.0),
            resolved: true,
            method,
        }
    }

    /// The reach to join the reach-model source on, if this site resolved.
    pub fn join_reach(&self) -> Option<ReachId> {
        if self.resolved {
            self.resolved_reach_id
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Model,
    Gauge,
    ReachModel,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [SourceKind::Model, SourceKind::Gauge, SourceKind::ReachModel];

    pub fn as_slug(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Gauge => "gauge",
            Self::ReachModel => "reach_model",
        }
    }
}

impl Display for SourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let display = match self {
            Self::Model => "Model",
            Self::Gauge => "Gauge",
            Self::ReachModel => "Reach model",
        };
        write!(f, "{display}")
    }
}

#[derive(Debug, Error)]
#[error("unknown source: {0}")]
pub struct SourceParseError(pub String);

impl FromStr for SourceKind {
    type Err = SourceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "model" | "site_model" => Ok(Self::Model),
            "gauge" | "usgs" => Ok(Self::Gauge),
            "reach_model" | "reach-model" | "nwm" => Ok(Self::ReachModel),
            _ => Err(SourceParseError(s.to_string())),
        }
    }
}

/// Flow units a raw source may report in. Everything past ingestion is cfs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FlowUnit {
    #[serde(rename = "cfs")]
    CubicFeetPerSecond,
    #[serde(rename = "cms")]
    CubicMetersPerSecond,
}

impl FlowUnit {
    pub const CANONICAL: FlowUnit = FlowUnit::CubicFeetPerSecond;

    pub fn to_canonical_factor(self) -> f64 {
        match self {
            Self::CubicFeetPerSecond => 1.0,
            Self::CubicMetersPerSecond => CMS_TO_CFS,
        }
    }
}

impl Display for FlowUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CubicFeetPerSecond => write!(f, "cfs"),
            Self::CubicMetersPerSecond => write!(f, "cms"),
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown flow unit: {0}")]
pub struct FlowUnitParseError(pub String);

impl FromStr for FlowUnit {
    type Err = FlowUnitParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cfs" | "ft3/s" | "ft3_s" => Ok(Self::CubicFeetPerSecond),
            "cms" | "m3/s" | "m3_s" => Ok(Self::CubicMetersPerSecond),
            _ => Err(FlowUnitParseError(s.to_string())),
        }
    }
}

/// A value exactly as a source reported it, before unit normalisation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawObservation {
    pub key: String,
    pub date: NaiveDate,
    pub value: f64,
    pub unit: FlowUnit,
}

impl RawObservation {
    pub fn new(key: impl Into<String>, date: NaiveDate, value: f64, unit: FlowUnit) -> Self {
        Self {
            key: key.into(),
            date,
            value,
            unit,
        }
    }
}

/// A normalised observation in canonical units.
///
/// The only constructor is [`ObservationRecord::ingest`], which applies the
/// unit conversion; there is no way to convert a record a second time.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ObservationRecord {
    key: String,
    source: SourceKind,
    date: NaiveDate,
    value: f64,
    unit: FlowUnit,
}

impl ObservationRecord {
    /// Converts a raw value to cfs. Non-finite values yield `None`; negative
    /// values pass through unchanged.
    pub fn ingest(source: SourceKind, raw: RawObservation) -> Option<Self> {
        if !raw.value.is_finite() {
            return None;
        }
        Some(Self {
            key: raw.key,
            source,
            date: raw.date,
            value: raw.value * raw.unit.to_canonical_factor(),
            unit: FlowUnit::CANONICAL,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn source(&self) -> SourceKind {
        self.source
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn unit(&self) -> FlowUnit {
        self.unit
    }
}

/// One joined row per site for the target date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComparisonRow {
    pub entity_id: String,
    pub region: String,
    pub date: NaiveDate,
    pub gauge_id: Option<String>,
    pub reach_id: Option<ReachId>,
    pub model_value: Option<f64>,
    pub gauge_value: Option<f64>,
    pub reach_model_value: Option<f64>,
}

impl ComparisonRow {
    pub fn value(&self, source: SourceKind) -> Option<f64> {
        match source {
            SourceKind::Model => self.model_value,
            SourceKind::Gauge => self.gauge_value,
            SourceKind::ReachModel => self.reach_model_value,
        }
    }

    pub fn source_count(&self) -> usize {
        SourceKind::ALL
            .iter()
            .filter(|source| self.value(**source).is_some())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, 15).expect("valid date")
    }

    #[test]
    fn ingest_converts_cms_once() {
        let raw = RawObservation::new("5781369", day(), 2.0, FlowUnit::CubicMetersPerSecond);
        let record = ObservationRecord::ingest(SourceKind::ReachModel, raw).expect("valid value");
        assert!((record.value() - 2.0 * CMS_TO_CFS).abs() < 1e-9);
        assert_eq!(record.unit(), FlowUnit::CubicFeetPerSecond);
    }

    #[test]
    fn ingest_drops_only_non_finite_values() {
        for source in SourceKind::ALL {
            let nan = RawObservation::new("01646500", day(), f64::NAN, FlowUnit::CubicFeetPerSecond);
            assert!(ObservationRecord::ingest(source, nan).is_none());
            let inf = RawObservation::new("01646500", day(), f64::INFINITY, FlowUnit::CubicFeetPerSecond);
            assert!(ObservationRecord::ingest(source, inf).is_none());
            let zero = RawObservation::new("01646500", day(), 0.0, FlowUnit::CubicFeetPerSecond);
            assert!(ObservationRecord::ingest(source, zero).is_some());
        }
    }

    #[test]
    fn ingest_keeps_negative_predictions() {
        let raw = RawObservation::new("site-a", day(), -5.0, FlowUnit::CubicFeetPerSecond);
        let record = ObservationRecord::ingest(SourceKind::Model, raw).expect("negative kept");
        assert_eq!(record.value(), -5.0);
        let raw = RawObservation::new("5781369", day(), -1.0, FlowUnit::CubicMetersPerSecond);
        let record = ObservationRecord::ingest(SourceKind::ReachModel, raw).expect("negative kept");
        assert_eq!(record.value(), -CMS_TO_CFS);
    }

    #[test]
    fn parses_reach_ids_and_sources() {
        assert_eq!("5781369".parse::<ReachId>().expect("id"), ReachId(5_781_369));
        assert_eq!("5781369.0".parse::<ReachId>().expect("id"), ReachId(5_781_369));
        assert!("abc".parse::<ReachId>().is_err());
        assert_eq!("nwm".parse::<SourceKind>().expect("source"), SourceKind::ReachModel);
        assert_eq!("m3/s".parse::<FlowUnit>().expect("unit"), FlowUnit::CubicMetersPerSecond);
    }

    #[test]
    fn unresolved_match_never_offers_a_join_reach() {
        let mut record = MatchRecord::unresolved("site-a");
        record.resolved_reach_id = Some(ReachId(7));
        assert_eq!(record.join_reach(), None);
        let matched = MatchRecord::matched("site-a", ReachId(7), 12.5, MatchMethod::Spatial);
        assert_eq!(matched.join_reach(), Some(ReachId(7)));
    }
}
