use std::fmt::{Display, Formatter};

use serde::Serialize;
use tracing::{info, warn};

use crate::error::MisalignedInput;
use crate::metrics::{compute, MetricOutcome, MetricsConfig};
use crate::types::{ComparisonRow, SourceKind};

/// Which source plays "observed" and which "predicted".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourcePair {
    ModelVsGauge,
    ReachModelVsGauge,
    /// The reach model stands in for observations.
    ModelVsReachModel,
}

impl SourcePair {
    pub const ALL: [SourcePair; 3] = [
        SourcePair::ModelVsGauge,
        SourcePair::ReachModelVsGauge,
        SourcePair::ModelVsReachModel,
    ];

    pub fn observed(self) -> SourceKind {
        match self {
            Self::ModelVsGauge | Self::ReachModelVsGauge => SourceKind::Gauge,
            Self::ModelVsReachModel => SourceKind::ReachModel,
        }
    }

    pub fn predicted(self) -> SourceKind {
        match self {
            Self::ModelVsGauge | Self::ModelVsReachModel => SourceKind::Model,
            Self::ReachModelVsGauge => SourceKind::ReachModel,
        }
    }

    pub fn as_slug(self) -> &'static str {
        match self {
            Self::ModelVsGauge => "model_vs_gauge",
            Self::ReachModelVsGauge => "reach_model_vs_gauge",
            Self::ModelVsReachModel => "model_vs_reach_model",
        }
    }
}

impl Display for SourcePair {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} vs {}", self.predicted(), self.observed())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "scope", content = "label", rename_all = "snake_case")]
pub enum Scope {
    All,
    Region(String),
}

impl Scope {
    pub fn includes(&self, row: &ComparisonRow) -> bool {
        match self {
            Self::All => true,
            Self::Region(label) => row.region == *label,
        }
    }
}

impl Display for Scope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "All"),
            Self::Region(label) => write!(f, "{label}"),
        }
    }
}

/// One computed subset. Subsets are evaluated independently and never merged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubsetMetrics {
    pub pair: SourcePair,
    pub scope: Scope,
    pub min_pairs: usize,
    pub outcome: MetricOutcome,
}

/// Aligns the pair's two columns over the rows in `scope`.
pub fn aligned_values(
    rows: &[ComparisonRow],
    pair: SourcePair,
    scope: &Scope,
) -> (Vec<Option<f64>>, Vec<Option<f64>>) {
    rows.iter()
        .filter(|row| scope.includes(row))
        .map(|row| (row.value(pair.observed()), row.value(pair.predicted())))
        .unzip()
}

pub fn evaluate_subset(
    rows: &[ComparisonRow],
    pair: SourcePair,
    scope: &Scope,
    min_pairs: usize,
) -> Result<MetricOutcome, MisalignedInput> {
    let (observed, predicted) = aligned_values(rows, pair, scope);
    compute(&observed, &predicted, min_pairs)
}

/// Runs the battery for every source pair over the pooled set and each region.
#[derive(Debug, Clone)]
pub struct MetricsEngine {
    config: MetricsConfig,
}

impl MetricsEngine {
    pub fn new(config: MetricsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// `regions` fixes the report order; regions with no rows still get an
    /// `InsufficientSample` entry so every run reports the same subsets.
    pub fn evaluate(&self, rows: &[ComparisonRow], regions: &[String]) -> Vec<SubsetMetrics> {
        let mut scopes = vec![(Scope::All, self.config.pooled_min_pairs)];
        scopes.extend(
            regions
                .iter()
                .map(|label| (Scope::Region(label.clone()), self.config.region_min_pairs)),
        );

        let mut out = Vec::with_capacity(SourcePair::ALL.len() * scopes.len());
        for pair in SourcePair::ALL {
            for (scope, min_pairs) in &scopes {
                let outcome = match evaluate_subset(rows, pair, scope, *min_pairs) {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        warn!(pair = pair.as_slug(), scope = %scope, "{err}");
                        continue;
                    }
                };
                match &outcome {
                    MetricOutcome::Computed(result) => info!(
                        pair = pair.as_slug(),
                        scope = %scope,
                        n = result.n,
                        log_n = result.log_n,
                        "metrics computed"
                    ),
                    MetricOutcome::InsufficientSample { n, log_n, min_pairs } => info!(
                        pair = pair.as_slug(),
                        scope = %scope,
                        n,
                        log_n,
                        min_pairs,
                        "insufficient sample"
                    ),
                }
                out.push(SubsetMetrics {
                    pair,
                    scope: scope.clone(),
                    min_pairs: *min_pairs,
                    outcome,
                });
            }
        }
        out
    }
}
