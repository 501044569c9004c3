pub mod subsets;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, MisalignedInput};

/// Usable-pair floor for pooled (all-site) batteries.
pub const DEFAULT_POOLED_MIN_PAIRS: usize = 10;
/// Usable-pair floor for per-region breakdowns.
pub const DEFAULT_REGION_MIN_PAIRS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub pooled_min_pairs: usize,
    pub region_min_pairs: usize,
}

impl MetricsConfig {
    pub fn new(pooled_min_pairs: usize, region_min_pairs: usize) -> Result<Self, ConfigError> {
        for floor in [pooled_min_pairs, region_min_pairs] {
            if floor < 2 {
                return Err(ConfigError::MinPairsTooSmall(floor));
            }
        }
        Ok(Self {
            pooled_min_pairs,
            region_min_pairs,
        })
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            pooled_min_pairs: DEFAULT_POOLED_MIN_PAIRS,
            region_min_pairs: DEFAULT_REGION_MIN_PAIRS,
        }
    }
}

/// Goodness-of-fit battery for one subset. `None` marks a statistic whose
/// denominator was zero for these inputs.
///
/// `n` counts pairs with both values present; `log_n` counts the strictly
/// positive subset the log-family statistics use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    pub n: usize,
    pub log_n: usize,
    pub rmse: f64,
    pub mae: f64,
    pub pbias: Option<f64>,
    pub nse: Option<f64>,
    pub r: Option<f64>,
    pub r2: Option<f64>,
    pub kge: Option<f64>,
    pub log_nse: Option<f64>,
    pub log_rmse: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MetricOutcome {
    Computed(MetricResult),
    InsufficientSample {
        n: usize,
        log_n: usize,
        min_pairs: usize,
    },
}

impl MetricOutcome {
    pub fn result(&self) -> Option<&MetricResult> {
        match self {
            Self::Computed(result) => Some(result),
            Self::InsufficientSample { .. } => None,
        }
    }

    pub fn n(&self) -> usize {
        match self {
            Self::Computed(result) => result.n,
            Self::InsufficientSample { n, .. } => *n,
        }
    }

    pub fn log_n(&self) -> usize {
        match self {
            Self::Computed(result) => result.log_n,
            Self::InsufficientSample { log_n, .. } => *log_n,
        }
    }
}

/// Computes the battery over aligned `observed`/`predicted` sequences.
///
/// Pairs with a missing or non-finite value on either side are dropped. Below
/// `min_pairs` usable pairs the outcome is `InsufficientSample`. The log family
/// is filtered to strictly positive pairs independently and is left missing
/// when that subset falls below the same floor.
pub fn compute(
    observed: &[Option<f64>],
    predicted: &[Option<f64>],
    min_pairs: usize,
) -> Result<MetricOutcome, MisalignedInput> {
    if observed.len() != predicted.len() {
        return Err(MisalignedInput {
            observed: observed.len(),
            predicted: predicted.len(),
        });
    }

    let (obs, pred): (Vec<f64>, Vec<f64>) = observed
        .iter()
        .zip(predicted)
        .filter_map(|pair| match pair {
            (Some(o), Some(p)) if o.is_finite() && p.is_finite() => Some((*o, *p)),
            _ => None,
        })
        .unzip();
    let (log_obs, log_pred): (Vec<f64>, Vec<f64>) = obs
        .iter()
        .zip(&pred)
        .filter(|(o, p)| **o > 0.0 && **p > 0.0)
        .map(|(o, p)| (o.log10(), p.log10()))
        .unzip();

    let n = obs.len();
    let log_n = log_obs.len();
    if n < min_pairs {
        return Ok(MetricOutcome::InsufficientSample {
            n,
            log_n,
            min_pairs,
        });
    }

    let r = pearson(&obs, &pred);
    let (log_nse, log_rmse) = if log_n >= min_pairs {
        (nse(&log_obs, &log_pred), Some(rmse(&log_obs, &log_pred)))
    } else {
        (None, None)
    };

    Ok(MetricOutcome::Computed(MetricResult {
        n,
        log_n,
        rmse: rmse(&obs, &pred),
        mae: mae(&obs, &pred),
        pbias: pbias(&obs, &pred),
        nse: nse(&obs, &pred),
        r,
        r2: r.map(|r| r * r),
        kge: kge(&obs, &pred, r),
        log_nse,
        log_rmse,
    }))
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn is_constant(values: &[f64]) -> bool {
    values.windows(2).all(|w| w[0] == w[1])
}

fn sum_sq_dev(values: &[f64]) -> f64 {
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum()
}

fn rmse(obs: &[f64], pred: &[f64]) -> f64 {
    let sq: f64 = obs.iter().zip(pred).map(|(o, p)| (p - o).powi(2)).sum();
    (sq / obs.len() as f64).sqrt()
}

fn mae(obs: &[f64], pred: &[f64]) -> f64 {
    let abs: f64 = obs.iter().zip(pred).map(|(o, p)| (p - o).abs()).sum();
    abs / obs.len() as f64
}

fn pbias(obs: &[f64], pred: &[f64]) -> Option<f64> {
    let total: f64 = obs.iter().sum();
    if total == 0.0 {
        return None;
    }
    let diff: f64 = obs.iter().zip(pred).map(|(o, p)| p - o).sum();
    Some(100.0 * diff / total)
}

fn nse(obs: &[f64], pred: &[f64]) -> Option<f64> {
    if is_constant(obs) {
        return None;
    }
    let denom = sum_sq_dev(obs);
    if denom == 0.0 {
        return None;
    }
    let err: f64 = obs.iter().zip(pred).map(|(o, p)| (o - p).powi(2)).sum();
    Some(1.0 - err / denom)
}

fn pearson(obs: &[f64], pred: &[f64]) -> Option<f64> {
    if is_constant(obs) || is_constant(pred) {
        return None;
    }
    let mo = mean(obs);
    let mp = mean(pred);
    let cov: f64 = obs.iter().zip(pred).map(|(o, p)| (o - mo) * (p - mp)).sum();
    let denom = (sum_sq_dev(obs) * sum_sq_dev(pred)).sqrt();
    if denom == 0.0 {
        return None;
    }
    Some((cov / denom).clamp(-1.0, 1.0))
}

/// Population standard deviations. Missing when the observed spread or mean
/// is zero. An undefined r counts as 0.
fn kge(obs: &[f64], pred: &[f64], r: Option<f64>) -> Option<f64> {
    let r = r.unwrap_or(0.0);
    let n = obs.len() as f64;
    let mean_o = mean(obs);
    let std_o = (sum_sq_dev(obs) / n).sqrt();
    if std_o == 0.0 || mean_o == 0.0 {
        return None;
    }
    let std_p = (sum_sq_dev(pred) / n).sqrt();
    let alpha = std_p / std_o;
    let beta = mean(pred) / mean_o;
    Some(1.0 - ((r - 1.0).powi(2) + (alpha - 1.0).powi(2) + (beta - 1.0).powi(2)).sqrt())
}
