pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, CrosswalkLookupError};
use crate::types::{MatchMethod, MatchRecord, ReachId, Site};

/// Radius for matches that feed published statistics.
pub const CONFIDENT_RADIUS_M: f64 = 500.0;
/// Looser radius for exploratory matching.
pub const EXPLORATORY_RADIUS_M: f64 = 1_000.0;

/// Resolved crosswalk keyed by entity id.
pub type MatchSet = BTreeMap<String, MatchRecord>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReachCandidate {
    pub reach_id: ReachId,
    pub distance_meters: f64,
}

#[async_trait]
pub trait SpatialIndex: Send + Sync {
    /// Reaches within `radius_m` of the point, ascending by distance.
    async fn nearest(
        &self,
        longitude: f64,
        latitude: f64,
        radius_m: f64,
    ) -> Result<Vec<ReachCandidate>, CrosswalkLookupError>;
}

#[async_trait]
pub trait IdentifierCrosswalk: Send + Sync {
    async fn lookup(&self, external_id: &str) -> Result<Option<ReachId>, CrosswalkLookupError>;
}

#[derive(Clone)]
pub enum LookupBackend {
    Spatial(Arc<dyn SpatialIndex>),
    Identifier(Arc<dyn IdentifierCrosswalk>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchRadius(f64);

impl SearchRadius {
    pub fn meters(value: f64) -> Result<Self, ConfigError> {
        if !value.is_finite() || value <= 0.0 {
            return Err(ConfigError::InvalidRadius(value));
        }
        Ok(Self(value))
    }

    pub fn confident() -> Self {
        Self(CONFIDENT_RADIUS_M)
    }

    pub fn exploratory() -> Self {
        Self(EXPLORATORY_RADIUS_M)
    }

    pub fn as_meters(&self) -> f64 {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct ResolverOptions {
    pub radius: SearchRadius,
    pub concurrency: usize,
    pub lookup_timeout: Duration,
}

impl ResolverOptions {
    pub fn new(
        radius: SearchRadius,
        concurrency: usize,
        lookup_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        if concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        Ok(Self {
            radius,
            concurrency,
            lookup_timeout,
        })
    }
}

/// Outcome of resolving a batch. Every input site has exactly one record;
/// sites whose lookup failed are unresolved and also listed in `failures`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CrosswalkBatch {
    pub records: MatchSet,
    pub failures: BTreeMap<String, CrosswalkLookupError>,
}

impl CrosswalkBatch {
    pub fn resolved_count(&self) -> usize {
        self.records.values().filter(|r| r.resolved).count()
    }
}

#[derive(Clone)]
pub struct CrosswalkResolver {
    backend: LookupBackend,
    options: ResolverOptions,
}

impl CrosswalkResolver {
    pub fn new(backend: LookupBackend, options: ResolverOptions) -> Self {
        Self { backend, options }
    }

    pub fn radius(&self) -> SearchRadius {
        self.options.radius
    }

    /// Resolves one site. A reach id already present in the catalog wins over
    /// any lookup.
    pub async fn resolve(&self, site: &Site) -> Result<MatchRecord, CrosswalkLookupError> {
        if let Some(reach_id) = site.alt_identifiers.reach_id {
            return Ok(MatchRecord::matched(
                site.entity_id.clone(),
                reach_id,
                0.0,
                MatchMethod::Explicit,
            ));
        }
        match &self.backend {
            LookupBackend::Spatial(index) => {
                let radius_m = self.options.radius.as_meters();
                let candidates = index
                    .nearest(site.longitude, site.latitude, radius_m)
                    .await?;
                Ok(pick_nearest(&site.entity_id, &candidates, radius_m))
            }
            LookupBackend::Identifier(service) => {
                let Some(gauge_id) = site.alt_identifiers.gauge_id.as_deref() else {
                    return Ok(MatchRecord::unresolved(site.entity_id.clone()));
                };
                match service.lookup(gauge_id).await? {
                    Some(reach_id) => Ok(MatchRecord::matched(
                        site.entity_id.clone(),
                        reach_id,
                        0.0,
                        MatchMethod::Identifier,
                    )),
                    None => Ok(MatchRecord::unresolved(site.entity_id.clone())),
                }
            }
        }
    }

    /// Resolves every site over a worker pool `concurrency` wide. Completion
    /// order does not affect the result.
    pub async fn resolve_all(&self, sites: &[Site]) -> CrosswalkBatch {
        let permits = Arc::new(Semaphore::new(self.options.concurrency));
        let mut tasks = JoinSet::new();

        for site in sites.iter().cloned() {
            let resolver = self.clone();
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    let err = CrosswalkLookupError::Unreachable("worker pool closed".to_string());
                    return (site.entity_id, Err(err));
                };
                let limit = resolver.options.lookup_timeout;
                let outcome = match tokio::time::timeout(limit, resolver.resolve(&site)).await {
                    Ok(result) => result,
                    Err(_) => Err(CrosswalkLookupError::Timeout {
                        entity_id: site.entity_id.clone(),
                        after_ms: limit.as_millis() as u64,
                    }),
                };
                (site.entity_id, outcome)
            });
        }

        let mut batch = CrosswalkBatch::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((entity_id, Ok(record))) => {
                    debug!(
                        entity_id = %entity_id,
                        resolved = record.resolved,
                        distance_m = record.distance_meters,
                        "crosswalk lookup finished"
                    );
                    batch.records.insert(entity_id, record);
                }
                Ok((entity_id, Err(err))) => {
                    warn!(entity_id = %entity_id, "crosswalk lookup failed: {err}");
                    batch
                        .records
                        .insert(entity_id.clone(), MatchRecord::unresolved(entity_id.clone()));
                    batch.failures.insert(entity_id, err);
                }
                Err(err) => warn!("crosswalk worker aborted: {err}"),
            }
        }

        // A panicked worker loses its entity id; recover it from the input.
        for site in sites {
            if !batch.records.contains_key(&site.entity_id) {
                batch.records.insert(
                    site.entity_id.clone(),
                    MatchRecord::unresolved(site.entity_id.clone()),
                );
                batch.failures.insert(
                    site.entity_id.clone(),
                    CrosswalkLookupError::Unreachable("lookup worker aborted".to_string()),
                );
            }
        }

        info!(
            sites = sites.len(),
            resolved = batch.resolved_count(),
            failed = batch.failures.len(),
            radius_m = self.options.radius.as_meters(),
            "crosswalk resolution complete"
        );
        batch
    }

    /// Resolves only the sites [`cached_match`] cannot answer, then merges.
    pub async fn resolve_missing(&self, sites: &[Site], cached: &MatchSet) -> CrosswalkBatch {
        let pending: Vec<Site> = sites
            .iter()
            .filter(|site| cached_match(site, cached).is_none())
            .cloned()
            .collect();
        debug!(
            cached = sites.len() - pending.len(),
            pending = pending.len(),
            "reusing cached crosswalk entries"
        );
        let mut batch = self.resolve_all(&pending).await;
        for site in sites {
            if let Some(record) = cached_match(site, cached) {
                batch.records.insert(site.entity_id.clone(), record.clone());
            }
        }
        batch
    }
}

/// The cached record for `site`, unless the catalog now names the reach
/// explicitly. Explicit ids always take precedence over a cache entry.
pub fn cached_match<'a>(site: &Site, cached: &'a MatchSet) -> Option<&'a MatchRecord> {
    if site.alt_identifiers.reach_id.is_some() {
        return None;
    }
    cached.get(&site.entity_id)
}

/// Picks the closest candidate within `radius_m`. Equal distances go to the
/// lowest reach id so repeated runs agree.
pub fn pick_nearest(entity_id: &str, candidates: &[ReachCandidate], radius_m: f64) -> MatchRecord {
    candidates
        .iter()
        .filter(|c| c.distance_meters.is_finite() && c.distance_meters >= 0.0)
        .filter(|c| c.distance_meters <= radius_m)
        .min_by(|a, b| {
            a.distance_meters
                .total_cmp(&b.distance_meters)
                .then_with(|| a.reach_id.cmp(&b.reach_id))
        })
        .map(|best| {
            MatchRecord::matched(
                entity_id,
                best.reach_id,
                best.distance_meters,
                MatchMethod::Spatial,
            )
        })
        .unwrap_or_else(|| MatchRecord::unresolved(entity_id))
}
