//! Autoscaler — threshold-driven pool scaling.
//!
//! Reads the current `SystemMetrics` through the metrics cache, decides
//! whether the pool needs one more or one fewer instance, and applies that
//! decision through the instance registry. Every collaborator call is
//! bounded by `registry_timeout`; failures are reported to the caller and
//! the control loop simply tries again on the next tick.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use loadgrid_cache::MetricsCache;
use loadgrid_state::*;

use crate::config::{AutoscaleConfig, Thresholds};
use crate::error::{AutoscaleError, AutoscaleResult};
use crate::strategy::{
    Distribution, DistributionStrategy, LeastLoadedRoundRobin, LeastPopulatedRegion, LoadMap,
    RegionSelector,
};

/// Cache key under which the latest snapshot is memoized.
pub const METRICS_CACHE_KEY: &str = "system_metrics";

/// What the thresholds call for, before pool bounds are consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    ScaleUp,
    ScaleDown,
    NoChange,
}

impl ScaleDecision {
    /// Classify a snapshot against the thresholds.
    pub fn decide(metrics: &SystemMetrics, thresholds: &Thresholds) -> Self {
        if metrics.cpu > thresholds.scale_up || metrics.memory > thresholds.scale_up {
            ScaleDecision::ScaleUp
        } else if metrics.cpu < thresholds.scale_down && metrics.memory < thresholds.scale_down {
            ScaleDecision::ScaleDown
        } else {
            ScaleDecision::NoChange
        }
    }
}

/// Why a scale action was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The healthy pool already has `max_instances` members.
    AtMaximum,
    /// The healthy pool has `min_instances` members or fewer.
    AtMinimum,
}

/// Result of a scale operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ScaleOutcome {
    Added(Instance),
    Removed(InstanceId),
    /// The decision was blocked by a pool bound.
    Skipped(SkipReason),
    NoChange,
}

impl ScaleOutcome {
    pub fn changed_pool(&self) -> bool {
        matches!(self, ScaleOutcome::Added(_) | ScaleOutcome::Removed(_))
    }
}

/// Control loop for a single instance pool.
pub struct Autoscaler {
    registry: Arc<dyn InstanceRegistry>,
    metrics: Arc<dyn MetricsSource>,
    cache: Arc<MetricsCache<SystemMetrics>>,
    config: AutoscaleConfig,
    region_selector: Box<dyn RegionSelector>,
    distribution: Box<dyn DistributionStrategy>,
    /// Serializes scale operations on this pool.
    scale_lock: Mutex<()>,
}

impl Autoscaler {
    /// Create an autoscaler with the default strategies.
    pub fn new(
        registry: Arc<dyn InstanceRegistry>,
        metrics: Arc<dyn MetricsSource>,
        cache: Arc<MetricsCache<SystemMetrics>>,
        config: AutoscaleConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            registry,
            metrics,
            cache,
            config,
            region_selector: Box::new(LeastPopulatedRegion::default()),
            distribution: Box::new(LeastLoadedRoundRobin),
            scale_lock: Mutex::new(()),
        })
    }

    /// Replace the region placement heuristic.
    pub fn with_region_selector(mut self, selector: Box<dyn RegionSelector>) -> Self {
        self.region_selector = selector;
        self
    }

    /// Replace the load distribution heuristic.
    pub fn with_distribution_strategy(mut self, strategy: Box<dyn DistributionStrategy>) -> Self {
        self.distribution = strategy;
        self
    }

    pub fn config(&self) -> &AutoscaleConfig {
        &self.config
    }

    // ── Metrics ────────────────────────────────────────────────────

    /// Latest metrics, served from the cache while fresh.
    pub async fn current_metrics(&self) -> AutoscaleResult<SystemMetrics> {
        if let Some(cached) = self.cache.get(METRICS_CACHE_KEY) {
            return Ok(cached);
        }
        let fresh = self
            .bounded("latest_snapshot", self.metrics.latest_snapshot())
            .await?;
        self.cache.set(METRICS_CACHE_KEY, fresh.clone());
        debug!(
            cpu = fresh.cpu,
            memory = fresh.memory,
            pool = fresh.pool_size(),
            "metrics refreshed"
        );
        Ok(fresh)
    }

    /// Drop the cached snapshot so the next read goes to the source.
    pub fn invalidate_metrics(&self) {
        self.cache.delete(METRICS_CACHE_KEY);
    }

    // ── Scaling ────────────────────────────────────────────────────

    /// Apply at most one scale action for `metrics`.
    pub async fn scale_resources(&self, metrics: &SystemMetrics) -> AutoscaleResult<ScaleOutcome> {
        let _guard = self.scale_lock.lock().await;
        let decision = ScaleDecision::decide(metrics, &self.config.thresholds);
        debug!(
            cpu = metrics.cpu,
            memory = metrics.memory,
            ?decision,
            "evaluated metrics"
        );
        match decision {
            ScaleDecision::ScaleUp => self.scale_up_locked().await,
            ScaleDecision::ScaleDown => self.scale_down_locked().await,
            ScaleDecision::NoChange => Ok(ScaleOutcome::NoChange),
        }
    }

    /// Add one instance unless the pool is full.
    pub async fn scale_up(&self) -> AutoscaleResult<ScaleOutcome> {
        let _guard = self.scale_lock.lock().await;
        self.scale_up_locked().await
    }

    /// Remove the least loaded instance unless the pool is at its floor.
    pub async fn scale_down(&self) -> AutoscaleResult<ScaleOutcome> {
        let _guard = self.scale_lock.lock().await;
        self.scale_down_locked().await
    }

    async fn scale_up_locked(&self) -> AutoscaleResult<ScaleOutcome> {
        let pool = self.bounded("list_healthy", self.registry.list_healthy()).await?;
        if pool.len() >= self.config.max_instances as usize {
            debug!(
                pool = pool.len(),
                max = self.config.max_instances,
                "scale up skipped: pool at maximum"
            );
            return Ok(ScaleOutcome::Skipped(SkipReason::AtMaximum));
        }

        let region = self.select_optimal_region(&pool);
        let instance = self.bounded("create", self.registry.create(region)).await?;
        self.invalidate_metrics();
        info!(
            id = %instance.id,
            %region,
            from = pool.len(),
            to = pool.len() + 1,
            "scaled up"
        );
        Ok(ScaleOutcome::Added(instance))
    }

    async fn scale_down_locked(&self) -> AutoscaleResult<ScaleOutcome> {
        let pool = self.bounded("list_healthy", self.registry.list_healthy()).await?;
        if pool.len() <= self.config.min_instances as usize {
            debug!(
                pool = pool.len(),
                min = self.config.min_instances,
                "scale down skipped: pool at minimum"
            );
            return Ok(ScaleOutcome::Skipped(SkipReason::AtMinimum));
        }
        let Some(victim) = least_loaded(&pool) else {
            return Ok(ScaleOutcome::Skipped(SkipReason::AtMinimum));
        };

        let id = victim.id.clone();
        self.bounded("remove", self.registry.remove(&id)).await?;
        self.invalidate_metrics();
        info!(
            %id,
            load = victim.load,
            from = pool.len(),
            to = pool.len() - 1,
            "scaled down"
        );
        Ok(ScaleOutcome::Removed(id))
    }

    /// Grow the pool to `min_instances`, one instance at a time. Returns the
    /// number of instances added. Used at startup and after outages that
    /// left the pool below its floor.
    pub async fn ensure_minimum(&self) -> AutoscaleResult<u32> {
        let _guard = self.scale_lock.lock().await;
        let mut pool = self.bounded("list_healthy", self.registry.list_healthy()).await?;
        let mut added = 0;
        while pool.len() < self.config.min_instances as usize {
            let region = self.select_optimal_region(&pool);
            let instance = match self.bounded("create", self.registry.create(region)).await {
                Ok(instance) => instance,
                Err(e) => {
                    if added > 0 {
                        self.invalidate_metrics();
                    }
                    warn!(added, error = %e, "stopped short of minimum pool size");
                    return Err(e);
                }
            };
            info!(id = %instance.id, %region, "provisioned instance toward minimum");
            pool.push(instance);
            added += 1;
        }
        if added > 0 {
            self.invalidate_metrics();
        }
        Ok(added)
    }

    // ── Placement and distribution ─────────────────────────────────

    /// Region for the next instance, given the current pool.
    pub fn select_optimal_region(&self, instances: &[Instance]) -> Region {
        self.region_selector.select(instances)
    }

    /// Spread `load` over the current healthy pool.
    pub async fn distribute_load(&self, load: &LoadMap) -> AutoscaleResult<Distribution> {
        let pool = self.bounded("list_healthy", self.registry.list_healthy()).await?;
        Ok(self.calculate_optimal_distribution(&pool, load))
    }

    /// Spread `load` over `instances` without touching the registry.
    pub fn calculate_optimal_distribution(
        &self,
        instances: &[Instance],
        load: &LoadMap,
    ) -> Distribution {
        self.distribution.distribute(instances, load)
    }

    // ── Control loop ───────────────────────────────────────────────

    /// One control loop tick.
    pub async fn poll(&self) -> AutoscaleResult<ScaleOutcome> {
        let metrics = self.current_metrics().await?;
        self.scale_resources(&metrics).await
    }

    /// Tick every `poll_interval` until `shutdown` flips. A tick already in
    /// progress runs to completion; none starts after the signal.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.config.poll_interval;
        info!(
            interval_ms = interval.as_millis() as u64,
            min = self.config.min_instances,
            max = self.config.max_instances,
            "autoscaler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    match self.poll().await {
                        Ok(outcome) => debug!(?outcome, "autoscaler tick complete"),
                        Err(e @ AutoscaleError::RegistryUnavailable { .. }) => {
                            warn!(error = %e, "autoscaler tick failed; retrying next tick");
                        }
                        Err(e) => error!(error = %e, "autoscaler tick failed"),
                    }
                }
                changed = shutdown.changed() => {
                    // A dropped sender also ends the loop.
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("autoscaler shutting down");
    }

    /// Await a collaborator call with the registry timeout applied.
    async fn bounded<T>(
        &self,
        op: &'static str,
        call: impl Future<Output = RegistryResult<T>>,
    ) -> AutoscaleResult<T> {
        bounded_call(op, self.config.registry_timeout, call).await
    }
}

async fn bounded_call<T>(
    op: &'static str,
    timeout: Duration,
    call: impl Future<Output = RegistryResult<T>>,
) -> AutoscaleResult<T> {
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(AutoscaleError::RegistryUnavailable {
            op,
            reason: e.to_string(),
        }),
        Err(_) => Err(AutoscaleError::RegistryUnavailable {
            op,
            reason: format!("timed out after {}ms", timeout.as_millis()),
        }),
    }
}

/// Instance with the lowest load; ties go to the lowest id.
fn least_loaded(pool: &[Instance]) -> Option<&Instance> {
    pool.iter()
        .min_by(|a, b| a.load.total_cmp(&b.load).then_with(|| a.id.cmp(&b.id)))
}
