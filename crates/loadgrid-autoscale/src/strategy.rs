//! Placement and distribution heuristics.
//!
//! Both default strategies are deterministic given their inputs. Swap them
//! through `Autoscaler::with_region_selector` and
//! `Autoscaler::with_distribution_strategy`.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use loadgrid_state::{ConfigError, Instance, InstanceId, Region};

/// Units of work to spread across the pool, keyed by unit name, with a
/// weight per unit. Iterated in key order.
pub type LoadMap = BTreeMap<String, f64>;

/// Chooses the region for a new instance.
pub trait RegionSelector: Send + Sync {
    fn select(&self, instances: &[Instance]) -> Region;
}

/// Assigns units of a load map to instances.
pub trait DistributionStrategy: Send + Sync {
    /// Must never assign work to an instance that is not healthy.
    fn distribute(&self, instances: &[Instance], load: &LoadMap) -> Distribution;
}

// ── Region selection ───────────────────────────────────────────────

/// Picks the first region, in priority order, holding the fewest instances.
#[derive(Debug, Clone)]
pub struct LeastPopulatedRegion {
    priority: Vec<Region>,
}

impl LeastPopulatedRegion {
    /// Use an explicit priority order. Ties go to the earlier region.
    pub fn new(priority: Vec<Region>) -> Result<Self, ConfigError> {
        if priority.is_empty() {
            return Err(ConfigError::Load("region priority list is empty".to_string()));
        }
        Ok(Self { priority })
    }

    pub fn priority(&self) -> &[Region] {
        &self.priority
    }
}

impl Default for LeastPopulatedRegion {
    fn default() -> Self {
        Self {
            priority: Region::ALL.to_vec(),
        }
    }
}

impl RegionSelector for LeastPopulatedRegion {
    fn select(&self, instances: &[Instance]) -> Region {
        let mut counts: HashMap<Region, usize> = HashMap::new();
        for inst in instances {
            *counts.entry(inst.region).or_default() += 1;
        }

        let mut best = self.priority[0];
        let mut best_count = counts.get(&best).copied().unwrap_or(0);
        for &region in &self.priority[1..] {
            let count = counts.get(&region).copied().unwrap_or(0);
            // Strictly fewer: an equal count never displaces an earlier region.
            if count < best_count {
                best = region;
                best_count = count;
            }
        }
        best
    }
}

// ── Load distribution ─────────────────────────────────────────────

/// One unit of work bound to an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub unit: String,
    pub instance_id: InstanceId,
    pub load: f64,
}

/// Result of distributing a load map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub assignments: Vec<Assignment>,
}

impl Distribution {
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Units assigned to `instance_id`, in assignment order.
    pub fn units_for(&self, instance_id: &str) -> Vec<&str> {
        self.assignments
            .iter()
            .filter(|a| a.instance_id == instance_id)
            .map(|a| a.unit.as_str())
            .collect()
    }

    /// Summed assigned weight per instance.
    pub fn load_by_instance(&self) -> BTreeMap<InstanceId, f64> {
        let mut totals = BTreeMap::new();
        for a in &self.assignments {
            *totals.entry(a.instance_id.clone()).or_insert(0.0) += a.load;
        }
        totals
    }
}

/// Round-robin over healthy instances, starting from the least loaded.
///
/// Equalizes the number of units per instance, not their weight. The
/// cursor starts fresh on every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeastLoadedRoundRobin;

impl DistributionStrategy for LeastLoadedRoundRobin {
    fn distribute(&self, instances: &[Instance], load: &LoadMap) -> Distribution {
        let mut healthy: Vec<&Instance> = instances.iter().filter(|i| i.is_healthy()).collect();
        if healthy.is_empty() {
            return Distribution::default();
        }
        healthy.sort_by(|a, b| a.load.total_cmp(&b.load).then_with(|| a.id.cmp(&b.id)));

        let assignments = load
            .iter()
            .enumerate()
            .map(|(idx, (unit, weight))| Assignment {
                unit: unit.clone(),
                instance_id: healthy[idx % healthy.len()].id.clone(),
                load: *weight,
            })
            .collect();

        Distribution { assignments }
    }
}
