//! Domain types shared across LoadGrid.
//!
//! These types describe the compute instance pool and the system-level
//! metrics the autoscaler reacts to. All types are serializable to/from JSON
//! for storage in redb tables and for the REST API.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Unique identifier for an instance.
pub type InstanceId = String;

// ── Region ────────────────────────────────────────────────────────

/// Placement region for an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Region {
    UsEast,
    UsWest,
    EuWest,
    AsiaEast,
}

impl Region {
    /// Every region, in default placement priority order.
    pub const ALL: [Region; 4] = [
        Region::UsEast,
        Region::UsWest,
        Region::EuWest,
        Region::AsiaEast,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Region::UsEast => "us-east",
            Region::UsWest => "us-west",
            Region::EuWest => "eu-west",
            Region::AsiaEast => "asia-east",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Region::ALL
            .into_iter()
            .find(|r| r.as_str() == s.trim())
            .ok_or_else(|| ConfigError::UnknownRegion(s.to_string()))
    }
}

// ── Instance ──────────────────────────────────────────────────────

/// Health status of an instance, as reported by external health checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Initializing,
    Healthy,
    Unhealthy,
}

/// A compute instance in the pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instance {
    pub id: InstanceId,
    pub region: Region,
    pub status: InstanceStatus,
    /// Load gauge, 0–100.
    pub load: f64,
}

impl Instance {
    pub fn is_healthy(&self) -> bool {
        self.status == InstanceStatus::Healthy
    }
}

/// Clamp a reported load into the 0–100 gauge range. NaN reads as idle.
pub fn clamp_load(load: f64) -> f64 {
    if load.is_nan() {
        0.0
    } else {
        load.clamp(0.0, 100.0)
    }
}

// ── Metrics ───────────────────────────────────────────────────────

/// Externally reported host utilization sample.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostSample {
    /// CPU utilization (%).
    pub cpu: f64,
    /// Memory utilization (%).
    pub memory: f64,
    /// Network throughput (bytes/s).
    pub network: f64,
    /// Unix timestamp (milliseconds) of the reading.
    pub reported_at: u64,
}

impl HostSample {
    /// Whether the reading is younger than `max_age` at `now` (unix millis).
    pub fn is_fresh(&self, now: u64, max_age: Duration) -> bool {
        let max_age_ms = u64::try_from(max_age.as_millis()).unwrap_or(u64::MAX);
        now.saturating_sub(self.reported_at) < max_age_ms
    }
}

/// Point-in-time view of system load used for scaling decisions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemMetrics {
    /// CPU utilization (%).
    pub cpu: f64,
    /// Memory utilization (%).
    pub memory: f64,
    /// Network throughput (bytes/s).
    pub network: f64,
    /// Healthy instances the figures were computed over.
    pub instances: Vec<Instance>,
    /// Unix timestamp (milliseconds) when the snapshot was taken.
    pub observed_at: u64,
}

impl SystemMetrics {
    /// Build a snapshot from a host sample, or estimate one from instance
    /// loads when no sample has been reported.
    pub fn from_parts(
        sample: Option<&HostSample>,
        instances: Vec<Instance>,
        observed_at: u64,
    ) -> Self {
        match sample {
            Some(s) => Self {
                cpu: s.cpu,
                memory: s.memory,
                network: s.network,
                instances,
                observed_at,
            },
            None => {
                let mean = mean_load(&instances);
                Self {
                    cpu: mean,
                    memory: mean,
                    network: 0.0,
                    instances,
                    observed_at,
                }
            }
        }
    }

    pub fn pool_size(&self) -> usize {
        self.instances.len()
    }
}

/// Mean `load` across instances; zero for an empty pool.
pub fn mean_load(instances: &[Instance]) -> f64 {
    if instances.is_empty() {
        return 0.0;
    }
    instances.iter().map(|i| i.load).sum::<f64>() / instances.len() as f64
}
