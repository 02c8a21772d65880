//! loadgrid-autoscale — threshold-driven instance scaling.
//!
//! Reads `SystemMetrics` (cache first, then the `MetricsSource`), decides a
//! scale action, and applies it against the `InstanceRegistry`. Also places
//! new instances by region and spreads work across the healthy pool.
//!
//! # Scaling Algorithm
//!
//! ```text
//! if cpu > up || memory > up:        ScaleUp    (unless pool >= max)
//! elif cpu < down && memory < down:  ScaleDown  (unless pool <= min)
//! else:                              NoChange
//! ```
//!
//! With the default thresholds (`up = 80`, `down = 20`) the 20–80 dead band
//! is the only damping; there is no cooldown timer. At most one instance is
//! added or removed per tick, and ticks for one pool are serialized by an
//! async mutex so overlapping ticks cannot both scale up past `max`.
//!
//! # Strategies
//!
//! Region placement and load distribution sit behind `RegionSelector` and
//! `DistributionStrategy`. The defaults are `LeastPopulatedRegion` and
//! `LeastLoadedRoundRobin`.

pub mod config;
pub mod error;
pub mod scaler;
pub mod strategy;

pub use config::{AutoscaleConfig, Thresholds};
pub use error::{AutoscaleError, AutoscaleResult};
pub use scaler::{Autoscaler, ScaleDecision, ScaleOutcome, SkipReason, METRICS_CACHE_KEY};
pub use strategy::{
    Assignment, Distribution, DistributionStrategy, LeastLoadedRoundRobin, LeastPopulatedRegion,
    LoadMap, RegionSelector,
};
