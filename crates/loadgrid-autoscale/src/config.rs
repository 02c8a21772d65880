//! Autoscaler configuration.

use std::time::Duration;

use loadgrid_state::ConfigError;

/// Utilization thresholds (percent) bounding the dead band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Scale up when cpu or memory exceeds this.
    pub scale_up: f64,
    /// Scale down when both cpu and memory are below this.
    pub scale_down: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            scale_up: 80.0,
            scale_down: 20.0,
        }
    }
}

/// Pool bounds, thresholds, and timing for one autoscaled pool.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoscaleConfig {
    pub min_instances: u32,
    pub max_instances: u32,
    pub thresholds: Thresholds,
    /// Interval between control loop ticks.
    pub poll_interval: Duration,
    /// Upper bound on any single registry or metrics source call.
    pub registry_timeout: Duration,
    /// How long a metrics snapshot is reused before re-reading the source.
    pub metrics_ttl: Duration,
}

impl Default for AutoscaleConfig {
    fn default() -> Self {
        Self {
            min_instances: 2,
            max_instances: 10,
            thresholds: Thresholds::default(),
            poll_interval: Duration::from_secs(30),
            registry_timeout: Duration::from_secs(5),
            metrics_ttl: Duration::from_secs(5),
        }
    }
}

impl AutoscaleConfig {
    /// Reject configurations the control loop cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_instances == 0 || self.min_instances > self.max_instances {
            return Err(ConfigError::InvalidBounds {
                min: self.min_instances,
                max: self.max_instances,
            });
        }

        let Thresholds { scale_up, scale_down } = self.thresholds;
        let in_range = |v: f64| (0.0..=100.0).contains(&v);
        if !in_range(scale_up) || !in_range(scale_down) || scale_down >= scale_up {
            return Err(ConfigError::InvalidThresholds {
                down: scale_down.to_string(),
                up: scale_up.to_string(),
            });
        }

        for (field, value) in [
            ("poll_interval", self.poll_interval),
            ("registry_timeout", self.registry_timeout),
            ("metrics_ttl", self.metrics_ttl),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration { field });
            }
        }
        Ok(())
    }
}
