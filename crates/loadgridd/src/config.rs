//! loadgrid.toml configuration parser.
//!
//! Every section is optional; omitted values fall back to the autoscaler
//! defaults. Durations are written as `<n>ms`, `<n>s`, or `<n>m`.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use loadgrid_autoscale::{AutoscaleConfig, Thresholds};
use loadgrid_ratelimit::RatePolicy;
use loadgrid_state::{ConfigError, Region};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    #[serde(default)]
    pub autoscale: AutoscaleSection,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AutoscaleSection {
    pub min_instances: u32,
    pub max_instances: u32,
    pub scale_up_threshold: f64,
    pub scale_down_threshold: f64,
    pub poll_interval: String,
    pub registry_timeout: String,
    pub metrics_ttl: String,
    /// Host samples older than this stop driving scale decisions.
    pub host_sample_max_age: String,
    /// Region placement priority, first = preferred on ties.
    pub regions: Vec<String>,
}

impl Default for AutoscaleSection {
    fn default() -> Self {
        Self {
            min_instances: 2,
            max_instances: 10,
            scale_up_threshold: 80.0,
            scale_down_threshold: 20.0,
            poll_interval: "30s".to_string(),
            registry_timeout: "5s".to_string(),
            metrics_ttl: "5s".to_string(),
            host_sample_max_age: "2m".to_string(),
            regions: Region::ALL.iter().map(|r| r.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitSection {
    /// Fallback for clients without an entry in `keys`.
    pub default: Option<PolicySection>,
    #[serde(default)]
    pub keys: BTreeMap<String, PolicySection>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicySection {
    pub max_requests: u32,
    pub window: String,
}

impl PolicySection {
    fn to_policy(&self, key: &str) -> Result<RatePolicy, ConfigError> {
        let window = parse_duration(&self.window)?;
        RatePolicy::new(self.max_requests, window).map_err(|e| match e {
            ConfigError::InvalidPolicy { reason, .. } => ConfigError::InvalidPolicy {
                key: key.to_string(),
                reason,
            },
            other => other,
        })
    }
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Load(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Load(e.to_string()))
    }

    /// Build and validate the autoscaler configuration.
    pub fn autoscale_config(&self) -> Result<AutoscaleConfig, ConfigError> {
        let a = &self.autoscale;
        let config = AutoscaleConfig {
            min_instances: a.min_instances,
            max_instances: a.max_instances,
            thresholds: Thresholds {
                scale_up: a.scale_up_threshold,
                scale_down: a.scale_down_threshold,
            },
            poll_interval: parse_duration(&a.poll_interval)?,
            registry_timeout: parse_duration(&a.registry_timeout)?,
            metrics_ttl: parse_duration(&a.metrics_ttl)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn host_sample_max_age(&self) -> Result<Duration, ConfigError> {
        let max_age = parse_duration(&self.autoscale.host_sample_max_age)?;
        if max_age.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "host_sample_max_age",
            });
        }
        Ok(max_age)
    }

    /// Region priority list.
    pub fn regions(&self) -> Result<Vec<Region>, ConfigError> {
        self.autoscale.regions.iter().map(|r| r.parse()).collect()
    }

    pub fn default_policy(&self) -> Result<Option<RatePolicy>, ConfigError> {
        self.rate_limit
            .default
            .as_ref()
            .map(|p| p.to_policy("default"))
            .transpose()
    }

    /// Explicit per-client policies.
    pub fn key_policies(&self) -> Result<Vec<(String, RatePolicy)>, ConfigError> {
        self.rate_limit
            .keys
            .iter()
            .map(|(key, p)| Ok((key.clone(), p.to_policy(key)?)))
            .collect()
    }

    /// Validate every section without building anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.autoscale_config()?;
        self.host_sample_max_age()?;
        if self.regions()?.is_empty() {
            return Err(ConfigError::Load("autoscale.regions is empty".to_string()));
        }
        self.default_policy()?;
        self.key_policies()?;
        Ok(())
    }
}

/// Parse a duration string like "250ms", "30s", "5m".
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    let invalid = || ConfigError::InvalidDuration(s.to_string());
    let (digits, unit_ms) = if let Some(ms) = s.strip_suffix("ms") {
        (ms, 1)
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, 1_000)
    } else if let Some(mins) = s.strip_suffix('m') {
        (mins, 60_000)
    } else {
        return Err(invalid());
    };
    let value: u64 = digits.trim().parse().map_err(|_| invalid())?;
    value
        .checked_mul(unit_ms)
        .map(Duration::from_millis)
        .ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration(" 0s ").unwrap(), Duration::ZERO);
        assert!(parse_duration("30").is_err());
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("-5s").is_err());
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = DaemonConfig::from_toml_str("").unwrap();
        let autoscale = config.autoscale_config().unwrap();
        assert_eq!(autoscale, AutoscaleConfig::default());
        assert_eq!(config.regions().unwrap(), Region::ALL.to_vec());
        assert!(config.default_policy().unwrap().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[autoscale]
min_instances = 3
max_instances = 6
scale_up_threshold = 75.0
scale_down_threshold = 25.0
poll_interval = "10s"
registry_timeout = "2s"
metrics_ttl = "500ms"
regions = ["eu-west", "us-east"]

[rate_limit]
default = { max_requests = 100, window = "1m" }

[rate_limit.keys.partner]
max_requests = 1000
window = "1m"
"#;
        let config = DaemonConfig::from_toml_str(toml_str).unwrap();
        let autoscale = config.autoscale_config().unwrap();
        assert_eq!(autoscale.min_instances, 3);
        assert_eq!(autoscale.max_instances, 6);
        assert_eq!(autoscale.thresholds.scale_up, 75.0);
        assert_eq!(autoscale.metrics_ttl, Duration::from_millis(500));
        assert_eq!(config.regions().unwrap(), vec![Region::EuWest, Region::UsEast]);

        let default = config.default_policy().unwrap().unwrap();
        assert_eq!(default.max_requests(), 100);
        assert_eq!(default.window(), Duration::from_secs(60));

        let keys = config.key_policies().unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].0, "partner");
        assert_eq!(keys[0].1.max_requests(), 1000);
    }

    #[test]
    fn invalid_policy_names_its_key() {
        let toml_str = r#"
[rate_limit.keys.broken]
max_requests = 0
window = "1s"
"#;
        let config = DaemonConfig::from_toml_str(toml_str).unwrap();
        match config.key_policies() {
            Err(ConfigError::InvalidPolicy { key, .. }) => assert_eq!(key, "broken"),
            other => panic!("expected InvalidPolicy, got {other:?}"),
        }
    }

    #[test]
    fn zero_metrics_ttl_rejected() {
        let config = DaemonConfig::from_toml_str("[autoscale]\nmetrics_ttl = \"0s\"\n").unwrap();
        assert!(matches!(
            config.autoscale_config(),
            Err(ConfigError::ZeroDuration { field: "metrics_ttl" })
        ));
    }

    #[test]
    fn host_sample_max_age_parsed_and_checked() {
        let config = DaemonConfig::default();
        assert_eq!(config.host_sample_max_age().unwrap(), Duration::from_secs(120));

        let config =
            DaemonConfig::from_toml_str("[autoscale]\nhost_sample_max_age = \"0s\"\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroDuration { field: "host_sample_max_age" })
        ));
    }

    #[test]
    fn unknown_region_rejected() {
        let config =
            DaemonConfig::from_toml_str("[autoscale]\nregions = [\"moon-base\"]\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::UnknownRegion(_))));
    }

    #[test]
    fn unknown_fields_rejected() {
        assert!(DaemonConfig::from_toml_str("[autoscale]\ncooldown = \"5m\"\n").is_err());
    }

    #[test]
    fn from_file_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loadgrid.toml");
        std::fs::write(&path, "[autoscale]\nmax_instances = 4\n").unwrap();

        let config = DaemonConfig::from_file(&path).unwrap();
        assert_eq!(config.autoscale_config().unwrap().max_instances, 4);

        let missing = DaemonConfig::from_file(&dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(ConfigError::Load(_))));
    }
}
