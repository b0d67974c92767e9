//! shoal.toml configuration parser.
//!
//! Every field is optional in the file; defaults follow the configuration
//! table in the project docs. Threshold fields are resolved once into a
//! tagged policy at daemon startup, with a warning on ambiguous input.

use std::path::Path;

use serde::{Deserialize, Serialize};

use shoal_policy::{PolicyConfig, ThresholdOptions};
use shoal_runtime::ManagerConfig;

use crate::controller::ControllerConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShoaldConfig {
    /// Informational instance sizing, passed through to logs.
    pub instance: Option<String>,
    pub max_instances: Option<u32>,
    pub min_instances: Option<u32>,
    /// Enables request-based scaling and capacity filtering when set.
    pub max_requests_per_instance: Option<u32>,
    pub scale_up_capacity_threshold: Option<f64>,
    pub heartbeat_interval_ms: Option<u64>,
    pub stale_threshold_ms: Option<u64>,
    pub scale_threshold: Option<f64>,
    pub scale_threshold_cpu: Option<f64>,
    pub scale_threshold_memory: Option<f64>,
    pub scale_threshold_disk: Option<f64>,
    pub scale_up_cooldown_ms: Option<u64>,
    pub scale_down_cooldown_ms: Option<u64>,
    pub scale_down_threshold: Option<f64>,
    pub scale_down_threshold_cpu: Option<f64>,
    pub scale_down_threshold_memory: Option<f64>,
    pub scale_down_threshold_disk: Option<f64>,
    pub health_check_retries: Option<u32>,
    pub drain_timeout_ms: Option<u64>,
    pub monitoring_endpoint: Option<String>,
    pub stats_url: Option<String>,
}

impl ShoaldConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ShoaldConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Resolve the scaling policy parameters.
    pub fn policy(&self) -> PolicyConfig {
        let options = ThresholdOptions {
            general: self.scale_threshold,
            cpu: self.scale_threshold_cpu,
            memory: self.scale_threshold_memory,
            disk: self.scale_threshold_disk,
            down_general: self.scale_down_threshold,
            down_cpu: self.scale_down_threshold_cpu,
            down_memory: self.scale_down_threshold_memory,
            down_disk: self.scale_down_threshold_disk,
        };
        let (scale_up, scale_down) = options.resolve();
        let defaults = PolicyConfig::default();
        PolicyConfig {
            max_instances: self.max_instances.unwrap_or(defaults.max_instances),
            min_instances: self.min_instances.unwrap_or(defaults.min_instances),
            max_requests_per_instance: self.max_requests_per_instance,
            scale_up_capacity_threshold: self
                .scale_up_capacity_threshold
                .unwrap_or(defaults.scale_up_capacity_threshold),
            scale_up_cooldown_ms: self
                .scale_up_cooldown_ms
                .unwrap_or(defaults.scale_up_cooldown_ms),
            scale_down_cooldown_ms: self
                .scale_down_cooldown_ms
                .unwrap_or(defaults.scale_down_cooldown_ms),
            scale_up,
            scale_down,
        }
    }

    /// Resolve the instance manager parameters.
    pub fn manager(&self) -> ManagerConfig {
        let defaults = ManagerConfig::default();
        ManagerConfig {
            monitoring_endpoint: self
                .monitoring_endpoint
                .clone()
                .unwrap_or(defaults.monitoring_endpoint),
            stats_url: self.stats_url.clone().unwrap_or(defaults.stats_url),
            health_check_retries: self
                .health_check_retries
                .unwrap_or(defaults.health_check_retries),
        }
    }

    /// Resolve the controller parameters.
    pub fn controller(&self) -> ControllerConfig {
        let defaults = ControllerConfig::default();
        ControllerConfig {
            policy: self.policy(),
            heartbeat_interval_ms: self
                .heartbeat_interval_ms
                .unwrap_or(defaults.heartbeat_interval_ms),
            drain_timeout_ms: self.drain_timeout_ms.unwrap_or(defaults.drain_timeout_ms),
            stale_threshold_ms: self
                .stale_threshold_ms
                .unwrap_or(defaults.stale_threshold_ms),
            monitoring_endpoint: self
                .monitoring_endpoint
                .clone()
                .unwrap_or(defaults.monitoring_endpoint),
            instance_kind: self
                .instance
                .clone()
                .unwrap_or(defaults.instance_kind),
        }
    }
}
