//! Domain types for the shoal registry.
//!
//! These types represent the persisted state of the fleet: one record per
//! known container instance, the capacity reservation counter, and the
//! timestamps of the last scaling actions. All types are serializable
//! to/from JSON for storage in redb tables.
//!
//! Timestamps are epoch milliseconds; resource metrics are percentages on
//! a 0–100 scale.

use serde::{Deserialize, Serialize};

/// One record per known container instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceRecord {
    /// Opaque unique instance name.
    pub name: String,
    /// When the record was created (epoch ms).
    pub created_at: u64,
    /// Number of requests currently in flight on this instance.
    pub active_requests: u32,
    /// Latest sampled CPU usage (0–100).
    pub current_cpu: f64,
    /// Latest sampled memory usage (0–100).
    pub current_memory: f64,
    /// Latest sampled disk usage (0–100).
    pub current_disk: f64,
    /// Whether the instance currently passes health checks.
    pub healthy: bool,
    /// Consecutive health check failures.
    pub health_check_failures: u32,
    /// Last successful keep-alive or record refresh (epoch ms).
    pub last_heartbeat: u64,
    /// Last time a request counter was touched (epoch ms).
    pub last_request_at: u64,
    /// Last health check attempt (epoch ms).
    pub last_health_check: u64,
    /// Whether the instance is draining toward destruction.
    pub draining: bool,
    /// When draining started, if it has.
    pub draining_since: Option<u64>,
    /// Last time this instance crossed a scale-up metric threshold.
    /// Eligibility to fire again is restored by age, not by clearing.
    pub threshold_crossed_at: Option<u64>,
}

impl InstanceRecord {
    /// A fresh record as created when a container is confirmed ready.
    pub fn new(name: &str, initial_requests: u32, healthy: bool, now: u64) -> Self {
        Self {
            name: name.to_string(),
            created_at: now,
            active_requests: initial_requests,
            current_cpu: 0.0,
            current_memory: 0.0,
            current_disk: 0.0,
            healthy,
            health_check_failures: 0,
            last_heartbeat: now,
            last_request_at: now,
            last_health_check: now,
            draining: false,
            draining_since: None,
            threshold_crossed_at: None,
        }
    }

    /// Whether the instance can receive new requests at all.
    pub fn routable(&self) -> bool {
        self.healthy && !self.draining
    }
}

/// Atomic reservation slot capping instance creation. Single row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapacityCounter {
    /// Instances that exist or are being created.
    pub current_count: u32,
    /// Hard cap, mirrors the `max_instances` config.
    pub max_count: u32,
}

/// Timestamps of the last fleet-wide scaling actions. Single row.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScalingTimestamps {
    /// Last scale-up action (epoch ms, 0 if never).
    pub last_scale_up: u64,
    /// Last scale-down action (epoch ms, 0 if never).
    pub last_scale_down: u64,
}

/// Filter for registry instance queries.
///
/// `None` fields match everything; results are always ordered by
/// `active_requests ASC, last_heartbeat DESC`.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstanceFilter {
    /// Match only records with this health flag.
    pub healthy: Option<bool>,
    /// Exclude draining records.
    pub not_draining: bool,
    /// Match only records with `active_requests` below this value.
    pub below_capacity: Option<u32>,
}

impl InstanceFilter {
    /// Healthy, non-draining instances — the routable set.
    pub fn routable() -> Self {
        Self {
            healthy: Some(true),
            not_draining: true,
            below_capacity: None,
        }
    }

    pub fn matches(&self, record: &InstanceRecord) -> bool {
        if let Some(h) = self.healthy {
            if record.healthy != h {
                return false;
            }
        }
        if self.not_draining && record.draining {
            return false;
        }
        if let Some(cap) = self.below_capacity {
            if record.active_requests >= cap {
                return false;
            }
        }
        true
    }
}

/// JSON snapshot served from the monitoring endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSnapshot {
    #[serde(rename = "instanceCount")]
    pub instance_count: u32,
    pub instances: Vec<InstanceRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_starts_clean() {
        let r = InstanceRecord::new("inst-1", 2, true, 1000);
        assert_eq!(r.active_requests, 2);
        assert_eq!(r.created_at, 1000);
        assert_eq!(r.health_check_failures, 0);
        assert!(!r.draining);
        assert!(r.threshold_crossed_at.is_none());
        assert!(r.routable());
    }

    #[test]
    fn filter_routable_excludes_draining_and_unhealthy() {
        let filter = InstanceFilter::routable();

        let mut r = InstanceRecord::new("a", 0, true, 0);
        assert!(filter.matches(&r));

        r.draining = true;
        assert!(!filter.matches(&r));

        r.draining = false;
        r.healthy = false;
        assert!(!filter.matches(&r));
    }

    #[test]
    fn filter_below_capacity_is_strict() {
        let filter = InstanceFilter {
            below_capacity: Some(5),
            ..Default::default()
        };

        let mut r = InstanceRecord::new("a", 4, true, 0);
        assert!(filter.matches(&r));
        r.active_requests = 5;
        assert!(!filter.matches(&r));
    }

    #[test]
    fn snapshot_wire_keys() {
        let snap = FleetSnapshot {
            instance_count: 1,
            instances: vec![InstanceRecord::new("a", 0, true, 0)],
        };
        let json = serde_json::to_value(&snap).unwrap();
        assert!(json.get("instanceCount").is_some());
        assert!(json.get("instances").is_some());
    }
}
