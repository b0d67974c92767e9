//! Request routing — picks a target instance for an incoming request.
//!
//! Selection prefers the healthy, non-draining instance with the fewest
//! in-flight requests; ties go to the most recently heartbeated one (the
//! registry returns records in exactly that order). When
//! `max_requests_per_instance` is configured, instances at capacity are
//! filtered out first, with a fallback to any routable instance.

use tracing::debug;

use shoal_state::{InstanceFilter, InstanceRecord, Registry, StateResult};

use crate::config::PolicyConfig;

/// Chooses a target instance per request and detects capacity crossings.
/// Read-only over the registry.
pub struct Router {
    registry: Registry,
    config: PolicyConfig,
}

impl Router {
    pub fn new(registry: Registry, config: PolicyConfig) -> Self {
        Self { registry, config }
    }

    /// Pick the best instance for a new request.
    ///
    /// Prefers a routable instance below the per-instance request cap
    /// (when configured); falls back to any routable instance; returns
    /// `None` when the pool has nothing usable.
    pub fn select_instance(&self) -> StateResult<Option<InstanceRecord>> {
        if let Some(cap) = self.config.max_requests_per_instance {
            let below = self.registry.instances(InstanceFilter {
                healthy: Some(true),
                not_draining: true,
                below_capacity: Some(cap),
            })?;
            if let Some(instance) = below.into_iter().next() {
                return Ok(Some(instance));
            }
            debug!("all instances at request capacity, falling back");
        }

        let routable = self.registry.instances(InstanceFilter::routable())?;
        Ok(routable.into_iter().next())
    }

    /// Edge trigger for the optimistic scale-up.
    ///
    /// Fires iff the transition `previous → previous + 1` crosses
    /// `floor(max_requests_per_instance × scale_up_capacity_threshold)`
    /// from below, so each crossing fires at most once.
    pub fn check_optimistic_scale_up(&self, name: &str, previous_requests: u32) -> bool {
        let Some(cap) = self.config.max_requests_per_instance else {
            return false;
        };
        let limit = (cap as f64 * self.config.scale_up_capacity_threshold).floor() as u32;
        let crossing = previous_requests < limit && previous_requests + 1 >= limit;
        if crossing {
            debug!(
                name,
                previous_requests, limit, "optimistic scale-up crossing detected"
            );
        }
        crossing
    }

    /// Number of routable instances at or over the per-instance cap.
    pub fn at_capacity_count(&self) -> StateResult<u32> {
        let Some(cap) = self.config.max_requests_per_instance else {
            return Ok(0);
        };
        let routable = self.registry.instances(InstanceFilter::routable())?;
        Ok(routable
            .iter()
            .filter(|r| r.active_requests >= cap)
            .count() as u32)
    }
}
