//! Scaler — decides when the fleet grows or shrinks.
//!
//! Scale-up has two triggers: a per-instance metric threshold crossing
//! (edge-triggered via `threshold_crossed_at`, so one overloaded instance
//! cannot re-fire until the cooldown has aged out), and the average
//! in-flight request count exceeding the per-instance cap. Scale-down
//! requires *every* routable instance to sit at or below the scale-down
//! thresholds, which are offset 45 points below the scale-up thresholds
//! as hysteresis. Fleet-wide cooldowns rate-limit both directions.

use tracing::{debug, info};

use shoal_state::{InstanceFilter, InstanceRecord, Registry, StateResult};

use crate::config::PolicyConfig;

/// Scaling decisions over registry state and config.
pub struct Scaler {
    registry: Registry,
    config: PolicyConfig,
}

impl Scaler {
    pub fn new(registry: Registry, config: PolicyConfig) -> Self {
        Self { registry, config }
    }

    /// Whether a metric threshold crossing warrants a scale-up.
    ///
    /// Records the crossing on the instance that triggered it, making the
    /// check an edge trigger: the same instance cannot fire again until
    /// its crossing is older than `scale_up_cooldown_ms`.
    pub fn should_scale_up_for_metrics(&self, now: u64) -> StateResult<bool> {
        if self.at_max()? || self.in_scale_up_cooldown(now)? {
            return Ok(false);
        }
        if self.config.scale_up.is_disabled() {
            return Ok(false);
        }

        for record in self.registry.instances(InstanceFilter::routable())? {
            let eligible = match record.threshold_crossed_at {
                None => true,
                Some(t) => now.saturating_sub(t) >= self.config.scale_up_cooldown_ms,
            };
            if !eligible {
                debug!(name = %record.name, "crossing still in cooldown, skipped");
                continue;
            }
            if self.config.scale_up.exceeded_by(&record) {
                self.registry.mark_threshold_crossed(&record.name, now)?;
                info!(
                    name = %record.name,
                    cpu = record.current_cpu,
                    memory = record.current_memory,
                    disk = record.current_disk,
                    "metric threshold exceeded, scaling up"
                );
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Whether the average in-flight load warrants a scale-up.
    pub fn should_scale_up_for_requests(&self, now: u64) -> StateResult<bool> {
        let Some(cap) = self.config.max_requests_per_instance else {
            return Ok(false);
        };
        if self.at_max()? || self.in_scale_up_cooldown(now)? {
            return Ok(false);
        }

        let routable = self.registry.instances(InstanceFilter::routable())?;
        if routable.is_empty() {
            return Ok(false);
        }
        let total: u64 = routable.iter().map(|r| u64::from(r.active_requests)).sum();
        let average = total as f64 / routable.len() as f64;
        if average > f64::from(cap) {
            info!(average, cap, "average load above per-instance cap, scaling up");
            return Ok(true);
        }
        Ok(false)
    }

    /// Whether the fleet should shrink.
    ///
    /// True iff the fleet is above `min_instances`, the scale-down
    /// cooldown has elapsed, and every routable instance is at or below
    /// the scale-down thresholds.
    pub fn should_scale_down(&self, now: u64) -> StateResult<bool> {
        let count = self.registry.instance_count(false)?;
        if count <= self.config.min_instances {
            return Ok(false);
        }
        let last = self.registry.last_scale_down()?;
        if now.saturating_sub(last) < self.config.scale_down_cooldown_ms {
            return Ok(false);
        }
        if self.config.scale_down.is_disabled() {
            return Ok(false);
        }

        let routable = self.registry.instances(InstanceFilter::routable())?;
        let all_cold = routable
            .iter()
            .all(|r| self.config.scale_down.satisfied_by(r));
        if all_cold {
            debug!(count, "fleet cold enough to scale down");
        }
        Ok(all_cold)
    }

    /// Pick instances to drain for a scale-down.
    ///
    /// Unhealthy non-draining instances go first; then the coldest
    /// healthy instances below the scale-down thresholds, fewest
    /// in-flight requests first with ties to the oldest heartbeat.
    /// Never returns more than `count − min_instances` instances.
    pub fn select_for_removal(&self) -> StateResult<Vec<InstanceRecord>> {
        let count = self.registry.instance_count(false)?;
        let headroom = count.saturating_sub(self.config.min_instances) as usize;
        if headroom == 0 {
            return Ok(Vec::new());
        }

        let mut removals: Vec<InstanceRecord> = self
            .registry
            .instances(InstanceFilter {
                healthy: Some(false),
                not_draining: true,
                below_capacity: None,
            })?
            .into_iter()
            .collect();

        let mut cold: Vec<InstanceRecord> = self
            .registry
            .instances(InstanceFilter::routable())?
            .into_iter()
            .filter(|r| self.config.scale_down.satisfied_by(r))
            .collect();
        // Oldest heartbeat first here, unlike routing order.
        cold.sort_by(|a, b| {
            a.active_requests
                .cmp(&b.active_requests)
                .then(a.last_heartbeat.cmp(&b.last_heartbeat))
        });
        removals.extend(cold);

        removals.truncate(headroom);
        Ok(removals)
    }

    fn at_max(&self) -> StateResult<bool> {
        let capacity = self.registry.capacity()?;
        Ok(capacity.current_count >= capacity.max_count)
    }

    fn in_scale_up_cooldown(&self, now: u64) -> StateResult<bool> {
        let last = self.registry.last_scale_up()?;
        Ok(now.saturating_sub(last) < self.config.scale_up_cooldown_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThresholdPolicy;

    fn setup(config: PolicyConfig) -> (Registry, Scaler) {
        let registry = Registry::open_in_memory().unwrap();
        registry.migrate(config.max_instances).unwrap();
        let scaler = Scaler::new(registry.clone(), config);
        (registry, scaler)
    }

    fn hot_instance(registry: &Registry, name: &str, cpu: f64, now: u64) {
        registry.record_instance(name, 0, true, now).unwrap();
        registry.update_metrics(name, cpu, 0.0, 0.0).unwrap();
    }

    // ── Metric scale-up ────────────────────────────────────────────

    #[test]
    fn metric_scale_up_fires_above_threshold() {
        let (registry, scaler) = setup(PolicyConfig::default());
        registry.try_reserve_slot().unwrap();
        hot_instance(&registry, "hot", 90.0, 1000);

        assert!(scaler.should_scale_up_for_metrics(100_000).unwrap());
        // The crossing is recorded on the instance.
        let record = registry.instance("hot").unwrap().unwrap();
        assert_eq!(record.threshold_crossed_at, Some(100_000));
    }

    #[test]
    fn metric_scale_up_edge_trigger_dedups() {
        let (registry, scaler) = setup(PolicyConfig::default());
        registry.try_reserve_slot().unwrap();
        hot_instance(&registry, "hot", 90.0, 1000);

        // First heartbeat fires and records the crossing at T.
        let t = 100_000;
        assert!(scaler.should_scale_up_for_metrics(t).unwrap());
        registry.record_scale_up(t).unwrap();

        // Next heartbeat at T+30s: global cooldown (60s) blocks it.
        assert!(!scaler.should_scale_up_for_metrics(t + 30_000).unwrap());

        // At T+70s the global cooldown has passed AND the instance's own
        // crossing has aged out, so it may fire again.
        assert!(scaler.should_scale_up_for_metrics(t + 70_000).unwrap());
    }

    #[test]
    fn per_instance_crossing_blocks_even_after_global_cooldown() {
        let (registry, scaler) = setup(PolicyConfig::default());
        registry.try_reserve_slot().unwrap();
        hot_instance(&registry, "hot", 90.0, 1000);

        let t = 100_000;
        assert!(scaler.should_scale_up_for_metrics(t).unwrap());
        // No record_scale_up: pretend the creation failed. The instance
        // crossing alone still suppresses a re-fire before it ages out.
        assert!(!scaler.should_scale_up_for_metrics(t + 30_000).unwrap());
        assert!(scaler.should_scale_up_for_metrics(t + 60_000).unwrap());
    }

    #[test]
    fn metric_scale_up_blocked_at_max_capacity() {
        let config = PolicyConfig {
            max_instances: 1,
            ..Default::default()
        };
        let (registry, scaler) = setup(config);
        registry.try_reserve_slot().unwrap();
        hot_instance(&registry, "hot", 90.0, 1000);

        assert!(!scaler.should_scale_up_for_metrics(100_000).unwrap());
    }

    #[test]
    fn metric_scale_up_blocked_in_cooldown() {
        let (registry, scaler) = setup(PolicyConfig::default());
        registry.try_reserve_slot().unwrap();
        hot_instance(&registry, "hot", 90.0, 1000);
        registry.record_scale_up(90_000).unwrap();

        assert!(!scaler.should_scale_up_for_metrics(100_000).unwrap());
        assert!(scaler.should_scale_up_for_metrics(150_000).unwrap());
    }

    #[test]
    fn metric_scale_up_ignores_unhealthy_and_draining() {
        let (registry, scaler) = setup(PolicyConfig::default());
        registry.try_reserve_slot().unwrap();
        registry.record_instance("sick", 0, false, 1000).unwrap();
        registry.update_metrics("sick", 99.0, 99.0, 99.0).unwrap();
        hot_instance(&registry, "leaving", 99.0, 1000);
        registry.mark_draining("leaving", 2000).unwrap();

        assert!(!scaler.should_scale_up_for_metrics(100_000).unwrap());
    }

    #[test]
    fn disabled_thresholds_never_scale_up() {
        let config = PolicyConfig {
            scale_up: ThresholdPolicy::Disabled,
            ..Default::default()
        };
        let (registry, scaler) = setup(config);
        registry.try_reserve_slot().unwrap();
        hot_instance(&registry, "hot", 99.0, 1000);

        assert!(!scaler.should_scale_up_for_metrics(100_000).unwrap());
    }

    #[test]
    fn partial_specifics_do_not_fire_on_unconfigured_metrics() {
        let config = PolicyConfig {
            scale_up: ThresholdPolicy::PerMetric {
                cpu: Some(80.0),
                memory: None,
                disk: None,
            },
            ..Default::default()
        };
        let (registry, scaler) = setup(config);
        registry.try_reserve_slot().unwrap();
        registry.record_instance("a", 0, true, 1000).unwrap();
        registry.update_metrics("a", 10.0, 99.0, 99.0).unwrap();

        assert!(!scaler.should_scale_up_for_metrics(100_000).unwrap());
    }

    // ── Request scale-up ───────────────────────────────────────────

    #[test]
    fn request_scale_up_on_average_above_cap() {
        let config = PolicyConfig {
            max_requests_per_instance: Some(10),
            ..Default::default()
        };
        let (registry, scaler) = setup(config);
        registry.try_reserve_slot().unwrap();
        registry.try_reserve_slot().unwrap();
        registry.record_instance("a", 12, true, 1000).unwrap();
        registry.record_instance("b", 11, true, 1000).unwrap();

        assert!(scaler.should_scale_up_for_requests(100_000).unwrap());
    }

    #[test]
    fn request_scale_up_requires_cap_configured() {
        let (registry, scaler) = setup(PolicyConfig::default());
        registry.try_reserve_slot().unwrap();
        registry.record_instance("a", 100, true, 1000).unwrap();

        assert!(!scaler.should_scale_up_for_requests(100_000).unwrap());
    }

    #[test]
    fn request_scale_up_average_at_cap_does_not_fire() {
        let config = PolicyConfig {
            max_requests_per_instance: Some(10),
            ..Default::default()
        };
        let (registry, scaler) = setup(config);
        registry.try_reserve_slot().unwrap();
        registry.record_instance("a", 10, true, 1000).unwrap();

        assert!(!scaler.should_scale_up_for_requests(100_000).unwrap());
    }

    // ── Scale-down ─────────────────────────────────────────────────

    #[test]
    fn scale_down_when_all_instances_cold() {
        let (registry, scaler) = setup(PolicyConfig::default());
        for name in ["a", "b"] {
            registry.record_instance(name, 0, true, 1000).unwrap();
            registry.update_metrics(name, 28.0, 20.0, 5.0).unwrap();
        }

        assert!(scaler.should_scale_down(500_000).unwrap());
    }

    #[test]
    fn one_warm_instance_blocks_scale_down() {
        let (registry, scaler) = setup(PolicyConfig::default());
        registry.record_instance("cold", 0, true, 1000).unwrap();
        registry.update_metrics("cold", 10.0, 10.0, 10.0).unwrap();
        registry.record_instance("warm", 0, true, 1000).unwrap();
        // 31 > the derived down threshold of 30.
        registry.update_metrics("warm", 31.0, 10.0, 10.0).unwrap();

        assert!(!scaler.should_scale_down(500_000).unwrap());
    }

    #[test]
    fn scale_down_blocked_at_min_instances() {
        let config = PolicyConfig {
            min_instances: 2,
            ..Default::default()
        };
        let (registry, scaler) = setup(config);
        for name in ["a", "b"] {
            registry.record_instance(name, 0, true, 1000).unwrap();
        }

        assert!(!scaler.should_scale_down(500_000).unwrap());
    }

    #[test]
    fn scale_down_blocked_in_cooldown() {
        let (registry, scaler) = setup(PolicyConfig::default());
        registry.record_instance("a", 0, true, 1000).unwrap();
        registry.record_scale_down(400_000).unwrap();

        assert!(!scaler.should_scale_down(500_000).unwrap());
        assert!(scaler.should_scale_down(520_000).unwrap());
    }

    // ── Removal selection ──────────────────────────────────────────

    #[test]
    fn removal_prefers_unhealthy_then_coldest() {
        let (registry, scaler) = setup(PolicyConfig::default());
        registry.record_instance("sick", 5, false, 3000).unwrap();
        registry.record_instance("cold-old", 0, true, 1000).unwrap();
        registry.record_instance("cold-new", 0, true, 2000).unwrap();

        let removals = scaler.select_for_removal().unwrap();
        let names: Vec<&str> = removals.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["sick", "cold-old", "cold-new"]);
    }

    #[test]
    fn removal_respects_min_instances() {
        let config = PolicyConfig {
            min_instances: 2,
            ..Default::default()
        };
        let (registry, scaler) = setup(config);
        for (name, t) in [("a", 1000), ("b", 2000), ("c", 3000)] {
            registry.record_instance(name, 0, true, t).unwrap();
        }

        let removals = scaler.select_for_removal().unwrap();
        assert_eq!(removals.len(), 1);
        assert_eq!(removals[0].name, "a");
    }

    #[test]
    fn removal_skips_already_draining() {
        let (registry, scaler) = setup(PolicyConfig::default());
        registry.record_instance("sick", 0, false, 1000).unwrap();
        registry.mark_draining("sick", 2000).unwrap();

        let removals = scaler.select_for_removal().unwrap();
        assert!(removals.is_empty());
    }

    #[test]
    fn removal_skips_warm_instances() {
        let (registry, scaler) = setup(PolicyConfig::default());
        registry.record_instance("warm", 0, true, 1000).unwrap();
        registry.update_metrics("warm", 50.0, 10.0, 10.0).unwrap();
        registry.record_instance("cold", 0, true, 1000).unwrap();

        let removals = scaler.select_for_removal().unwrap();
        assert_eq!(removals.len(), 1);
        assert_eq!(removals[0].name, "cold");
    }

    #[test]
    fn removal_empty_at_min() {
        let config = PolicyConfig {
            min_instances: 1,
            ..Default::default()
        };
        let (registry, scaler) = setup(config);
        registry.record_instance("only", 0, true, 1000).unwrap();

        assert!(scaler.select_for_removal().unwrap().is_empty());
    }
}
