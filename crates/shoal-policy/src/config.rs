//! Scaling policy configuration.
//!
//! Threshold configuration is resolved once, at construction, into a
//! tagged [`ThresholdPolicy`] — either one general threshold for all
//! three metrics, a per-metric set, or disabled. Ambiguous input (partial
//! per-metric thresholds, or both kinds at once) logs a warning and
//! proceeds with the precedence rules below.

use serde::{Deserialize, Serialize};
use tracing::warn;

use shoal_state::InstanceRecord;

/// Hysteresis offset between scale-up and scale-down thresholds.
const HYSTERESIS_OFFSET: f64 = 45.0;

/// Default general scale-up threshold (percent).
pub const DEFAULT_SCALE_THRESHOLD: f64 = 75.0;

/// Resolved metric-threshold policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ThresholdPolicy {
    /// One threshold applied to cpu, memory, and disk alike.
    General(f64),
    /// Per-metric thresholds; a `None` metric does not participate.
    PerMetric {
        cpu: Option<f64>,
        memory: Option<f64>,
        disk: Option<f64>,
    },
    /// Metric thresholding is off.
    Disabled,
}

impl ThresholdPolicy {
    /// Whether any of the record's metrics strictly exceeds its threshold.
    pub fn exceeded_by(&self, record: &InstanceRecord) -> bool {
        match *self {
            ThresholdPolicy::General(t) => {
                record.current_cpu > t || record.current_memory > t || record.current_disk > t
            }
            ThresholdPolicy::PerMetric { cpu, memory, disk } => {
                cpu.is_some_and(|t| record.current_cpu > t)
                    || memory.is_some_and(|t| record.current_memory > t)
                    || disk.is_some_and(|t| record.current_disk > t)
            }
            ThresholdPolicy::Disabled => false,
        }
    }

    /// Whether all of the record's metrics are at or below their
    /// thresholds. Metrics without a threshold pass vacuously.
    pub fn satisfied_by(&self, record: &InstanceRecord) -> bool {
        match *self {
            ThresholdPolicy::General(t) => {
                record.current_cpu <= t && record.current_memory <= t && record.current_disk <= t
            }
            ThresholdPolicy::PerMetric { cpu, memory, disk } => {
                cpu.is_none_or(|t| record.current_cpu <= t)
                    && memory.is_none_or(|t| record.current_memory <= t)
                    && disk.is_none_or(|t| record.current_disk <= t)
            }
            ThresholdPolicy::Disabled => false,
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, ThresholdPolicy::Disabled)
    }
}

/// Raw threshold options as given in configuration, before resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThresholdOptions {
    pub general: Option<f64>,
    pub cpu: Option<f64>,
    pub memory: Option<f64>,
    pub disk: Option<f64>,
    pub down_general: Option<f64>,
    pub down_cpu: Option<f64>,
    pub down_memory: Option<f64>,
    pub down_disk: Option<f64>,
}

impl ThresholdOptions {
    /// Resolve raw options into `(scale_up, scale_down)` policies.
    ///
    /// Precedence: if all three per-metric scale-up thresholds are set,
    /// they win and the general threshold is ignored. Partially set
    /// per-metric thresholds disable the missing metrics. With no
    /// per-metric thresholds at all, the general threshold (default 75)
    /// applies to every metric. Scale-down thresholds default to the
    /// corresponding scale-up value minus 45.
    pub fn resolve(&self) -> (ThresholdPolicy, ThresholdPolicy) {
        let specifics = [self.cpu, self.memory, self.disk];
        let set = specifics.iter().filter(|t| t.is_some()).count();

        let up = if set == 3 {
            if self.general.is_some() {
                warn!(
                    "both general and per-metric scale thresholds configured; \
                     using per-metric values"
                );
            }
            ThresholdPolicy::PerMetric {
                cpu: self.cpu,
                memory: self.memory,
                disk: self.disk,
            }
        } else if set > 0 {
            warn!(
                configured = set,
                "partial per-metric scale thresholds; metrics without a \
                 threshold will not trigger scaling"
            );
            ThresholdPolicy::PerMetric {
                cpu: self.cpu,
                memory: self.memory,
                disk: self.disk,
            }
        } else {
            ThresholdPolicy::General(self.general.unwrap_or(DEFAULT_SCALE_THRESHOLD))
        };

        let down = match up {
            ThresholdPolicy::PerMetric { cpu, memory, disk } if set == 3 => {
                ThresholdPolicy::PerMetric {
                    cpu: self.down_cpu.or(cpu.map(|t| t - HYSTERESIS_OFFSET)),
                    memory: self.down_memory.or(memory.map(|t| t - HYSTERESIS_OFFSET)),
                    disk: self.down_disk.or(disk.map(|t| t - HYSTERESIS_OFFSET)),
                }
            }
            _ => {
                let base = self
                    .down_general
                    .unwrap_or(self.general.unwrap_or(DEFAULT_SCALE_THRESHOLD) - HYSTERESIS_OFFSET);
                ThresholdPolicy::General(base)
            }
        };

        (up, down)
    }
}

/// Resolved scaling policy parameters. Immutable after construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolicyConfig {
    /// Hard cap on fleet size.
    pub max_instances: u32,
    /// Floor for scale-down; warm-up target at startup.
    pub min_instances: u32,
    /// Enables request-based scaling and capacity filtering when set.
    pub max_requests_per_instance: Option<u32>,
    /// Fraction of `max_requests_per_instance` that triggers an
    /// optimistic scale-up on crossing.
    pub scale_up_capacity_threshold: f64,
    /// Minimum interval between scale-ups, and the per-instance
    /// re-eligibility window for threshold crossings (ms).
    pub scale_up_cooldown_ms: u64,
    /// Minimum interval between scale-downs (ms).
    pub scale_down_cooldown_ms: u64,
    /// Metric thresholds above which the fleet grows.
    pub scale_up: ThresholdPolicy,
    /// Metric thresholds at or below which the fleet may shrink.
    pub scale_down: ThresholdPolicy,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_instances: 10,
            min_instances: 0,
            max_requests_per_instance: None,
            scale_up_capacity_threshold: 0.7,
            scale_up_cooldown_ms: 60_000,
            scale_down_cooldown_ms: 120_000,
            scale_up: ThresholdPolicy::General(DEFAULT_SCALE_THRESHOLD),
            scale_down: ThresholdPolicy::General(DEFAULT_SCALE_THRESHOLD - HYSTERESIS_OFFSET),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with_metrics(cpu: f64, memory: f64, disk: f64) -> InstanceRecord {
        let mut r = InstanceRecord::new("a", 0, true, 0);
        r.current_cpu = cpu;
        r.current_memory = memory;
        r.current_disk = disk;
        r
    }

    #[test]
    fn defaults_resolve_to_general_75_30() {
        let (up, down) = ThresholdOptions::default().resolve();
        assert_eq!(up, ThresholdPolicy::General(75.0));
        assert_eq!(down, ThresholdPolicy::General(30.0));
    }

    #[test]
    fn all_specifics_win_over_general() {
        let opts = ThresholdOptions {
            general: Some(75.0),
            cpu: Some(80.0),
            memory: Some(85.0),
            disk: Some(90.0),
            ..Default::default()
        };
        let (up, down) = opts.resolve();
        assert_eq!(
            up,
            ThresholdPolicy::PerMetric {
                cpu: Some(80.0),
                memory: Some(85.0),
                disk: Some(90.0),
            }
        );
        // Down defaults to up − 45 per metric.
        assert_eq!(
            down,
            ThresholdPolicy::PerMetric {
                cpu: Some(35.0),
                memory: Some(40.0),
                disk: Some(45.0),
            }
        );
    }

    #[test]
    fn partial_specifics_disable_missing_metrics() {
        let opts = ThresholdOptions {
            cpu: Some(80.0),
            ..Default::default()
        };
        let (up, down) = opts.resolve();
        assert_eq!(
            up,
            ThresholdPolicy::PerMetric {
                cpu: Some(80.0),
                memory: None,
                disk: None,
            }
        );
        // Partial specifics fall back to the general derivation for down.
        assert_eq!(down, ThresholdPolicy::General(30.0));

        // Memory/disk spikes do not count as exceeded.
        let r = record_with_metrics(10.0, 99.0, 99.0);
        assert!(!up.exceeded_by(&r));
        let r = record_with_metrics(85.0, 0.0, 0.0);
        assert!(up.exceeded_by(&r));
    }

    #[test]
    fn explicit_down_thresholds_override_derivation() {
        let opts = ThresholdOptions {
            general: Some(80.0),
            down_general: Some(20.0),
            ..Default::default()
        };
        let (_, down) = opts.resolve();
        assert_eq!(down, ThresholdPolicy::General(20.0));
    }

    #[test]
    fn general_exceeded_by_any_metric() {
        let up = ThresholdPolicy::General(75.0);
        assert!(!up.exceeded_by(&record_with_metrics(75.0, 75.0, 75.0)));
        assert!(up.exceeded_by(&record_with_metrics(75.1, 0.0, 0.0)));
        assert!(up.exceeded_by(&record_with_metrics(0.0, 0.0, 76.0)));
    }

    #[test]
    fn satisfied_requires_all_metrics_at_or_below() {
        let down = ThresholdPolicy::General(30.0);
        assert!(down.satisfied_by(&record_with_metrics(30.0, 29.0, 0.0)));
        assert!(!down.satisfied_by(&record_with_metrics(30.0, 31.0, 0.0)));
    }

    #[test]
    fn disabled_never_fires_either_way() {
        let p = ThresholdPolicy::Disabled;
        assert!(!p.exceeded_by(&record_with_metrics(100.0, 100.0, 100.0)));
        assert!(!p.satisfied_by(&record_with_metrics(0.0, 0.0, 0.0)));
    }
}
