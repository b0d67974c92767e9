//! InstanceManager — fleet lifecycle over the container runtime.
//!
//! Creates and destroys containers, runs health checks with consecutive
//! failure counting, fetches resource stats, keeps live instances warm,
//! and purges registry records whose containers the runtime no longer
//! reports. Errors are logged and turned into state corrections where
//! possible; the manager never panics on runtime failure.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shoal_state::{InstanceFilter, InstanceRecord, Registry, StateError};

use crate::runtime::{ContainerHandle, ContainerRuntime, RuntimeError, RuntimeResult};

/// Result type alias for manager operations.
pub type ManagerResult<T> = Result<T, ManagerError>;

/// Errors from instance lifecycle operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Resource usage sample reported by a container's stats endpoint.
///
/// All values are percentages on a 0–100 scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub disk_usage: f64,
}

/// Configuration consumed by the instance manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Health and keep-alive path on the container's main port.
    pub monitoring_endpoint: String,
    /// Full URL of the in-container stats endpoint.
    pub stats_url: String,
    /// Consecutive health check failures before an instance is marked
    /// unhealthy.
    pub health_check_retries: u32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            monitoring_endpoint: "/healthz".to_string(),
            stats_url: "http://localhost:81/monitorz".to_string(),
            health_check_retries: 3,
        }
    }
}

/// Wraps the external container runtime with fleet bookkeeping.
pub struct InstanceManager {
    runtime: Arc<dyn ContainerRuntime>,
    registry: Registry,
    config: ManagerConfig,
}

impl InstanceManager {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        registry: Registry,
        config: ManagerConfig,
    ) -> Self {
        Self {
            runtime,
            registry,
            config,
        }
    }

    /// The runtime this manager drives.
    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    /// Mint a fresh instance, start it, and wait until it accepts
    /// connections. The registry record is the caller's responsibility —
    /// a record must only exist once the container is confirmed ready.
    pub async fn create_instance(&self) -> ManagerResult<Arc<dyn ContainerHandle>> {
        let name = format!("inst-{}", Uuid::new_v4());
        let handle = self.runtime.create(&name).await?;
        handle.start_and_wait_for_ports().await?;
        info!(%name, "instance created and serving");
        Ok(handle)
    }

    /// Destroy a container, best-effort. The registry record is always
    /// removed, even if the runtime destroy fails.
    pub async fn destroy_instance(&self, name: &str) -> ManagerResult<()> {
        match self.runtime.get(name).await {
            Ok(handle) => {
                if let Err(e) = handle.destroy().await {
                    warn!(name, error = %e, "container destroy failed, removing record anyway");
                }
            }
            Err(RuntimeError::NotFound(_)) => {
                debug!(name, "container already gone");
            }
            Err(e) => {
                warn!(name, error = %e, "could not resolve container for destroy");
            }
        }
        self.registry.remove_instance(name)?;
        Ok(())
    }

    /// Destroy and re-create. Used when a selected instance is unhealthy
    /// and no extra capacity slot could be reserved.
    pub async fn replace_instance(
        &self,
        old: &Arc<dyn ContainerHandle>,
    ) -> ManagerResult<Arc<dyn ContainerHandle>> {
        let old_name = old.name().to_string();
        self.destroy_instance(&old_name).await?;
        let handle = self.create_instance().await?;
        info!(old = %old_name, new = handle.name(), "instance replaced");
        Ok(handle)
    }

    /// Probe the health endpoint and record the outcome.
    ///
    /// A 2xx resets the failure counter and marks the instance healthy.
    /// Anything else increments failures; the instance is marked
    /// unhealthy once failures reach `health_check_retries`. Returns the
    /// health flag after the check.
    pub async fn perform_health_check(
        &self,
        handle: &Arc<dyn ContainerHandle>,
        name: &str,
        now: u64,
    ) -> ManagerResult<bool> {
        let url = self.health_url();
        let ok = match handle.container_fetch(&url).await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                debug!(name, status = %response.status(), "health check non-2xx");
                false
            }
            Err(e) => {
                debug!(name, error = %e, "health check failed");
                false
            }
        };

        if ok {
            self.registry.update_health(name, true, 0, now)?;
            return Ok(true);
        }

        let current = self.registry.instance(name)?;
        let (was_healthy, failures) = match &current {
            Some(r) => (r.healthy, r.health_check_failures + 1),
            None => (true, 1),
        };
        let healthy = if failures >= self.config.health_check_retries {
            false
        } else {
            was_healthy
        };
        if !healthy && was_healthy {
            warn!(
                name,
                failures,
                retries = self.config.health_check_retries,
                "instance marked unhealthy"
            );
        }
        self.registry.update_health(name, healthy, failures, now)?;
        Ok(healthy)
    }

    /// Fetch the container's resource stats.
    pub async fn fetch_stats(
        &self,
        handle: &Arc<dyn ContainerHandle>,
    ) -> RuntimeResult<ResourceUsage> {
        let response = handle.container_fetch(&self.config.stats_url).await?;
        if !response.status().is_success() {
            return Err(RuntimeError::Http(response.status().as_u16()));
        }
        serde_json::from_slice(response.body()).map_err(|e| RuntimeError::Body(e.to_string()))
    }

    /// Fire-and-forget keep-alive hits for healthy, non-draining
    /// instances, refreshing `last_heartbeat` per success.
    pub fn keep_alive(&self, instances: &[InstanceRecord], now: u64) {
        for record in instances.iter().filter(|r| r.routable()) {
            let runtime = Arc::clone(&self.runtime);
            let registry = self.registry.clone();
            let name = record.name.clone();
            let url = self.health_url();
            tokio::spawn(async move {
                Self::probe_heartbeat(runtime, registry, name, url, now).await;
            });
        }
    }

    /// One keep-alive probe; split out so tests can await it directly.
    async fn probe_heartbeat(
        runtime: Arc<dyn ContainerRuntime>,
        registry: Registry,
        name: String,
        url: String,
        now: u64,
    ) {
        let handle = match runtime.get(&name).await {
            Ok(h) => h,
            Err(e) => {
                debug!(name, error = %e, "keep-alive could not resolve container");
                return;
            }
        };
        match handle.container_fetch(&url).await {
            Ok(response) if response.status().is_success() => {
                if let Err(e) = registry.update_heartbeat(&name, now) {
                    warn!(name, error = %e, "heartbeat update failed");
                }
            }
            Ok(response) => {
                debug!(name, status = %response.status(), "keep-alive non-2xx");
            }
            Err(e) => {
                debug!(name, error = %e, "keep-alive failed");
            }
        }
    }

    /// Purge registry records whose containers the runtime no longer
    /// reports. Returns the names that were cleaned.
    pub async fn cleanup_stale_instances(&self) -> ManagerResult<Vec<String>> {
        let mut cleaned = Vec::new();
        for record in self.registry.instances(InstanceFilter::default())? {
            let gone = match self.runtime.get(&record.name).await {
                Err(RuntimeError::NotFound(_)) => true,
                Err(e) => {
                    warn!(name = %record.name, error = %e, "stale probe failed, keeping record");
                    false
                }
                Ok(handle) => matches!(handle.status().await, Err(RuntimeError::NotFound(_))),
            };
            if gone {
                self.registry.remove_instance(&record.name)?;
                cleaned.push(record.name);
            }
        }
        if !cleaned.is_empty() {
            info!(count = cleaned.len(), names = ?cleaned, "stale instance records purged");
        }
        Ok(cleaned)
    }

    fn health_url(&self) -> String {
        format!("http://localhost{}", self.config.monitoring_endpoint)
    }
}
