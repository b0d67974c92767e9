//! The singleton controller.
//!
//! Serves request traffic, runs the periodic heartbeat, and orchestrates
//! the registry, router, scaler, and instance manager. Consistency rests
//! on three things: every registry operation is one atomic transaction,
//! the capacity counter's conditional reservation is the only admission
//! path for container creation, and scale actions are gated by persisted
//! cooldown timestamps. Detached work (request-counter decrements, the
//! optimistic scale-up) is spawned and runs to completion independently
//! of the response lifecycle.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use shoal_policy::{PolicyConfig, Router, Scaler};
use shoal_runtime::{
    ContainerHandle, ContainerRuntime, HttpRequest, HttpResponse, InstanceManager, ManagerConfig,
    RuntimeError,
};
use shoal_state::{InstanceFilter, Registry};

/// Controller parameters. Immutable after construction.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub policy: PolicyConfig,
    /// Period of the heartbeat (ms).
    pub heartbeat_interval_ms: u64,
    /// Forced destroy after this much time draining (ms).
    pub drain_timeout_ms: u64,
    /// Max heartbeat age before a record counts as stale (informational;
    /// stale cleanup is runtime-driven).
    pub stale_threshold_ms: u64,
    /// Path that returns the registry snapshot (and doubles as the
    /// in-container health path).
    pub monitoring_endpoint: String,
    /// Informational instance sizing.
    pub instance_kind: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            policy: PolicyConfig::default(),
            heartbeat_interval_ms: 30_000,
            drain_timeout_ms: 60_000,
            stale_threshold_ms: 120_000,
            monitoring_endpoint: "/healthz".to_string(),
            instance_kind: "standard-1".to_string(),
        }
    }
}

/// The singleton control plane actor.
#[derive(Clone)]
pub struct Controller {
    registry: Registry,
    router: Arc<Router>,
    scaler: Arc<Scaler>,
    manager: Arc<InstanceManager>,
    config: Arc<ControllerConfig>,
}

impl Controller {
    pub fn new(
        registry: Registry,
        runtime: Arc<dyn ContainerRuntime>,
        manager_config: ManagerConfig,
        config: ControllerConfig,
    ) -> Self {
        let router = Router::new(registry.clone(), config.policy);
        let scaler = Scaler::new(registry.clone(), config.policy);
        let manager = InstanceManager::new(runtime, registry.clone(), manager_config);
        Self {
            registry,
            router: Arc::new(router),
            scaler: Arc::new(scaler),
            manager: Arc::new(manager),
            config: Arc::new(config),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// One-time initialization, before any traffic is served.
    ///
    /// Migrates the registry, reconciles it against the runtime, and
    /// warms the fleet up to `min_instances`.
    pub async fn init(&self) -> anyhow::Result<()> {
        info!(
            instance = %self.config.instance_kind,
            max = self.config.policy.max_instances,
            min = self.config.policy.min_instances,
            "controller initializing"
        );
        self.registry.migrate(self.config.policy.max_instances)?;

        let cleaned = self.manager.cleanup_stale_instances().await?;
        if !cleaned.is_empty() {
            self.registry.sync_capacity()?;
        }

        let existing = self.registry.instance_count(false)?;
        for _ in existing..self.config.policy.min_instances {
            if !self.registry.try_reserve_slot()? {
                info!("warm-up stopped: no capacity slot");
                break;
            }
            match self.create_and_track(0, now_ms()).await {
                Ok(name) => debug!(%name, "warm instance created"),
                Err(e) => {
                    warn!(error = %e, "warm-up create failed");
                    self.registry.release_slot()?;
                    break;
                }
            }
        }

        info!(
            instances = self.registry.instance_count(false)?,
            "controller initialized"
        );
        Ok(())
    }

    // ── Request path ───────────────────────────────────────────────

    /// The only inbound operation: route a request to a container, or
    /// serve the registry snapshot from the monitoring endpoint.
    ///
    /// Never errors toward the client beyond 503 (no usable instance)
    /// and 500 (internal failure).
    pub async fn fetch(&self, request: HttpRequest) -> HttpResponse {
        match self.handle_fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "request handling failed");
                status_response(500)
            }
        }
    }

    async fn handle_fetch(&self, request: HttpRequest) -> anyhow::Result<HttpResponse> {
        if request.method() == http::Method::GET
            && request.uri().path() == self.config.monitoring_endpoint
        {
            let snapshot = self.registry.snapshot()?;
            return Ok(json_response(serde_json::to_vec(&snapshot)?));
        }

        let now = now_ms();

        // Pick a target; an empty pool gets a warming instance and a
        // retry hint.
        let Some(selected) = self.router.select_instance()? else {
            if self.registry.try_reserve_slot()? {
                self.spawn_cold_start();
                return Ok(retry_later_response());
            }
            info!("no instance and no capacity, rejecting");
            return Ok(status_response(503));
        };

        // Resolve the runtime handle, purging and retrying once if the
        // container is gone underneath us.
        let (name, handle) = match self.resolve_handle(&selected.name).await? {
            Some(pair) => pair,
            None => return Ok(status_response(503)),
        };

        // If the container is not serving, arrange a replacement.
        let (name, handle) = match self.ensure_serving(name, handle).await? {
            Some(pair) => pair,
            None => return Ok(status_response(503)),
        };

        let previous = match self.registry.increment_requests(&name, now, true, 1) {
            Ok(previous) => previous,
            // The record vanished between selection and increment; the
            // container is live, so re-track it.
            Err(shoal_state::StateError::NotFound(_)) => {
                self.registry.record_instance(&name, 1, true, now)?
            }
            Err(e) => return Err(e.into()),
        };

        if self.router.check_optimistic_scale_up(&name, previous) {
            self.spawn_scale_up("optimistic");
        }

        // Forward, then decrement as a detached task so it runs whether
        // the forward succeeded or not.
        let result = handle.fetch(request).await;
        let registry = self.registry.clone();
        let counted = name.clone();
        tokio::spawn(async move {
            if let Err(e) = registry.decrement_requests(&counted, now_ms()) {
                warn!(name = %counted, error = %e, "request decrement failed");
            }
        });

        match result {
            Ok(response) => Ok(response),
            Err(e) => {
                error!(%name, error = %e, "container fetch failed");
                Ok(status_response(500))
            }
        }
    }

    /// Resolve the handle for a selected instance. On a missing
    /// container, purge stale records, sync capacity, and retry the
    /// selection once.
    async fn resolve_handle(
        &self,
        selected: &str,
    ) -> anyhow::Result<Option<(String, Arc<dyn ContainerHandle>)>> {
        match self.manager.runtime().get(selected).await {
            Ok(handle) => return Ok(Some((selected.to_string(), handle))),
            Err(RuntimeError::NotFound(_)) => {
                warn!(name = selected, "selected instance gone, cleaning up");
                self.manager.cleanup_stale_instances().await?;
                self.registry.sync_capacity()?;
            }
            Err(e) => {
                warn!(name = selected, error = %e, "runtime lookup failed");
                return Ok(None);
            }
        }

        let Some(retry) = self.router.select_instance()? else {
            return Ok(None);
        };
        match self.manager.runtime().get(&retry.name).await {
            Ok(handle) => Ok(Some((retry.name, handle))),
            Err(e) => {
                warn!(name = %retry.name, error = %e, "retry lookup failed");
                Ok(None)
            }
        }
    }

    /// Make sure the chosen container can serve this request, replacing
    /// it if the runtime reports it down.
    async fn ensure_serving(
        &self,
        name: String,
        handle: Arc<dyn ContainerHandle>,
    ) -> anyhow::Result<Option<(String, Arc<dyn ContainerHandle>)>> {
        let serving = matches!(handle.status().await, Ok(status) if status.is_serving());
        if serving {
            return Ok(Some((name, handle)));
        }
        warn!(%name, "selected instance not serving, replacing");

        if self.registry.try_reserve_slot()? {
            // Capacity available: bring up a fresh instance for this
            // request and leave the sick one to the heartbeat.
            match self.create_and_track(0, now_ms()).await {
                Ok(new_name) => {
                    let handle = self.manager.runtime().get(&new_name).await?;
                    return Ok(Some((new_name, handle)));
                }
                Err(e) => {
                    warn!(error = %e, "replacement create failed");
                    self.registry.release_slot()?;
                    return Ok(None);
                }
            }
        }

        // No slot: replace in place.
        match self.manager.replace_instance(&handle).await {
            Ok(new_handle) => {
                let new_name = new_handle.name().to_string();
                self.registry.record_instance(&new_name, 0, true, now_ms())?;
                Ok(Some((new_name, new_handle)))
            }
            Err(e) => {
                warn!(%name, error = %e, "in-place replacement failed");
                Ok(None)
            }
        }
    }

    // ── Heartbeat ──────────────────────────────────────────────────

    /// One heartbeat pass at the current time.
    pub async fn heartbeat(&self) {
        if let Err(e) = self.heartbeat_at(now_ms()).await {
            error!(error = %e, "heartbeat failed");
        }
    }

    /// One heartbeat pass at an explicit time (ms). Split out so tests
    /// can drive the clock.
    pub async fn heartbeat_at(&self, now: u64) -> anyhow::Result<()> {
        // 1. Reconcile against the runtime.
        let cleaned = self.manager.cleanup_stale_instances().await?;
        if !cleaned.is_empty() {
            self.registry.sync_capacity()?;
        }

        // 2. Keep live instances warm.
        let records = self.registry.instances(InstanceFilter::default())?;
        self.manager.keep_alive(&records, now);

        // 3. Health and stats per instance.
        for record in &records {
            let handle = match self.manager.runtime().get(&record.name).await {
                Ok(handle) => handle,
                Err(RuntimeError::NotFound(_)) => continue,
                Err(e) => {
                    warn!(name = %record.name, error = %e, "health lookup failed");
                    continue;
                }
            };
            let healthy = match self
                .manager
                .perform_health_check(&handle, &record.name, now)
                .await
            {
                Ok(healthy) => healthy,
                Err(e) => {
                    warn!(name = %record.name, error = %e, "health check errored");
                    continue;
                }
            };
            if healthy {
                match self.manager.fetch_stats(&handle).await {
                    Ok(usage) => self.registry.update_metrics(
                        &record.name,
                        usage.cpu_usage,
                        usage.memory_usage,
                        usage.disk_usage,
                    )?,
                    Err(e) => debug!(name = %record.name, error = %e, "stats fetch failed"),
                }
            }
        }

        // Snapshot the instances already draining before this pass marks
        // any new ones; fresh drains get a full interval to finish.
        let already_draining: Vec<_> = self
            .registry
            .instances(InstanceFilter::default())?
            .into_iter()
            .filter(|r| r.draining)
            .collect();

        // 4. Grow if metrics or average load call for it.
        if self.scaler.should_scale_up_for_metrics(now)?
            || self.scaler.should_scale_up_for_requests(now)?
        {
            if let Err(e) = self.scale_up(now, "heartbeat").await {
                warn!(error = %e, "heartbeat scale-up failed");
            }
        }

        // 5. Shrink if the whole fleet is cold.
        if self.scaler.should_scale_down(now)? {
            let mut drained = 0;
            for record in self.scaler.select_for_removal()? {
                self.drain_instance(&record.name, now).await?;
                drained += 1;
            }
            if drained > 0 {
                self.registry.record_scale_down(now)?;
                info!(drained, "scale-down initiated");
            }
        }

        // 6. Progress instances already draining.
        for record in already_draining {
            self.drain_instance(&record.name, now).await?;
        }

        Ok(())
    }

    /// Advance one instance through the draining state machine.
    ///
    /// Not draining yet: mark it and return. Draining with no requests
    /// in flight: destroy. Draining past the timeout: destroy anyway and
    /// log the abandoned in-flight count.
    pub async fn drain_instance(&self, name: &str, now: u64) -> anyhow::Result<()> {
        let Some(record) = self.registry.instance(name)? else {
            return Ok(());
        };

        if !record.draining {
            self.registry.mark_draining(name, now)?;
            info!(name, "instance draining");
            return Ok(());
        }

        let since = record.draining_since.unwrap_or(now);
        if record.active_requests == 0 {
            self.manager.destroy_instance(name).await?;
            self.registry.release_slot()?;
            info!(name, "drained instance destroyed");
        } else if now.saturating_sub(since) >= self.config.drain_timeout_ms {
            warn!(
                name,
                abandoned = record.active_requests,
                "drain timeout, destroying with requests in flight"
            );
            self.manager.destroy_instance(name).await?;
            self.registry.release_slot()?;
        }
        Ok(())
    }

    // ── Scale-up machinery ─────────────────────────────────────────

    /// Reserve → create → track → record the scale-up. Releases the slot
    /// if the create fails, and never advances the scaling timestamp on
    /// failure.
    async fn scale_up(&self, now: u64, reason: &str) -> anyhow::Result<()> {
        if !self.registry.try_reserve_slot()? {
            info!(reason, "scale-up aborted: at capacity");
            return Ok(());
        }
        match self.create_and_track(0, now).await {
            Ok(name) => {
                self.registry.record_scale_up(now)?;
                info!(%name, reason, "scaled up");
                Ok(())
            }
            Err(e) => {
                self.registry.release_slot()?;
                Err(e.into())
            }
        }
    }

    /// Detached optimistic scale-up from the request path.
    fn spawn_scale_up(&self, reason: &'static str) {
        let controller = self.clone();
        tokio::spawn(async move {
            if let Err(e) = controller.scale_up(now_ms(), reason).await {
                warn!(reason, error = %e, "background scale-up failed");
            }
        });
    }

    /// Detached cold-start create; the caller has already reserved the
    /// slot and answered 503 with a retry hint.
    fn spawn_cold_start(&self) {
        let controller = self.clone();
        tokio::spawn(async move {
            match controller.create_and_track(0, now_ms()).await {
                Ok(name) => info!(%name, "instance created for waiting traffic"),
                Err(e) => {
                    warn!(error = %e, "cold-start create failed");
                    if let Err(e) = controller.registry.release_slot() {
                        error!(error = %e, "slot release failed");
                    }
                }
            }
        });
    }

    async fn create_and_track(
        &self,
        initial_requests: u32,
        now: u64,
    ) -> shoal_runtime::ManagerResult<String> {
        let handle = self.manager.create_instance().await?;
        self.registry
            .record_instance(handle.name(), initial_requests, true, now)?;
        Ok(handle.name().to_string())
    }
}

// ── Response helpers ───────────────────────────────────────────────

fn status_response(status: u16) -> HttpResponse {
    http::Response::builder()
        .status(status)
        .body(Bytes::new())
        .expect("static response")
}

fn retry_later_response() -> HttpResponse {
    http::Response::builder()
        .status(503)
        .header(http::header::RETRY_AFTER, "5")
        .body(Bytes::new())
        .expect("static response")
}

fn json_response(body: Vec<u8>) -> HttpResponse {
    http::Response::builder()
        .status(200)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Bytes::from(body))
        .expect("static response")
}

/// Current time in epoch milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
