//! Scriptable in-memory container runtime (for testing).
//!
//! `FakeRuntime` implements the full [`ContainerRuntime`] contract
//! without any real containers: tests script container status, health
//! endpoint behavior, stats samples, and creation failures, then assert
//! on what the control plane did.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use crate::manager::ResourceUsage;
use crate::runtime::{
    ContainerHandle, ContainerRuntime, ContainerStatus, HttpRequest, HttpResponse, RuntimeError,
    RuntimeResult,
};

#[derive(Debug, Clone)]
struct FakeContainer {
    status: ContainerStatus,
    health_ok: bool,
    usage: ResourceUsage,
    response_status: u16,
    response_body: String,
    requests_served: u32,
}

impl FakeContainer {
    fn new(status: ContainerStatus) -> Self {
        Self {
            status,
            health_ok: true,
            usage: ResourceUsage {
                cpu_usage: 0.0,
                memory_usage: 0.0,
                disk_usage: 0.0,
            },
            response_status: 200,
            response_body: "ok".to_string(),
            requests_served: 0,
        }
    }
}

#[derive(Debug, Default)]
struct FakeState {
    containers: HashMap<String, FakeContainer>,
    created: Vec<String>,
    destroyed: Vec<String>,
    create_failures: u32,
}

/// In-memory [`ContainerRuntime`] for tests.
#[derive(Clone, Default)]
pub struct FakeRuntime {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a container as if the runtime already knew it.
    pub fn add_container(&self, name: &str, status: ContainerStatus) {
        let mut state = self.state.lock().expect("fake runtime lock");
        state
            .containers
            .insert(name.to_string(), FakeContainer::new(status));
    }

    /// Make the container vanish, as an external crash would.
    pub fn remove_container(&self, name: &str) {
        let mut state = self.state.lock().expect("fake runtime lock");
        state.containers.remove(name);
    }

    /// Script the health endpoint to succeed or fail.
    pub fn set_health_ok(&self, name: &str, ok: bool) {
        let mut state = self.state.lock().expect("fake runtime lock");
        if let Some(c) = state.containers.get_mut(name) {
            c.health_ok = ok;
        }
    }

    /// Script the stats endpoint sample.
    pub fn set_usage(&self, name: &str, cpu: f64, memory: f64, disk: f64) {
        let mut state = self.state.lock().expect("fake runtime lock");
        if let Some(c) = state.containers.get_mut(name) {
            c.usage = ResourceUsage {
                cpu_usage: cpu,
                memory_usage: memory,
                disk_usage: disk,
            };
        }
    }

    /// Script the container's main-port response.
    pub fn set_response(&self, name: &str, status: u16, body: &str) {
        let mut state = self.state.lock().expect("fake runtime lock");
        if let Some(c) = state.containers.get_mut(name) {
            c.response_status = status;
            c.response_body = body.to_string();
        }
    }

    /// Make the next `create` call fail.
    pub fn fail_next_create(&self) {
        let mut state = self.state.lock().expect("fake runtime lock");
        state.create_failures += 1;
    }

    /// Current status of a container, `None` if it does not exist.
    pub fn status_of(&self, name: &str) -> Option<ContainerStatus> {
        let state = self.state.lock().expect("fake runtime lock");
        state.containers.get(name).map(|c| c.status)
    }

    /// Names passed to `create`, in order.
    pub fn created(&self) -> Vec<String> {
        let state = self.state.lock().expect("fake runtime lock");
        state.created.clone()
    }

    /// Names destroyed, in order.
    pub fn destroyed(&self) -> Vec<String> {
        let state = self.state.lock().expect("fake runtime lock");
        state.destroyed.clone()
    }

    /// Requests served by a container's main port.
    pub fn requests_served(&self, name: &str) -> u32 {
        let state = self.state.lock().expect("fake runtime lock");
        state
            .containers
            .get(name)
            .map(|c| c.requests_served)
            .unwrap_or(0)
    }

    /// Number of live containers.
    pub fn container_count(&self) -> usize {
        let state = self.state.lock().expect("fake runtime lock");
        state.containers.len()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn get(&self, name: &str) -> RuntimeResult<Arc<dyn ContainerHandle>> {
        let state = self.state.lock().expect("fake runtime lock");
        if !state.containers.contains_key(name) {
            return Err(RuntimeError::NotFound(name.to_string()));
        }
        Ok(Arc::new(FakeHandle {
            name: name.to_string(),
            state: Arc::clone(&self.state),
        }))
    }

    async fn create(&self, name: &str) -> RuntimeResult<Arc<dyn ContainerHandle>> {
        let mut state = self.state.lock().expect("fake runtime lock");
        if state.create_failures > 0 {
            state.create_failures -= 1;
            return Err(RuntimeError::Transport("scripted create failure".to_string()));
        }
        state
            .containers
            .insert(name.to_string(), FakeContainer::new(ContainerStatus::Starting));
        state.created.push(name.to_string());
        Ok(Arc::new(FakeHandle {
            name: name.to_string(),
            state: Arc::clone(&self.state),
        }))
    }
}

#[derive(Debug)]
struct FakeHandle {
    name: String,
    state: Arc<Mutex<FakeState>>,
}

impl FakeHandle {
    fn with_container<T>(
        &self,
        f: impl FnOnce(&mut FakeContainer) -> T,
    ) -> RuntimeResult<T> {
        let mut state = self.state.lock().expect("fake runtime lock");
        match state.containers.get_mut(&self.name) {
            Some(c) => Ok(f(c)),
            None => Err(RuntimeError::NotFound(self.name.clone())),
        }
    }
}

#[async_trait]
impl ContainerHandle for FakeHandle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn status(&self) -> RuntimeResult<ContainerStatus> {
        self.with_container(|c| c.status)
    }

    async fn start_and_wait_for_ports(&self) -> RuntimeResult<()> {
        self.with_container(|c| c.status = ContainerStatus::Running)
    }

    async fn fetch(&self, _request: HttpRequest) -> RuntimeResult<HttpResponse> {
        let (status, body) = self.with_container(|c| {
            c.requests_served += 1;
            (c.response_status, c.response_body.clone())
        })?;
        let response = http::Response::builder()
            .status(status)
            .body(Bytes::from(body))
            .map_err(|e| RuntimeError::Body(e.to_string()))?;
        Ok(response)
    }

    async fn container_fetch(&self, url: &str) -> RuntimeResult<HttpResponse> {
        let body = if url.contains("/monitorz") {
            let usage = self.with_container(|c| c.usage)?;
            let json =
                serde_json::to_vec(&usage).map_err(|e| RuntimeError::Body(e.to_string()))?;
            (200, Bytes::from(json))
        } else {
            let ok = self.with_container(|c| c.health_ok)?;
            if ok {
                (200, Bytes::from_static(b"ok"))
            } else {
                (500, Bytes::from_static(b"unhealthy"))
            }
        };
        let response = http::Response::builder()
            .status(body.0)
            .body(body.1)
            .map_err(|e| RuntimeError::Body(e.to_string()))?;
        Ok(response)
    }

    async fn destroy(&self) -> RuntimeResult<()> {
        let mut state = self.state.lock().expect("fake runtime lock");
        if state.containers.remove(&self.name).is_none() {
            return Err(RuntimeError::NotFound(self.name.clone()));
        }
        state.destroyed.push(self.name.clone());
        Ok(())
    }
}
