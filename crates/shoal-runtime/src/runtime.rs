//! The container runtime contract.
//!
//! An external runtime owns container creation, destruction, state
//! introspection, and request forwarding. The control plane consumes it
//! through these traits and treats every call as fallible I/O.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Request forwarded into a container.
pub type HttpRequest = http::Request<Bytes>;

/// Response coming back out of a container.
pub type HttpResponse = http::Response<Bytes>;

/// Result type alias for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors surfaced by a container runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The runtime does not know the named container. Distinct so the
    /// control plane can purge stale records.
    #[error("container not found: {0}")]
    NotFound(String),

    #[error("runtime transport error: {0}")]
    Transport(String),

    #[error("container returned status {0}")]
    Http(u16),

    #[error("invalid container response: {0}")]
    Body(String),
}

/// Lifecycle status reported by the runtime for a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Starting,
    Running,
    Healthy,
    Stopping,
    Stopped,
}

impl ContainerStatus {
    /// Whether the container can serve requests.
    pub fn is_serving(self) -> bool {
        matches!(self, ContainerStatus::Running | ContainerStatus::Healthy)
    }
}

/// A handle to one container.
#[async_trait]
pub trait ContainerHandle: Send + Sync + std::fmt::Debug {
    /// The container's opaque name.
    fn name(&self) -> &str;

    /// Current lifecycle status, as the runtime sees it.
    async fn status(&self) -> RuntimeResult<ContainerStatus>;

    /// Start the container and block until its ports accept connections.
    async fn start_and_wait_for_ports(&self) -> RuntimeResult<()>;

    /// Forward a request to the container's main port.
    async fn fetch(&self, request: HttpRequest) -> RuntimeResult<HttpResponse>;

    /// Issue a GET on the container network (health and stats endpoints).
    async fn container_fetch(&self, url: &str) -> RuntimeResult<HttpResponse>;

    /// Destroy the container.
    async fn destroy(&self) -> RuntimeResult<()>;
}

/// The runtime namespace: resolves and provisions container handles.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Look up an existing container. `NotFound` if the runtime does not
    /// know the name.
    async fn get(&self, name: &str) -> RuntimeResult<Arc<dyn ContainerHandle>>;

    /// Provision a new container under the given name. The container is
    /// not serving until `start_and_wait_for_ports` completes.
    async fn create(&self, name: &str) -> RuntimeResult<Arc<dyn ContainerHandle>>;
}
