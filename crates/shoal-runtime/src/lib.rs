//! shoal-runtime — container runtime contract and instance lifecycle.
//!
//! The control plane never talks to containers directly; everything goes
//! through the [`ContainerRuntime`] / [`ContainerHandle`] traits. The
//! [`InstanceManager`] layers fleet bookkeeping on top: creating and
//! destroying instances, health checking with failure counting, resource
//! stats collection, keep-alive probing, and purging records for
//! containers the runtime no longer knows.
//!
//! Two backends ship in-tree: [`RemoteRuntime`] speaks the contract to a
//! runtime daemon over HTTP, and [`testing::FakeRuntime`] is a scriptable
//! in-memory backend for tests.

pub mod manager;
pub mod remote;
pub mod runtime;
pub mod testing;

pub use manager::{InstanceManager, ManagerConfig, ManagerError, ManagerResult, ResourceUsage};
pub use remote::RemoteRuntime;
pub use runtime::{
    ContainerHandle, ContainerRuntime, ContainerStatus, HttpRequest, HttpResponse, RuntimeError,
    RuntimeResult,
};
