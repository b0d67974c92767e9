//! shoald — the shoal daemon.
//!
//! Wires the registry, router, scaler, and instance manager into the
//! singleton controller, serves the HTTP entry surface, and runs the
//! periodic heartbeat.

pub mod config;
pub mod controller;
pub mod server;

pub use config::ShoaldConfig;
pub use controller::{Controller, ControllerConfig};
