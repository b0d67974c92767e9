//! shoal-state — persisted instance registry for the shoal control plane.
//!
//! Backed by [redb](https://docs.rs/redb), holds the three durable pieces
//! of fleet state: per-instance records, the capacity reservation counter,
//! and the scaling-action timestamps.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Every registry operation runs inside a single write transaction, so each
//! one is observable atomically by concurrent readers. The registry is the
//! only component in the system that mutates persisted state.
//!
//! The `Registry` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod registry;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use registry::Registry;
pub use types::*;
