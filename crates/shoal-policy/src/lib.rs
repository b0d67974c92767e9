//! shoal-policy — routing and scaling policy.
//!
//! Pure decision logic over registry state: the [`Router`] picks the
//! least-loaded routable instance for a request and detects capacity
//! crossings; the [`Scaler`] decides when the fleet should grow or
//! shrink and which instances to drain.
//!
//! Neither component talks to the container runtime. The only write
//! either performs is recording a threshold crossing, which is part of
//! the scale-up edge trigger itself.

pub mod config;
pub mod router;
pub mod scaler;

pub use config::{PolicyConfig, ThresholdOptions, ThresholdPolicy};
pub use router::Router;
pub use scaler::Scaler;
