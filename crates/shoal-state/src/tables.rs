//! redb table definitions for the shoal registry.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). The capacity and scaling tables hold a single row each under
//! [`FLEET_KEY`].

use redb::TableDefinition;

/// Instance records keyed by instance name.
pub const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");

/// Capacity counter, single row under [`FLEET_KEY`].
pub const CAPACITY: TableDefinition<&str, &[u8]> = TableDefinition::new("capacity");

/// Scaling-action timestamps, single row under [`FLEET_KEY`].
pub const SCALING: TableDefinition<&str, &[u8]> = TableDefinition::new("scaling");

/// Key for the singleton rows in the capacity and scaling tables.
pub const FLEET_KEY: &str = "fleet";
