//! Registry — redb-backed persistence for the shoal fleet.
//!
//! Provides typed operations over instance records, the capacity
//! reservation counter, and scaling timestamps. All values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports
//! both on-disk and in-memory backends (the latter for testing).
//!
//! Every operation runs in a single write transaction. redb serializes
//! write transactions, so `try_reserve_slot` is a true conditional update:
//! no two concurrent reservations can push `current_count` past
//! `max_count`.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe fleet registry backed by redb.
#[derive(Clone)]
pub struct Registry {
    db: Arc<Database>,
}

impl Registry {
    /// Open (or create) a persistent registry at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        debug!(?path, "registry opened");
        Ok(Self { db: Arc::new(db) })
    }

    /// Create an ephemeral in-memory registry (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        debug!("in-memory registry opened");
        Ok(Self { db: Arc::new(db) })
    }

    /// Idempotently create tables and seed the capacity counter.
    ///
    /// `current_count` is re-seeded from the actual instance row count on
    /// every call; existing scaling timestamps are preserved.
    pub fn migrate(&self, max_instances: u32) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            // Opening a table in a write transaction creates it if absent.
            let instances = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            let count = Self::row_count(&instances)?;

            let mut capacity = txn.open_table(CAPACITY).map_err(map_err!(Table))?;
            let counter = CapacityCounter {
                current_count: count,
                max_count: max_instances,
            };
            let value = serde_json::to_vec(&counter).map_err(map_err!(Serialize))?;
            capacity
                .insert(FLEET_KEY, value.as_slice())
                .map_err(map_err!(Write))?;

            let mut scaling = txn.open_table(SCALING).map_err(map_err!(Table))?;
            let existing = scaling.get(FLEET_KEY).map_err(map_err!(Read))?.is_some();
            if !existing {
                let value = serde_json::to_vec(&ScalingTimestamps::default())
                    .map_err(map_err!(Serialize))?;
                scaling
                    .insert(FLEET_KEY, value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(max_instances, "registry migrated");
        Ok(())
    }

    // ── Instance records ───────────────────────────────────────────

    /// Upsert an instance record.
    ///
    /// On conflict, adds `initial_requests` to `active_requests`,
    /// refreshes heartbeats, and updates `healthy`. Returns the
    /// `active_requests` value *before* the add, so callers can detect
    /// capacity crossings.
    pub fn record_instance(
        &self,
        name: &str,
        initial_requests: u32,
        healthy: bool,
        now: u64,
    ) -> StateResult<u32> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let previous;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            let record = match Self::decode_get(&table, name)? {
                Some(mut r) => {
                    previous = r.active_requests;
                    r.active_requests += initial_requests;
                    r.healthy = healthy;
                    r.last_heartbeat = now;
                    r.last_request_at = now;
                    r
                }
                None => {
                    previous = 0;
                    InstanceRecord::new(name, initial_requests, healthy, now)
                }
            };
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            table
                .insert(name, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(previous)
    }

    /// Add `amount` to an instance's in-flight counter.
    ///
    /// Returns the counter value before the add. Errors with
    /// [`StateError::NotFound`] if the record does not exist — a missing
    /// record must not be resurrected by the request path.
    pub fn increment_requests(
        &self,
        name: &str,
        now: u64,
        healthy: bool,
        amount: u32,
    ) -> StateResult<u32> {
        let mut previous = 0;
        let found = self.update_record(name, |r| {
            previous = r.active_requests;
            r.active_requests += amount;
            r.healthy = healthy;
            r.last_heartbeat = now;
            r.last_request_at = now;
        })?;
        if !found {
            return Err(StateError::NotFound(name.to_string()));
        }
        Ok(previous)
    }

    /// Decrement an instance's in-flight counter, clamped at zero.
    ///
    /// A missing record is a no-op: the instance may have been destroyed
    /// while the request was in flight.
    pub fn decrement_requests(&self, name: &str, now: u64) -> StateResult<()> {
        let found = self.update_record(name, |r| {
            r.active_requests = r.active_requests.saturating_sub(1);
            r.last_request_at = now;
        })?;
        if !found {
            debug!(name, "decrement on missing record, ignored");
        }
        Ok(())
    }

    /// Query instance records.
    ///
    /// Ordered by `active_requests ASC, last_heartbeat DESC` — fewest
    /// in-flight requests first, ties broken by the most recent heartbeat.
    pub fn instances(&self, filter: InstanceFilter) -> StateResult<Vec<InstanceRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = match txn.open_table(INSTANCES) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(StateError::Table(e.to_string())),
        };
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: InstanceRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if filter.matches(&record) {
                results.push(record);
            }
        }
        results.sort_by(|a, b| {
            a.active_requests
                .cmp(&b.active_requests)
                .then(b.last_heartbeat.cmp(&a.last_heartbeat))
        });
        Ok(results)
    }

    /// Number of registered instances.
    pub fn instance_count(&self, healthy_only: bool) -> StateResult<u32> {
        let filter = InstanceFilter {
            healthy: healthy_only.then_some(true),
            ..Default::default()
        };
        Ok(self.instances(filter)?.len() as u32)
    }

    /// Look up a single record by name.
    pub fn instance(&self, name: &str) -> StateResult<Option<InstanceRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = match txn.open_table(INSTANCES) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(StateError::Table(e.to_string())),
        };
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: InstanceRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Record the latest resource sample for an instance.
    pub fn update_metrics(
        &self,
        name: &str,
        cpu: f64,
        memory: f64,
        disk: f64,
    ) -> StateResult<()> {
        self.update_record(name, |r| {
            r.current_cpu = cpu;
            r.current_memory = memory;
            r.current_disk = disk;
        })?;
        Ok(())
    }

    /// Record a health check outcome.
    pub fn update_health(
        &self,
        name: &str,
        healthy: bool,
        failures: u32,
        now: u64,
    ) -> StateResult<()> {
        self.update_record(name, |r| {
            r.healthy = healthy;
            r.health_check_failures = failures;
            r.last_health_check = now;
        })?;
        Ok(())
    }

    /// Refresh an instance's heartbeat timestamp.
    pub fn update_heartbeat(&self, name: &str, now: u64) -> StateResult<()> {
        self.update_record(name, |r| r.last_heartbeat = now)?;
        Ok(())
    }

    /// Mark an instance as draining.
    pub fn mark_draining(&self, name: &str, now: u64) -> StateResult<()> {
        self.update_record(name, |r| {
            r.draining = true;
            r.draining_since = Some(now);
        })?;
        Ok(())
    }

    /// Record a scale-up threshold crossing on an instance.
    pub fn mark_threshold_crossed(&self, name: &str, now: u64) -> StateResult<()> {
        self.update_record(name, |r| r.threshold_crossed_at = Some(now))?;
        Ok(())
    }

    /// Delete a record. Returns true if it existed.
    pub fn remove_instance(&self, name: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            existed = table.remove(name).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(name, existed, "instance record removed");
        Ok(existed)
    }

    // ── Capacity counter ───────────────────────────────────────────

    /// Atomically reserve a creation slot: `current_count < max_count ⇒
    /// current_count += 1`. Returns whether the reservation succeeded.
    pub fn try_reserve_slot(&self) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let reserved;
        {
            let mut table = txn.open_table(CAPACITY).map_err(map_err!(Table))?;
            let mut counter = Self::decode_capacity(&table)?;
            if counter.current_count < counter.max_count {
                counter.current_count += 1;
                reserved = true;
            } else {
                reserved = false;
            }
            let value = serde_json::to_vec(&counter).map_err(map_err!(Serialize))?;
            table
                .insert(FLEET_KEY, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(reserved)
    }

    /// Release a previously reserved slot, clamped at zero.
    pub fn release_slot(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(CAPACITY).map_err(map_err!(Table))?;
            let mut counter = Self::decode_capacity(&table)?;
            counter.current_count = counter.current_count.saturating_sub(1);
            let value = serde_json::to_vec(&counter).map_err(map_err!(Serialize))?;
            table
                .insert(FLEET_KEY, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Set `current_count` to the actual instance row count. Returns the
    /// new count.
    pub fn sync_capacity(&self) -> StateResult<u32> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count;
        {
            let instances = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            count = Self::row_count(&instances)?;

            let mut table = txn.open_table(CAPACITY).map_err(map_err!(Table))?;
            let mut counter = Self::decode_capacity(&table)?;
            counter.current_count = count;
            let value = serde_json::to_vec(&counter).map_err(map_err!(Serialize))?;
            table
                .insert(FLEET_KEY, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(count, "capacity synced to row count");
        Ok(count)
    }

    /// Current capacity counter.
    pub fn capacity(&self) -> StateResult<CapacityCounter> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CAPACITY).map_err(map_err!(Table))?;
        match table.get(FLEET_KEY).map_err(map_err!(Read))? {
            Some(guard) => {
                serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))
            }
            None => Err(StateError::NotFound("capacity counter".to_string())),
        }
    }

    // ── Scaling timestamps ─────────────────────────────────────────

    /// Record a scale-up action at `now`.
    pub fn record_scale_up(&self, now: u64) -> StateResult<()> {
        self.update_scaling(|s| s.last_scale_up = now)
    }

    /// Record a scale-down action at `now`.
    pub fn record_scale_down(&self, now: u64) -> StateResult<()> {
        self.update_scaling(|s| s.last_scale_down = now)
    }

    /// Timestamp of the last scale-up (0 if never).
    pub fn last_scale_up(&self) -> StateResult<u64> {
        Ok(self.scaling_timestamps()?.last_scale_up)
    }

    /// Timestamp of the last scale-down (0 if never).
    pub fn last_scale_down(&self) -> StateResult<u64> {
        Ok(self.scaling_timestamps()?.last_scale_down)
    }

    fn scaling_timestamps(&self) -> StateResult<ScalingTimestamps> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SCALING).map_err(map_err!(Table))?;
        match table.get(FLEET_KEY).map_err(map_err!(Read))? {
            Some(guard) => {
                serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))
            }
            None => Ok(ScalingTimestamps::default()),
        }
    }

    // ── Snapshot ───────────────────────────────────────────────────

    /// Full registry view for the monitoring endpoint.
    pub fn snapshot(&self) -> StateResult<FleetSnapshot> {
        let instances = self.instances(InstanceFilter::default())?;
        Ok(FleetSnapshot {
            instance_count: instances.len() as u32,
            instances,
        })
    }

    // ── Internals ──────────────────────────────────────────────────

    /// Read-modify-write a single record in one write transaction.
    /// Returns false if the record does not exist.
    fn update_record<F>(&self, name: &str, mutate: F) -> StateResult<bool>
    where
        F: FnOnce(&mut InstanceRecord),
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let found;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            match Self::decode_get(&table, name)? {
                Some(mut record) => {
                    mutate(&mut record);
                    let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
                    table
                        .insert(name, value.as_slice())
                        .map_err(map_err!(Write))?;
                    found = true;
                }
                None => found = false,
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(found)
    }

    fn update_scaling<F>(&self, mutate: F) -> StateResult<()>
    where
        F: FnOnce(&mut ScalingTimestamps),
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SCALING).map_err(map_err!(Table))?;
            let mut timestamps = match table.get(FLEET_KEY).map_err(map_err!(Read))? {
                Some(guard) => serde_json::from_slice(guard.value())
                    .map_err(map_err!(Deserialize))?,
                None => ScalingTimestamps::default(),
            };
            mutate(&mut timestamps);
            let value = serde_json::to_vec(&timestamps).map_err(map_err!(Serialize))?;
            table
                .insert(FLEET_KEY, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn row_count<T: ReadableTable<&'static str, &'static [u8]>>(table: &T) -> StateResult<u32> {
        let mut count = 0;
        for entry in table.iter().map_err(map_err!(Read))? {
            entry.map_err(map_err!(Read))?;
            count += 1;
        }
        Ok(count)
    }

    fn decode_get<T: ReadableTable<&'static str, &'static [u8]>>(
        table: &T,
        name: &str,
    ) -> StateResult<Option<InstanceRecord>> {
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: InstanceRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn decode_capacity<T: ReadableTable<&'static str, &'static [u8]>>(
        table: &T,
    ) -> StateResult<CapacityCounter> {
        match table.get(FLEET_KEY).map_err(map_err!(Read))? {
            Some(guard) => {
                serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))
            }
            None => Err(StateError::NotFound("capacity counter".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(max: u32) -> Registry {
        let r = Registry::open_in_memory().unwrap();
        r.migrate(max).unwrap();
        r
    }

    // ── Migration ──────────────────────────────────────────────────

    #[test]
    fn migrate_is_idempotent() {
        let r = Registry::open_in_memory().unwrap();
        r.migrate(10).unwrap();
        r.migrate(10).unwrap();

        let cap = r.capacity().unwrap();
        assert_eq!(cap.current_count, 0);
        assert_eq!(cap.max_count, 10);
    }

    #[test]
    fn migrate_seeds_count_from_existing_rows() {
        let r = registry(10);
        r.record_instance("a", 0, true, 1000).unwrap();
        r.record_instance("b", 0, true, 1000).unwrap();

        // Simulates a restart: counter re-seeded from rows.
        r.migrate(5).unwrap();
        let cap = r.capacity().unwrap();
        assert_eq!(cap.current_count, 2);
        assert_eq!(cap.max_count, 5);
    }

    #[test]
    fn migrate_preserves_scaling_timestamps() {
        let r = registry(10);
        r.record_scale_up(5000).unwrap();

        r.migrate(10).unwrap();
        assert_eq!(r.last_scale_up().unwrap(), 5000);
    }

    // ── Request counters ───────────────────────────────────────────

    #[test]
    fn record_instance_upserts_and_returns_previous() {
        let r = registry(10);

        let prev = r.record_instance("a", 1, true, 1000).unwrap();
        assert_eq!(prev, 0);

        let prev = r.record_instance("a", 2, true, 2000).unwrap();
        assert_eq!(prev, 1);

        let record = r.instance("a").unwrap().unwrap();
        assert_eq!(record.active_requests, 3);
        assert_eq!(record.last_heartbeat, 2000);
        // created_at is not touched by the upsert.
        assert_eq!(record.created_at, 1000);
    }

    #[test]
    fn increment_then_decrement_round_trips() {
        let r = registry(10);
        r.record_instance("a", 3, true, 1000).unwrap();

        for _ in 0..4 {
            r.increment_requests("a", 1100, true, 1).unwrap();
        }
        for _ in 0..4 {
            r.decrement_requests("a", 1200).unwrap();
        }

        let record = r.instance("a").unwrap().unwrap();
        assert_eq!(record.active_requests, 3);
    }

    #[test]
    fn increment_on_missing_record_errors() {
        let r = registry(10);
        let err = r.increment_requests("ghost", 0, true, 1).unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[test]
    fn decrement_clamps_at_zero() {
        let r = registry(10);
        r.record_instance("a", 0, true, 1000).unwrap();

        r.decrement_requests("a", 1100).unwrap();
        r.decrement_requests("a", 1200).unwrap();

        let record = r.instance("a").unwrap().unwrap();
        assert_eq!(record.active_requests, 0);
    }

    #[test]
    fn decrement_on_missing_record_is_noop() {
        let r = registry(10);
        r.decrement_requests("ghost", 0).unwrap();
    }

    // ── Queries ────────────────────────────────────────────────────

    #[test]
    fn instances_ordered_by_load_then_recent_heartbeat() {
        let r = registry(10);
        r.record_instance("busy", 5, true, 1000).unwrap();
        r.record_instance("idle-old", 0, true, 1000).unwrap();
        r.record_instance("idle-new", 0, true, 2000).unwrap();

        let all = r.instances(InstanceFilter::default()).unwrap();
        let names: Vec<&str> = all.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["idle-new", "idle-old", "busy"]);
    }

    #[test]
    fn routable_filter_excludes_unhealthy_and_draining() {
        let r = registry(10);
        r.record_instance("ok", 0, true, 1000).unwrap();
        r.record_instance("sick", 0, false, 1000).unwrap();
        r.record_instance("leaving", 0, true, 1000).unwrap();
        r.mark_draining("leaving", 2000).unwrap();

        let routable = r.instances(InstanceFilter::routable()).unwrap();
        assert_eq!(routable.len(), 1);
        assert_eq!(routable[0].name, "ok");
    }

    #[test]
    fn below_capacity_filter() {
        let r = registry(10);
        r.record_instance("full", 10, true, 1000).unwrap();
        r.record_instance("free", 2, true, 1000).unwrap();

        let below = r
            .instances(InstanceFilter {
                below_capacity: Some(10),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(below.len(), 1);
        assert_eq!(below[0].name, "free");
    }

    #[test]
    fn instance_count_healthy_only() {
        let r = registry(10);
        r.record_instance("a", 0, true, 1000).unwrap();
        r.record_instance("b", 0, false, 1000).unwrap();

        assert_eq!(r.instance_count(true).unwrap(), 1);
        assert_eq!(r.instance_count(false).unwrap(), 2);
    }

    // ── Capacity counter ───────────────────────────────────────────

    #[test]
    fn reserve_and_release_round_trips() {
        let r = registry(2);

        assert!(r.try_reserve_slot().unwrap());
        assert_eq!(r.capacity().unwrap().current_count, 1);

        r.release_slot().unwrap();
        assert_eq!(r.capacity().unwrap().current_count, 0);
    }

    #[test]
    fn reserve_fails_at_max() {
        let r = registry(2);

        assert!(r.try_reserve_slot().unwrap());
        assert!(r.try_reserve_slot().unwrap());
        assert!(!r.try_reserve_slot().unwrap());
        assert_eq!(r.capacity().unwrap().current_count, 2);
    }

    #[test]
    fn release_clamps_at_zero() {
        let r = registry(2);
        r.release_slot().unwrap();
        assert_eq!(r.capacity().unwrap().current_count, 0);
    }

    #[test]
    fn sync_capacity_matches_row_count() {
        let r = registry(10);
        r.try_reserve_slot().unwrap();
        r.try_reserve_slot().unwrap();
        r.try_reserve_slot().unwrap();

        // Only two creations actually landed.
        r.record_instance("a", 0, true, 1000).unwrap();
        r.record_instance("b", 0, true, 1000).unwrap();

        let count = r.sync_capacity().unwrap();
        assert_eq!(count, 2);
        assert_eq!(r.capacity().unwrap().current_count, 2);
    }

    // ── Mutations ──────────────────────────────────────────────────

    #[test]
    fn update_health_and_metrics() {
        let r = registry(10);
        r.record_instance("a", 0, true, 1000).unwrap();

        r.update_health("a", false, 3, 2000).unwrap();
        r.update_metrics("a", 90.0, 40.0, 10.0).unwrap();

        let record = r.instance("a").unwrap().unwrap();
        assert!(!record.healthy);
        assert_eq!(record.health_check_failures, 3);
        assert_eq!(record.last_health_check, 2000);
        assert_eq!(record.current_cpu, 90.0);
        assert_eq!(record.current_memory, 40.0);
        assert_eq!(record.current_disk, 10.0);
    }

    #[test]
    fn mark_draining_sets_since() {
        let r = registry(10);
        r.record_instance("a", 0, true, 1000).unwrap();

        r.mark_draining("a", 5000).unwrap();
        let record = r.instance("a").unwrap().unwrap();
        assert!(record.draining);
        assert_eq!(record.draining_since, Some(5000));
    }

    #[test]
    fn threshold_crossing_is_recorded() {
        let r = registry(10);
        r.record_instance("a", 0, true, 1000).unwrap();

        r.mark_threshold_crossed("a", 7000).unwrap();
        let record = r.instance("a").unwrap().unwrap();
        assert_eq!(record.threshold_crossed_at, Some(7000));
    }

    #[test]
    fn remove_instance_reports_existence() {
        let r = registry(10);
        r.record_instance("a", 0, true, 1000).unwrap();

        assert!(r.remove_instance("a").unwrap());
        assert!(!r.remove_instance("a").unwrap());
        assert!(r.instance("a").unwrap().is_none());
    }

    // ── Scaling timestamps ─────────────────────────────────────────

    #[test]
    fn scale_timestamps_round_trip() {
        let r = registry(10);
        assert_eq!(r.last_scale_up().unwrap(), 0);
        assert_eq!(r.last_scale_down().unwrap(), 0);

        r.record_scale_up(1000).unwrap();
        r.record_scale_down(2000).unwrap();

        assert_eq!(r.last_scale_up().unwrap(), 1000);
        assert_eq!(r.last_scale_down().unwrap(), 2000);
    }

    // ── Snapshot ───────────────────────────────────────────────────

    #[test]
    fn snapshot_counts_all_records() {
        let r = registry(10);
        r.record_instance("a", 0, true, 1000).unwrap();
        r.record_instance("b", 0, false, 1000).unwrap();

        let snap = r.snapshot().unwrap();
        assert_eq!(snap.instance_count, 2);
        assert_eq!(snap.instances.len(), 2);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("shoal.redb");

        {
            let r = Registry::open(&db_path).unwrap();
            r.migrate(10).unwrap();
            r.record_instance("survivor", 2, true, 1000).unwrap();
            r.record_scale_up(9000).unwrap();
        }

        // Reopen the same database file.
        let r = Registry::open(&db_path).unwrap();
        r.migrate(10).unwrap();

        let record = r.instance("survivor").unwrap().unwrap();
        assert_eq!(record.active_requests, 2);
        assert_eq!(r.last_scale_up().unwrap(), 9000);
        // Counter re-seeded from the surviving row.
        assert_eq!(r.capacity().unwrap().current_count, 1);
    }

    #[test]
    fn empty_registry_operations() {
        let r = registry(10);
        assert!(r.instances(InstanceFilter::default()).unwrap().is_empty());
        assert!(r.instance("nope").unwrap().is_none());
        assert!(!r.remove_instance("nope").unwrap());
        assert_eq!(r.snapshot().unwrap().instance_count, 0);
    }
}
