//! Vessel state store.
//!
//! The store holds the latest known record for every vessel and is the
//! single shared-mutable hub of the pipeline. Connectors merge into it,
//! the persistence scheduler reads from it.

use crate::model::{default_ttl, Mmsi, VesselRecord, VesselUpdate};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

/// Trait for vessel state store implementations.
pub trait VesselStateStore: Send + Sync {
    /// Merge an update into the record for `id`, creating it if needed.
    ///
    /// Merges for the same identifier are applied in call order.
    fn merge(&self, id: &Mmsi, update: &VesselUpdate, source_tag: &str) -> Arc<VesselRecord>;

    /// Get the current record for a vessel.
    fn get(&self, id: &Mmsi) -> Option<Arc<VesselRecord>>;

    /// Get every current record.
    fn snapshot(&self) -> Vec<Arc<VesselRecord>>;

    /// Number of vessels held.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove records that are expired at `now`, returning their ids.
    fn evict_expired(&self, now: DateTime<Utc>) -> Vec<Mmsi>;

    /// Time-to-live applied on every merge.
    fn ttl(&self) -> Duration;
}

/// In-memory vessel state store.
///
/// Records are reference counted so `snapshot()` only copies pointers under
/// the read lock. A merge against a record a reader still holds clones it
/// first, readers never observe a half-applied update.
#[derive(Debug)]
pub struct MemoryStore {
    records: RwLock<HashMap<Mmsi, Arc<VesselRecord>>>,
    ttl: Duration,
}

impl MemoryStore {
    /// Create an empty store with the given record TTL.
    pub fn new(ttl: Duration) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            ttl,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(default_ttl())
    }
}

impl VesselStateStore for MemoryStore {
    fn merge(&self, id: &Mmsi, update: &VesselUpdate, source_tag: &str) -> Arc<VesselRecord> {
        debug_assert_eq!(*id, update.mmsi);
        let mut records = self.records.write();
        match records.entry(*id) {
            Entry::Occupied(mut entry) => {
                Arc::make_mut(entry.get_mut()).apply(update, source_tag, self.ttl);
                entry.get().clone()
            }
            Entry::Vacant(entry) => entry
                .insert(Arc::new(VesselRecord::from_update(
                    update, source_tag, self.ttl,
                )))
                .clone(),
        }
    }

    fn get(&self, id: &Mmsi) -> Option<Arc<VesselRecord>> {
        self.records.read().get(id).cloned()
    }

    fn snapshot(&self) -> Vec<Arc<VesselRecord>> {
        self.records.read().values().cloned().collect()
    }

    fn len(&self) -> usize {
        self.records.read().len()
    }

    fn evict_expired(&self, now: DateTime<Utc>) -> Vec<Mmsi> {
        let candidates: Vec<Mmsi> = self
            .records
            .read()
            .iter()
            .filter(|(_, record)| record.is_expired(now))
            .map(|(id, _)| *id)
            .collect();

        // One short write lock per key; a merge that refreshed the record
        // since the scan keeps it alive.
        let mut evicted = Vec::with_capacity(candidates.len());
        for id in candidates {
            let mut records = self.records.write();
            if records.get(&id).is_some_and(|r| r.is_expired(now)) {
                records.remove(&id);
                evicted.push(id);
            }
        }
        evicted
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Position, HEADING_NOT_AVAILABLE};
    use pretty_assertions::assert_eq;
    use std::thread;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn update(mmsi: u64, ts: &str) -> VesselUpdate {
        VesselUpdate::new(Mmsi::new(mmsi).unwrap(), at(ts))
    }

    #[test]
    fn test_merge_creates_record() {
        let store = MemoryStore::default();
        let mut u = update(257_123_450, "2024-01-17T10:00:00Z");
        u.fields.position = Position::new(5.3, 60.4);

        let record = store.merge(&u.mmsi, &u, "tcp");

        assert_eq!(record.fields.position, Position::new(5.3, 60.4));
        assert_eq!(record.expire_at, at("2024-01-17T10:30:00Z"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&u.mmsi).unwrap().source_tag, "tcp");
    }

    #[test]
    fn test_interleaved_static_and_position() {
        let store = MemoryStore::default();
        let mut static_msg = update(257_123_450, "2024-01-17T10:00:00Z");
        static_msg.fields.name = Some("SJARKEN".to_string());
        static_msg.fields.callsign = Some("LK45".to_string());
        let mut position = update(257_123_450, "2024-01-17T10:00:06Z");
        position.fields.sog = Some(8.4);
        position.fields.heading = Some(HEADING_NOT_AVAILABLE);
        let mut static_again = update(257_123_450, "2024-01-17T10:06:00Z");
        static_again.fields.destination = Some("BERGEN".to_string());

        store.merge(&static_msg.mmsi, &static_msg, "stream");
        store.merge(&position.mmsi, &position, "stream");
        let record = store.merge(&static_again.mmsi, &static_again, "stream");

        assert_eq!(record.fields.name.as_deref(), Some("SJARKEN"));
        assert_eq!(record.fields.callsign.as_deref(), Some("LK45"));
        assert_eq!(record.fields.destination.as_deref(), Some("BERGEN"));
        assert_eq!(record.fields.sog, Some(8.4));
        assert_eq!(record.fields.heading, Some(511));
        assert_eq!(record.last_updated, at("2024-01-17T10:06:00Z"));
        assert_eq!(record.expire_at, record.last_updated + store.ttl());
    }

    #[test]
    fn test_snapshot_is_copy_on_read() {
        let store = MemoryStore::default();
        let mut u = update(257_123_450, "2024-01-17T10:00:00Z");
        u.fields.sog = Some(1.0);
        store.merge(&u.mmsi, &u, "tcp");

        let snapshot = store.snapshot();
        u.fields.sog = Some(2.0);
        store.merge(&u.mmsi, &u, "tcp");

        assert_eq!(snapshot[0].fields.sog, Some(1.0));
        assert_eq!(store.get(&u.mmsi).unwrap().fields.sog, Some(2.0));
    }

    #[test]
    fn test_concurrent_merges_keep_one_record() {
        let store = Arc::new(MemoryStore::default());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                thread::spawn(move || {
                    for n in 0..100 {
                        let mut u = update(257_123_450, "2024-01-17T10:00:00Z");
                        u.fields.sog = Some(f64::from(i * 100 + n));
                        store.merge(&u.mmsi, &u, "tcp");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.len(), 1);
        let record = store.snapshot().pop().unwrap();
        assert_eq!(record.expire_at, record.last_updated + store.ttl());
    }

    #[test]
    fn test_evict_expired() {
        let store = MemoryStore::default();
        let old = update(257_000_001, "2024-01-17T09:00:00Z");
        let fresh = update(257_000_002, "2024-01-17T10:00:00Z");
        store.merge(&old.mmsi, &old, "tcp");
        store.merge(&fresh.mmsi, &fresh, "tcp");

        let evicted = store.evict_expired(at("2024-01-17T10:15:00Z"));

        assert_eq!(evicted, vec![old.mmsi]);
        assert!(store.get(&old.mmsi).is_none());
        assert!(store.get(&fresh.mmsi).is_some());
    }
}
