//! Durable vessel documents and the store seam behind them.
//!
//! The pipeline only talks to a `DurableStore`: bulk upserts from the
//! persistence scheduler, a change feed for the dispatch loop, expiry
//! removal and the read paths of the HTTP surface. `MemoryDurableStore` is
//! the in-process implementation used by the binary and the tests.

use crate::error::PersistenceError;
use ais_core::{Mmsi, Position, VesselRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Default number of prior positions kept per vessel.
pub const DEFAULT_TRACK_CAPACITY: usize = 500;

/// Change feed buffer, in documents.
pub const CHANGE_FEED_CAPACITY: usize = 4096;

// ============================================================================
// Documents
// ============================================================================

/// One prior position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub position: Position,
    pub timestamp: DateTime<Utc>,
}

/// A vessel as the durable store keeps it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredVessel {
    /// Assigned on first insert, stable afterwards.
    pub id: Uuid,

    #[serde(flatten)]
    pub record: VesselRecord,

    /// Oldest first; omitted from summary projections.
    #[serde(default, skip_serializing_if = "VecDeque::is_empty")]
    pub track: VecDeque<TrackPoint>,
}

impl StoredVessel {
    fn new(record: VesselRecord) -> Self {
        Self {
            id: Uuid::new_v4(),
            record,
            track: VecDeque::new(),
        }
    }

    /// Replace the record, extending the track when the position moved.
    fn update(&mut self, record: VesselRecord, capacity: usize) {
        if let Some(position) = record.fields.position {
            let moved = self
                .track
                .back()
                .map_or(true, |last| last.position != position);
            if moved && capacity > 0 {
                if self.track.len() >= capacity {
                    self.track.pop_front();
                }
                self.track.push_back(TrackPoint {
                    position,
                    timestamp: record.last_updated,
                });
            }
        }
        self.record = record;
    }

    fn matches(&self, query: &str) -> bool {
        let record = &self.record;
        record.mmsi.to_string().contains(query)
            || record
                .fields
                .name
                .as_deref()
                .is_some_and(|name| name.to_lowercase().contains(query))
            || record
                .fields
                .imo
                .is_some_and(|imo| imo.to_string().contains(query))
    }

    fn project(&self, projection: Projection) -> StoredVessel {
        match projection {
            Projection::Full => self.clone(),
            Projection::Summary => StoredVessel {
                id: self.id,
                record: self.record.clone(),
                track: VecDeque::new(),
            },
        }
    }
}

// ============================================================================
// Queries
// ============================================================================

/// Which parts of a document to return.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Projection {
    /// Everything, including the track.
    Full,
    /// The record without its track.
    #[default]
    Summary,
}

/// Selection for `DurableStore::find`. Expired documents never match.
#[derive(Debug, Clone)]
pub struct VesselFilter {
    /// Case-insensitive substring on MMSI, name and IMO.
    pub query: Option<String>,
    /// Reference time for expiry.
    pub now: DateTime<Utc>,
    pub skip: usize,
    pub limit: usize,
}

impl VesselFilter {
    /// Every live vessel at `now`, up to `limit`.
    pub fn live(now: DateTime<Utc>, limit: usize) -> Self {
        Self {
            query: None,
            now,
            skip: 0,
            limit,
        }
    }
}

/// One page of `find` results.
#[derive(Debug, Clone, Default)]
pub struct FindResult {
    pub items: Vec<StoredVessel>,
    /// Matches before paging.
    pub total: usize,
}

/// Outcome of one bulk write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkWriteSummary {
    pub inserted: usize,
    pub updated: usize,
    /// Records the store refused; the rest of the batch still committed.
    pub rejected: Vec<(Mmsi, String)>,
}

impl BulkWriteSummary {
    pub fn persisted(&self) -> usize {
        self.inserted + self.updated
    }
}

// ============================================================================
// Store seam
// ============================================================================

#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Unordered upsert by MMSI. Per-record failures are reported in the
    /// summary; an `Err` means nothing was written.
    async fn upsert_many(
        &self,
        records: Vec<Arc<VesselRecord>>,
    ) -> Result<BulkWriteSummary, PersistenceError>;

    async fn find(
        &self,
        filter: &VesselFilter,
        projection: Projection,
    ) -> Result<FindResult, PersistenceError>;

    /// Look up by internal id. Expired documents are not returned.
    async fn find_by_id(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<StoredVessel>, PersistenceError>;

    /// Latest committed document for a vessel, expired or not.
    async fn find_by_mmsi(&self, mmsi: &Mmsi) -> Result<Option<StoredVessel>, PersistenceError>;

    /// Latest committed record for a vessel without its track, expired or not.
    async fn find_record(&self, mmsi: &Mmsi) -> Result<Option<VesselRecord>, PersistenceError>;

    /// Delete documents with `now > expire_at`, returning how many went.
    async fn remove_expired(&self, now: DateTime<Utc>) -> Result<usize, PersistenceError>;

    /// Change feed of every committed record. Tracks stay in the store.
    fn watch(&self) -> broadcast::Receiver<Arc<VesselRecord>>;

    async fn ping(&self) -> Result<(), PersistenceError>;
}

#[derive(Debug, Default)]
struct Documents {
    by_mmsi: HashMap<Mmsi, StoredVessel>,
    by_id: HashMap<Uuid, Mmsi>,
}

/// In-process durable store.
#[derive(Debug)]
pub struct MemoryDurableStore {
    docs: RwLock<Documents>,
    changes: broadcast::Sender<Arc<VesselRecord>>,
    track_capacity: usize,
}

impl MemoryDurableStore {
    pub fn new(track_capacity: usize) -> Self {
        Self::with_feed_capacity(track_capacity, CHANGE_FEED_CAPACITY)
    }

    pub fn with_feed_capacity(track_capacity: usize, feed_capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(feed_capacity.max(1));
        Self {
            docs: RwLock::new(Documents::default()),
            changes,
            track_capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.docs.read().by_mmsi.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryDurableStore {
    fn default() -> Self {
        Self::new(DEFAULT_TRACK_CAPACITY)
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn upsert_many(
        &self,
        records: Vec<Arc<VesselRecord>>,
    ) -> Result<BulkWriteSummary, PersistenceError> {
        let mut summary = BulkWriteSummary::default();
        let mut committed = Vec::with_capacity(records.len());
        {
            let mut guard = self.docs.write();
            let docs = &mut *guard;
            for record in records {
                let mmsi = record.mmsi;
                let doc = match docs.by_mmsi.entry(mmsi) {
                    Entry::Occupied(entry) => {
                        summary.updated += 1;
                        entry.into_mut()
                    }
                    Entry::Vacant(entry) => {
                        summary.inserted += 1;
                        let doc = StoredVessel::new(record.as_ref().clone());
                        docs.by_id.insert(doc.id, mmsi);
                        entry.insert(doc)
                    }
                };
                doc.update(record.as_ref().clone(), self.track_capacity);
                // the committed state is exactly the incoming record
                committed.push(record);
            }
        }
        for record in committed {
            // no receivers is fine: nothing is dispatching yet
            let _ = self.changes.send(record);
        }
        Ok(summary)
    }

    async fn find(
        &self,
        filter: &VesselFilter,
        projection: Projection,
    ) -> Result<FindResult, PersistenceError> {
        let query = filter.query.as_deref().map(str::to_lowercase);
        let docs = self.docs.read();
        let mut matches: Vec<&StoredVessel> = docs
            .by_mmsi
            .values()
            .filter(|doc| !doc.record.is_expired(filter.now))
            .filter(|doc| query.as_deref().map_or(true, |q| doc.matches(q)))
            .collect();
        matches.sort_by_key(|doc| doc.record.mmsi);

        let total = matches.len();
        let items = matches
            .into_iter()
            .skip(filter.skip)
            .take(filter.limit)
            .map(|doc| doc.project(projection))
            .collect();
        Ok(FindResult { items, total })
    }

    async fn find_by_id(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<StoredVessel>, PersistenceError> {
        let docs = self.docs.read();
        Ok(docs
            .by_id
            .get(&id)
            .and_then(|mmsi| docs.by_mmsi.get(mmsi))
            .filter(|doc| !doc.record.is_expired(now))
            .cloned())
    }

    async fn find_by_mmsi(&self, mmsi: &Mmsi) -> Result<Option<StoredVessel>, PersistenceError> {
        Ok(self.docs.read().by_mmsi.get(mmsi).cloned())
    }

    async fn find_record(&self, mmsi: &Mmsi) -> Result<Option<VesselRecord>, PersistenceError> {
        Ok(self
            .docs
            .read()
            .by_mmsi
            .get(mmsi)
            .map(|doc| doc.record.clone()))
    }

    async fn remove_expired(&self, now: DateTime<Utc>) -> Result<usize, PersistenceError> {
        let mut docs = self.docs.write();
        let expired: Vec<(Mmsi, Uuid)> = docs
            .by_mmsi
            .values()
            .filter(|doc| doc.record.is_expired(now))
            .map(|doc| (doc.record.mmsi, doc.id))
            .collect();
        for (mmsi, id) in &expired {
            docs.by_mmsi.remove(mmsi);
            docs.by_id.remove(id);
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "removed expired documents");
        }
        Ok(expired.len())
    }

    fn watch(&self) -> broadcast::Receiver<Arc<VesselRecord>> {
        self.changes.subscribe()
    }

    async fn ping(&self) -> Result<(), PersistenceError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ais_core::{VesselFields, VesselUpdate};
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn record(mmsi: u64, name: &str, lon: f64, at: DateTime<Utc>) -> Arc<VesselRecord> {
        let mut update = VesselUpdate::new(Mmsi::new(mmsi).unwrap(), at);
        update.fields = VesselFields {
            name: Some(name.to_string()),
            position: Position::new(lon, 60.0),
            ..VesselFields::default()
        };
        Arc::new(VesselRecord::from_update(
            &update,
            "test",
            Duration::minutes(30),
        ))
    }

    #[tokio::test]
    async fn test_upsert_assigns_stable_id_and_tracks_moves() {
        let store = MemoryDurableStore::new(3);
        let summary = store
            .upsert_many(vec![record(257000001, "A", 5.0, t0())])
            .await
            .unwrap();
        assert_eq!(summary.inserted, 1);
        let first = store.find_by_mmsi(&Mmsi::new(257000001).unwrap()).await.unwrap().unwrap();

        for (i, lon) in [5.0, 5.1, 5.2, 5.3].iter().enumerate() {
            let at = t0() + Duration::seconds(i as i64 + 1);
            let summary = store
                .upsert_many(vec![record(257000001, "A", *lon, at)])
                .await
                .unwrap();
            assert_eq!(summary.updated, 1);
        }

        let doc = store.find_by_id(first.id, t0()).await.unwrap().unwrap();
        assert_eq!(doc.id, first.id);
        // 5.0 repeated is not a move; capacity 3 keeps the newest
        let lons: Vec<f64> = doc.track.iter().map(|p| p.position.lon).collect();
        assert_eq!(lons, vec![5.1, 5.2, 5.3]);
    }

    #[tokio::test]
    async fn test_find_excludes_expired_and_pages() {
        let store = MemoryDurableStore::default();
        let records = (1..=5)
            .map(|i| record(257000000 + i, &format!("Vessel {i}"), 5.0, t0()))
            .chain(std::iter::once(record(
                258000000,
                "Old Timer",
                5.0,
                t0() - Duration::hours(2),
            )))
            .collect();
        store.upsert_many(records).await.unwrap();

        let page = store
            .find(
                &VesselFilter {
                    query: Some("VESSEL".into()),
                    now: t0(),
                    skip: 2,
                    limit: 2,
                },
                Projection::Summary,
            )
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        let names: Vec<_> = page
            .items
            .iter()
            .map(|d| d.record.fields.name.clone().unwrap())
            .collect();
        assert_eq!(names, vec!["Vessel 3", "Vessel 4"]);
        assert!(page.items.iter().all(|d| d.track.is_empty()));

        let by_mmsi = store
            .find(
                &VesselFilter {
                    query: Some("258".into()),
                    ..VesselFilter::live(t0(), 10)
                },
                Projection::Full,
            )
            .await
            .unwrap();
        assert_eq!(by_mmsi.total, 0);
    }

    #[tokio::test]
    async fn test_remove_expired_and_find_by_id() {
        let store = MemoryDurableStore::default();
        store
            .upsert_many(vec![record(257000001, "A", 5.0, t0())])
            .await
            .unwrap();
        let doc = store.find_by_mmsi(&Mmsi::new(257000001).unwrap()).await.unwrap().unwrap();

        let later = t0() + Duration::minutes(31);
        assert!(store.find_by_id(doc.id, later).await.unwrap().is_none());
        assert_eq!(store.remove_expired(t0()).await.unwrap(), 0);
        assert_eq!(store.remove_expired(later).await.unwrap(), 1);
        assert!(store.is_empty());
        assert!(store.find_by_id(doc.id, t0()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_watch_sees_committed_records() {
        let store = MemoryDurableStore::default();
        let mut feed = store.watch();
        store
            .upsert_many(vec![
                record(257000001, "A", 5.0, t0()),
                record(257000002, "B", 5.0, t0()),
            ])
            .await
            .unwrap();
        assert_eq!(feed.recv().await.unwrap().mmsi.value(), 257000001);
        assert_eq!(feed.recv().await.unwrap().mmsi.value(), 257000002);
    }

    #[tokio::test]
    async fn test_feed_and_record_lookup_share_the_incoming_record() {
        let store = MemoryDurableStore::new(10);
        let mut feed = store.watch();
        for (i, lon) in [5.0, 5.1, 5.2].iter().enumerate() {
            let at = t0() + Duration::seconds(i as i64);
            store
                .upsert_many(vec![record(257000001, "A", *lon, at)])
                .await
                .unwrap();
        }

        let latest = record(257000001, "A", 5.3, t0() + Duration::seconds(3));
        store.upsert_many(vec![latest.clone()]).await.unwrap();
        for _ in 0..3 {
            feed.recv().await.unwrap();
        }
        // the feed hands out the caller's record without copying it
        assert!(Arc::ptr_eq(&feed.recv().await.unwrap(), &latest));

        let mmsi = Mmsi::new(257000001).unwrap();
        let found = store.find_record(&mmsi).await.unwrap().unwrap();
        assert_eq!(found, *latest);
        let doc = store.find_by_mmsi(&mmsi).await.unwrap().unwrap();
        assert_eq!(doc.track.len(), 4);
        assert!(store.find_record(&Mmsi::new(257000002).unwrap()).await.unwrap().is_none());
    }

    #[test]
    fn test_document_json() {
        let mut doc = StoredVessel::new((*record(257000001, "A", 5.0, t0())).clone());
        doc.id = Uuid::nil();
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["id"], "00000000-0000-0000-0000-000000000000");
        assert_eq!(json["mmsi"], "257000001");
        assert_eq!(json["name"], "A");
        assert!(json.get("track").is_none());
    }
}
