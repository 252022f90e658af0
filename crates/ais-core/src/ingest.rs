//! Ingestion entry point shared by every connector.

use crate::model::{VesselRecord, VesselUpdate};
use crate::pending::PendingSet;
use crate::statistics::StatisticsCollector;
use crate::store::VesselStateStore;
use std::sync::Arc;

/// Merges decoded updates into the state store and marks them for
/// persistence.
///
/// This is the only write path into shared state: connectors never touch
/// the store or the pending set directly.
#[derive(Clone)]
pub struct IngestSink {
    store: Arc<dyn VesselStateStore>,
    pending: Arc<PendingSet>,
    stats: Arc<StatisticsCollector>,
}

impl IngestSink {
    pub fn new(
        store: Arc<dyn VesselStateStore>,
        pending: Arc<PendingSet>,
        stats: Arc<StatisticsCollector>,
    ) -> Self {
        Self {
            store,
            pending,
            stats,
        }
    }

    /// Merge an update and mark its vessel pending.
    pub fn accept(&self, update: &VesselUpdate, source_tag: &str) -> Arc<VesselRecord> {
        let record = self.store.merge(&update.mmsi, update, source_tag);
        self.pending.mark(update.mmsi);
        self.stats.record_merge();
        record
    }

    pub fn store(&self) -> &Arc<dyn VesselStateStore> {
        &self.store
    }

    pub fn pending(&self) -> &Arc<PendingSet> {
        &self.pending
    }

    pub fn stats(&self) -> &Arc<StatisticsCollector> {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Mmsi;
    use crate::store::MemoryStore;
    use chrono::Utc;

    #[test]
    fn test_accept_merges_and_marks_once() {
        let sink = IngestSink::new(
            Arc::new(MemoryStore::default()),
            Arc::new(PendingSet::new()),
            Arc::new(StatisticsCollector::new()),
        );
        let mmsi = Mmsi::new(257_123_450).unwrap();

        for knots in [1.0, 2.0, 3.0] {
            let mut update = VesselUpdate::new(mmsi, Utc::now());
            update.fields.sog = Some(knots);
            sink.accept(&update, "tcp");
        }

        assert_eq!(sink.pending().drain(200), vec![mmsi]);
        assert_eq!(sink.store().get(&mmsi).unwrap().fields.sog, Some(3.0));
        assert_eq!(sink.stats().snapshot().merges, 3);
    }
}
