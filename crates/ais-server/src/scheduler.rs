//! Batched persistence of pending vessels.
//!
//! Every tick drains up to `batch_size` identifiers from the pending set,
//! reads their current records from the state store and writes them to the
//! durable store in one unordered bulk upsert. Coalescing falls out of
//! this: a vessel merged ten times between ticks is written once, with its
//! latest state.

use crate::durable::DurableStore;
use crate::error::PersistenceError;
use crate::single_flight::SingleFlight;
use ais_core::config::{FailurePolicy, PersistenceSettings};
use ais_core::{IngestSink, PendingSet, StatisticsCollector, VesselStateStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// What one flush did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Another flush held the single-flight guard.
    Skipped,
    /// Nothing was pending.
    Idle,
    Flushed {
        persisted: usize,
        rejected: usize,
        /// Pending identifiers no longer in the state store.
        missing: usize,
    },
    /// The bulk write failed as a whole.
    Failed { requeued: usize, dropped: usize },
}

pub struct PersistenceScheduler {
    store: Arc<dyn VesselStateStore>,
    pending: Arc<PendingSet>,
    stats: Arc<StatisticsCollector>,
    durable: Arc<dyn DurableStore>,
    settings: PersistenceSettings,
    write_timeout: Duration,
    flight: SingleFlight,
}

impl PersistenceScheduler {
    pub fn new(
        sink: &IngestSink,
        durable: Arc<dyn DurableStore>,
        settings: PersistenceSettings,
        write_timeout: Duration,
    ) -> Self {
        Self {
            store: sink.store().clone(),
            pending: sink.pending().clone(),
            stats: sink.stats().clone(),
            durable,
            settings,
            write_timeout,
            flight: SingleFlight::new(),
        }
    }

    /// Flush one batch unless a flush is already running.
    #[instrument(skip_all)]
    pub async fn flush(&self) -> FlushOutcome {
        let Some(_flight) = self.flight.try_begin() else {
            debug!("previous flush still running, skipping tick");
            return FlushOutcome::Skipped;
        };
        self.flush_batch().await
    }

    async fn flush_batch(&self) -> FlushOutcome {
        let ids = self.pending.drain(self.settings.batch_size);
        if ids.is_empty() {
            return FlushOutcome::Idle;
        }

        let records: Vec<_> = ids.iter().filter_map(|id| self.store.get(id)).collect();
        let missing = ids.len() - records.len();
        if records.is_empty() {
            return FlushOutcome::Flushed {
                persisted: 0,
                rejected: 0,
                missing,
            };
        }

        let written = tokio::time::timeout(self.write_timeout, self.durable.upsert_many(records))
            .await
            .unwrap_or(Err(PersistenceError::WriteTimeout(self.write_timeout)));

        match written {
            Ok(summary) => {
                for (mmsi, reason) in &summary.rejected {
                    warn!(%mmsi, %reason, "durable store rejected record");
                }
                if self.settings.failure_policy == FailurePolicy::Requeue {
                    self.pending
                        .requeue_front(summary.rejected.iter().map(|(mmsi, _)| *mmsi));
                }
                self.stats.record_flush(summary.persisted());
                debug!(
                    persisted = summary.persisted(),
                    rejected = summary.rejected.len(),
                    missing,
                    "flushed batch"
                );
                FlushOutcome::Flushed {
                    persisted: summary.persisted(),
                    rejected: summary.rejected.len(),
                    missing,
                }
            }
            Err(e) => {
                self.stats.record_flush_failure();
                match self.settings.failure_policy {
                    FailurePolicy::Drop => {
                        error!(error = %e, dropped = ids.len(), "bulk write failed, dropping batch");
                        FlushOutcome::Failed {
                            requeued: 0,
                            dropped: ids.len(),
                        }
                    }
                    FailurePolicy::Requeue => {
                        error!(error = %e, requeued = ids.len(), "bulk write failed, requeueing batch");
                        let requeued = ids.len();
                        self.pending.requeue_front(ids);
                        FlushOutcome::Failed {
                            requeued,
                            dropped: 0,
                        }
                    }
                }
            }
        }
    }

    /// Tick until `shutdown`, then wait for the running flush and drain.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            interval = ?self.settings.flush_interval,
            batch_size = self.settings.batch_size,
            "persistence scheduler started"
        );
        let mut ticker = tokio::time::interval(self.settings.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let this = self.clone();
                    tokio::spawn(async move { this.flush().await });
                }
            }
        }

        self.flight.idle().await;
        self.drain().await;
        info!("persistence scheduler stopped");
    }

    /// Flush until the pending set is empty or a write fails.
    pub async fn drain(&self) {
        loop {
            match self.flush().await {
                FlushOutcome::Idle | FlushOutcome::Failed { .. } => break,
                FlushOutcome::Skipped => self.flight.idle().await,
                // only requeued rejects left: they wait for the next tick
                FlushOutcome::Flushed {
                    persisted: 0,
                    rejected,
                    ..
                } if rejected > 0 && self.settings.failure_policy == FailurePolicy::Requeue => {
                    break
                }
                FlushOutcome::Flushed { .. } => {}
            }
        }
        if !self.pending.is_empty() {
            warn!(left = self.pending.len(), "shutting down with unpersisted vessels");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durable::{
        BulkWriteSummary, FindResult, MemoryDurableStore, Projection, StoredVessel, VesselFilter,
    };
    use ais_core::{MemoryStore, Mmsi, VesselRecord, VesselUpdate};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::broadcast;
    use uuid::Uuid;

    fn sink() -> IngestSink {
        IngestSink::new(
            Arc::new(MemoryStore::default()),
            Arc::new(PendingSet::new()),
            Arc::new(StatisticsCollector::new()),
        )
    }

    fn ingest(sink: &IngestSink, count: u64) {
        for i in 0..count {
            let update = VesselUpdate::new(Mmsi::new(257_000_000 + i).unwrap(), Utc::now());
            sink.accept(&update, "test");
        }
    }

    fn settings(policy: FailurePolicy) -> PersistenceSettings {
        PersistenceSettings {
            flush_interval: Duration::from_secs(2),
            batch_size: 200,
            failure_policy: policy,
        }
    }

    /// Wraps a memory store with a write delay, call counter and failure switch.
    struct TestStore {
        inner: MemoryDurableStore,
        delay: Duration,
        fail: bool,
        reject: Vec<Mmsi>,
        calls: AtomicUsize,
        concurrent: AtomicUsize,
        max_concurrent: AtomicUsize,
    }

    impl TestStore {
        fn new(delay: Duration, fail: bool) -> Self {
            Self {
                inner: MemoryDurableStore::default(),
                delay,
                fail,
                reject: Vec::new(),
                calls: AtomicUsize::new(0),
                concurrent: AtomicUsize::new(0),
                max_concurrent: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DurableStore for TestStore {
        async fn upsert_many(
            &self,
            records: Vec<Arc<VesselRecord>>,
        ) -> Result<BulkWriteSummary, PersistenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.concurrent.fetch_sub(1, Ordering::SeqCst);
            if self.fail {
                return Err(PersistenceError::Unavailable("down".into()));
            }
            let (refused, accepted): (Vec<_>, Vec<_>) = records
                .into_iter()
                .partition(|record| self.reject.contains(&record.mmsi));
            let mut summary = self.inner.upsert_many(accepted).await?;
            summary.rejected = refused
                .iter()
                .map(|record| (record.mmsi, "document too large".to_string()))
                .collect();
            Ok(summary)
        }

        async fn find(
            &self,
            filter: &VesselFilter,
            projection: Projection,
        ) -> Result<FindResult, PersistenceError> {
            self.inner.find(filter, projection).await
        }

        async fn find_by_id(
            &self,
            id: Uuid,
            now: DateTime<Utc>,
        ) -> Result<Option<StoredVessel>, PersistenceError> {
            self.inner.find_by_id(id, now).await
        }

        async fn find_by_mmsi(
            &self,
            mmsi: &Mmsi,
        ) -> Result<Option<StoredVessel>, PersistenceError> {
            self.inner.find_by_mmsi(mmsi).await
        }

        async fn find_record(
            &self,
            mmsi: &Mmsi,
        ) -> Result<Option<VesselRecord>, PersistenceError> {
            self.inner.find_record(mmsi).await
        }

        async fn remove_expired(&self, now: DateTime<Utc>) -> Result<usize, PersistenceError> {
            self.inner.remove_expired(now).await
        }

        fn watch(&self) -> broadcast::Receiver<Arc<VesselRecord>> {
            self.inner.watch()
        }

        async fn ping(&self) -> Result<(), PersistenceError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_flush_coalesces_and_batches() {
        let sink = sink();
        ingest(&sink, 250);
        ingest(&sink, 250);
        let durable = Arc::new(MemoryDurableStore::default());
        let scheduler = PersistenceScheduler::new(
            &sink,
            durable.clone(),
            settings(FailurePolicy::Drop),
            Duration::from_secs(10),
        );

        assert_eq!(
            scheduler.flush().await,
            FlushOutcome::Flushed {
                persisted: 200,
                rejected: 0,
                missing: 0
            }
        );
        assert_eq!(
            scheduler.flush().await,
            FlushOutcome::Flushed {
                persisted: 50,
                rejected: 0,
                missing: 0
            }
        );
        assert_eq!(scheduler.flush().await, FlushOutcome::Idle);
        assert_eq!(durable.len(), 250);
        assert_eq!(sink.stats().snapshot().records_persisted, 250);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_flushes_are_single_flight() {
        let sink = sink();
        ingest(&sink, 10);
        let durable = Arc::new(TestStore::new(Duration::from_secs(5), false));
        let scheduler = Arc::new(PersistenceScheduler::new(
            &sink,
            durable.clone(),
            settings(FailurePolicy::Drop),
            Duration::from_secs(10),
        ));

        let slow = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.flush().await }
        });
        tokio::task::yield_now().await;

        let contenders: Vec<_> = (0..3)
            .map(|_| {
                let scheduler = scheduler.clone();
                tokio::spawn(async move { scheduler.flush().await })
            })
            .collect();
        for contender in contenders {
            assert_eq!(contender.await.unwrap(), FlushOutcome::Skipped);
        }

        assert!(matches!(
            slow.await.unwrap(),
            FlushOutcome::Flushed { persisted: 10, .. }
        ));
        assert_eq!(durable.calls.load(Ordering::SeqCst), 1);
        assert_eq!(durable.max_concurrent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_timeout_drops_batch() {
        let sink = sink();
        ingest(&sink, 3);
        let durable = Arc::new(TestStore::new(Duration::from_secs(60), false));
        let scheduler = PersistenceScheduler::new(
            &sink,
            durable,
            settings(FailurePolicy::Drop),
            Duration::from_secs(10),
        );
        assert_eq!(
            scheduler.flush().await,
            FlushOutcome::Failed {
                requeued: 0,
                dropped: 3
            }
        );
        assert!(sink.pending().is_empty());
        assert_eq!(sink.stats().snapshot().flush_failures, 1);
    }

    #[tokio::test]
    async fn test_requeue_policy_re_marks_batch() {
        let sink = sink();
        ingest(&sink, 3);
        let durable = Arc::new(TestStore::new(Duration::ZERO, true));
        let scheduler = PersistenceScheduler::new(
            &sink,
            durable,
            settings(FailurePolicy::Requeue),
            Duration::from_secs(10),
        );
        assert_eq!(
            scheduler.flush().await,
            FlushOutcome::Failed {
                requeued: 3,
                dropped: 0
            }
        );
        assert_eq!(sink.pending().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeued_batch_goes_ahead_of_newer_updates() {
        let sink = sink();
        ingest(&sink, 3);
        let durable = Arc::new(TestStore::new(Duration::from_secs(1), true));
        let scheduler = Arc::new(PersistenceScheduler::new(
            &sink,
            durable,
            settings(FailurePolicy::Requeue),
            Duration::from_secs(10),
        ));
        let flush = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.flush().await }
        });
        tokio::task::yield_now().await;

        // arrives while the failing write is in flight
        let later = VesselUpdate::new(Mmsi::new(258_000_000).unwrap(), Utc::now());
        sink.accept(&later, "test");
        assert!(matches!(
            flush.await.unwrap(),
            FlushOutcome::Failed { requeued: 3, .. }
        ));

        let ids: Vec<u32> = sink.pending().drain(10).iter().map(|id| id.value()).collect();
        assert_eq!(ids, vec![257_000_000, 257_000_001, 257_000_002, 258_000_000]);
    }

    #[tokio::test]
    async fn test_rejected_records_follow_failure_policy() {
        let rejected = Mmsi::new(257_000_001).unwrap();
        for (policy, kept) in [(FailurePolicy::Requeue, true), (FailurePolicy::Drop, false)] {
            let sink = sink();
            ingest(&sink, 3);
            let mut store = TestStore::new(Duration::ZERO, false);
            store.reject = vec![rejected];
            let durable = Arc::new(store);
            let scheduler = PersistenceScheduler::new(
                &sink,
                durable.clone(),
                settings(policy),
                Duration::from_secs(10),
            );

            assert_eq!(
                scheduler.flush().await,
                FlushOutcome::Flushed {
                    persisted: 2,
                    rejected: 1,
                    missing: 0
                }
            );
            assert_eq!(sink.pending().contains(&rejected), kept);
            assert_eq!(sink.pending().len(), usize::from(kept));

            // drain gives up on a batch of nothing but rejects
            scheduler.drain().await;
            assert_eq!(durable.inner.len(), 2);
            assert_eq!(sink.pending().contains(&rejected), kept);
        }
    }

    #[tokio::test]
    async fn test_missing_records_are_skipped() {
        let sink = sink();
        sink.pending().mark(Mmsi::new(257_999_999).unwrap());
        let scheduler = PersistenceScheduler::new(
            &sink,
            Arc::new(MemoryDurableStore::default()),
            settings(FailurePolicy::Drop),
            Duration::from_secs(10),
        );
        assert_eq!(
            scheduler.flush().await,
            FlushOutcome::Flushed {
                persisted: 0,
                rejected: 0,
                missing: 1
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_drains_on_shutdown() {
        let sink = sink();
        ingest(&sink, 450);
        let durable = Arc::new(MemoryDurableStore::default());
        let scheduler = Arc::new(PersistenceScheduler::new(
            &sink,
            durable.clone(),
            settings(FailurePolicy::Drop),
            Duration::from_secs(10),
        ));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(scheduler.clone().run(shutdown.clone()));

        // first tick fires after one interval
        tokio::time::sleep(Duration::from_millis(2_100)).await;
        assert!(durable.len() >= 200);

        shutdown.cancel();
        task.await.unwrap();
        assert_eq!(durable.len(), 450);
        assert!(sink.pending().is_empty());
    }
}
