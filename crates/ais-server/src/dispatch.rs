//! Fan-out of committed vessel documents to real-time clients.
//!
//! The durable store's change feed is folded into a dedup FIFO of vessel
//! identifiers. Each tick pops one chunk, resolves every identifier to its
//! latest committed document and emits it. A vessel that changes many
//! times between ticks is emitted once, with its newest state.

use crate::durable::DurableStore;
use crate::error::BroadcastError;
use crate::single_flight::SingleFlight;
use ais_core::{PendingSet, StatisticsCollector, VesselRecord, VesselStateStore};
use ais_protocol::EVENT_VESSEL;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Delivers named events to subscribers.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Emit one event for one record, returning how many clients took it.
    async fn emit(&self, event: &str, record: &VesselRecord) -> Result<usize, BroadcastError>;
}

/// Result of one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub emitted: usize,
    /// Identifiers with no live committed document.
    pub skipped: usize,
    /// Identifiers put back after a lookup failure.
    pub retried: usize,
}

pub struct DispatchLoop {
    durable: Arc<dyn DurableStore>,
    state: Arc<dyn VesselStateStore>,
    broadcaster: Arc<dyn Broadcaster>,
    stats: Arc<StatisticsCollector>,
    queue: PendingSet,
    chunk_size: usize,
    tick: Duration,
    flight: SingleFlight,
}

impl DispatchLoop {
    pub fn new(
        durable: Arc<dyn DurableStore>,
        state: Arc<dyn VesselStateStore>,
        broadcaster: Arc<dyn Broadcaster>,
        stats: Arc<StatisticsCollector>,
        chunk_size: usize,
        tick: Duration,
    ) -> Self {
        Self {
            durable,
            state,
            broadcaster,
            stats,
            queue: PendingSet::new(),
            chunk_size,
            tick,
            flight: SingleFlight::new(),
        }
    }

    /// Identifiers waiting to be emitted.
    pub fn queue(&self) -> &PendingSet {
        &self.queue
    }

    /// Emit up to one chunk of queued vessels, one at a time.
    #[instrument(skip_all)]
    pub async fn pass(&self) -> PassReport {
        let mut report = PassReport::default();
        let Some(_flight) = self.flight.try_begin() else {
            return report;
        };

        let now = Utc::now();
        for id in self.queue.drain(self.chunk_size) {
            let record = match self.durable.find_record(&id).await {
                Ok(record) => record,
                Err(e) => {
                    warn!(mmsi = %id, error = %e, "lookup failed, retrying next tick");
                    self.queue.mark(id);
                    report.retried += 1;
                    continue;
                }
            };
            let Some(record) = record.filter(|record| !record.is_expired(now)) else {
                report.skipped += 1;
                continue;
            };
            match self.broadcaster.emit(EVENT_VESSEL, &record).await {
                Ok(_) => report.emitted += 1,
                Err(e) => warn!(mmsi = %id, error = %e, "failed to emit vessel event"),
            }
        }

        if report.emitted > 0 {
            self.stats.record_dispatched(report.emitted);
            debug!(emitted = report.emitted, queued = self.queue.len(), "dispatch pass");
        }
        report
    }

    /// Fold the change feed into the queue until cancelled.
    async fn follow_changes(&self, shutdown: CancellationToken) {
        let mut feed = self.durable.watch();
        loop {
            let change = tokio::select! {
                _ = shutdown.cancelled() => break,
                change = feed.recv() => change,
            };
            match change {
                Ok(record) => {
                    self.queue.mark(record.mmsi);
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "change feed lagged, requeueing every live vessel");
                    self.queue
                        .mark_all(self.state.snapshot().iter().map(|record| record.mmsi));
                }
                Err(RecvError::Closed) => {
                    info!("change feed closed");
                    break;
                }
            }
        }
    }

    /// Follow the change feed and run a pass every tick until `shutdown`.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(tick = ?self.tick, chunk_size = self.chunk_size, "dispatch loop started");
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let passes = async {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.pass().await;
                    }
                }
            }
        };
        tokio::join!(self.follow_changes(shutdown.clone()), passes);
        info!("dispatch loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durable::MemoryDurableStore;
    use ais_core::{MemoryStore, Mmsi, VesselUpdate};
    use parking_lot::Mutex;
    use std::collections::HashSet;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(String, Mmsi)>>,
    }

    #[async_trait]
    impl Broadcaster for Recorder {
        async fn emit(&self, event: &str, record: &VesselRecord) -> Result<usize, BroadcastError> {
            self.events.lock().push((event.to_string(), record.mmsi));
            Ok(1)
        }
    }

    fn record(i: u64) -> Arc<VesselRecord> {
        let update = VesselUpdate::new(Mmsi::new(257_000_000 + i).unwrap(), Utc::now());
        Arc::new(VesselRecord::from_update(
            &update,
            "test",
            chrono::Duration::minutes(30),
        ))
    }

    fn dispatcher(durable: Arc<MemoryDurableStore>, recorder: Arc<Recorder>) -> DispatchLoop {
        DispatchLoop::new(
            durable,
            Arc::new(MemoryStore::default()),
            recorder,
            Arc::new(StatisticsCollector::new()),
            50,
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_chunks_of_fifty() {
        let durable = Arc::new(MemoryDurableStore::default());
        durable
            .upsert_many((0..120).map(record).collect())
            .await
            .unwrap();
        let recorder = Arc::new(Recorder::default());
        let dispatch = dispatcher(durable, recorder.clone());
        dispatch
            .queue()
            .mark_all((0..120).map(|i| Mmsi::new(257_000_000 + i).unwrap()));

        let sizes: Vec<usize> = [
            dispatch.pass().await,
            dispatch.pass().await,
            dispatch.pass().await,
            dispatch.pass().await,
        ]
        .iter()
        .map(|r| r.emitted)
        .collect();
        assert_eq!(sizes, vec![50, 50, 20, 0]);

        let events = recorder.events.lock();
        assert_eq!(events.len(), 120);
        let unique: HashSet<_> = events.iter().map(|(_, id)| *id).collect();
        assert_eq!(unique.len(), 120);
        assert!(events.iter().all(|(event, _)| event == "vessel"));
        // FIFO order is preserved
        assert_eq!(events[0].1.value(), 257_000_000);
        assert_eq!(events[119].1.value(), 257_000_119);
    }

    #[tokio::test]
    async fn test_unknown_and_expired_are_skipped() {
        let durable = Arc::new(MemoryDurableStore::default());
        let stale = VesselUpdate::new(
            Mmsi::new(257_000_001).unwrap(),
            Utc::now() - chrono::Duration::hours(1),
        );
        durable
            .upsert_many(vec![Arc::new(VesselRecord::from_update(
                &stale,
                "test",
                chrono::Duration::minutes(30),
            ))])
            .await
            .unwrap();
        let recorder = Arc::new(Recorder::default());
        let dispatch = dispatcher(durable, recorder.clone());
        dispatch.queue().mark(Mmsi::new(257_000_001).unwrap());
        dispatch.queue().mark(Mmsi::new(257_000_002).unwrap());

        let report = dispatch.pass().await;
        assert_eq!(report.emitted, 0);
        assert_eq!(report.skipped, 2);
        assert!(recorder.events.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_follows_change_feed() {
        let durable = Arc::new(MemoryDurableStore::default());
        let recorder = Arc::new(Recorder::default());
        let dispatch = Arc::new(dispatcher(durable.clone(), recorder.clone()));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn({
            let dispatch = dispatch.clone();
            let shutdown = shutdown.clone();
            async move { dispatch.run(shutdown).await }
        });
        tokio::task::yield_now().await;

        durable.upsert_many(vec![record(1), record(2)]).await.unwrap();
        // same vessel again before the tick: emitted once
        durable.upsert_many(vec![record(1)]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        shutdown.cancel();
        task.await.unwrap();
        let ids: Vec<u32> = recorder.events.lock().iter().map(|(_, id)| id.value()).collect();
        assert_eq!(ids, vec![257_000_001, 257_000_002]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lagged_feed_requeues_live_vessels() {
        let durable = Arc::new(MemoryDurableStore::with_feed_capacity(500, 2));
        let state = Arc::new(MemoryStore::default());
        for i in 0..5 {
            let update = VesselUpdate::new(Mmsi::new(257_000_000 + i).unwrap(), Utc::now());
            state.merge(&update.mmsi, &update, "test");
        }
        let recorder = Arc::new(Recorder::default());
        let dispatch = Arc::new(DispatchLoop::new(
            durable.clone(),
            state,
            recorder,
            Arc::new(StatisticsCollector::new()),
            50,
            Duration::from_secs(60),
        ));
        let shutdown = CancellationToken::new();
        let follower = tokio::spawn({
            let dispatch = dispatch.clone();
            let shutdown = shutdown.clone();
            async move { dispatch.follow_changes(shutdown).await }
        });
        tokio::task::yield_now().await;

        // overflow a two-slot feed while the follower is not running
        durable
            .upsert_many((10..20).map(record).collect())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.cancel();
        follower.await.unwrap();

        for i in 0..5 {
            assert!(dispatch.queue().contains(&Mmsi::new(257_000_000 + i).unwrap()));
        }
    }
}
