//! Periodic removal of vessels whose TTL ran out.

use crate::durable::DurableStore;
use ais_core::{StatisticsCollector, VesselStateStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed_durable: usize,
    pub evicted_state: usize,
}

pub struct ExpiryPolicy {
    durable: Arc<dyn DurableStore>,
    state: Arc<dyn VesselStateStore>,
    stats: Arc<StatisticsCollector>,
    interval: Duration,
}

impl ExpiryPolicy {
    pub fn new(
        durable: Arc<dyn DurableStore>,
        state: Arc<dyn VesselStateStore>,
        stats: Arc<StatisticsCollector>,
        interval: Duration,
    ) -> Self {
        Self {
            durable,
            state,
            stats,
            interval,
        }
    }

    /// Remove everything expired as of `now` from both stores.
    ///
    /// A durable store failure is logged and the state store is still swept.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let removed_durable = match self.durable.remove_expired(now).await {
            Ok(n) => n,
            Err(e) => {
                error!(error = %e, "failed to remove expired vessels from durable store");
                0
            }
        };
        let evicted_state = self.state.evict_expired(now).len();
        self.stats.set_live_vessels(self.state.len());

        if removed_durable > 0 || evicted_state > 0 {
            debug!(removed_durable, evicted_state, "expired vessels removed");
        }
        SweepReport {
            removed_durable,
            evicted_state,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep(Utc::now()).await;
                }
            }
        }
        info!("expiry sweep stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durable::{MemoryDurableStore, Projection, VesselFilter};
    use ais_core::{MemoryStore, Mmsi, VesselUpdate};
    use pretty_assertions::assert_eq;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn update(mmsi: u64, ts: &str) -> VesselUpdate {
        VesselUpdate::new(Mmsi::new(mmsi).unwrap(), at(ts))
    }

    struct Fixture {
        durable: Arc<MemoryDurableStore>,
        state: Arc<MemoryStore>,
        stats: Arc<StatisticsCollector>,
        policy: ExpiryPolicy,
    }

    fn fixture() -> Fixture {
        let durable = Arc::new(MemoryDurableStore::default());
        let state = Arc::new(MemoryStore::new(chrono::Duration::minutes(30)));
        let stats = Arc::new(StatisticsCollector::new());
        let policy = ExpiryPolicy::new(
            durable.clone(),
            state.clone(),
            stats.clone(),
            Duration::from_secs(30),
        );
        Fixture {
            durable,
            state,
            stats,
            policy,
        }
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_from_both_stores() {
        let f = fixture();
        let old = f.state.merge(
            &Mmsi::new(257_000_001).unwrap(),
            &update(257_000_001, "2024-01-17T09:00:00Z"),
            "test",
        );
        let fresh = f.state.merge(
            &Mmsi::new(257_000_002).unwrap(),
            &update(257_000_002, "2024-01-17T09:50:00Z"),
            "test",
        );
        f.durable.upsert_many(vec![old, fresh]).await.unwrap();

        let report = f.policy.sweep(at("2024-01-17T10:00:00Z")).await;

        assert_eq!(
            report,
            SweepReport {
                removed_durable: 1,
                evicted_state: 1,
            }
        );
        assert_eq!(f.state.len(), 1);
        assert_eq!(f.durable.len(), 1);
        assert_eq!(f.stats.snapshot().live_vessels, 1);
        assert!(f
            .durable
            .find_by_mmsi(&Mmsi::new(257_000_002).unwrap())
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_expire_boundary_is_exclusive() {
        let f = fixture();
        f.state.merge(
            &Mmsi::new(257_000_001).unwrap(),
            &update(257_000_001, "2024-01-17T09:30:00Z"),
            "test",
        );

        // now == expire_at is still live
        let report = f.policy.sweep(at("2024-01-17T10:00:00Z")).await;
        assert_eq!(report.evicted_state, 0);

        let report = f.policy.sweep(at("2024-01-17T10:00:01Z")).await;
        assert_eq!(report.evicted_state, 1);
    }

    #[tokio::test]
    async fn test_queries_hide_expired_before_sweep() {
        let f = fixture();
        let old = f.state.merge(
            &Mmsi::new(257_000_001).unwrap(),
            &update(257_000_001, "2024-01-17T09:00:00Z"),
            "test",
        );
        f.durable.upsert_many(vec![old]).await.unwrap();

        let filter = VesselFilter::live(at("2024-01-17T10:00:00Z"), 100);
        let found = f.durable.find(&filter, Projection::Summary).await.unwrap();

        assert_eq!(found.total, 0);
        assert_eq!(f.durable.len(), 1);
    }
}
