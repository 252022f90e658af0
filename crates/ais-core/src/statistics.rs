//! Hub statistics collection.
//!
//! This module tracks pipeline throughput and health:
//! - Message throughput (messages per second)
//! - Decode failures, merges, flushes, dispatched events
//! - Live vessel and WebSocket client counts
//! - Per-source connection status
//!
//! Counters are plain atomics so every task can record without locking.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

/// Point-in-time statistics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStatistics {
    /// Raw messages received per second.
    pub message_rate: f64,
    pub messages_received: u64,
    pub messages_decoded: u64,
    pub decode_failures: u64,
    pub merges: u64,
    pub flushes: u64,
    pub flush_failures: u64,
    pub records_persisted: u64,
    pub events_dispatched: u64,
    pub live_vessels: usize,
    pub ws_clients: usize,
    /// Uptime in seconds.
    pub uptime: u64,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub sources: Vec<SourceStatus>,
}

/// Status of one upstream connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStatus {
    /// Connector tag.
    pub id: String,

    /// Connector state name, e.g. "connected".
    pub state: String,

    /// Connection attempts so far.
    pub attempts: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Collects and tracks hub statistics.
pub struct StatisticsCollector {
    start_time: Instant,
    messages_received: AtomicU64,
    window_messages: AtomicU64,
    /// Stored as f64 bits
    message_rate: AtomicU64,
    messages_decoded: AtomicU64,
    decode_failures: AtomicU64,
    merges: AtomicU64,
    flushes: AtomicU64,
    flush_failures: AtomicU64,
    records_persisted: AtomicU64,
    events_dispatched: AtomicU64,
    live_vessels: AtomicUsize,
    ws_clients: AtomicUsize,
    sources: Mutex<BTreeMap<String, SourceStatus>>,
}

impl StatisticsCollector {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            messages_received: AtomicU64::new(0),
            window_messages: AtomicU64::new(0),
            message_rate: AtomicU64::new(0),
            messages_decoded: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            merges: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            flush_failures: AtomicU64::new(0),
            records_persisted: AtomicU64::new(0),
            events_dispatched: AtomicU64::new(0),
            live_vessels: AtomicUsize::new(0),
            ws_clients: AtomicUsize::new(0),
            sources: Mutex::new(BTreeMap::new()),
        }
    }

    /// Record a raw line or frame arriving from a source.
    pub fn record_message(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.window_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decoded(&self) {
        self.messages_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_merge(&self) {
        self.merges.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed flush and how many records it wrote.
    pub fn record_flush(&self, persisted: usize) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.records_persisted
            .fetch_add(persisted as u64, Ordering::Relaxed);
    }

    pub fn record_flush_failure(&self) {
        self.flush_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatched(&self, events: usize) {
        self.events_dispatched
            .fetch_add(events as u64, Ordering::Relaxed);
    }

    /// Update the message rate calculation (call once per second).
    pub fn update_rate(&self) {
        let window = self.window_messages.swap(0, Ordering::Relaxed);
        self.message_rate
            .store((window as f64).to_bits(), Ordering::Relaxed);
    }

    pub fn set_live_vessels(&self, count: usize) {
        self.live_vessels.store(count, Ordering::Relaxed);
    }

    pub fn client_connected(&self) {
        self.ws_clients.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_disconnected(&self) {
        self.ws_clients.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a connector state change.
    pub fn set_source_state(&self, id: &str, state: &str, error: Option<String>) {
        let mut sources = self.sources.lock();
        let entry = sources.entry(id.to_string()).or_insert_with(|| SourceStatus {
            id: id.to_string(),
            state: String::new(),
            attempts: 0,
            error: None,
        });
        if state == "connecting" {
            entry.attempts += 1;
        }
        entry.state = state.to_string();
        if error.is_some() || state == "connected" {
            entry.error = error;
        }
    }

    /// Get current statistics snapshot.
    pub fn snapshot(&self) -> HubStatistics {
        HubStatistics {
            message_rate: f64::from_bits(self.message_rate.load(Ordering::Relaxed)),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_decoded: self.messages_decoded.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            merges: self.merges.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            records_persisted: self.records_persisted.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            live_vessels: self.live_vessels.load(Ordering::Relaxed),
            ws_clients: self.ws_clients.load(Ordering::Relaxed),
            uptime: self.start_time.elapsed().as_secs(),
            sources: self.sources.lock().values().cloned().collect(),
        }
    }
}

impl Default for StatisticsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_rate() {
        let stats = StatisticsCollector::new();

        stats.record_message();
        stats.record_message();
        stats.record_message();
        stats.update_rate();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.message_rate, 3.0);
        assert_eq!(snapshot.messages_received, 3);

        stats.update_rate();
        assert_eq!(stats.snapshot().message_rate, 0.0);
    }

    #[test]
    fn test_client_tracking() {
        let stats = StatisticsCollector::new();

        stats.client_connected();
        stats.client_connected();
        assert_eq!(stats.snapshot().ws_clients, 2);

        stats.client_disconnected();
        assert_eq!(stats.snapshot().ws_clients, 1);
    }

    #[test]
    fn test_source_status() {
        let stats = StatisticsCollector::new();

        stats.set_source_state("tcp", "connecting", None);
        stats.set_source_state("tcp", "error", Some("refused".to_string()));
        stats.set_source_state("tcp", "connecting", None);

        let sources = stats.snapshot().sources;
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].attempts, 2);
        assert_eq!(sources[0].state, "connecting");
        assert_eq!(sources[0].error.as_deref(), Some("refused"));

        stats.set_source_state("tcp", "connected", None);
        assert_eq!(stats.snapshot().sources[0].error, None);
    }

    #[test]
    fn test_flush_counters() {
        let stats = StatisticsCollector::new();
        stats.record_flush(200);
        stats.record_flush(20);
        stats.record_flush_failure();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.flushes, 2);
        assert_eq!(snapshot.records_persisted, 220);
        assert_eq!(snapshot.flush_failures, 1);
    }
}
