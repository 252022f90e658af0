//! Reconnecting run loop for one upstream source.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> (Error | Closed) -> Disconnected
//!       ^                                                           |
//!       +------------------- fixed reconnect delay -----------------+
//! ```
//!
//! The loop never gives up. There is no gap filling: whatever the upstream
//! sent while the connector was down is lost.

use crate::decoder::AisDecoder;
use crate::error::ConnectionError;
use ais_core::IngestSink;
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Text frames (lines or WebSocket messages) from an open upstream.
pub type FrameStream = BoxStream<'static, Result<String, ConnectionError>>;

/// An upstream transport that can be (re)opened.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Where the upstream lives, for logs.
    fn endpoint(&self) -> String;

    /// Open the transport, including any subscription handshake.
    async fn connect(&self) -> Result<FrameStream, ConnectionError>;
}

/// Connection state published to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    Disconnected,
    Connecting,
    Connected,
    /// The last session ended with a transport error.
    Error,
    /// The last session ended with a clean end of stream.
    Closed,
}

impl ConnectorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorState::Disconnected => "disconnected",
            ConnectorState::Connecting => "connecting",
            ConnectorState::Connected => "connected",
            ConnectorState::Error => "error",
            ConnectorState::Closed => "closed",
        }
    }
}

/// Timing knobs for a connector.
#[derive(Debug, Clone, Copy)]
pub struct ConnectorTimings {
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for ConnectorTimings {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(120),
        }
    }
}

/// Drives one upstream through connect, decode and reconnect.
pub struct SourceConnector<U, D> {
    tag: String,
    upstream: U,
    decoder: Mutex<D>,
    sink: IngestSink,
    timings: ConnectorTimings,
    state: watch::Sender<ConnectorState>,
    running: tokio::sync::Mutex<()>,
}

impl<U: Upstream, D: AisDecoder> SourceConnector<U, D> {
    pub fn new(
        tag: impl Into<String>,
        upstream: U,
        decoder: D,
        sink: IngestSink,
        timings: ConnectorTimings,
    ) -> Self {
        let (state, _) = watch::channel(ConnectorState::Disconnected);
        Self {
            tag: tag.into(),
            upstream,
            decoder: Mutex::new(decoder),
            sink,
            timings,
            state,
            running: tokio::sync::Mutex::new(()),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Observe state transitions.
    pub fn state(&self) -> watch::Receiver<ConnectorState> {
        self.state.subscribe()
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Only one run loop is active per connector; a second concurrent call
    /// returns immediately, so the source never holds two connections.
    pub async fn run(&self, shutdown: CancellationToken) {
        let Ok(_running) = self.running.try_lock() else {
            warn!(source = %self.tag, "connector already running");
            return;
        };
        info!(source = %self.tag, endpoint = %self.upstream.endpoint(), "starting connector");

        loop {
            self.set_state(ConnectorState::Connecting, None);
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => break,
                outcome = self.session() => outcome,
            };

            match outcome {
                Ok(()) => {
                    info!(source = %self.tag, "upstream closed the stream");
                    self.set_state(ConnectorState::Closed, None);
                }
                Err(e) => {
                    warn!(source = %self.tag, error = %e, "upstream connection failed");
                    self.set_state(ConnectorState::Error, Some(e.to_string()));
                }
            }
            self.set_state(ConnectorState::Disconnected, None);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.timings.reconnect_delay) => {}
            }
            debug!(source = %self.tag, "reconnecting");
        }

        self.set_state(ConnectorState::Disconnected, None);
        info!(source = %self.tag, "connector stopped");
    }

    async fn session(&self) -> Result<(), ConnectionError> {
        let connect_timeout = self.timings.connect_timeout;
        let mut frames = tokio::time::timeout(connect_timeout, self.upstream.connect())
            .await
            .map_err(|_| ConnectionError::Timeout(connect_timeout))??;
        self.set_state(ConnectorState::Connected, None);
        info!(source = %self.tag, endpoint = %self.upstream.endpoint(), "connected");

        let idle_timeout = self.timings.idle_timeout;
        loop {
            let next = tokio::time::timeout(idle_timeout, frames.next())
                .await
                .map_err(|_| ConnectionError::Timeout(idle_timeout))?;
            match next {
                Some(frame) => self.handle_frame(&frame?),
                None => return Ok(()),
            }
        }
    }

    fn handle_frame(&self, frame: &str) {
        let frame = frame.trim();
        if frame.is_empty() {
            return;
        }
        let stats = self.sink.stats();
        stats.record_message();

        let decoded = self.decoder.lock().decode(frame, Utc::now());
        match decoded {
            Ok(Some(update)) => {
                stats.record_decoded();
                self.sink.accept(&update, &self.tag);
            }
            Ok(None) => {}
            Err(e) => {
                stats.record_decode_failure();
                debug!(source = %self.tag, error = %e, "dropping message");
            }
        }
    }

    fn set_state(&self, state: ConnectorState, error: Option<String>) {
        self.state.send_replace(state);
        self.sink
            .stats()
            .set_source_state(&self.tag, state.as_str(), error);
    }
}
