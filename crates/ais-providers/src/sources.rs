//! Building connectors from settings.

use crate::aisstream::{StreamDecoder, SubscriptionFrame};
use crate::connector::{ConnectorState, ConnectorTimings, SourceConnector};
use crate::nmea::NmeaDecoder;
use crate::tcp::TcpUpstream;
use crate::websocket::WebSocketUpstream;
use ais_core::config::{HubSettings, SourceSettings};
use ais_core::IngestSink;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// A configured connector of either flavour.
pub enum AnySource {
    Nmea(SourceConnector<TcpUpstream, NmeaDecoder>),
    Stream(SourceConnector<WebSocketUpstream, StreamDecoder>),
}

impl AnySource {
    pub fn from_settings(
        source: &SourceSettings,
        settings: &HubSettings,
        sink: IngestSink,
    ) -> Self {
        let timings = ConnectorTimings {
            reconnect_delay: settings.reconnect_delay,
            connect_timeout: settings.connect_timeout,
            idle_timeout: settings.idle_timeout,
        };
        match source {
            SourceSettings::Tcp(tcp) => AnySource::Nmea(SourceConnector::new(
                &tcp.tag,
                TcpUpstream::new(&tcp.host, tcp.port),
                NmeaDecoder::new(),
                sink,
                timings,
            )),
            SourceSettings::AisStream(stream) => {
                let subscription = SubscriptionFrame {
                    api_key: stream.api_key.clone(),
                    bounding_boxes: stream.bounding_boxes.clone(),
                    filter_message_types: stream.message_types.clone(),
                };
                AnySource::Stream(SourceConnector::new(
                    &stream.tag,
                    WebSocketUpstream::new(&stream.url, subscription),
                    StreamDecoder::new(),
                    sink,
                    timings,
                ))
            }
        }
    }

    /// One connector per configured source.
    pub fn all(settings: &HubSettings, sink: &IngestSink) -> Vec<AnySource> {
        settings
            .sources
            .iter()
            .map(|source| AnySource::from_settings(source, settings, sink.clone()))
            .collect()
    }

    pub fn tag(&self) -> &str {
        match self {
            AnySource::Nmea(c) => c.tag(),
            AnySource::Stream(c) => c.tag(),
        }
    }

    pub fn state(&self) -> watch::Receiver<ConnectorState> {
        match self {
            AnySource::Nmea(c) => c.state(),
            AnySource::Stream(c) => c.state(),
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        match self {
            AnySource::Nmea(c) => c.run(shutdown).await,
            AnySource::Stream(c) => c.run(shutdown).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ais_core::{MemoryStore, PendingSet, StatisticsCollector};
    use std::sync::Arc;

    #[test]
    fn test_builds_one_connector_per_source() {
        let settings = HubSettings::from_json_str(
            r#"{
                "sources": [
                    { "type": "tcp", "tag": "coast", "host": "127.0.0.1", "port": 5631 },
                    { "type": "aisStream", "tag": "stream", "url": "wss://example.invalid", "apiKey": "k" }
                ]
            }"#,
        )
        .unwrap();
        let sink = IngestSink::new(
            Arc::new(MemoryStore::default()),
            Arc::new(PendingSet::new()),
            Arc::new(StatisticsCollector::new()),
        );
        let sources = AnySource::all(&settings, &sink);
        assert_eq!(sources.len(), 2);
        assert!(matches!(sources[0], AnySource::Nmea(_)));
        assert!(matches!(sources[1], AnySource::Stream(_)));
        assert_eq!(sources[1].tag(), "stream");
        assert_eq!(*sources[0].state().borrow(), ConnectorState::Disconnected);
    }
}
