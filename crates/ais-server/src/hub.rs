//! Real-time WebSocket hub.
//!
//! This module provides the WebSocket server that handles:
//! - Client connections
//! - Hello and live-vessel snapshot on connect
//! - Area subscriptions
//! - Vessel event delivery with per-client bounded queues

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use ais_core::config::DispatchSettings;
use ais_core::{StatisticsCollector, VesselRecord, VesselStateStore};
use ais_protocol::{
    decode_client_message, encode_server_message, AreaSubscription, ClientMessage, EventMessage,
    HelloMessage, ServerMessage,
};

use crate::dispatch::Broadcaster;
use crate::error::BroadcastError;

/// Configuration for the subscriber hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Server name sent in the hello message.
    pub name: String,
    pub version: String,
    pub bind_addr: SocketAddr,
    /// How long an event may wait for room in a client's queue.
    pub send_timeout: Duration,
    /// Events buffered per client.
    pub client_queue: usize,
}

impl HubConfig {
    pub fn from_settings(settings: &DispatchSettings) -> Self {
        Self {
            name: settings.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            bind_addr: settings.bind_addr,
            send_timeout: settings.send_timeout,
            client_queue: settings.client_queue,
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::from_settings(&DispatchSettings::default())
    }
}

/// One registered client as seen by the broadcaster.
#[derive(Clone)]
struct ClientHandle {
    queue: mpsc::Sender<Arc<str>>,
    filter: Arc<RwLock<AreaSubscription>>,
}

/// The WebSocket subscriber hub.
pub struct SubscriberHub {
    config: HubConfig,
    state: Arc<dyn VesselStateStore>,
    stats: Arc<StatisticsCollector>,
    clients: RwLock<HashMap<Uuid, ClientHandle>>,
}

impl SubscriberHub {
    pub fn new(
        config: HubConfig,
        state: Arc<dyn VesselStateStore>,
        stats: Arc<StatisticsCollector>,
    ) -> Self {
        Self {
            config,
            state,
            stats,
            clients: RwLock::new(HashMap::new()),
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Bind the configured address and serve until `shutdown`.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener, shutdown).await;
        Ok(())
    }

    /// Accept connections on `listener` until `shutdown`.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, shutdown: CancellationToken) {
        match listener.local_addr() {
            Ok(addr) => info!("AIS hub listening on {}", addr),
            Err(_) => info!("AIS hub listening"),
        }

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, addr)) => {
                    let hub = self.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = hub.handle_connection(stream, addr, shutdown).await {
                            error!("Connection error from {}: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
        info!("AIS hub stopped accepting connections");
    }

    fn register(&self, id: Uuid, handle: ClientHandle) {
        self.clients.write().insert(id, handle);
        self.stats.client_connected();
    }

    fn unregister(&self, id: &Uuid) {
        if self.clients.write().remove(id).is_some() {
            self.stats.client_disconnected();
        }
    }

    fn snapshot_message(&self, filter: &AreaSubscription) -> Result<String, BroadcastError> {
        let now = Utc::now();
        let records = self.state.snapshot();
        let live = records
            .iter()
            .filter(|record| !record.is_expired(now))
            .filter(|record| filter.matches(record.fields.position.as_ref()))
            .map(|record| record.as_ref());
        let event = EventMessage::snapshot(live)?;
        Ok(encode_server_message(&ServerMessage::Event(event))?)
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        shutdown: CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!("New connection from {}", addr);

        let send_cached = Arc::new(AtomicBool::new(true));
        let send_cached_flag = send_cached.clone();
        let ws_stream =
            tokio_tungstenite::accept_hdr_async(stream, move |req: &Request, resp: Response| {
                if let Some(query) = req.uri().query() {
                    for param in query.split('&') {
                        if let Some(("sendCachedValues", value)) = param.split_once('=') {
                            send_cached_flag.store(value != "false", Ordering::Relaxed);
                        }
                    }
                }
                Ok(resp)
            })
            .await?;

        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let hello = HelloMessage::new(&self.config.name, &self.config.version);
        let hello_msg = encode_server_message(&ServerMessage::Hello(hello))?;
        ws_tx.send(Message::Text(hello_msg)).await?;
        debug!("Sent Hello to {}", addr);

        let id = Uuid::new_v4();
        let filter = Arc::new(RwLock::new(AreaSubscription::default()));
        let (queue_tx, mut queue_rx) = mpsc::channel::<Arc<str>>(self.config.client_queue);

        if send_cached.load(Ordering::Relaxed) {
            let snapshot = self.snapshot_message(&filter.read())?;
            ws_tx.send(Message::Text(snapshot)).await?;
        }
        self.register(
            id,
            ClientHandle {
                queue: queue_tx,
                filter: filter.clone(),
            },
        );

        let result = self
            .client_loop(addr, &mut ws_tx, &mut ws_rx, &mut queue_rx, &filter, shutdown)
            .await;
        self.unregister(&id);
        ws_tx.close().await.ok();
        result
    }

    async fn client_loop(
        &self,
        addr: SocketAddr,
        ws_tx: &mut SplitSink<WebSocketStream<TcpStream>, Message>,
        ws_rx: &mut futures::stream::SplitStream<WebSocketStream<TcpStream>>,
        queue_rx: &mut mpsc::Receiver<Arc<str>>,
        filter: &RwLock<AreaSubscription>,
        shutdown: CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            handle_client_message(&text, filter, addr);
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("Client {} closed connection", addr);
                            break;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            ws_tx.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Binary(data))) => {
                            debug!("Ignoring {} byte binary frame from {}", data.len(), addr);
                        }
                        Some(Err(e)) => {
                            warn!("WebSocket error from {}: {}", addr, e);
                            break;
                        }
                        None => {
                            info!("Client {} disconnected", addr);
                            break;
                        }
                        _ => {}
                    }
                }

                event = queue_rx.recv() => {
                    match event {
                        Some(text) => {
                            if let Err(e) = ws_tx.send(Message::Text(text.to_string())).await {
                                warn!("Failed to send event to {}: {}", addr, e);
                                break;
                            }
                        }
                        None => {
                            // dropped by the broadcaster
                            info!("Client {} dropped as too slow", addr);
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Apply a subscribe/unsubscribe request to a client's filter.
fn handle_client_message(text: &str, filter: &RwLock<AreaSubscription>, addr: SocketAddr) {
    match decode_client_message(text) {
        Ok(ClientMessage::Subscribe(req)) => {
            debug!("Client {} subscribed to {} areas", addr, req.subscribe.bounding_boxes.len());
            *filter.write() = req.subscribe;
        }
        Ok(ClientMessage::Unsubscribe(_)) => {
            debug!("Client {} cleared its area filter", addr);
            *filter.write() = AreaSubscription::default();
        }
        Err(e) => {
            warn!("Ignoring malformed message from {}: {}", addr, e);
        }
    }
}

#[async_trait]
impl Broadcaster for SubscriberHub {
    async fn emit(&self, event: &str, record: &VesselRecord) -> Result<usize, BroadcastError> {
        let data = serde_json::to_value(record)?;
        let text: Arc<str> =
            encode_server_message(&ServerMessage::Event(EventMessage::new(event, data)))?.into();

        let position = record.fields.position.as_ref();
        let targets: Vec<(Uuid, mpsc::Sender<Arc<str>>)> = self
            .clients
            .read()
            .iter()
            .filter(|(_, client)| client.filter.read().matches(position))
            .map(|(id, client)| (*id, client.queue.clone()))
            .collect();

        let mut delivered = 0;
        for (id, queue) in targets {
            let sent = tokio::time::timeout(self.config.send_timeout, queue.send(text.clone())).await;
            let outcome = match sent {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(BroadcastError::ClientGone(id)),
                Err(_) => Err(BroadcastError::SendTimeout(id, self.config.send_timeout)),
            };
            match outcome {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(error = %e, "dropping client");
                    self.unregister(&id);
                }
            }
        }
        Ok(delivered)
    }
}
