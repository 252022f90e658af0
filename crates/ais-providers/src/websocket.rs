//! Stream-provider WebSocket with a JSON subscription handshake.

use crate::aisstream::SubscriptionFrame;
use crate::connector::{FrameStream, Upstream};
use crate::error::ConnectionError;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

/// A WebSocket endpoint that streams JSON envelopes once subscribed.
#[derive(Debug, Clone)]
pub struct WebSocketUpstream {
    url: String,
    subscription: SubscriptionFrame,
}

impl WebSocketUpstream {
    pub fn new(url: impl Into<String>, subscription: SubscriptionFrame) -> Self {
        Self {
            url: url.into(),
            subscription,
        }
    }
}

#[async_trait]
impl Upstream for WebSocketUpstream {
    fn endpoint(&self) -> String {
        self.url.clone()
    }

    async fn connect(&self) -> Result<FrameStream, ConnectionError> {
        let (mut ws, _) = connect_async(self.url.as_str()).await?;

        let subscription = serde_json::to_string(&self.subscription)
            .map_err(|e| ConnectionError::Handshake(e.to_string()))?;
        ws.send(Message::Text(subscription)).await?;

        let frames = ws.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => Some(Ok(text)),
                    Err(_) => {
                        debug!("dropping non UTF-8 binary frame");
                        None
                    }
                },
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "upstream sent close");
                    None
                }
                Ok(_) => None,
                Err(e) => Some(Err(ConnectionError::WebSocket(e))),
            }
        });
        Ok(frames.boxed())
    }
}
