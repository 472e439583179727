//! WebSocket transport.
//!
//! The socket opens lazily on the first send and is reopened after a close
//! or abort. Each batch goes out as one text frame; the reply frame is routed
//! back by the id of the first message in the batch.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use async_tungstenite::tungstenite::Message as WsMessage;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::{AbortSignal, ClientTransport};
use crate::client::TransportError;
use crate::domain::entities::{connection_types, Message, MessageBatch};

type PendingReplies = Arc<Mutex<HashMap<String, oneshot::Sender<Vec<Message>>>>>;

/// One open socket.
#[derive(Debug, Clone)]
struct Link {
    outbound: mpsc::UnboundedSender<String>,
    pending: PendingReplies,
    closed: CancellationToken,
}

impl Link {
    fn is_open(&self) -> bool {
        !self.closed.is_cancelled()
    }
}

#[derive(Debug)]
pub struct WebSocketTransport {
    url: String,
    link: Mutex<Option<Link>>,
    abort: AbortSignal,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            link: Mutex::new(None),
            abort: AbortSignal::default(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn link(&self, token: &CancellationToken) -> Result<Link, TransportError> {
        if let Some(link) = self.link.lock().as_ref().filter(|l| l.is_open()) {
            return Ok(link.clone());
        }

        tracing::debug!(url = %self.url, "Opening WebSocket");
        let (stream, _response) = async_tungstenite::tokio::connect_async(self.url.as_str()).await?;
        let (mut sink, mut source) = stream.split();

        let (outbound, mut rx) = mpsc::unbounded_channel::<String>();
        let pending: PendingReplies = Arc::default();
        let closed = token.child_token();

        // Writer
        {
            let closed = closed.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        frame = rx.recv() => {
                            let Some(frame) = frame else { break };
                            if let Err(e) = sink.send(WsMessage::Text(frame.into())).await {
                                tracing::debug!(error = %e, "WebSocket write failed");
                                break;
                            }
                        }
                        _ = closed.cancelled() => break,
                    }
                }
                let _ = sink.close().await;
                closed.cancel();
            });
        }

        // Reader
        {
            let closed = closed.clone();
            let pending = pending.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        frame = source.next() => match frame {
                            Some(Ok(WsMessage::Text(text))) => route_reply(&pending, &text),
                            Some(Ok(WsMessage::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::debug!(error = %e, "WebSocket read failed");
                                break;
                            }
                        },
                        _ = closed.cancelled() => break,
                    }
                }
                closed.cancel();
                // Dropping the senders fails every waiting request
                pending.lock().clear();
            });
        }

        let link = Link {
            outbound,
            pending,
            closed,
        };
        *self.link.lock() = Some(link.clone());
        Ok(link)
    }

    async fn exchange(
        &self,
        messages: Vec<Message>,
        token: &CancellationToken,
    ) -> Result<Vec<Message>, TransportError> {
        let link = self.link(token).await?;
        let key = messages
            .first()
            .and_then(|m| m.id.clone())
            .unwrap_or_default();

        let (tx, rx) = oneshot::channel();
        link.pending.lock().insert(key.clone(), tx);

        let frame = serde_json::to_string(&messages)?;
        if link.outbound.send(frame).is_err() {
            link.pending.lock().remove(&key);
            return Err(TransportError::Closed);
        }
        rx.await.map_err(|_| TransportError::Closed)
    }
}

fn route_reply(pending: &PendingReplies, text: &str) {
    let replies = match serde_json::from_str::<MessageBatch>(text) {
        Ok(batch) => batch.into_vec(),
        Err(e) => {
            tracing::debug!(error = %e, "Malformed reply frame");
            return;
        }
    };

    let mut pending = pending.lock();
    let waiter = replies
        .iter()
        .filter(|m| m.is_reply())
        .find_map(|m| m.id.as_ref().and_then(|id| pending.remove(id)));
    match waiter {
        Some(tx) => {
            let _ = tx.send(replies);
        }
        None => tracing::debug!(count = replies.len(), "Unsolicited reply frame dropped"),
    }
}

#[async_trait]
impl ClientTransport for WebSocketTransport {
    fn name(&self) -> &'static str {
        connection_types::WEBSOCKET
    }

    async fn send(&self, messages: Vec<Message>) -> Result<Vec<Message>, TransportError> {
        let token = self.abort.token();
        tokio::select! {
            result = self.exchange(messages, &token) => result,
            _ = token.cancelled() => Err(TransportError::Aborted),
        }
    }

    fn abort(&self) {
        tracing::debug!(url = %self.url, "Aborting WebSocket");
        self.abort.abort();
        if let Some(link) = self.link.lock().take() {
            link.closed.cancel();
        }
    }
}
