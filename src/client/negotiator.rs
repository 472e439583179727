//! Client transport negotiation.
//!
//! Transports are tried in preference order. On each one the handshake and
//! the first connect must each complete within `connect_timeout`; a miss or
//! a transport error tears that transport down, emits a non-fatal
//! [`ClientEvent::TransportFailure`] and moves on to the next. Once
//! connected, connects follow the server's advice.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::client::backoff::Backoff;
use crate::client::events::{ClientEvent, DisconnectReason, EventBus};
use crate::client::transport::{ClientTransport, LongPollingTransport, WebSocketTransport};
use crate::client::{NegotiatorError, TransportError};
use crate::config::ClientSettings;
use crate::domain::entities::{channels, Message, BAYEUX_VERSION};
use crate::domain::value_objects::{Advice, Reconnect};

/// Where the negotiator stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiatorState {
    Idle,
    /// A handshake or first connect is in flight on `transport`
    Connecting {
        transport: &'static str,
        deadline: Instant,
    },
    Connected {
        transport: &'static str,
    },
    /// The previous transport failed; `next` is being tried
    FailedOver {
        next: &'static str,
    },
    Disconnected,
}

pub struct Negotiator {
    settings: ClientSettings,
    transports: Vec<Arc<dyn ClientTransport>>,
    active: Mutex<Option<Arc<dyn ClientTransport>>>,
    state: Mutex<NegotiatorState>,
    client_id: Mutex<Option<String>>,
    advice: Mutex<Advice>,
    subscriptions: Mutex<Vec<String>>,
    backoff: Mutex<Backoff>,
    events: EventBus,
    next_id: AtomicU64,
    /// Cancelled while stopped; an explicit handshake installs a fresh one
    closed: Mutex<CancellationToken>,
}

impl Negotiator {
    /// `transports` in preference order.
    pub fn new(
        settings: ClientSettings,
        transports: Vec<Arc<dyn ClientTransport>>,
    ) -> Result<Self, NegotiatorError> {
        if transports.is_empty() {
            return Err(NegotiatorError::NoTransports);
        }
        Ok(Self {
            backoff: Mutex::new(Backoff::from_settings(&settings)),
            settings,
            transports,
            active: Mutex::new(None),
            state: Mutex::new(NegotiatorState::Idle),
            client_id: Mutex::new(None),
            advice: Mutex::new(Advice::default()),
            subscriptions: Mutex::new(Vec::new()),
            events: EventBus::new(),
            next_id: AtomicU64::new(1),
            closed: Mutex::new(CancellationToken::new()),
        })
    }

    /// WebSocket first, then long-polling, against one `http(s)://` URL.
    pub fn for_url(settings: ClientSettings, url: &str) -> Result<Self, NegotiatorError> {
        let ws_url = if let Some(rest) = url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            return Err(NegotiatorError::InvalidUrl(url.to_string()));
        };

        let transports: Vec<Arc<dyn ClientTransport>> = vec![
            Arc::new(WebSocketTransport::new(ws_url)),
            Arc::new(LongPollingTransport::new(url)?),
        ];
        Self::new(settings, transports)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn state(&self) -> NegotiatorState {
        self.state.lock().clone()
    }

    pub fn client_id(&self) -> Option<String> {
        self.client_id.lock().clone()
    }

    /// Name of the transport in use.
    pub fn transport(&self) -> Option<&'static str> {
        self.active.lock().as_ref().map(|t| t.name())
    }

    /// Last advice received from the server.
    pub fn advice(&self) -> Advice {
        self.advice.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.lock().is_cancelled()
    }

    fn closed(&self) -> CancellationToken {
        self.closed.lock().clone()
    }

    /// Leave the stopped state so a new session can be negotiated.
    fn reopen(&self) {
        let reopened = {
            let mut closed = self.closed.lock();
            let stopped = closed.is_cancelled();
            if stopped {
                *closed = CancellationToken::new();
            }
            stopped
        };
        if reopened {
            *self.advice.lock() = Advice::default();
            self.backoff.lock().reset();
            self.set_state(NegotiatorState::Idle);
            tracing::debug!("Negotiator reopened");
        }
    }

    fn set_state(&self, state: NegotiatorState) {
        tracing::trace!(state = ?state, "Negotiator state");
        *self.state.lock() = state;
    }

    fn next_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }

    // ========================================================================
    // Negotiation
    // ========================================================================

    /// Handshake on the first transport that answers in time.
    ///
    /// Returns the client id. Exhausting every transport emits
    /// [`ClientEvent::TransportsExhausted`] once and leaves the negotiator
    /// disconnected. Also starts over after a disconnect, whether the client
    /// asked for it or the server advised `none`.
    pub async fn handshake(&self) -> Result<String, NegotiatorError> {
        self.reopen();
        self.renegotiate().await
    }

    /// Handshake again within the current run; fails once stopped.
    async fn renegotiate(&self) -> Result<String, NegotiatorError> {
        if self.is_closed() {
            return Err(NegotiatorError::Closed);
        }
        if let Some(previous) = self.active.lock().take() {
            previous.abort();
        }
        *self.client_id.lock() = None;

        for (index, transport) in self.transports.iter().enumerate() {
            match self.negotiate(transport).await {
                Ok(client_id) => {
                    self.resubscribe().await;
                    return Ok(client_id);
                }
                Err(NegotiatorError::Transport(e)) => {
                    transport.abort();
                    let next = self.transports.get(index + 1).map(|t| t.name());
                    tracing::warn!(
                        failed = transport.name(),
                        next = ?next,
                        error = %e,
                        "Transport failed during negotiation"
                    );
                    if let Some(next) = next {
                        self.set_state(NegotiatorState::FailedOver { next });
                    }
                    self.events.emit(ClientEvent::TransportFailure {
                        failed: transport.name(),
                        next,
                        reason: e.to_string(),
                    });
                }
                Err(other) => {
                    self.set_state(NegotiatorState::Disconnected);
                    return Err(other);
                }
            }
        }

        tracing::error!("No transport could complete the handshake");
        self.set_state(NegotiatorState::Disconnected);
        self.events.emit(ClientEvent::TransportsExhausted);
        Err(NegotiatorError::TransportsExhausted)
    }

    async fn negotiate(&self, transport: &Arc<dyn ClientTransport>) -> Result<String, NegotiatorError> {
        let mut handshake = Message::new(channels::META_HANDSHAKE).with_id(self.next_id());
        handshake.version = Some(BAYEUX_VERSION.to_string());
        handshake.supported_connection_types = Some(
            self.transports
                .iter()
                .map(|t| t.name().to_string())
                .collect(),
        );

        let replies = self.negotiation_request(transport, handshake).await?;
        let reply = replies
            .iter()
            .find(|m| m.channel == channels::META_HANDSHAKE)
            .ok_or(TransportError::Closed)?;
        if !reply.is_successful() {
            let error = reply.error.clone().unwrap_or_default();
            if let Some(advice) = &reply.advice {
                *self.advice.lock() = advice.clone();
            }
            return Err(NegotiatorError::HandshakeRefused(error));
        }
        let client_id = reply
            .client_id
            .clone()
            .ok_or_else(|| NegotiatorError::HandshakeRefused("missing clientId".to_string()))?;
        if let Some(advice) = &reply.advice {
            *self.advice.lock() = advice.clone();
        }
        *self.client_id.lock() = Some(client_id.clone());
        tracing::info!(client_id = %client_id, transport = transport.name(), "Handshake successful");
        self.events.emit(ClientEvent::Handshake {
            client_id: client_id.clone(),
            transport: transport.name(),
        });

        // First connect asks for an immediate reply
        let connect = self.connect_message(
            &client_id,
            transport.name(),
            Some(Advice::requesting_timeout(Duration::ZERO)),
        );
        let replies = self.negotiation_request(transport, connect).await?;
        let reply = self.absorb(replies).ok_or(TransportError::Closed)?;
        if !reply.is_successful() {
            return Err(NegotiatorError::HandshakeRefused(reply.error.unwrap_or_default()));
        }

        *self.active.lock() = Some(transport.clone());
        self.backoff.lock().reset();
        self.set_state(NegotiatorState::Connected {
            transport: transport.name(),
        });
        self.events.emit(ClientEvent::Connected {
            transport: transport.name(),
        });
        Ok(client_id)
    }

    /// One request raced against `connect_timeout`.
    async fn negotiation_request(
        &self,
        transport: &Arc<dyn ClientTransport>,
        message: Message,
    ) -> Result<Vec<Message>, NegotiatorError> {
        let limit = self.settings.connect_timeout();
        let deadline = Instant::now() + limit;
        self.set_state(NegotiatorState::Connecting {
            transport: transport.name(),
            deadline,
        });

        match tokio::time::timeout_at(deadline, transport.send(vec![message])).await {
            Ok(replies) => Ok(replies?),
            Err(_) => Err(TransportError::TimedOut(limit).into()),
        }
    }

    async fn resubscribe(&self) {
        let subscribed: Vec<String> = self.subscriptions.lock().clone();
        for channel in subscribed {
            if let Err(e) = self.subscription(channels::META_SUBSCRIBE, &channel).await {
                tracing::warn!(channel = %channel, error = %e, "Resubscribe failed");
            }
        }
    }

    // ========================================================================
    // Steady state
    // ========================================================================

    /// Follow the server's advice until it says `none` or the client
    /// disconnects.
    ///
    /// Failed connects back off exponentially; `max_consecutive_failures`
    /// in a row trigger a fresh negotiation.
    pub async fn run(&self) -> Result<(), NegotiatorError> {
        if self.client_id().is_none() {
            self.handshake().await?;
        }

        let mut failures = 0u32;
        loop {
            if self.is_closed() {
                return Ok(());
            }

            let advice = self.advice();
            match advice.reconnect {
                Reconnect::None => {
                    tracing::info!("Server advised not to reconnect");
                    self.stop(DisconnectReason::Advice);
                    return Ok(());
                }
                Reconnect::Handshake => {
                    tracing::info!("Server advised a new handshake");
                    failures = 0;
                    self.renegotiate().await?;
                    continue;
                }
                Reconnect::Retry => {}
            }

            if !advice.interval().is_zero() && !self.pause(advice.interval()).await {
                return Ok(());
            }

            match self.connect_once(&advice).await {
                Ok(()) => {
                    failures = 0;
                    self.backoff.lock().reset();
                }
                Err(_) if self.is_closed() => return Ok(()),
                Err(e) => {
                    failures += 1;
                    tracing::warn!(error = %e, failures, "Connect failed");
                    if failures >= self.settings.max_consecutive_failures {
                        failures = 0;
                        self.renegotiate().await?;
                    } else {
                        let delay = self.backoff.lock().next_delay();
                        if !self.pause(delay).await {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn connect_once(&self, advice: &Advice) -> Result<(), NegotiatorError> {
        let transport = self.active.lock().clone().ok_or(NegotiatorError::NotConnected)?;
        let client_id = self.client_id().ok_or(NegotiatorError::NotConnected)?;
        let limit = advice.timeout().unwrap_or_default() + self.settings.max_network_delay();
        let message = self.connect_message(&client_id, transport.name(), None);
        let closed = self.closed();

        let replies = tokio::select! {
            result = tokio::time::timeout(limit, transport.send(vec![message])) => match result {
                Ok(replies) => replies?,
                Err(_) => {
                    transport.abort();
                    return Err(TransportError::TimedOut(limit).into());
                }
            },
            _ = closed.cancelled() => {
                transport.abort();
                return Err(NegotiatorError::Closed);
            }
        };

        let reply = self.absorb(replies).ok_or(TransportError::Closed)?;
        let rehandshake = reply
            .advice
            .as_ref()
            .is_some_and(|a| a.reconnect == Reconnect::Handshake);
        // A refused connect carrying handshake advice is handled by the loop
        if !reply.is_successful() && !rehandshake {
            return Err(NegotiatorError::Refused(reply.error.unwrap_or_default()));
        }
        Ok(())
    }

    /// Emit deliveries in order and keep the connect reply's advice.
    fn absorb(&self, replies: Vec<Message>) -> Option<Message> {
        let mut connect_reply = None;
        for message in replies {
            if message.channel == channels::META_CONNECT && message.is_reply() {
                if let Some(advice) = &message.advice {
                    *self.advice.lock() = advice.clone();
                }
                connect_reply = Some(message);
            } else if !message.is_meta() && !message.is_reply() {
                self.events.emit(ClientEvent::Message(message));
            }
        }
        connect_reply
    }

    fn connect_message(&self, client_id: &str, connection_type: &str, advice: Option<Advice>) -> Message {
        let mut message = Message::new(channels::META_CONNECT)
            .with_id(self.next_id())
            .with_client_id(client_id);
        message.connection_type = Some(connection_type.to_string());
        message.advice = advice;
        message
    }

    /// Sleep unless the client disconnects first.
    async fn pause(&self, duration: Duration) -> bool {
        let closed = self.closed();
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = closed.cancelled() => false,
        }
    }

    // ========================================================================
    // Requests
    // ========================================================================

    pub async fn subscribe(&self, channel: &str) -> Result<(), NegotiatorError> {
        self.subscription(channels::META_SUBSCRIBE, channel).await?;
        let mut subscriptions = self.subscriptions.lock();
        if !subscriptions.iter().any(|c| c == channel) {
            subscriptions.push(channel.to_string());
        }
        Ok(())
    }

    pub async fn unsubscribe(&self, channel: &str) -> Result<(), NegotiatorError> {
        self.subscriptions.lock().retain(|c| c != channel);
        self.subscription(channels::META_UNSUBSCRIBE, channel).await
    }

    async fn subscription(&self, meta: &str, channel: &str) -> Result<(), NegotiatorError> {
        let mut message = Message::new(meta);
        message.subscription = Some(channel.to_string());
        self.request(message).await.map(|_| ())
    }

    pub async fn publish(&self, channel: &str, data: Value) -> Result<(), NegotiatorError> {
        self.request(Message::publish(channel, data)).await.map(|_| ())
    }

    /// Send `disconnect` and stop. Requests fail with `Closed` until the
    /// next [`Negotiator::handshake`].
    pub async fn disconnect(&self) -> Result<(), NegotiatorError> {
        if self.is_closed() {
            return Ok(());
        }
        let result = self
            .request(Message::new(channels::META_DISCONNECT))
            .await
            .map(|_| ());
        self.stop(DisconnectReason::Client);
        result
    }

    /// Send one message on the active transport and return its reply.
    async fn request(&self, message: Message) -> Result<Message, NegotiatorError> {
        if self.is_closed() {
            return Err(NegotiatorError::Closed);
        }
        let transport = self.active.lock().clone().ok_or(NegotiatorError::NotConnected)?;
        let client_id = self.client_id().ok_or(NegotiatorError::NotConnected)?;
        let id = self.next_id();
        let channel = message.channel.clone();
        let message = message.with_id(id.clone()).with_client_id(client_id);

        let limit = self.settings.max_network_delay();
        let replies = tokio::time::timeout(limit, transport.send(vec![message]))
            .await
            .map_err(|_| TransportError::TimedOut(limit))??;

        let reply = replies
            .into_iter()
            .find(|m| m.is_reply() && m.channel == channel && m.id.as_deref() == Some(id.as_str()))
            .ok_or(TransportError::Closed)?;
        if !reply.is_successful() {
            return Err(NegotiatorError::Refused(reply.error.unwrap_or_default()));
        }
        Ok(reply)
    }

    fn stop(&self, reason: DisconnectReason) {
        let first = {
            let closed = self.closed.lock();
            let first = !closed.is_cancelled();
            closed.cancel();
            first
        };
        if let Some(transport) = self.active.lock().take() {
            transport.abort();
        }
        *self.client_id.lock() = None;
        self.set_state(NegotiatorState::Disconnected);
        if first {
            self.events.emit(ClientEvent::Disconnected { reason });
        }
    }
}

impl std::fmt::Debug for Negotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Negotiator")
            .field(
                "transports",
                &self.transports.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .field("state", &*self.state.lock())
            .field("client_id", &*self.client_id.lock())
            .finish()
    }
}
