//! Bayeux Service
//!
//! Processes batches of Bayeux messages on behalf of both transports and
//! owns the session lifecycle: handshake, connect (through the browser
//! throttle and the scheduler), subscribe, publish, disconnect, expiry.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::application::services::activity::InactivityMonitor;
use crate::application::services::scheduler::{ConnectReply, ConnectScheduler};
use crate::application::services::throttle::{BrowserThrottle, ThrottleDecision};
use crate::config::Settings;
use crate::domain::entities::{
    channels, connection_types, Message, ServerSession, WakeReason, BAYEUX_VERSION,
};
use crate::domain::services::{AdviceEngine, AdviceOutcome, ShutdownPolicy};
use crate::domain::value_objects::{BrowserId, SessionId};
use crate::infrastructure::metrics;
use crate::infrastructure::registry::{BrowserRegistry, ChannelRegistry, SessionDirectory};
use crate::shared::error::BayeuxError;

/// Transport a batch arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    LongPolling,
    WebSocket,
}

impl TransportKind {
    pub fn connection_type(&self) -> &'static str {
        match self {
            TransportKind::LongPolling => connection_types::LONG_POLLING,
            TransportKind::WebSocket => connection_types::WEBSOCKET,
        }
    }
}

/// Per-request transport facts.
#[derive(Debug, Clone)]
pub struct TransportContext {
    pub browser_id: Option<BrowserId>,
    pub kind: TransportKind,
}

impl TransportContext {
    pub fn long_polling(browser_id: Option<BrowserId>) -> Self {
        Self {
            browser_id,
            kind: TransportKind::LongPolling,
        }
    }

    pub fn websocket(browser_id: Option<BrowserId>) -> Self {
        Self {
            browser_id,
            kind: TransportKind::WebSocket,
        }
    }
}

/// Bayeux service trait
#[async_trait]
pub trait BayeuxService: Send + Sync {
    /// Process one request batch and return the reply batch
    async fn handle(&self, messages: Vec<Message>, ctx: &TransportContext) -> Vec<Message>;

    /// Publish from the server side; returns the number of recipients
    fn publish(&self, channel: &str, data: Value) -> usize;

    /// Number of registered sessions
    fn session_count(&self) -> usize;
}

/// Bayeux server: registries, scheduler, throttle and monitors.
#[derive(Debug)]
pub struct BayeuxServer {
    settings: Settings,
    sessions: Arc<SessionDirectory>,
    browsers: Arc<BrowserRegistry>,
    channels: Arc<ChannelRegistry>,
    scheduler: ConnectScheduler,
    throttle: BrowserThrottle,
    inactivity: Arc<InactivityMonitor>,
    shutdown: ShutdownPolicy,
}

impl BayeuxServer {
    pub fn new(settings: Settings) -> Self {
        let sessions = Arc::new(SessionDirectory::new());
        let browsers = Arc::new(BrowserRegistry::new());
        let channels = Arc::new(ChannelRegistry::new());
        let inactivity = Arc::new(InactivityMonitor::new(&settings.activity, sessions.clone()));
        let shutdown = ShutdownPolicy::new();

        let advice = AdviceEngine::new(settings.bayeux.interval(), settings.bayeux.timeout())
            .with_policy(Arc::new(shutdown.clone()))
            .with_policy(inactivity.clone());
        let scheduler = ConnectScheduler::new(Arc::new(advice));
        let throttle = BrowserThrottle::new(
            browsers.clone(),
            settings.browser.max_sessions_per_browser,
            settings.browser.multi_session_interval(),
        );

        Self {
            settings,
            sessions,
            browsers,
            channels,
            scheduler,
            throttle,
            inactivity,
            shutdown,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn sessions(&self) -> &Arc<SessionDirectory> {
        &self.sessions
    }

    pub fn channels(&self) -> &Arc<ChannelRegistry> {
        &self.channels
    }

    pub fn browsers(&self) -> &Arc<BrowserRegistry> {
        &self.browsers
    }

    pub fn inactivity(&self) -> &Arc<InactivityMonitor> {
        &self.inactivity
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_shutting_down()
    }

    // ========================================================================
    // Meta channels
    // ========================================================================

    fn handshake(&self, request: &Message, ctx: &TransportContext) -> Message {
        let mut reply = request.reply();

        if self.is_shutting_down() {
            let outcome = self.scheduler.reject(AdviceOutcome::ServerUnavailable);
            reply.successful = Some(false);
            reply.error = Some("503::server_unavailable".to_string());
            reply.advice = Some(outcome.advice);
            return reply;
        }

        let session = Arc::new(ServerSession::new(
            SessionId::generate(),
            ctx.browser_id.clone(),
            self.settings.bayeux.max_queue,
            self.settings.bayeux.meta_connect_delivery_only,
        ));
        if let Some(browser_id) = session.browser_id() {
            self.browsers.join(browser_id, session.id());
        }
        self.sessions.register(session.clone());

        tracing::info!(
            session_id = %session.id(),
            transport = ctx.kind.connection_type(),
            browser_id = ?ctx.browser_id.as_ref().map(|b| b.as_str()),
            "Handshake completed"
        );

        let reply_advice = self.scheduler.reply_now(&session).advice;
        reply.client_id = Some(session.id().to_string());
        reply.successful = Some(true);
        reply.version = Some(BAYEUX_VERSION.to_string());
        reply.supported_connection_types = Some(vec![
            connection_types::WEBSOCKET.to_string(),
            connection_types::LONG_POLLING.to_string(),
        ]);
        reply.advice = Some(reply_advice);
        reply
    }

    /// Returns the delivered messages followed by the connect reply.
    async fn connect(&self, request: &Message, ctx: &TransportContext) -> Vec<Message> {
        let mut reply = request.reply();

        let Some(session) = self.lookup(request) else {
            let err = BayeuxError::UnknownSession(request.client_id.clone().unwrap_or_default());
            tracing::debug!(error = %err, "Connect for unknown session");
            let rejected = self.scheduler.reject(AdviceOutcome::HandshakeRequired);
            reply.successful = Some(false);
            reply.error = Some(err.bayeux_error());
            reply.advice = Some(rejected.advice);
            return vec![reply];
        };

        // Held until the reply is built: renews the session at both ends and
        // turns a duplicate connect away before it reaches the throttle.
        let scheduled = match session.begin_connect() {
            Ok(_in_flight) => self.schedule(&session, request, ctx).await,
            Err(err) => Err(err),
        };

        match scheduled {
            Ok(outcome) => {
                let terminal = outcome.is_terminal();
                reply.successful = Some(true);
                reply.advice = Some(outcome.advice);

                let mut batch = outcome.messages;
                batch.push(reply);
                if terminal {
                    self.terminate(&session, outcome.outcome);
                }
                batch
            }
            Err(err) => {
                if matches!(err, BayeuxError::SchedulerRace(_)) {
                    tracing::error!(session_id = %session.id(), error = %err, "Connect failed");
                } else {
                    tracing::warn!(session_id = %session.id(), error = %err, "Connect rejected");
                }
                let rejected = self.scheduler.reject(AdviceOutcome::HandshakeRequired);
                reply.successful = Some(false);
                reply.error = Some(err.bayeux_error());
                reply.advice = Some(rejected.advice);
                vec![reply]
            }
        }
    }

    /// Throttle, then suspend.
    async fn schedule(
        &self,
        session: &ServerSession,
        request: &Message,
        ctx: &TransportContext,
    ) -> Result<ConnectReply, BayeuxError> {
        let requested = request.advice.as_ref().and_then(|a| a.timeout());
        let timeout = self.scheduler.effective_timeout(requested);

        if ctx.kind != TransportKind::LongPolling || timeout.is_zero() {
            return self.scheduler.suspend(session, Some(timeout)).await;
        }

        match self.throttle.admit(session, timeout) {
            ThrottleDecision::Proceed(slot) => {
                let reply = self.scheduler.suspend(session, Some(timeout)).await;
                drop(slot);
                reply
            }
            ThrottleDecision::DelayThenProceed(delay) => {
                let slot = self.throttle.hold(session, delay).await;
                let reply = self
                    .scheduler
                    .suspend(session, Some(timeout.saturating_sub(delay)))
                    .await;
                drop(slot);
                reply
            }
            ThrottleDecision::DenyWithAdvice => Ok(self.scheduler.deny(session)),
        }
    }

    fn disconnect(&self, request: &Message) -> Message {
        let mut reply = request.reply();
        match self.lookup(request) {
            Some(session) => {
                self.remove_session(session.id());
                tracing::info!(session_id = %session.id(), "Session disconnected by client");
                reply.successful = Some(true);
            }
            None => {
                let err = BayeuxError::UnknownSession(request.client_id.clone().unwrap_or_default());
                reply.successful = Some(false);
                reply.error = Some(err.bayeux_error());
            }
        }
        reply
    }

    fn subscription(&self, request: &Message, subscribe: bool) -> Message {
        let mut reply = request.reply();
        reply.subscription = request.subscription.clone();

        let Some(session) = self.lookup(request) else {
            return self.unknown_session(request, reply);
        };
        let Some(channel) = request.subscription.as_deref() else {
            let err = BayeuxError::ProtocolViolation("missing_subscription".to_string());
            reply.successful = Some(false);
            reply.error = Some(err.bayeux_error());
            return reply;
        };

        if subscribe {
            self.channels.subscribe(channel, session.id());
            tracing::debug!(session_id = %session.id(), channel = %channel, "Subscribed");
        } else {
            self.channels.unsubscribe(channel, session.id());
            tracing::debug!(session_id = %session.id(), channel = %channel, "Unsubscribed");
        }
        reply.successful = Some(true);
        reply
    }

    /// Client publish on a non-meta channel.
    fn client_publish(&self, request: &Message) -> Message {
        let mut reply = request.reply();
        let Some(session) = self.lookup(request) else {
            return self.unknown_session(request, reply);
        };

        session.touch_client();
        if !request.is_service() {
            let delivered = self.deliver(
                &request.channel,
                Message {
                    channel: request.channel.clone(),
                    id: request.id.clone(),
                    data: request.data.clone(),
                    ext: request.ext.clone(),
                    ..Message::default()
                },
            );
            tracing::trace!(session_id = %session.id(), channel = %request.channel, delivered, "Published");
        }
        reply.successful = Some(true);
        reply
    }

    fn unknown_session(&self, request: &Message, mut reply: Message) -> Message {
        let err = BayeuxError::UnknownSession(request.client_id.clone().unwrap_or_default());
        reply.successful = Some(false);
        reply.error = Some(err.bayeux_error());
        reply.advice = Some(self.scheduler.reject(AdviceOutcome::HandshakeRequired).advice);
        reply
    }

    fn lookup(&self, request: &Message) -> Option<Arc<ServerSession>> {
        let id = SessionId::from(request.client_id.as_deref()?);
        self.sessions.lookup(&id)
    }

    // ========================================================================
    // Delivery and lifecycle
    // ========================================================================

    /// Queue a message for every subscriber of `channel`.
    fn deliver(&self, channel: &str, message: Message) -> usize {
        let mut delivered = 0;
        for id in self.channels.subscribers(channel) {
            let Some(session) = self.sessions.lookup(&id) else {
                continue;
            };
            if !session.is_connected() {
                continue;
            }
            let queued = session.enqueue(message.clone());
            if queued.dropped > 0 {
                tracing::warn!(
                    session_id = %id,
                    dropped = queued.dropped,
                    "Session queue full, oldest messages dropped"
                );
            }
            delivered += 1;
        }
        delivered
    }

    /// Disconnect after a `none` reply.
    fn terminate(&self, session: &ServerSession, outcome: AdviceOutcome) {
        if session.disconnect() {
            if outcome == AdviceOutcome::ClientInactive {
                metrics::record_inactivity_disconnect();
            }
            tracing::info!(
                session_id = %session.id(),
                outcome = outcome.as_str(),
                "Session told not to reconnect"
            );
        }
        if session.meta_connect_delivery_only() {
            self.remove_session(session.id());
        }
    }

    /// Disconnect and forget a session.
    pub fn remove_session(&self, id: &SessionId) -> bool {
        let Some(session) = self.sessions.deregister(id) else {
            return false;
        };
        session.disconnect();
        self.channels.remove_session(id);
        if let Some(browser_id) = session.browser_id() {
            self.browsers.leave(browser_id, id);
        }
        true
    }

    /// Remove disconnected sessions and those past `maxInterval` without a
    /// connect renewal.
    pub fn sweep(&self) -> usize {
        let expired = self
            .sessions
            .expired(Instant::now(), self.settings.bayeux.max_interval());
        let mut removed = 0;
        for session in expired {
            if self.remove_session(session.id()) {
                tracing::debug!(session_id = %session.id(), "Session expired");
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(removed, remaining = self.sessions.len(), "Session sweep");
        }
        removed
    }

    /// Tell every client to stop and resume all suspended connects.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
        let mut resumed = 0;
        for session in self.sessions.snapshot() {
            if session.claim(WakeReason::Cancelled) {
                resumed += 1;
            }
        }
        tracing::info!(resumed, "Bayeux server shutting down");
    }

    /// Spawn the sweeper and the inactivity monitor.
    pub fn spawn_background(self: &Arc<Self>, token: CancellationToken) -> Vec<JoinHandle<()>> {
        let sweeper = {
            let server = self.clone();
            let token = token.clone();
            let period = self.settings.bayeux.sweep_period();
            tokio::spawn(async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            server.sweep();
                        }
                        _ = token.cancelled() => break,
                    }
                }
                tracing::debug!("Session sweeper stopped");
            })
        };

        let monitor = tokio::spawn(
            self.inactivity
                .clone()
                .run(self.settings.activity.check_period(), token),
        );

        vec![sweeper, monitor]
    }
}

#[async_trait]
impl BayeuxService for BayeuxServer {
    async fn handle(&self, messages: Vec<Message>, ctx: &TransportContext) -> Vec<Message> {
        let (connects, others): (Vec<_>, Vec<_>) = messages
            .into_iter()
            .partition(|m| m.channel == channels::META_CONNECT);

        let mut replies = Vec::with_capacity(others.len() + connects.len());
        for message in &others {
            let reply = match message.channel.as_str() {
                channels::META_HANDSHAKE => self.handshake(message, ctx),
                channels::META_DISCONNECT => self.disconnect(message),
                channels::META_SUBSCRIBE => self.subscription(message, true),
                channels::META_UNSUBSCRIBE => self.subscription(message, false),
                _ if message.is_meta() => {
                    let mut reply = message.reply();
                    reply.successful = Some(false);
                    reply.error = Some("400::unknown_meta_channel".to_string());
                    reply
                }
                _ => self.client_publish(message),
            };
            replies.push(reply);
        }

        // Connects last so replies to the rest of the batch are not held
        for message in &connects {
            replies.extend(self.connect(message, ctx).await);
        }
        replies
    }

    fn publish(&self, channel: &str, data: Value) -> usize {
        self.deliver(channel, Message::publish(channel, data))
    }

    fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
