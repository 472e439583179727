//! In-process client transport with fault injection.
//!
//! Hands batches straight to a [`BayeuxServer`], so negotiation can be
//! exercised under virtual time without sockets.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use bayeux_server::application::services::{
    BayeuxServer, BayeuxService, TransportContext, TransportKind,
};
use bayeux_server::client::{ClientTransport, TransportError};
use bayeux_server::domain::entities::Message;
use bayeux_server::domain::value_objects::BrowserId;

#[derive(Debug)]
pub struct LocalTransport {
    server: Arc<BayeuxServer>,
    ctx: TransportContext,
    latency: Mutex<Duration>,
    unresponsive: AtomicBool,
    failing: AtomicBool,
    aborts: AtomicUsize,
    /// Swapped out on abort so later requests are unaffected
    abort: Mutex<CancellationToken>,
}

impl LocalTransport {
    pub fn new(server: Arc<BayeuxServer>, kind: TransportKind, browser_id: Option<BrowserId>) -> Self {
        Self {
            server,
            ctx: TransportContext { browser_id, kind },
            latency: Mutex::new(Duration::ZERO),
            unresponsive: AtomicBool::new(false),
            failing: AtomicBool::new(false),
            aborts: AtomicUsize::new(0),
            abort: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn websocket(server: Arc<BayeuxServer>) -> Self {
        Self::new(server, TransportKind::WebSocket, None)
    }

    /// Long-polling shares a browser id the way a cookie would.
    pub fn long_polling(server: Arc<BayeuxServer>, browser_id: BrowserId) -> Self {
        Self::new(server, TransportKind::LongPolling, Some(browser_id))
    }

    /// Delay added before every batch reaches the server.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock() = latency;
        self
    }

    /// Requests never complete until aborted.
    pub fn unresponsive(self) -> Self {
        self.unresponsive.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn abort_count(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    async fn exchange(&self, messages: Vec<Message>) -> Result<Vec<Message>, TransportError> {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.unresponsive.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        Ok(self.server.handle(messages, &self.ctx).await)
    }
}

#[async_trait]
impl ClientTransport for LocalTransport {
    fn name(&self) -> &'static str {
        self.ctx.kind.connection_type()
    }

    async fn send(&self, messages: Vec<Message>) -> Result<Vec<Message>, TransportError> {
        let token = self.abort.lock().clone();
        tokio::select! {
            result = self.exchange(messages) => result,
            _ = token.cancelled() => Err(TransportError::Aborted),
        }
    }

    fn abort(&self) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        let previous = std::mem::take(&mut *self.abort.lock());
        previous.cancel();
    }
}
