//! Client event bus.
//!
//! Listeners run synchronously, in registration order, on the task that
//! emits the event. A listener may unregister itself or others from inside
//! its callback; the change applies from the next event.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::domain::entities::Message;

/// Why the client stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called
    Client,
    /// The server advised `reconnect: none`
    Advice,
}

/// Lifecycle and delivery events.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Handshake {
        client_id: String,
        transport: &'static str,
    },
    /// First connect on a freshly negotiated transport succeeded
    Connected { transport: &'static str },
    /// A non-meta message delivered on a connect reply
    Message(Message),
    /// Non-fatal: negotiation moves on to `next`, if any
    TransportFailure {
        failed: &'static str,
        next: Option<&'static str>,
        reason: String,
    },
    TransportsExhausted,
    Disconnected { reason: DisconnectReason },
}

/// Handle returned by [`EventBus::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Forward every event into a channel.
    pub fn subscribe(&self) -> (ListenerId, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.register(move |event| {
            let _ = tx.send(event.clone());
        });
        (id, rx)
    }

    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    pub fn emit(&self, event: ClientEvent) {
        // Snapshot so callbacks can touch the bus without deadlocking
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(&event);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.len())
            .finish()
    }
}
