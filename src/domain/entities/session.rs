//! Server-side session entity.
//!
//! A `ServerSession` is the record of one logical Bayeux client, created at
//! handshake and owned by the session directory. Besides its identity and
//! activity timestamps it holds:
//!
//! - the bounded queue of messages not yet delivered,
//! - the single pending-connect slot.
//!
//! The pending slot is the wake rendezvous between a suspended connect and
//! everything that may resume it (a published message, its own timer, a
//! disconnect, the inactivity monitor). The slot owns a oneshot sender;
//! resuming means taking the sender out of the slot under the lock, so
//! exactly one party can ever claim a given suspension. Losers find the slot
//! empty (or holding a newer generation) and do nothing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::domain::entities::Message;
use crate::domain::value_objects::{BrowserId, SessionId};
use crate::shared::error::BayeuxError;

/// Why a suspended connect was resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WakeReason {
    /// At least one message was queued for the session
    Message,
    /// The suspension deadline passed
    Timeout,
    /// The session was disconnected, deleted, or a policy ended the poll
    Cancelled,
}

impl WakeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            WakeReason::Message => "message",
            WakeReason::Timeout => "timeout",
            WakeReason::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug)]
struct PendingConnect {
    generation: u64,
    deadline: Instant,
    waker: oneshot::Sender<WakeReason>,
}

/// Receiving half of an armed suspension, held by the scheduler.
#[derive(Debug)]
pub struct ArmedConnect {
    generation: u64,
    deadline: Instant,
    receiver: oneshot::Receiver<WakeReason>,
}

impl ArmedConnect {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn into_receiver(self) -> oneshot::Receiver<WakeReason> {
        self.receiver
    }
}

#[derive(Debug, Clone, Copy)]
struct Activity {
    client: Instant,
    server: Instant,
    connect: Instant,
}

/// One `/meta/connect` being handled for a session, from arrival until its
/// reply is built. Dropping it records the renewal.
#[derive(Debug)]
pub struct ConnectInFlight<'a> {
    session: &'a ServerSession,
}

impl Drop for ConnectInFlight<'_> {
    fn drop(&mut self) {
        self.session.touch_connect();
        self.session.connecting.store(false, Ordering::Release);
    }
}

/// Result of queueing a message for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enqueued {
    /// The message resumed a suspended connect
    pub woke: bool,
    /// Oldest messages discarded because the queue was full
    pub dropped: usize,
}

#[derive(Debug)]
pub struct ServerSession {
    id: SessionId,
    browser_id: Option<BrowserId>,
    connected: AtomicBool,
    meta_connect_delivery_only: bool,
    max_queue: usize,
    created_at: Instant,
    activity: Mutex<Activity>,
    queue: Mutex<VecDeque<Message>>,
    pending: Mutex<Option<PendingConnect>>,
    generation: AtomicU64,
    connecting: AtomicBool,
    cancel: CancellationToken,
}

impl ServerSession {
    pub fn new(
        id: SessionId,
        browser_id: Option<BrowserId>,
        max_queue: usize,
        meta_connect_delivery_only: bool,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            browser_id,
            connected: AtomicBool::new(true),
            meta_connect_delivery_only,
            max_queue: max_queue.max(1),
            created_at: now,
            activity: Mutex::new(Activity {
                client: now,
                server: now,
                connect: now,
            }),
            queue: Mutex::new(VecDeque::new()),
            pending: Mutex::new(None),
            generation: AtomicU64::new(0),
            connecting: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn browser_id(&self) -> Option<&BrowserId> {
        self.browser_id.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn meta_connect_delivery_only(&self) -> bool {
        self.meta_connect_delivery_only
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Resolves once the session is disconnected.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    // --- Activity ---

    /// Record a message published by the client.
    pub fn touch_client(&self) {
        self.activity.lock().client = Instant::now();
    }

    /// Record a message sent to the client.
    pub fn touch_server(&self) {
        self.activity.lock().server = Instant::now();
    }

    /// Record a connect renewal.
    pub fn touch_connect(&self) {
        self.activity.lock().connect = Instant::now();
    }

    pub fn last_client_activity(&self) -> Instant {
        self.activity.lock().client
    }

    pub fn last_server_activity(&self) -> Instant {
        self.activity.lock().server
    }

    pub fn last_connect(&self) -> Instant {
        self.activity.lock().connect
    }

    // --- Connect cycle ---

    /// Start handling a connect.
    ///
    /// The session counts as renewed for as long as the guard lives, stagger
    /// delays included, and once more when it drops.
    ///
    /// # Errors
    ///
    /// `ConcurrentConnect` if another connect is still being handled.
    pub fn begin_connect(&self) -> Result<ConnectInFlight<'_>, BayeuxError> {
        self.connecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| BayeuxError::ConcurrentConnect(self.id.to_string()))?;
        self.touch_connect();
        Ok(ConnectInFlight { session: self })
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting.load(Ordering::Acquire)
    }

    // --- Queue ---

    /// Queue a message and resume the pending connect, if any.
    ///
    /// Never blocks on the consumer. When the queue is full the oldest
    /// undelivered message is discarded.
    pub fn enqueue(&self, message: Message) -> Enqueued {
        let dropped = {
            let mut queue = self.queue.lock();
            queue.push_back(message);
            let mut dropped = 0;
            while queue.len() > self.max_queue {
                queue.pop_front();
                dropped += 1;
            }
            dropped
        };
        self.touch_server();
        let woke = self.claim(WakeReason::Message);
        Enqueued { woke, dropped }
    }

    pub fn has_queued(&self) -> bool {
        !self.queue.lock().is_empty()
    }

    pub fn queued_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Take every queued message, oldest first.
    pub fn drain(&self) -> Vec<Message> {
        self.queue.lock().drain(..).collect()
    }

    // --- Pending connect ---

    /// Register a suspended connect until `deadline`.
    ///
    /// # Errors
    ///
    /// `ConcurrentConnect` if a connect is already suspended.
    pub fn arm(&self, deadline: Instant) -> Result<ArmedConnect, BayeuxError> {
        let mut pending = self.pending.lock();
        if pending.is_some() {
            return Err(BayeuxError::ConcurrentConnect(self.id.to_string()));
        }
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let (waker, receiver) = oneshot::channel();
        *pending = Some(PendingConnect {
            generation,
            deadline,
            waker,
        });
        Ok(ArmedConnect {
            generation,
            deadline,
            receiver,
        })
    }

    /// Claim whichever connect is suspended. Returns `false` if none was.
    pub fn claim(&self, reason: WakeReason) -> bool {
        let taken = self.pending.lock().take();
        Self::resume(taken, reason)
    }

    /// Claim only the suspension identified by `generation`.
    ///
    /// Used by timers so an expired timer can never resume a later
    /// connect cycle.
    pub fn claim_generation(&self, generation: u64, reason: WakeReason) -> bool {
        let taken = {
            let mut pending = self.pending.lock();
            match pending.as_ref() {
                Some(p) if p.generation == generation => pending.take(),
                _ => None,
            }
        };
        Self::resume(taken, reason)
    }

    /// Drop the suspension without resuming it (the request went away).
    pub fn disarm(&self, generation: u64) {
        let mut pending = self.pending.lock();
        if matches!(pending.as_ref(), Some(p) if p.generation == generation) {
            pending.take();
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Whether the suspension identified by `generation` is still unclaimed.
    pub fn is_pending(&self, generation: u64) -> bool {
        matches!(self.pending.lock().as_ref(), Some(p) if p.generation == generation)
    }

    /// Deadline of the suspended connect, if any.
    pub fn pending_deadline(&self) -> Option<Instant> {
        self.pending.lock().as_ref().map(|p| p.deadline)
    }

    fn resume(taken: Option<PendingConnect>, reason: WakeReason) -> bool {
        match taken {
            Some(pending) => {
                // A closed receiver means the request was dropped; the claim
                // still consumed the suspension.
                let _ = pending.waker.send(reason);
                true
            }
            None => false,
        }
    }

    // --- Lifecycle ---

    /// Mark the session disconnected and resume its suspended connect.
    ///
    /// Returns `true` the first time only.
    pub fn disconnect(&self) -> bool {
        let was_connected = self.connected.swap(false, Ordering::AcqRel);
        if was_connected {
            self.cancel.cancel();
            self.claim(WakeReason::Cancelled);
        }
        was_connected
    }
}
