//! Connect Scheduler
//!
//! Holds a `/meta/connect` against its session until something worth
//! answering happens, then builds the reply.
//!
//! The suspension is a race between the session's pending slot (claimed by a
//! published message, a disconnect, or the inactivity monitor) and a local
//! deadline timer. Whichever claims the slot first decides the wake reason;
//! the loser finds the slot gone and does nothing. No registry lock is held
//! while waiting.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};

use crate::domain::entities::{Message, ServerSession, WakeReason};
use crate::domain::services::{AdviceContext, AdviceDecision, AdviceEngine, AdviceOutcome};
use crate::domain::value_objects::Advice;
use crate::infrastructure::metrics;
use crate::shared::error::BayeuxError;

/// Answer to one connect.
#[derive(Debug, Clone)]
pub struct ConnectReply {
    pub outcome: AdviceOutcome,
    /// `None` when the connect was answered without suspending
    pub wake: Option<WakeReason>,
    pub messages: Vec<Message>,
    pub advice: Advice,
}

impl ConnectReply {
    pub fn is_terminal(&self) -> bool {
        self.advice.is_terminal()
    }
}

/// Disarms an unclaimed suspension when the connect future is dropped.
struct Suspension<'a> {
    session: &'a ServerSession,
    generation: u64,
    resumed: bool,
}

impl Drop for Suspension<'_> {
    fn drop(&mut self) {
        if !self.resumed {
            self.session.disarm(self.generation);
            metrics::connect_abandoned();
            tracing::debug!(session_id = %self.session.id(), "Suspended connect abandoned");
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectScheduler {
    advice: Arc<AdviceEngine>,
}

impl ConnectScheduler {
    pub fn new(advice: Arc<AdviceEngine>) -> Self {
        Self { advice }
    }

    /// `min(requested, configured)`; the configured timeout when absent.
    pub fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        let configured = self.advice.timeout();
        requested.map_or(configured, |r| r.min(configured))
    }

    /// Suspend a connect until a message, the deadline, or a cancellation.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if the session is not connected
    /// - `ConcurrentConnect` if another connect is already suspended
    /// - `SchedulerRace` if the wake was observed without a claim
    pub async fn suspend(
        &self,
        session: &ServerSession,
        requested: Option<Duration>,
    ) -> Result<ConnectReply, BayeuxError> {
        if !session.is_connected() {
            return Err(BayeuxError::InvalidState(session.id().to_string()));
        }
        session.touch_connect();

        // Inactive or shutting down: answer without suspending
        let decision = self.advice.decide(&AdviceContext::for_session(session));
        if !decision.is_retry() {
            return Ok(self.finish(session, None, decision, session.drain()));
        }

        let timeout = self.effective_timeout(requested);
        if timeout.is_zero() {
            return Ok(self.reply_now(session));
        }

        let armed = session.arm(Instant::now() + timeout)?;
        let generation = armed.generation();
        let deadline = armed.deadline();
        let mut guard = Suspension {
            session,
            generation,
            resumed: false,
        };
        metrics::connect_suspended();
        tracing::debug!(
            session_id = %session.id(),
            timeout_ms = timeout.as_millis() as u64,
            "Connect suspended"
        );

        // Messages queued before arming would otherwise wait for the timer
        if session.has_queued() {
            session.claim_generation(generation, WakeReason::Message);
        }

        let mut receiver = armed.into_receiver();
        let reason = tokio::select! {
            biased;
            woken = &mut receiver => woken.unwrap_or(WakeReason::Cancelled),
            _ = sleep_until(deadline) => {
                session.claim_generation(generation, WakeReason::Timeout);
                // Either our claim or a concurrent one has sent the reason
                receiver.await.unwrap_or(WakeReason::Cancelled)
            }
        };

        guard.resumed = true;
        metrics::connect_resumed(reason.as_str());

        if session.is_pending(generation) {
            tracing::error!(session_id = %session.id(), "Connect resumed without claiming its suspension");
            session.disarm(generation);
            return Err(BayeuxError::SchedulerRace(session.id().to_string()));
        }

        let messages = match reason {
            WakeReason::Timeout => Vec::new(),
            WakeReason::Message | WakeReason::Cancelled => session.drain(),
        };
        let decision = self
            .advice
            .decide(&AdviceContext::for_session(session).with_wake(reason));

        tracing::debug!(
            session_id = %session.id(),
            reason = reason.as_str(),
            messages = messages.len(),
            reconnect = %decision.reconnect,
            "Connect resumed"
        );

        Ok(self.finish(session, Some(reason), decision, messages))
    }

    /// Answer immediately with whatever is queued.
    pub fn reply_now(&self, session: &ServerSession) -> ConnectReply {
        let decision = self.advice.decide(&AdviceContext::for_session(session));
        self.finish(session, None, decision, session.drain())
    }

    /// Answer a connect the browser throttle refused.
    pub fn deny(&self, session: &ServerSession) -> ConnectReply {
        let decision = self
            .advice
            .decide(&AdviceContext::for_session(session).throttled());
        self.finish(session, None, decision, session.drain())
    }

    /// Reply for a request that never reached a session.
    pub fn reject(&self, outcome: AdviceOutcome) -> ConnectReply {
        let decision = AdviceDecision::from(outcome);
        let advice = self.advice.advice(&decision);
        metrics::record_advice(decision.reconnect.as_str(), outcome.as_str());
        ConnectReply {
            outcome,
            wake: None,
            messages: Vec::new(),
            advice,
        }
    }

    fn finish(
        &self,
        session: &ServerSession,
        wake: Option<WakeReason>,
        decision: AdviceDecision,
        messages: Vec<Message>,
    ) -> ConnectReply {
        let advice = self.advice.advice(&decision);
        metrics::record_advice(decision.reconnect.as_str(), decision.outcome.as_str());
        tracing::trace!(session_id = %session.id(), reconnect = %advice.reconnect, "Connect reply built");
        ConnectReply {
            outcome: decision.outcome,
            wake,
            messages,
            advice,
        }
    }
}
