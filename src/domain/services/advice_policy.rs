//! Advice composition.
//!
//! Every reply to a connect carries exactly one advice value. It is derived
//! from an [`AdviceOutcome`], and outcomes come from an ordered list of
//! [`AdvicePolicy`] evaluators. Each policy looks at the reply context and
//! may contribute an outcome. The most restrictive reconnect wins
//! (`retry < handshake < none`), and markers from every outcome at the
//! winning rank are merged.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::domain::entities::{ServerSession, WakeReason};
use crate::domain::value_objects::{Advice, Reconnect};

/// Scheduling outcome a policy can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdviceOutcome {
    Healthy,
    HandshakeRequired,
    ClientInactive,
    ServerUnavailable,
    MultipleSessions,
    SessionClosed,
}

impl AdviceOutcome {
    pub fn reconnect(&self) -> Reconnect {
        match self {
            AdviceOutcome::Healthy => Reconnect::Retry,
            AdviceOutcome::HandshakeRequired => Reconnect::Handshake,
            AdviceOutcome::ClientInactive
            | AdviceOutcome::ServerUnavailable
            | AdviceOutcome::MultipleSessions
            | AdviceOutcome::SessionClosed => Reconnect::None,
        }
    }

    pub fn multiple_clients(&self) -> bool {
        matches!(self, AdviceOutcome::MultipleSessions)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AdviceOutcome::Healthy => "healthy",
            AdviceOutcome::HandshakeRequired => "handshake_required",
            AdviceOutcome::ClientInactive => "client_inactive",
            AdviceOutcome::ServerUnavailable => "server_unavailable",
            AdviceOutcome::MultipleSessions => "multiple_sessions",
            AdviceOutcome::SessionClosed => "session_closed",
        }
    }
}

/// What a policy sees when a reply is being built.
#[derive(Debug, Clone, Copy)]
pub struct AdviceContext<'a> {
    /// `None` when the request named an unknown session
    pub session: Option<&'a ServerSession>,
    /// How the suspension ended; `None` before suspending
    pub wake: Option<WakeReason>,
    pub now: Instant,
    /// The browser throttle refused this connect
    pub throttle_denied: bool,
}

impl<'a> AdviceContext<'a> {
    pub fn for_session(session: &'a ServerSession) -> Self {
        Self {
            session: Some(session),
            wake: None,
            now: Instant::now(),
            throttle_denied: false,
        }
    }

    pub fn unknown_session() -> Self {
        Self {
            session: None,
            wake: None,
            now: Instant::now(),
            throttle_denied: false,
        }
    }

    pub fn with_wake(mut self, wake: WakeReason) -> Self {
        self.wake = Some(wake);
        self
    }

    pub fn throttled(mut self) -> Self {
        self.throttle_denied = true;
        self
    }
}

/// One evaluator in the advice chain.
pub trait AdvicePolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, ctx: &AdviceContext<'_>) -> Option<AdviceOutcome>;
}

/// Composed result for one reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdviceDecision {
    /// First outcome seen at the winning rank
    pub outcome: AdviceOutcome,
    pub reconnect: Reconnect,
    pub multiple_clients: bool,
}

impl AdviceDecision {
    pub fn healthy() -> Self {
        Self {
            outcome: AdviceOutcome::Healthy,
            reconnect: Reconnect::Retry,
            multiple_clients: false,
        }
    }

    pub fn is_retry(&self) -> bool {
        self.reconnect == Reconnect::Retry
    }

    fn merge(&mut self, outcome: AdviceOutcome) {
        let reconnect = outcome.reconnect();
        if reconnect > self.reconnect {
            self.outcome = outcome;
            self.reconnect = reconnect;
            self.multiple_clients = outcome.multiple_clients();
        } else if reconnect == self.reconnect {
            self.multiple_clients |= outcome.multiple_clients();
        }
    }
}

impl From<AdviceOutcome> for AdviceDecision {
    fn from(outcome: AdviceOutcome) -> Self {
        Self {
            outcome,
            reconnect: outcome.reconnect(),
            multiple_clients: outcome.multiple_clients(),
        }
    }
}

/// Ordered policy chain plus the timing values stamped on every advice.
#[derive(Clone)]
pub struct AdviceEngine {
    policies: Vec<Arc<dyn AdvicePolicy>>,
    interval: Duration,
    timeout: Duration,
}

impl std::fmt::Debug for AdviceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.policies.iter().map(|p| p.name()).collect();
        f.debug_struct("AdviceEngine")
            .field("policies", &names)
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl AdviceEngine {
    /// An engine with only the session-state and throttle policies.
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            policies: vec![Arc::new(SessionStatePolicy), Arc::new(MultiSessionPolicy)],
            interval,
            timeout,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn AdvicePolicy>) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run every policy in order and compose their outcomes.
    pub fn decide(&self, ctx: &AdviceContext<'_>) -> AdviceDecision {
        let mut decision = AdviceDecision::healthy();
        for policy in &self.policies {
            if let Some(outcome) = policy.evaluate(ctx) {
                tracing::trace!(policy = policy.name(), outcome = outcome.as_str(), "Advice policy matched");
                decision.merge(outcome);
            }
        }
        decision
    }

    /// Advice value for a decision.
    pub fn advice(&self, decision: &AdviceDecision) -> Advice {
        let mut advice = Advice::new(decision.reconnect, self.interval, self.timeout);
        advice.multiple_clients = decision.multiple_clients;
        advice
    }

    /// Decide and build the advice in one step.
    pub fn evaluate(&self, ctx: &AdviceContext<'_>) -> (AdviceDecision, Advice) {
        let decision = self.decide(ctx);
        let advice = self.advice(&decision);
        (decision, advice)
    }
}

// ============================================================================
// Built-in policies
// ============================================================================

/// Unknown sessions must handshake; disconnected ones are told to stop.
#[derive(Debug, Default)]
pub struct SessionStatePolicy;

impl AdvicePolicy for SessionStatePolicy {
    fn name(&self) -> &'static str {
        "session_state"
    }

    fn evaluate(&self, ctx: &AdviceContext<'_>) -> Option<AdviceOutcome> {
        match ctx.session {
            None => Some(AdviceOutcome::HandshakeRequired),
            Some(session) if !session.is_connected() => Some(AdviceOutcome::SessionClosed),
            Some(_) => None,
        }
    }
}

/// Reports the throttle's refusal.
#[derive(Debug, Default)]
pub struct MultiSessionPolicy;

impl AdvicePolicy for MultiSessionPolicy {
    fn name(&self) -> &'static str {
        "multi_session"
    }

    fn evaluate(&self, ctx: &AdviceContext<'_>) -> Option<AdviceOutcome> {
        ctx.throttle_denied.then_some(AdviceOutcome::MultipleSessions)
    }
}

/// Tells every client to stop once the server is shutting down.
#[derive(Debug, Clone, Default)]
pub struct ShutdownPolicy {
    shutting_down: Arc<AtomicBool>,
}

impl ShutdownPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.shutting_down.store(true, Ordering::Release);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }
}

impl AdvicePolicy for ShutdownPolicy {
    fn name(&self) -> &'static str {
        "shutdown"
    }

    fn evaluate(&self, _ctx: &AdviceContext<'_>) -> Option<AdviceOutcome> {
        self.is_shutting_down()
            .then_some(AdviceOutcome::ServerUnavailable)
    }
}
