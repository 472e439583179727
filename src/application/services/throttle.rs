//! Browser Throttle
//!
//! Limits how many sessions of one browser may hold a suspended long poll at
//! once. Browsers cap concurrent connections per host, so tabs that each hold
//! a long poll would starve every other request of that browser.
//!
//! Sessions over the cap are staggered: each waits a fraction of
//! `multiSessionInterval` proportional to its join rank, then suspends for
//! what is left of its timeout. Only when staggering is disabled or would
//! consume the whole timeout is the connect denied.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::entities::{ServerSession, SiblingRank};
use crate::domain::value_objects::{BrowserId, SessionId};
use crate::infrastructure::metrics;
use crate::infrastructure::registry::BrowserRegistry;

/// Result of admitting a connect.
#[derive(Debug)]
pub enum ThrottleDecision {
    /// Suspend now; the slot (if the session is throttled at all) is held
    /// until the guard drops
    Proceed(Option<SuspendedSlot>),
    /// Hold the connect for the given delay, then suspend
    DelayThenProceed(Duration),
    /// Answer immediately with `none` and the `multiple-clients` marker
    DenyWithAdvice,
}

impl ThrottleDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThrottleDecision::Proceed(_) => "proceed",
            ThrottleDecision::DelayThenProceed(_) => "delay",
            ThrottleDecision::DenyWithAdvice => "deny",
        }
    }
}

/// A held suspension slot; vacated on drop.
#[derive(Debug)]
pub struct SuspendedSlot {
    registry: Arc<BrowserRegistry>,
    browser_id: BrowserId,
    session_id: SessionId,
}

impl Drop for SuspendedSlot {
    fn drop(&mut self) {
        self.registry.release(&self.browser_id, &self.session_id);
    }
}

#[derive(Debug, Clone)]
pub struct BrowserThrottle {
    registry: Arc<BrowserRegistry>,
    max_sessions: usize,
    multi_session_interval: Duration,
}

impl BrowserThrottle {
    pub fn new(
        registry: Arc<BrowserRegistry>,
        max_sessions: usize,
        multi_session_interval: Duration,
    ) -> Self {
        Self {
            registry,
            max_sessions,
            multi_session_interval,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_sessions > 0
    }

    /// Stagger delay for a refused session, or `None` when it must be denied.
    pub fn stagger(&self, rank: SiblingRank, timeout: Duration) -> Option<Duration> {
        if self.multi_session_interval.is_zero() {
            return None;
        }
        let delay = self.multi_session_interval * (rank.rank as u32 + 1)
            / (rank.siblings as u32 + 1);
        (delay < timeout).then_some(delay)
    }

    /// Decide how a connect that would suspend for `timeout` proceeds.
    pub fn admit(&self, session: &ServerSession, timeout: Duration) -> ThrottleDecision {
        let decision = self.decide(session, timeout);
        metrics::record_throttle_decision(decision.as_str());
        decision
    }

    fn decide(&self, session: &ServerSession, timeout: Duration) -> ThrottleDecision {
        let Some(browser_id) = session.browser_id() else {
            return ThrottleDecision::Proceed(None);
        };
        if !self.is_enabled() {
            return ThrottleDecision::Proceed(None);
        }

        match self
            .registry
            .try_suspend(browser_id, session.id(), self.max_sessions)
        {
            Ok(()) => ThrottleDecision::Proceed(Some(self.slot(browser_id, session.id()))),
            Err(rank) => match self.stagger(rank, timeout) {
                Some(delay) => {
                    tracing::debug!(
                        session_id = %session.id(),
                        browser_id = %browser_id,
                        rank = rank.rank,
                        siblings = rank.siblings,
                        delay_ms = delay.as_millis() as u64,
                        "Staggering connect"
                    );
                    ThrottleDecision::DelayThenProceed(delay)
                }
                None => {
                    tracing::info!(
                        session_id = %session.id(),
                        browser_id = %browser_id,
                        siblings = rank.siblings,
                        "Denying connect: too many sessions for browser"
                    );
                    ThrottleDecision::DenyWithAdvice
                }
            },
        }
    }

    /// Wait out a stagger delay, then take a slot.
    ///
    /// Returns `None` if the session disconnected during the delay.
    pub async fn hold(&self, session: &ServerSession, delay: Duration) -> Option<SuspendedSlot> {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = session.cancelled() => {
                tracing::debug!(session_id = %session.id(), "Stagger delay cancelled");
                return None;
            }
        }
        let browser_id = session.browser_id()?;
        if self.registry.force_suspend(browser_id, session.id()) {
            Some(self.slot(browser_id, session.id()))
        } else {
            None
        }
    }

    fn slot(&self, browser_id: &BrowserId, session_id: &SessionId) -> SuspendedSlot {
        SuspendedSlot {
            registry: self.registry.clone(),
            browser_id: browser_id.clone(),
            session_id: session_id.clone(),
        }
    }
}
