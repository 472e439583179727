//! Inactivity Monitor
//!
//! Ends sessions that stay connected but silent. In `client` mode only
//! messages published by the client count as activity; in `client-server`
//! mode messages queued to the client count too, and a session is inactive
//! only when both directions are stale.
//!
//! The monitor works two ways: a periodic check resumes the suspended connect
//! of every inactive session, and as an [`AdvicePolicy`] it turns the
//! resulting reply (or any later connect) into `none`.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::{ActivitySettings, InactivityMode};
use crate::domain::entities::{ServerSession, WakeReason};
use crate::domain::services::{AdviceContext, AdviceOutcome, AdvicePolicy};
use crate::infrastructure::registry::SessionDirectory;

#[derive(Debug)]
pub struct InactivityMonitor {
    directory: Arc<SessionDirectory>,
    mode: InactivityMode,
    max_inactivity: Duration,
}

impl InactivityMonitor {
    pub fn new(settings: &ActivitySettings, directory: Arc<SessionDirectory>) -> Self {
        Self {
            directory,
            mode: settings.mode,
            max_inactivity: settings.max_inactivity(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.max_inactivity.is_zero()
    }

    pub fn mode(&self) -> InactivityMode {
        self.mode
    }

    pub fn is_inactive(&self, session: &ServerSession, now: Instant) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let stale = |at: Instant| now.saturating_duration_since(at) > self.max_inactivity;
        match self.mode {
            InactivityMode::ClientOnly => stale(session.last_client_activity()),
            InactivityMode::ClientAndServer => {
                stale(session.last_client_activity()) && stale(session.last_server_activity())
            }
        }
    }

    /// Resume the suspended connect of every inactive session.
    ///
    /// Returns how many connects were resumed.
    pub fn check(&self, now: Instant) -> usize {
        if !self.is_enabled() {
            return 0;
        }
        let mut resumed = 0;
        for session in self.directory.snapshot() {
            if !session.is_connected() || !self.is_inactive(&session, now) {
                continue;
            }
            if session.claim(WakeReason::Cancelled) {
                tracing::info!(
                    session_id = %session.id(),
                    mode = ?self.mode,
                    "Resuming connect of inactive session"
                );
                resumed += 1;
            }
        }
        resumed
    }

    /// Periodic check until `shutdown` fires.
    pub async fn run(self: Arc<Self>, period: Duration, shutdown: CancellationToken) {
        if !self.is_enabled() {
            tracing::debug!("Inactivity monitor disabled");
            return;
        }
        tracing::info!(
            max_inactivity_ms = self.max_inactivity.as_millis() as u64,
            mode = ?self.mode,
            "Inactivity monitor started"
        );

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check(Instant::now());
                }
                _ = shutdown.cancelled() => {
                    tracing::debug!("Inactivity monitor stopped");
                    break;
                }
            }
        }
    }
}

impl AdvicePolicy for InactivityMonitor {
    fn name(&self) -> &'static str {
        "inactivity"
    }

    fn evaluate(&self, ctx: &AdviceContext<'_>) -> Option<AdviceOutcome> {
        // A message that won the race is delivered with retry; the next
        // connect re-evaluates.
        if ctx.wake == Some(WakeReason::Message) {
            return None;
        }
        let session = ctx.session?;
        (session.is_connected() && self.is_inactive(session, ctx.now))
            .then_some(AdviceOutcome::ClientInactive)
    }
}
