//! Browser group entity.
//!
//! Groups the sessions that presented the same browser token, and tracks
//! which of them currently hold a suspended long poll.

use std::collections::HashSet;

use crate::domain::value_objects::{BrowserId, SessionId};

/// Sibling position of a session inside its browser group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiblingRank {
    /// Zero-based join position
    pub rank: usize,
    /// Number of sessions in the group
    pub siblings: usize,
}

#[derive(Debug, Clone)]
pub struct BrowserGroup {
    browser_id: BrowserId,
    /// Join order
    sessions: Vec<SessionId>,
    suspended: HashSet<SessionId>,
}

impl BrowserGroup {
    pub fn new(browser_id: BrowserId) -> Self {
        Self {
            browser_id,
            sessions: Vec::new(),
            suspended: HashSet::new(),
        }
    }

    pub fn browser_id(&self) -> &BrowserId {
        &self.browser_id
    }

    pub fn join(&mut self, session_id: &SessionId) {
        if !self.sessions.contains(session_id) {
            self.sessions.push(session_id.clone());
        }
    }

    pub fn leave(&mut self, session_id: &SessionId) -> bool {
        self.suspended.remove(session_id);
        let before = self.sessions.len();
        self.sessions.retain(|s| s != session_id);
        before != self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn sessions(&self) -> &[SessionId] {
        &self.sessions
    }

    pub fn rank_of(&self, session_id: &SessionId) -> SiblingRank {
        let rank = self
            .sessions
            .iter()
            .position(|s| s == session_id)
            .unwrap_or(self.sessions.len());
        SiblingRank {
            rank,
            siblings: self.sessions.len(),
        }
    }

    pub fn suspended_count(&self) -> usize {
        self.suspended.len()
    }

    pub fn is_suspended(&self, session_id: &SessionId) -> bool {
        self.suspended.contains(session_id)
    }

    /// Take a suspension slot if fewer than `max` are taken.
    ///
    /// A session already holding a slot keeps it.
    pub fn try_suspend(&mut self, session_id: &SessionId, max: usize) -> bool {
        if self.suspended.contains(session_id) {
            return true;
        }
        if self.suspended.len() < max {
            self.suspended.insert(session_id.clone());
            true
        } else {
            false
        }
    }

    /// Take a slot regardless of the cap (after a stagger delay).
    pub fn force_suspend(&mut self, session_id: &SessionId) {
        self.suspended.insert(session_id.clone());
    }

    pub fn release(&mut self, session_id: &SessionId) -> bool {
        self.suspended.remove(session_id)
    }
}
