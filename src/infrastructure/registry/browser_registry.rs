//! Browser registry: browser token to sibling sessions.
//!
//! Every mutation goes through the map's entry lock, so counting the
//! suspended siblings and taking a slot happen as one step.

use dashmap::DashMap;

use crate::domain::entities::{BrowserGroup, SiblingRank};
use crate::domain::value_objects::{BrowserId, SessionId};

#[derive(Debug, Default)]
pub struct BrowserRegistry {
    groups: DashMap<BrowserId, BrowserGroup>,
}

impl BrowserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, browser_id: &BrowserId, session_id: &SessionId) {
        self.groups
            .entry(browser_id.clone())
            .or_insert_with(|| BrowserGroup::new(browser_id.clone()))
            .join(session_id);
    }

    /// Remove a session; the group is dropped once empty.
    pub fn leave(&self, browser_id: &BrowserId, session_id: &SessionId) {
        if let Some(mut group) = self.groups.get_mut(browser_id) {
            group.leave(session_id);
        }
        self.groups.remove_if(browser_id, |_, group| group.is_empty());
    }

    /// Atomically take a suspension slot when fewer than `max` are held.
    ///
    /// On refusal returns the session's rank among its siblings.
    pub fn try_suspend(
        &self,
        browser_id: &BrowserId,
        session_id: &SessionId,
        max: usize,
    ) -> Result<(), SiblingRank> {
        let mut group = self
            .groups
            .entry(browser_id.clone())
            .or_insert_with(|| BrowserGroup::new(browser_id.clone()));
        group.join(session_id);
        if group.try_suspend(session_id, max) {
            Ok(())
        } else {
            Err(group.rank_of(session_id))
        }
    }

    /// Take a slot after a stagger delay, regardless of the cap.
    ///
    /// Returns `false` if the session left its group meanwhile.
    pub fn force_suspend(&self, browser_id: &BrowserId, session_id: &SessionId) -> bool {
        match self.groups.get_mut(browser_id) {
            Some(mut group) if group.sessions().contains(session_id) => {
                group.force_suspend(session_id);
                true
            }
            _ => false,
        }
    }

    pub fn release(&self, browser_id: &BrowserId, session_id: &SessionId) {
        if let Some(mut group) = self.groups.get_mut(browser_id) {
            group.release(session_id);
        }
    }

    pub fn suspended_count(&self, browser_id: &BrowserId) -> usize {
        self.groups
            .get(browser_id)
            .map(|group| group.suspended_count())
            .unwrap_or(0)
    }

    pub fn group_len(&self, browser_id: &BrowserId) -> usize {
        self.groups
            .get(browser_id)
            .map(|group| group.len())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
