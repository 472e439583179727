//! Channel registry: exact channel name to subscribed sessions.

use std::collections::HashSet;

use dashmap::DashMap;

use crate::domain::value_objects::SessionId;

#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: DashMap<String, HashSet<SessionId>>,
    /// Reverse index for cleanup on session removal
    by_session: DashMap<SessionId, HashSet<String>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the session was already subscribed.
    pub fn subscribe(&self, channel: &str, session_id: &SessionId) -> bool {
        let inserted = self
            .channels
            .entry(channel.to_string())
            .or_default()
            .insert(session_id.clone());
        self.by_session
            .entry(session_id.clone())
            .or_default()
            .insert(channel.to_string());
        inserted
    }

    pub fn unsubscribe(&self, channel: &str, session_id: &SessionId) -> bool {
        let removed = self
            .channels
            .get_mut(channel)
            .map(|mut subscribers| subscribers.remove(session_id))
            .unwrap_or(false);
        self.channels.remove_if(channel, |_, subscribers| subscribers.is_empty());

        if let Some(mut channels) = self.by_session.get_mut(session_id) {
            channels.remove(channel);
        }
        self.by_session
            .remove_if(session_id, |_, channels| channels.is_empty());
        removed
    }

    pub fn subscribers(&self, channel: &str) -> Vec<SessionId> {
        self.channels
            .get(channel)
            .map(|subscribers| subscribers.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscriptions(&self, session_id: &SessionId) -> Vec<String> {
        self.by_session
            .get(session_id)
            .map(|channels| channels.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop every subscription held by a session.
    pub fn remove_session(&self, session_id: &SessionId) {
        let Some((_, channels)) = self.by_session.remove(session_id) else {
            return;
        };
        for channel in channels {
            if let Some(mut subscribers) = self.channels.get_mut(&channel) {
                subscribers.remove(session_id);
            }
            self.channels
                .remove_if(&channel, |_, subscribers| subscribers.is_empty());
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
