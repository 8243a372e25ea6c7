//! Channel registry
//!
//! Which local connections are members of which channel, and under what display
//! name. Owned by one worker; other workers keep their own and may disagree.
//! All operations are synchronous and hold the lock only for the map update.

use std::collections::HashMap;

use parking_lot::Mutex;
use relay_core::ChannelId;

#[derive(Debug)]
struct Channel {
    name: String,
    /// connection id -> display name
    members: HashMap<String, String>,
}

impl Channel {
    fn new(id: &ChannelId) -> Self {
        Self {
            name: id.default_display_name(),
            members: HashMap::new(),
        }
    }

    fn sorted_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.members.values().cloned().collect();
        names.sort();
        names
    }
}

/// Per-worker channel membership
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: Mutex<HashMap<ChannelId, Channel>>,
}

impl ChannelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or rename a member, creating the channel on first use
    ///
    /// Returns the sorted display names of all members afterwards.
    pub fn join(&self, channel_id: &ChannelId, connection_id: &str, display_name: &str) -> Vec<String> {
        let mut channels = self.channels.lock();
        let channel = channels
            .entry(channel_id.clone())
            .or_insert_with(|| Channel::new(channel_id));

        channel
            .members
            .insert(connection_id.to_string(), display_name.to_string());
        channel.sorted_names()
    }

    /// Remove a connection from every channel
    ///
    /// Returns the `(channel, display name)` pairs it was removed from.
    pub fn leave(&self, connection_id: &str) -> Vec<(ChannelId, String)> {
        let mut channels = self.channels.lock();
        let mut removed: Vec<(ChannelId, String)> = channels
            .iter_mut()
            .filter_map(|(id, channel)| {
                channel
                    .members
                    .remove(connection_id)
                    .map(|name| (id.clone(), name))
            })
            .collect();
        removed.sort_by(|a, b| a.0.cmp(&b.0));
        removed
    }

    /// Remove a connection from one channel; returns its display name there
    pub fn leave_channel(&self, channel_id: &ChannelId, connection_id: &str) -> Option<String> {
        self.channels
            .lock()
            .get_mut(channel_id)
            .and_then(|channel| channel.members.remove(connection_id))
    }

    /// Sorted display names of a channel's members
    pub fn members(&self, channel_id: &ChannelId) -> Vec<String> {
        self.channels
            .lock()
            .get(channel_id)
            .map(Channel::sorted_names)
            .unwrap_or_default()
    }

    /// Connection ids of a channel's members
    pub fn connections(&self, channel_id: &ChannelId) -> Vec<String> {
        self.channels
            .lock()
            .get(channel_id)
            .map(|channel| channel.members.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Display name a connection joined a channel under
    pub fn member_name(&self, channel_id: &ChannelId, connection_id: &str) -> Option<String> {
        self.channels
            .lock()
            .get(channel_id)
            .and_then(|channel| channel.members.get(connection_id).cloned())
    }

    pub fn channel_name(&self, channel_id: &ChannelId) -> Option<String> {
        self.channels
            .lock()
            .get(channel_id)
            .map(|channel| channel.name.clone())
    }

    /// Channels created on this worker, including empty ones
    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn has_local_members(&self, channel_id: &ChannelId) -> bool {
        self.channels
            .lock()
            .get(channel_id)
            .is_some_and(|channel| !channel.members.is_empty())
    }

    /// Drop all channels and memberships
    pub fn clear(&self) {
        self.channels.lock().clear();
    }
}
