use std::time::Instant;

/// One (session, discovery) port pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channel {
    pub session_port: u16,
    pub discovery_port: u16,
}

impl Channel {
    pub const fn new(session_port: u16, discovery_port: u16) -> Self {
        Self {
            session_port,
            discovery_port,
        }
    }
}

pub const DEFAULT_CHANNELS: [Channel; 4] = [
    Channel::new(7777, 7778),
    Channel::new(7787, 7788),
    Channel::new(7797, 7798),
    Channel::new(7807, 7808),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelUsage {
    pub user_count: u32,
    pub updated_at: Option<Instant>,
}

/// The fixed channel table plus whatever usage has been reported for it.
#[derive(Debug, Clone)]
pub struct ChannelTable {
    channels: Vec<Channel>,
    usage: Vec<ChannelUsage>,
}

impl ChannelTable {
    pub fn new(channels: Vec<Channel>) -> Self {
        let usage = vec![ChannelUsage::default(); channels.len()];
        Self { channels, usage }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<Channel> {
        self.channels.get(id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, Channel)> + '_ {
        self.channels.iter().copied().enumerate()
    }

    pub fn by_discovery_port(&self, port: u16) -> Option<(usize, Channel)> {
        self.iter().find(|(_, c)| c.discovery_port == port)
    }

    pub fn by_session_port(&self, port: u16) -> Option<(usize, Channel)> {
        self.iter().find(|(_, c)| c.session_port == port)
    }

    pub fn usage(&self, id: usize) -> Option<ChannelUsage> {
        self.usage.get(id).copied()
    }

    /// How many channels have had a usage report.
    pub fn reported(&self) -> usize {
        self.usage.iter().filter(|u| u.updated_at.is_some()).count()
    }

    pub fn record_usage(&mut self, id: usize, user_count: u32) -> bool {
        let Some(usage) = self.usage.get_mut(id) else {
            return false;
        };
        usage.user_count = user_count;
        usage.updated_at = Some(Instant::now());
        true
    }

    /// Lowest reported user count; ties go to the lowest id, so with no
    /// reports at all this is channel 0.
    pub fn least_crowded(&self) -> usize {
        self.usage
            .iter()
            .enumerate()
            .min_by_key(|(id, usage)| (usage.user_count, *id))
            .map(|(id, _)| id)
            .unwrap_or(0)
    }

    /// Channel ids starting at `first` and wrapping around.
    pub fn order_from(&self, first: usize) -> Vec<usize> {
        let len = self.channels.len();
        if len == 0 {
            return Vec::new();
        }
        (0..len).map(|offset| (first + offset) % len).collect()
    }
}

impl Default for ChannelTable {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNELS.to_vec())
    }
}
