use std::net::Ipv4Addr;
use std::ops::RangeInclusive;
use std::time::Duration;

use glam::Vec3;

use crate::net::{Channel, DEFAULT_CHANNELS, DEFAULT_QUEUE_CAPACITY};

/// Frame sync is meant to run on every Nth simulation frame. The caller owns
/// the frame counter.
pub const FRAME_SYNC_INTERVAL: u32 = 3;

#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Channel 0 is the primary pair; the rest are fallbacks, tried in order.
    pub channels: Vec<Channel>,
    /// Only used when every channel fails to bind.
    pub dynamic_port_ranges: Vec<RangeInclusive<u16>>,
    /// Client discovery socket port = channel 0 discovery port + this offset.
    pub client_discovery_offset: u16,
    pub broadcast_addr: Ipv4Addr,
    pub queue_capacity: usize,
    pub max_packets_per_frame: usize,
    pub session_poll_timeout: Duration,
    pub discovery_poll_timeout: Duration,
    pub worker_idle_sleep: Duration,
    pub keepalive_interval: Duration,
    /// How long to wait for a DiscoverReply on each channel.
    pub discovery_timeout: Duration,
    pub join_retry_interval: Duration,
    pub ping_interval: Duration,
    pub channel_scan_interval: Duration,
    /// Evict clients not heard from for this long. `None` keeps them forever.
    pub client_timeout: Option<Duration>,
    /// A joined client that hears nothing from its host for this long goes
    /// back to sending Join. Pings are echoed every `ping_interval`, so this
    /// should be several of those.
    pub host_timeout: Option<Duration>,
    pub spawn_position: Vec3,
    pub spawn_rotation: Vec3,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            channels: DEFAULT_CHANNELS.to_vec(),
            dynamic_port_ranges: vec![49152..=49999, 50000..=54999, 55000..=59999],
            client_discovery_offset: 1000,
            broadcast_addr: Ipv4Addr::BROADCAST,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_packets_per_frame: 64,
            session_poll_timeout: Duration::from_millis(50),
            discovery_poll_timeout: Duration::from_millis(10),
            worker_idle_sleep: Duration::from_millis(1),
            keepalive_interval: Duration::from_millis(200),
            discovery_timeout: Duration::from_secs(1),
            join_retry_interval: Duration::from_millis(500),
            ping_interval: Duration::from_secs(1),
            channel_scan_interval: Duration::from_secs(30),
            client_timeout: None,
            host_timeout: Some(Duration::from_secs(5)),
            spawn_position: Vec3::new(0.0, 1.0, 0.0),
            spawn_rotation: Vec3::ZERO,
        }
    }
}

impl NetConfig {
    /// A config whose channel table starts at `base_port`, spacing pairs the
    /// same way as the default table.
    pub fn with_base_port(base_port: u16) -> Self {
        let channels = (0..DEFAULT_CHANNELS.len() as u16)
            .filter_map(|i| {
                let session = base_port.checked_add(i * 10)?;
                Some(Channel::new(session, session.checked_add(1)?))
            })
            .collect();
        Self {
            channels,
            ..Default::default()
        }
    }

    pub fn client_discovery_port(&self) -> u16 {
        self.channels
            .first()
            .and_then(|c| c.discovery_port.checked_add(self.client_discovery_offset))
            .unwrap_or(0)
    }
}
