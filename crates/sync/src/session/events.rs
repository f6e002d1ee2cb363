use std::net::SocketAddr;

use glam::Vec3;

use crate::input::InputRecord;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Hosting {
        addr: SocketAddr,
        channel: Option<usize>,
    },
    HostFound {
        addr: SocketAddr,
        channel: usize,
    },
    Joined {
        player_id: u32,
    },
    ClientJoined {
        player_id: u32,
        addr: SocketAddr,
    },
    ClientTimedOut {
        player_id: u32,
    },
    /// Client side: the host went quiet and the session is rejoining.
    HostLost {
        addr: SocketAddr,
    },
    /// Host side: input intent applied to a client's object.
    Input {
        player_id: u32,
        record: InputRecord,
    },
    BulletFired {
        owner_id: u32,
        origin: Vec3,
        direction: Vec3,
    },
    ChannelReport {
        channel: usize,
        user_count: u32,
    },
}
