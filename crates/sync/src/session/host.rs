use std::net::SocketAddr;
use std::time::Duration;

use glam::Vec3;
use parking_lot::Mutex;

use super::connection::{ClientList, ClientRecord};
use crate::net::{
    BulletPacket, ChannelInfo, FRAME_SYNC_IDS, HOST_ID, InputPacket, MAX_STATE_OBJECTS, ObjectState,
    PingPacket, StatePacket, Transport, UNASSIGNED_ID, encode_bullet, encode_join_ack, encode_ping,
    encode_state,
};
use crate::world::{SyncEntity, WorldObjects};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    pub player_id: u32,
    /// False when the sender was already registered.
    pub is_new: bool,
}

/// Everything the worker and the simulation thread both touch.
#[derive(Debug)]
struct HostState {
    clients: ClientList,
    next_keepalive: usize,
    sequence: u32,
    pose: ObjectState,
}

impl HostState {
    fn next_sequence(&mut self) -> u32 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    /// Refreshes `last_seen` for a registered sender. False only for a
    /// sender that timed out and has not rejoined.
    fn touch(&mut self, from: &SocketAddr) -> bool {
        if let Some(client) = self.clients.get_by_addr_mut(from) {
            client.touch();
            return true;
        }
        !self.clients.is_departed(from)
    }
}

/// The authoritative side of a session. Shared between the simulation thread
/// and the worker; every method holds the state lock for its whole body.
#[derive(Debug)]
pub struct Host {
    transport: Transport,
    channel: Option<usize>,
    discovery_port: u16,
    spawn_position: Vec3,
    spawn_rotation: Vec3,
    state: Mutex<HostState>,
}

impl Host {
    pub fn new(
        transport: Transport,
        channel: Option<usize>,
        discovery_port: u16,
        spawn_position: Vec3,
        spawn_rotation: Vec3,
    ) -> Self {
        Self {
            transport,
            channel,
            discovery_port,
            spawn_position,
            spawn_rotation,
            state: Mutex::new(HostState {
                clients: ClientList::new(),
                next_keepalive: 0,
                sequence: 0,
                pose: ObjectState::zeroed(HOST_ID),
            }),
        }
    }

    pub fn session_port(&self) -> u16 {
        self.transport.port()
    }

    pub fn channel(&self) -> Option<usize> {
        self.channel
    }

    pub fn client_count(&self) -> usize {
        self.state.lock().clients.len()
    }

    pub fn client_ids(&self) -> Vec<u32> {
        self.state.lock().clients.ids()
    }

    pub fn client_addr(&self, player_id: u32) -> Option<SocketAddr> {
        self.state.lock().clients.get(player_id).map(|c| c.addr)
    }

    /// Stores the host entity's pose for sends that cannot reach the world.
    pub fn cache_local_pose(&self, position: Vec3, rotation: Vec3) {
        self.state.lock().pose = ObjectState::new(HOST_ID, position, rotation);
    }

    /// A known address gets its ack re-sent. An address that timed out gets
    /// its old id back.
    pub fn handle_join<W: WorldObjects>(&self, from: SocketAddr, world: &mut W) -> JoinOutcome {
        let mut state = self.state.lock();

        if let Some(existing) = state.clients.get_by_addr_mut(&from) {
            existing.touch();
            let player_id = existing.player_id;
            log::debug!("Duplicate join from {}, re-sending ack for player {}", from, player_id);
            self.transport.send_to(from, &encode_join_ack(player_id));
            return JoinOutcome {
                player_id,
                is_new: false,
            };
        }

        let player_id = match state.clients.take_departed(&from) {
            Some(record) => {
                log::info!("Player {} rejoined from {}", record.player_id, from);
                record.player_id
            }
            None => {
                let player_id = state.clients.allocate_id(|id| world.contains(id));
                log::info!("Player {} joined from {}", player_id, from);
                player_id
            }
        };
        state.clients.push(ClientRecord::new(from, player_id));

        if !world.contains(player_id) {
            let object = world.get_or_spawn(player_id);
            object.set_position(self.spawn_position);
            object.set_rotation(self.spawn_rotation);
        }

        self.transport.send_to(from, &encode_join_ack(player_id));

        JoinOutcome {
            player_id,
            is_new: true,
        }
    }

    /// Applies the move delta as-is. Returns false if no such object exists.
    pub fn handle_input<W: WorldObjects>(&self, packet: &InputPacket, world: &mut W) -> bool {
        let mut state = self.state.lock();

        if let Some(client) = state.clients.get_mut(packet.player_id) {
            client.touch();
        } else if state.clients.is_departed_id(packet.player_id) {
            log::trace!("Input for timed-out player {}", packet.player_id);
            return false;
        }

        match world.get_mut(packet.player_id) {
            Some(object) => {
                let position = object.position() + packet.movement;
                object.set_position(position);
                true
            }
            None => {
                log::trace!("Input for unknown player {}", packet.player_id);
                false
            }
        }
    }

    /// Overwrites poses reported by a client. The host entity is never
    /// overwritten, and timed-out senders are ignored until they rejoin.
    /// Returns how many entries were applied.
    pub fn handle_client_state<W: WorldObjects>(
        &self,
        from: SocketAddr,
        packet: &StatePacket,
        world: &mut W,
    ) -> usize {
        let mut state = self.state.lock();
        if !state.touch(&from) {
            log::trace!("State from timed-out client {}", from);
            return 0;
        }

        let mut applied = 0;
        for object in &packet.objects {
            if object.id == HOST_ID || object.id == UNASSIGNED_ID {
                continue;
            }
            world.get_or_spawn(object.id).apply_pose(object);
            applied += 1;
        }
        applied
    }

    /// Echoes the ping. Timed-out clients get no echo, so they notice the
    /// silence and rejoin.
    pub fn handle_ping(&self, from: SocketAddr, ping: &PingPacket) -> bool {
        let mut state = self.state.lock();
        if !state.touch(&from) {
            return false;
        }
        self.transport.send_to(from, &encode_ping(ping))
    }

    /// Forwards a client's bullet to every other client.
    pub fn relay_bullet(&self, from: SocketAddr, bullet: &BulletPacket) -> usize {
        let mut state = self.state.lock();
        if !state.touch(&from) {
            return 0;
        }

        let bytes = encode_bullet(bullet);
        state
            .clients
            .iter()
            .filter(|c| c.addr != from)
            .filter(|c| self.transport.send_to(c.addr, &bytes))
            .count()
    }

    pub fn send_bullet(&self, origin: Vec3, direction: Vec3) -> usize {
        let state = self.state.lock();
        let bytes = encode_bullet(&BulletPacket {
            owner_id: HOST_ID,
            origin,
            direction,
        });
        state
            .clients
            .iter()
            .filter(|c| self.transport.send_to(c.addr, &bytes))
            .count()
    }

    /// Sends the cached host pose to one client, rotating through the list
    /// on each call. Returns the player it went to.
    pub fn send_state_round_robin(&self) -> Option<u32> {
        let mut state = self.state.lock();
        if state.clients.is_empty() {
            return None;
        }

        let index = state.next_keepalive % state.clients.len();
        state.next_keepalive = (index + 1) % state.clients.len();

        let sequence = state.next_sequence();
        let bytes = encode_state(sequence, &[state.pose]);
        let client = state.clients.at(index)?;
        self.transport.send_to(client.addr, &bytes);

        Some(client.player_id)
    }

    /// Host entity plus every client's object (zeroed if missing), sent to
    /// each client individually. Entries past [`MAX_STATE_OBJECTS`] are left
    /// out. Returns the number of successful sends.
    pub fn send_state_to_all<E: SyncEntity, W: WorldObjects>(&self, local: &E, world: &W) -> usize {
        let mut state = self.state.lock();
        state.pose = ObjectState::new(HOST_ID, local.position(), local.rotation());

        let mut objects = Vec::with_capacity(MAX_STATE_OBJECTS.min(state.clients.len() + 1));
        objects.push(state.pose);
        if state.clients.len() >= MAX_STATE_OBJECTS {
            log::debug!(
                "{} clients exceed one state packet, sending the first {}",
                state.clients.len(),
                MAX_STATE_OBJECTS - 1
            );
        }
        for client in state.clients.iter().take(MAX_STATE_OBJECTS - 1) {
            objects.push(
                world
                    .pose_of(client.player_id)
                    .unwrap_or_else(|| ObjectState::zeroed(client.player_id)),
            );
        }

        let sequence = state.next_sequence();
        let bytes = encode_state(sequence, &objects);
        state
            .clients
            .iter()
            .filter(|c| self.transport.send_to(c.addr, &bytes))
            .count()
    }

    /// Fixed-id state exchange. Does nothing until a client has joined.
    pub fn frame_sync<E: SyncEntity, W: WorldObjects>(&self, local: &E, world: &W) -> bool {
        let mut state = self.state.lock();
        state.pose = ObjectState::new(HOST_ID, local.position(), local.rotation());
        if state.clients.is_empty() {
            return false;
        }

        let objects: Vec<ObjectState> = FRAME_SYNC_IDS
            .iter()
            .filter_map(|&id| {
                if id == HOST_ID {
                    Some(state.pose)
                } else {
                    world.pose_of(id)
                }
            })
            .collect();

        let sequence = state.next_sequence();
        let bytes = encode_state(sequence, &objects);
        state
            .clients
            .iter()
            .filter(|c| self.transport.send_to(c.addr, &bytes))
            .count()
            > 0
    }

    pub fn channel_info(&self) -> ChannelInfo {
        let state = self.state.lock();
        ChannelInfo {
            channel_id: self.channel.map_or(u32::MAX, |c| c as u32),
            user_count: state.clients.len() as u32 + 1,
            base_port: u32::from(self.transport.port()),
            discovery_port: u32::from(self.discovery_port),
        }
    }

    pub fn evict_stale(&self, timeout: Duration) -> Vec<u32> {
        let mut state = self.state.lock();
        let evicted = state.clients.remove_timed_out(timeout);
        for player_id in &evicted {
            log::info!("Player {} timed out", player_id);
        }
        if !state.clients.is_empty() {
            state.next_keepalive %= state.clients.len();
        } else {
            state.next_keepalive = 0;
        }
        evicted
    }
}
