use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use glam::Vec3;

use crate::error::{NetError, NetResult};
use crate::input::InputRecord;
use crate::net::{
    BulletPacket, Channel, ChannelTable, FRAME_SYNC_IDS, ObjectState, PacketKind, PingPacket,
    StatePacket, Transport, UNASSIGNED_ID, encode_bullet, encode_input, encode_ping, encode_signal,
    encode_state,
};
use crate::world::{SyncEntity, WorldObjects};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPhase {
    Idle,
    Discovering,
    Joining,
    Joined,
}

/// The mirroring side of a session. Owned by the simulation thread.
#[derive(Debug)]
pub struct Client {
    session: Transport,
    discovery: Transport,
    broadcast_addr: Ipv4Addr,
    phase: ClientPhase,
    host_addr: Option<SocketAddr>,
    assigned_id: u32,
    sequence: u32,
    join_sent_at: Option<Instant>,
    ping_sent_at: Option<Instant>,
    /// Last datagram from the host since the current join.
    last_heard: Option<Instant>,
    rtt_ms: Option<u32>,
    started: Instant,
}

impl Client {
    pub fn new(session: Transport, discovery: Transport, broadcast_addr: Ipv4Addr) -> Self {
        Self {
            session,
            discovery,
            broadcast_addr,
            phase: ClientPhase::Idle,
            host_addr: None,
            assigned_id: UNASSIGNED_ID,
            sequence: 0,
            join_sent_at: None,
            ping_sent_at: None,
            last_heard: None,
            rtt_ms: None,
            started: Instant::now(),
        }
    }

    pub fn phase(&self) -> ClientPhase {
        self.phase
    }

    pub fn assigned_id(&self) -> u32 {
        self.assigned_id
    }

    pub fn is_joined(&self) -> bool {
        self.assigned_id != UNASSIGNED_ID
    }

    pub fn host_addr(&self) -> Option<SocketAddr> {
        self.host_addr
    }

    pub fn rtt_ms(&self) -> Option<u32> {
        self.rtt_ms
    }

    fn next_sequence(&mut self) -> u32 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    fn now_ms(&self) -> u32 {
        self.started.elapsed().as_millis() as u32
    }

    /// Host address, but only once the handshake has finished.
    fn joined_host(&self) -> Option<SocketAddr> {
        if self.is_joined() { self.host_addr } else { None }
    }

    pub fn broadcast_discover(&self, channel: Channel) -> bool {
        self.discovery.send_broadcast(
            self.broadcast_addr,
            channel.discovery_port,
            &encode_signal(PacketKind::Discover),
        )
    }

    /// Broadcasts Discover on each channel in `order` and waits up to
    /// `timeout` per channel for the worker to hand over a reply. The reply's
    /// source port names the channel, which gives the session port.
    pub fn discover_and_join(
        &mut self,
        replies: &Receiver<SocketAddr>,
        channels: &ChannelTable,
        order: &[usize],
        timeout: Duration,
    ) -> NetResult<(usize, SocketAddr)> {
        while replies.try_recv().is_ok() {}
        self.phase = ClientPhase::Discovering;

        for &id in order {
            let Some(channel) = channels.get(id) else {
                continue;
            };

            log::info!(
                "Looking for a host on channel {} (discovery port {})",
                id,
                channel.discovery_port
            );
            if !self.broadcast_discover(channel) {
                log::debug!("Discover broadcast on channel {} was not sent", id);
                continue;
            }

            let deadline = Instant::now() + timeout;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }

                match replies.recv_timeout(remaining) {
                    Ok(source) => {
                        let Some((found_id, found)) = channels.by_discovery_port(source.port())
                        else {
                            log::debug!("Ignoring discovery reply from unknown port {}", source);
                            continue;
                        };
                        let host = SocketAddr::new(source.ip(), found.session_port);
                        log::info!("Found host {} on channel {}", host, found_id);
                        self.accept_host(host);
                        return Ok((found_id, host));
                    }
                    Err(RecvTimeoutError::Timeout) => break,
                    Err(RecvTimeoutError::Disconnected) => {
                        self.phase = ClientPhase::Idle;
                        return Err(NetError::NotStarted);
                    }
                }
            }
        }

        self.phase = ClientPhase::Idle;
        Err(NetError::HostNotFound)
    }

    /// Records the host and sends the first Join.
    pub fn accept_host(&mut self, host: SocketAddr) {
        self.host_addr = Some(host);
        self.assigned_id = UNASSIGNED_ID;
        self.phase = ClientPhase::Joining;
        self.send_join();
    }

    pub fn send_join(&mut self) -> bool {
        let Some(host) = self.host_addr else {
            return false;
        };
        self.join_sent_at = Some(Instant::now());
        self.session.send_to(host, &encode_signal(PacketKind::Join))
    }

    /// Returns true when this ack assigned a new id. Acks from anyone but the
    /// chosen host are ignored.
    pub fn handle_join_ack(&mut self, from: SocketAddr, player_id: u32) -> bool {
        if player_id == UNASSIGNED_ID || player_id == self.assigned_id {
            return false;
        }
        match self.host_addr {
            Some(host) if host == from => {}
            Some(host) => {
                log::debug!("Ignoring join ack from {} (host is {})", from, host);
                return false;
            }
            None => {
                log::debug!("Join ack for player {} before any host was chosen", player_id);
                return false;
            }
        }

        log::info!("Joined session as player {}", player_id);
        self.assigned_id = player_id;
        self.phase = ClientPhase::Joined;
        self.last_heard = Some(Instant::now());
        true
    }

    /// Records that the host is still talking to us.
    pub fn note_traffic(&mut self, from: SocketAddr) {
        if self.host_addr == Some(from) {
            self.last_heard = Some(Instant::now());
        }
    }

    /// Drops back to joining once the host has been silent for longer than
    /// `timeout`. Returns true when that happened.
    pub fn check_host_silence(&mut self, timeout: Duration) -> bool {
        if !self.is_joined() || !self.last_heard.is_some_and(|t| t.elapsed() > timeout) {
            return false;
        }

        log::warn!(
            "No word from host {:?} in {:?}, rejoining",
            self.host_addr,
            timeout
        );
        self.assigned_id = UNASSIGNED_ID;
        self.phase = ClientPhase::Joining;
        self.join_sent_at = None;
        self.ping_sent_at = None;
        self.last_heard = None;
        true
    }

    /// Applies every entry except our own entity. Returns how many were applied.
    pub fn handle_state<W: WorldObjects>(&self, packet: &StatePacket, world: &mut W) -> usize {
        let mut applied = 0;
        for object in &packet.objects {
            if object.id == UNASSIGNED_ID || object.id == self.assigned_id {
                continue;
            }
            world.get_or_spawn(object.id).apply_pose(object);
            applied += 1;
        }
        applied
    }

    pub fn handle_ping_echo(&mut self, ping: &PingPacket) {
        let rtt = self.now_ms().wrapping_sub(ping.timestamp_ms);
        log::trace!("Ping {} rtt {}ms", ping.sequence, rtt);
        self.rtt_ms = Some(rtt);
    }

    pub fn send_input(&mut self, record: InputRecord) -> bool {
        let Some(host) = self.joined_host() else {
            return false;
        };
        let sequence = self.next_sequence();
        let packet = record.to_packet(sequence, self.assigned_id);
        self.session.send_to(host, &encode_input(&packet))
    }

    pub fn send_bullet(&mut self, origin: Vec3, direction: Vec3) -> bool {
        let Some(host) = self.joined_host() else {
            return false;
        };
        let bytes = encode_bullet(&BulletPacket {
            owner_id: self.assigned_id,
            origin,
            direction,
        });
        self.session.send_to(host, &bytes)
    }

    /// Fixed-id state exchange with our own entity taken from `local`.
    /// Skipped until the handshake has assigned an id.
    pub fn frame_sync<E: SyncEntity, W: WorldObjects>(&mut self, local: &E, world: &W) -> bool {
        let Some(host) = self.joined_host() else {
            return false;
        };

        let own_id = self.assigned_id;
        let objects: Vec<ObjectState> = FRAME_SYNC_IDS
            .iter()
            .filter_map(|&id| {
                if id == own_id {
                    Some(ObjectState::new(id, local.position(), local.rotation()))
                } else {
                    world.pose_of(id)
                }
            })
            .collect();

        let sequence = self.next_sequence();
        self.session.send_to(host, &encode_state(sequence, &objects))
    }

    /// Join retries until acked, then periodic pings.
    pub fn maintain(&mut self, join_retry: Duration, ping_interval: Duration) {
        let Some(host) = self.host_addr else {
            return;
        };

        if !self.is_joined() {
            if self.join_sent_at.is_none_or(|t| t.elapsed() >= join_retry) {
                log::debug!("Re-sending join to {}", host);
                self.send_join();
            }
            return;
        }

        if self.ping_sent_at.is_none_or(|t| t.elapsed() >= ping_interval) {
            self.ping_sent_at = Some(Instant::now());
            let ping = PingPacket {
                sequence: self.next_sequence(),
                timestamp_ms: self.now_ms(),
            };
            self.session.send_to(host, &encode_ping(&ping));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{Datagram, decode_input, decode_state, peek_kind};
    use crate::world::{ObjectList, WorldObject};

    fn client() -> Client {
        Client::new(
            Transport::bind(0).unwrap(),
            Transport::bind(0).unwrap(),
            Ipv4Addr::LOCALHOST,
        )
    }

    fn fake_host() -> (Transport, SocketAddr) {
        let transport = Transport::bind(0).unwrap();
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, transport.port()));
        (transport, addr)
    }

    fn recv(transport: &Transport) -> Option<Datagram> {
        transport.poll_receive(Some(Duration::from_millis(300))).unwrap()
    }

    #[test]
    fn test_state_skips_own_id() {
        let mut client = client();
        let (_host, host_addr) = fake_host();
        client.accept_host(host_addr);
        assert!(client.handle_join_ack(host_addr, 2));

        let mut world = ObjectList::new();
        let packet = StatePacket {
            sequence: 1,
            objects: vec![
                ObjectState::new(2, Vec3::splat(9.0), Vec3::ZERO),
                ObjectState::new(5, Vec3::X, Vec3::Y),
            ],
        };

        assert_eq!(client.handle_state(&packet, &mut world), 1);
        assert!(!world.contains(2));
        assert_eq!(world.pose_of(5), Some(ObjectState::new(5, Vec3::X, Vec3::Y)));
    }

    #[test]
    fn test_state_updates_existing_object() {
        let client = client();
        let mut world = ObjectList::new();
        world.push(WorldObject::at(1, Vec3::ZERO));

        let packet = StatePacket {
            sequence: 1,
            objects: vec![ObjectState::new(1, Vec3::Z, Vec3::X)],
        };
        client.handle_state(&packet, &mut world);

        assert_eq!(world.len(), 1);
        assert_eq!(world.pose_of(1), Some(ObjectState::new(1, Vec3::Z, Vec3::X)));
    }

    #[test]
    fn test_frame_sync_waits_for_join_ack() {
        let mut client = client();
        let world = ObjectList::new();
        let local = WorldObject::at(0, Vec3::X);

        assert!(!client.frame_sync(&local, &world));

        let (host, host_addr) = fake_host();
        client.accept_host(host_addr);
        let join = recv(&host).expect("join");
        assert_eq!(peek_kind(&join.payload), Ok(PacketKind::Join));

        assert!(!client.frame_sync(&local, &world));
        assert!(recv(&host).is_none());

        client.handle_join_ack(host_addr, 2);
        assert!(client.frame_sync(&local, &world));

        let state = decode_state(&recv(&host).expect("state").payload).unwrap();
        assert_eq!(state.objects, vec![ObjectState::new(2, Vec3::X, Vec3::ZERO)]);
    }

    #[test]
    fn test_input_requires_join() {
        let mut client = client();
        let record = InputRecord::new(Vec3::X, Default::default());
        assert!(!client.send_input(record));

        let (host, host_addr) = fake_host();
        client.accept_host(host_addr);
        recv(&host);
        assert!(!client.send_input(record));

        client.handle_join_ack(host_addr, 3);
        assert!(client.send_input(record));
        let input = decode_input(&recv(&host).expect("input").payload).unwrap();
        assert_eq!(input.player_id, 3);
        assert_eq!(input.movement, Vec3::X);
    }

    #[test]
    fn test_join_ack_zero_is_ignored() {
        let mut client = client();
        let (_host, host_addr) = fake_host();
        client.accept_host(host_addr);
        assert!(!client.handle_join_ack(host_addr, 0));
        assert_eq!(client.phase(), ClientPhase::Joining);
    }

    #[test]
    fn test_maintain_retries_join() {
        let mut client = client();
        let (host, host_addr) = fake_host();
        client.accept_host(host_addr);
        recv(&host).expect("first join");

        client.maintain(Duration::ZERO, Duration::from_secs(60));
        let retry = recv(&host).expect("retry");
        assert_eq!(peek_kind(&retry.payload), Ok(PacketKind::Join));

        client.handle_join_ack(host_addr, 2);
        client.maintain(Duration::ZERO, Duration::ZERO);
        let ping = recv(&host).expect("ping");
        assert_eq!(peek_kind(&ping.payload), Ok(PacketKind::Ping));
    }

    #[test]
    fn test_join_ack_from_stranger_is_ignored() {
        let mut client = client();
        let (_host, host_addr) = fake_host();
        let (_other, other_addr) = fake_host();
        client.accept_host(host_addr);

        assert!(!client.handle_join_ack(other_addr, 2));
        assert_eq!(client.assigned_id(), UNASSIGNED_ID);
        assert!(client.handle_join_ack(host_addr, 2));
    }

    #[test]
    fn test_host_silence_triggers_rejoin() {
        let mut client = client();
        let (host, host_addr) = fake_host();
        client.accept_host(host_addr);
        recv(&host).expect("join");
        client.handle_join_ack(host_addr, 2);

        assert!(!client.check_host_silence(Duration::from_secs(5)));
        std::thread::sleep(Duration::from_millis(20));
        client.note_traffic(host_addr);
        assert!(!client.check_host_silence(Duration::from_millis(10)));

        std::thread::sleep(Duration::from_millis(20));
        assert!(client.check_host_silence(Duration::from_millis(10)));
        assert_eq!(client.phase(), ClientPhase::Joining);
        assert_eq!(client.assigned_id(), UNASSIGNED_ID);

        client.maintain(Duration::from_secs(60), Duration::from_secs(60));
        let join = recv(&host).expect("rejoin");
        assert_eq!(peek_kind(&join.payload), Ok(PacketKind::Join));

        assert!(client.handle_join_ack(host_addr, 2));
        assert!(client.is_joined());
    }
}
