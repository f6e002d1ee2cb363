//! The session object gameplay code talks to.
//!
//! A [`NetworkSession`] owns both sockets, the receive queue and the worker
//! thread. Gameplay constructs one at startup, starts it as host or client,
//! and then calls [`NetworkSession::update`] once per frame. Decoded packets
//! only ever reach the world from inside `update`, on the caller's thread.

mod client;
mod config;
mod connection;
mod events;
mod host;
mod worker;

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::Receiver;
use glam::Vec3;

pub use client::{Client, ClientPhase};
pub use config::{FRAME_SYNC_INTERVAL, NetConfig};
pub use connection::{ClientList, ClientRecord};
pub use events::SessionEvent;
pub use host::{Host, JoinOutcome};
pub use worker::{Worker, WorkerContext, WorkerRole, WorkerTiming};

use crate::error::{NetError, NetResult};
use crate::input::InputRecord;
use crate::net::{
    Channel, ChannelInfo, ChannelTable, HOST_ID, NetworkStats, Packet, ReceiveQueue, Transport,
    UNASSIGNED_ID, local_ip,
};
use crate::world::{SyncEntity, WorldObjects};

const DISCOVERY_REPLY_BACKLOG: usize = 16;

enum Role {
    Host(Arc<Host>),
    Client {
        client: Client,
        replies: Receiver<SocketAddr>,
    },
}

pub struct NetworkSession {
    config: NetConfig,
    channels: ChannelTable,
    active_channel: Option<usize>,
    role: Option<Role>,
    session: Option<Transport>,
    discovery: Option<Transport>,
    queue: Arc<ReceiveQueue>,
    worker: Option<Worker>,
    last_scan: Option<Instant>,
    events: VecDeque<SessionEvent>,
    decode_failures: u64,
}

impl NetworkSession {
    pub fn new(config: NetConfig) -> Self {
        Self {
            channels: ChannelTable::new(config.channels.clone()),
            queue: Arc::new(ReceiveQueue::new(config.queue_capacity)),
            active_channel: None,
            role: None,
            session: None,
            discovery: None,
            worker: None,
            last_scan: None,
            events: VecDeque::new(),
            decode_failures: 0,
            config,
        }
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(Worker::is_running)
    }

    pub fn is_host(&self) -> bool {
        matches!(self.role, Some(Role::Host(_)))
    }

    /// 0 until a client has been acked; the host is always 1.
    pub fn my_assigned_id(&self) -> u32 {
        match &self.role {
            Some(Role::Host(_)) => HOST_ID,
            Some(Role::Client { client, .. }) => client.assigned_id(),
            None => UNASSIGNED_ID,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.session.as_ref().map(Transport::local_addr)
    }

    pub fn discovery_addr(&self) -> Option<SocketAddr> {
        self.discovery.as_ref().map(Transport::local_addr)
    }

    pub fn active_channel(&self) -> Option<usize> {
        self.active_channel
    }

    pub fn channels(&self) -> &ChannelTable {
        &self.channels
    }

    pub fn host_addr(&self) -> Option<SocketAddr> {
        match &self.role {
            Some(Role::Client { client, .. }) => client.host_addr(),
            _ => None,
        }
    }

    pub fn client_count(&self) -> usize {
        match &self.role {
            Some(Role::Host(host)) => host.client_count(),
            _ => 0,
        }
    }

    pub fn rtt_ms(&self) -> Option<u32> {
        match &self.role {
            Some(Role::Client { client, .. }) => client.rtt_ms(),
            _ => None,
        }
    }

    pub fn stats(&self) -> NetworkStats {
        let mut stats = NetworkStats::default();
        for transport in [&self.session, &self.discovery].into_iter().flatten() {
            stats.merge(&transport.stats());
        }
        stats.queue_evictions = self.queue.evicted_count();
        stats.decode_failures = self.decode_failures;
        stats
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = SessionEvent> + '_ {
        self.events.drain(..)
    }

    /// Binds the primary channel, then each fallback channel, then a dynamic
    /// pair. Fails only when nothing at all could be bound.
    pub fn start_as_host(&mut self) -> NetResult<()> {
        if self.role.is_some() {
            return Err(NetError::AlreadyStarted);
        }

        let candidates: Vec<(usize, Channel)> = self.channels.iter().collect();
        for (id, channel) in candidates {
            match bind_pair(channel) {
                Ok((session, discovery)) => {
                    return self.install_host(session, discovery, Some(id));
                }
                Err(e) => log::warn!("Channel {} unavailable: {}", id, e),
            }
        }

        log::warn!("All channels busy, falling back to dynamic ports");
        let ranges = &self.config.dynamic_port_ranges;
        let pair = Transport::bind_dynamic(ranges, false)
            .and_then(|session| Ok((session, Transport::bind_dynamic(ranges, true)?)));
        match pair {
            Ok((session, discovery)) => self.install_host(session, discovery, None),
            Err(e) => {
                log::error!("Unable to host: {}", e);
                Err(NetError::NoUsablePort)
            }
        }
    }

    fn install_host(
        &mut self,
        session: Transport,
        discovery: Transport,
        channel: Option<usize>,
    ) -> NetResult<()> {
        let host = Arc::new(Host::new(
            session.try_clone()?,
            channel,
            discovery.port(),
            self.config.spawn_position,
            self.config.spawn_rotation,
        ));

        let worker = Worker::spawn(WorkerContext {
            session: session.try_clone()?,
            discovery: discovery.try_clone()?,
            queue: Arc::clone(&self.queue),
            role: WorkerRole::Host(Arc::clone(&host)),
            timing: WorkerTiming::from(&self.config),
        })?;

        let addr = SocketAddr::new(local_ip(), session.port());
        log::info!(
            "Hosting on {} (discovery port {}, channel {})",
            addr,
            discovery.port(),
            channel.map_or_else(|| "dynamic".to_string(), |c| c.to_string())
        );

        self.events.push_back(SessionEvent::Hosting { addr, channel });
        self.active_channel = channel;
        self.session = Some(session);
        self.discovery = Some(discovery);
        self.worker = Some(worker);
        self.role = Some(Role::Host(host));
        Ok(())
    }

    pub fn start_as_client(&mut self) -> NetResult<()> {
        if self.role.is_some() {
            return Err(NetError::AlreadyStarted);
        }

        let session = Transport::bind_dynamic(&self.config.dynamic_port_ranges, false)
            .or_else(|e| {
                log::warn!("Dynamic session port unavailable ({}), using any port", e);
                Transport::bind(0)
            })?;

        let discovery_port = self.config.client_discovery_port();
        let discovery = Transport::bind_broadcast(discovery_port).or_else(|e| {
            log::warn!("Discovery port {} unavailable ({}), using any port", discovery_port, e);
            Transport::bind_broadcast(0)
        })?;

        let (reply_tx, reply_rx) = crossbeam_channel::bounded(DISCOVERY_REPLY_BACKLOG);
        let client = Client::new(
            session.try_clone()?,
            discovery.try_clone()?,
            self.config.broadcast_addr,
        );

        let worker = Worker::spawn(WorkerContext {
            session: session.try_clone()?,
            discovery: discovery.try_clone()?,
            queue: Arc::clone(&self.queue),
            role: WorkerRole::Client(reply_tx),
            timing: WorkerTiming::from(&self.config),
        })?;

        log::info!(
            "Client ready on {} (discovery {})",
            session.local_addr(),
            discovery.local_addr()
        );

        self.session = Some(session);
        self.discovery = Some(discovery);
        self.worker = Some(worker);
        self.role = Some(Role::Client {
            client,
            replies: reply_rx,
        });
        Ok(())
    }

    /// Searches every channel, preferred one first. `HostNotFound` is not
    /// fatal; call again to retry.
    pub fn discover_and_join(&mut self) -> NetResult<SocketAddr> {
        let order = self.channels.order_from(self.active_channel.unwrap_or(0));
        let (channel, host) = match self.role.as_mut() {
            Some(Role::Client { client, replies }) => client.discover_and_join(
                replies,
                &self.channels,
                &order,
                self.config.discovery_timeout,
            )?,
            Some(Role::Host(_)) => return Err(NetError::WrongRole("client")),
            None => return Err(NetError::NotStarted),
        };

        self.active_channel = Some(channel);
        self.events
            .push_back(SessionEvent::HostFound { addr: host, channel });
        Ok(host)
    }

    /// Joins a host at a known session address, skipping discovery.
    pub fn join(&mut self, host: SocketAddr) -> NetResult<()> {
        match self.role.as_mut() {
            Some(Role::Client { client, .. }) => {
                client.accept_host(host);
                self.active_channel = self.channels.by_session_port(host.port()).map(|(id, _)| id);
                Ok(())
            }
            Some(Role::Host(_)) => Err(NetError::WrongRole("client")),
            None => Err(NetError::NotStarted),
        }
    }

    /// Drains a bounded number of received packets into the world. Call once
    /// per simulation frame.
    pub fn update<E, W>(&mut self, _dt: f32, local: &mut E, world: &mut W)
    where
        E: SyncEntity,
        W: WorldObjects,
    {
        let Some(role) = self.role.as_mut() else {
            return;
        };
        let events = &mut self.events;
        let channels = &mut self.channels;

        for packet in self.queue.drain(self.config.max_packets_per_frame) {
            let decoded = match Packet::decode(&packet.payload) {
                Ok(decoded) => decoded,
                Err(e) => {
                    self.decode_failures += 1;
                    log::debug!(
                        "Dropping {} byte datagram from {}: {}",
                        packet.len(),
                        packet.source,
                        e
                    );
                    continue;
                }
            };
            log::trace!("{:?} from {}", decoded.kind(), packet.source);

            match role {
                Role::Host(host) => {
                    dispatch_host(host, packet.source, decoded, world, channels, events)
                }
                Role::Client { client, .. } => {
                    client.note_traffic(packet.source);
                    dispatch_client(client, packet.source, decoded, local, world, channels, events)
                }
            }
        }

        match role {
            Role::Host(host) => {
                if local.id() != HOST_ID {
                    local.set_id(HOST_ID);
                }
                host.cache_local_pose(local.position(), local.rotation());

                if let Some(timeout) = self.config.client_timeout {
                    for player_id in host.evict_stale(timeout) {
                        events.push_back(SessionEvent::ClientTimedOut { player_id });
                    }
                }
            }
            Role::Client { client, .. } => {
                let lost = self
                    .config
                    .host_timeout
                    .is_some_and(|timeout| client.check_host_silence(timeout));
                if lost {
                    local.set_id(UNASSIGNED_ID);
                    if let Some(addr) = client.host_addr() {
                        events.push_back(SessionEvent::HostLost { addr });
                    }
                }
                client.maintain(self.config.join_retry_interval, self.config.ping_interval);
            }
        }
    }

    /// Fixed-id state exchange. The caller invokes this every
    /// [`FRAME_SYNC_INTERVAL`] frames. Returns whether anything was sent.
    pub fn frame_sync<E: SyncEntity, W: WorldObjects>(&mut self, local: &E, world: &W) -> bool {
        match self.role.as_mut() {
            Some(Role::Host(host)) => host.frame_sync(local, world),
            Some(Role::Client { client, .. }) => client.frame_sync(local, world),
            None => false,
        }
    }

    /// Full state to every client. Host only; returns the number of sends.
    pub fn broadcast_state<E: SyncEntity, W: WorldObjects>(&self, local: &E, world: &W) -> usize {
        match &self.role {
            Some(Role::Host(host)) => host.send_state_to_all(local, world),
            _ => 0,
        }
    }

    pub fn send_input(&mut self, record: InputRecord) -> bool {
        match self.role.as_mut() {
            Some(Role::Client { client, .. }) => client.send_input(record),
            _ => false,
        }
    }

    pub fn send_bullet(&mut self, origin: Vec3, direction: Vec3) -> bool {
        match self.role.as_mut() {
            Some(Role::Host(host)) => host.send_bullet(origin, direction) > 0,
            Some(Role::Client { client, .. }) => client.send_bullet(origin, direction),
            None => false,
        }
    }

    /// Rate-limited. Usage is not measured actively; the table only holds
    /// ChannelInfo reports that happen to arrive. Returns false when skipped.
    pub fn scan_channel_usage(&mut self) -> bool {
        if self
            .last_scan
            .is_some_and(|t| t.elapsed() < self.config.channel_scan_interval)
        {
            return false;
        }
        self.last_scan = Some(Instant::now());
        log::debug!(
            "Channel scan: {} of {} channels have reported usage",
            self.channels.reported(),
            self.channels.len()
        );
        true
    }

    pub fn find_least_crowded_channel(&self) -> usize {
        self.channels.least_crowded()
    }

    /// A host rebinds on the new channel (dropping its clients); a client
    /// just searches that channel first next time.
    pub fn switch_to_channel(&mut self, id: usize) -> NetResult<()> {
        let channel = self.channels.get(id).ok_or(NetError::UnknownChannel(id))?;

        if !self.is_host() {
            log::info!("Preferring channel {}", id);
            self.active_channel = Some(id);
            return Ok(());
        }
        if self.active_channel == Some(id) {
            return Ok(());
        }

        let (session, discovery) = bind_pair(channel)?;
        if self.client_count() > 0 {
            log::warn!("Switching channel drops {} connected client(s)", self.client_count());
        }
        self.stop();
        log::info!("Switching to channel {}", id);
        self.install_host(session, discovery, Some(id))
    }

    /// Stops the worker, then releases both sockets. Idempotent.
    pub fn stop(&mut self) {
        let was_running = self.worker.is_some();
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }

        self.role = None;
        for transport in [&mut self.session, &mut self.discovery] {
            if let Some(mut t) = transport.take() {
                t.close();
            }
        }
        self.queue.clear();

        if was_running {
            log::info!("Network session stopped");
        }
    }
}

impl Drop for NetworkSession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn bind_pair(channel: Channel) -> NetResult<(Transport, Transport)> {
    let session = Transport::bind(channel.session_port)?;
    let discovery = Transport::bind_broadcast(channel.discovery_port)?;
    Ok((session, discovery))
}

fn dispatch_host<W: WorldObjects>(
    host: &Host,
    source: SocketAddr,
    decoded: Packet,
    world: &mut W,
    channels: &mut ChannelTable,
    events: &mut VecDeque<SessionEvent>,
) {
    match decoded {
        Packet::Join => {
            let outcome = host.handle_join(source, world);
            if outcome.is_new {
                events.push_back(SessionEvent::ClientJoined {
                    player_id: outcome.player_id,
                    addr: source,
                });
            }
        }
        Packet::Input(input) => {
            if host.handle_input(&input, world) {
                events.push_back(SessionEvent::Input {
                    player_id: input.player_id,
                    record: InputRecord::from_packet(&input),
                });
            }
        }
        Packet::State(state) => {
            host.handle_client_state(source, &state, world);
        }
        Packet::Ping(ping) => {
            host.handle_ping(source, &ping);
        }
        Packet::Bullet(bullet) => {
            host.relay_bullet(source, &bullet);
            events.push_back(SessionEvent::BulletFired {
                owner_id: bullet.owner_id,
                origin: bullet.origin,
                direction: bullet.direction,
            });
        }
        Packet::ChannelInfo(info) => record_channel_info(channels, events, &info),
        other => log::trace!("Host ignoring {:?} from {}", other.kind(), source),
    }
}

fn dispatch_client<E: SyncEntity, W: WorldObjects>(
    client: &mut Client,
    source: SocketAddr,
    decoded: Packet,
    local: &mut E,
    world: &mut W,
    channels: &mut ChannelTable,
    events: &mut VecDeque<SessionEvent>,
) {
    match decoded {
        Packet::JoinAck { player_id } => {
            if client.handle_join_ack(source, player_id) {
                local.set_id(player_id);
                events.push_back(SessionEvent::Joined { player_id });
            }
        }
        Packet::State(state) => {
            client.handle_state(&state, world);
        }
        Packet::Ping(ping) => client.handle_ping_echo(&ping),
        Packet::Bullet(bullet) => events.push_back(SessionEvent::BulletFired {
            owner_id: bullet.owner_id,
            origin: bullet.origin,
            direction: bullet.direction,
        }),
        Packet::ChannelInfo(info) => record_channel_info(channels, events, &info),
        other => log::trace!("Client ignoring {:?} from {}", other.kind(), source),
    }
}

fn record_channel_info(
    channels: &mut ChannelTable,
    events: &mut VecDeque<SessionEvent>,
    info: &ChannelInfo,
) {
    let channel = info.channel_id as usize;
    if channels.record_usage(channel, info.user_count) {
        events.push_back(SessionEvent::ChannelReport {
            channel,
            user_count: info.user_count,
        });
    }
}
