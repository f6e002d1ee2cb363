use std::net::{Ipv4Addr, UdpSocket};
use std::sync::atomic::{AtomicU16, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use glam::Vec3;
use tandem::net::{ChannelInfo, encode_channel_info};
use tandem::{
    Buttons, InputRecord, NetConfig, NetError, NetworkSession, ObjectList, SessionEvent,
    WorldObject, WorldObjects,
};

static PORT_COUNTER: AtomicU16 = AtomicU16::new(42000);

fn next_base_port() -> u16 {
    PORT_COUNTER.fetch_add(40, Ordering::SeqCst)
}

fn test_config(base_port: u16) -> NetConfig {
    NetConfig {
        broadcast_addr: Ipv4Addr::LOCALHOST,
        discovery_timeout: Duration::from_millis(300),
        join_retry_interval: Duration::from_millis(100),
        ..NetConfig::with_base_port(base_port)
    }
}

struct Peer {
    session: NetworkSession,
    local: WorldObject,
    world: ObjectList,
}

impl Peer {
    fn new(config: NetConfig) -> Self {
        Self {
            session: NetworkSession::new(config),
            local: WorldObject::new(0),
            world: ObjectList::new(),
        }
    }

    fn update(&mut self) {
        self.session.update(0.016, &mut self.local, &mut self.world);
    }
}

/// Pumps both sides until `done` holds or the timeout elapses.
fn pump_until(
    host: &mut Peer,
    client: &mut Peer,
    timeout_ms: u64,
    mut done: impl FnMut(&Peer, &Peer) -> bool,
) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(timeout_ms) {
        host.update();
        client.update();
        if done(host, client) {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

fn pump_for(host: &mut Peer, client: &mut Peer, duration_ms: u64) {
    pump_until(host, client, duration_ms, |_, _| false);
}

fn joined_pair() -> (Peer, Peer) {
    joined_pair_with(|config| config)
}

fn joined_pair_with(adjust: impl Fn(NetConfig) -> NetConfig) -> (Peer, Peer) {
    let base = next_base_port();
    let mut host = Peer::new(adjust(test_config(base)));
    host.session.start_as_host().unwrap();

    let mut client = Peer::new(adjust(test_config(base)));
    client.session.start_as_client().unwrap();
    client.session.discover_and_join().unwrap();

    let joined = pump_until(&mut host, &mut client, 2000, |_, c| {
        c.session.my_assigned_id() == 2
    });
    assert!(joined, "client was never acked");
    (host, client)
}

#[test]
fn test_host_reports_fixed_id_and_channel() {
    let base = next_base_port();
    let mut host = Peer::new(test_config(base));
    host.session.start_as_host().unwrap();

    assert!(host.session.is_host());
    assert!(host.session.is_running());
    assert_eq!(host.session.my_assigned_id(), 1);
    assert_eq!(host.session.active_channel(), Some(0));
    assert_eq!(host.session.local_addr().map(|a| a.port()), Some(base));

    let events: Vec<_> = host.session.drain_events().collect();
    assert!(matches!(
        events.as_slice(),
        [SessionEvent::Hosting {
            channel: Some(0),
            ..
        }]
    ));

    host.update();
    assert_eq!(host.local.id, 1);
}

#[test]
fn test_start_twice_is_rejected() {
    let base = next_base_port();
    let mut session = NetworkSession::new(test_config(base));
    session.start_as_host().unwrap();
    assert!(matches!(
        session.start_as_host(),
        Err(NetError::AlreadyStarted)
    ));
    assert!(matches!(
        session.start_as_client(),
        Err(NetError::AlreadyStarted)
    ));
}

#[test]
fn test_host_falls_back_when_primary_taken() {
    let base = next_base_port();
    let _squatter = UdpSocket::bind(("0.0.0.0", base)).unwrap();

    let mut host = NetworkSession::new(test_config(base));
    host.start_as_host().unwrap();

    assert_eq!(host.active_channel(), Some(1));
    assert_eq!(host.local_addr().map(|a| a.port()), Some(base + 10));
    assert_eq!(host.discovery_addr().map(|a| a.port()), Some(base + 11));
}

#[test]
fn test_discover_join_and_ack() {
    let (mut host, mut client) = joined_pair();

    assert_eq!(client.local.id, 2);
    assert_eq!(host.session.client_count(), 1);
    assert!(host.world.contains(2));
    assert_eq!(host.world.get(2).unwrap().position, Vec3::new(0.0, 1.0, 0.0));

    let client_events: Vec<_> = client.session.drain_events().collect();
    assert!(client_events
        .iter()
        .any(|e| matches!(e, SessionEvent::HostFound { channel: 0, .. })));
    assert!(client_events
        .iter()
        .any(|e| matches!(e, SessionEvent::Joined { player_id: 2 })));

    let host_events: Vec<_> = host.session.drain_events().collect();
    assert!(host_events
        .iter()
        .any(|e| matches!(e, SessionEvent::ClientJoined { player_id: 2, .. })));

    // Join retries from the same address must not allocate another id.
    pump_for(&mut host, &mut client, 300);
    assert_eq!(host.session.client_count(), 1);
}

#[test]
fn test_frame_sync_requires_ack() {
    let base = next_base_port();
    let mut host = Peer::new(test_config(base));
    host.session.start_as_host().unwrap();
    let mut client = Peer::new(test_config(base));
    client.session.start_as_client().unwrap();

    assert!(!client.session.frame_sync(&client.local, &client.world));
    assert!(!host.session.frame_sync(&host.local, &host.world));

    client.session.discover_and_join().unwrap();
    assert!(!client.session.frame_sync(&client.local, &client.world));

    let joined = pump_until(&mut host, &mut client, 2000, |_, c| {
        c.session.my_assigned_id() == 2
    });
    assert!(joined);

    assert!(client.session.frame_sync(&client.local, &client.world));
    assert!(host.session.frame_sync(&host.local, &host.world));
}

#[test]
fn test_input_moves_client_object_on_host() {
    let (mut host, mut client) = joined_pair();

    let record = InputRecord::new(Vec3::new(1.0, 0.0, 0.0), Buttons::FIRE);
    assert!(client.session.send_input(record));

    let moved = pump_until(&mut host, &mut client, 1000, |h, _| {
        h.world.get(2).map(|o| o.position) == Some(Vec3::new(1.0, 1.0, 0.0))
    });
    assert!(moved);

    let events: Vec<_> = host.session.drain_events().collect();
    assert!(events.contains(&SessionEvent::Input {
        player_id: 2,
        record,
    }));
}

#[test]
fn test_host_pose_reaches_client() {
    let (mut host, mut client) = joined_pair();

    host.local.position = Vec3::new(5.0, 2.0, -3.0);
    host.local.rotation = Vec3::new(0.0, 90.0, 0.0);
    host.update();
    assert_eq!(host.session.broadcast_state(&host.local, &host.world), 1);

    let synced = pump_until(&mut host, &mut client, 1000, |_, c| {
        c.world.get(1).map(|o| o.position) == Some(Vec3::new(5.0, 2.0, -3.0))
    });
    assert!(synced);
    assert_eq!(client.world.get(1).unwrap().rotation, Vec3::new(0.0, 90.0, 0.0));
    // The client's own entity is never spawned from host state.
    assert!(!client.world.contains(2));
}

#[test]
fn test_client_pose_reaches_host() {
    let (mut host, mut client) = joined_pair();

    client.local.position = Vec3::new(-4.0, 0.5, 8.0);
    assert!(client.session.frame_sync(&client.local, &client.world));

    let synced = pump_until(&mut host, &mut client, 1000, |h, _| {
        h.world.get(2).map(|o| o.position) == Some(Vec3::new(-4.0, 0.5, 8.0))
    });
    assert!(synced);
}

#[test]
fn test_client_bullet_reported_on_host() {
    let (mut host, mut client) = joined_pair();
    host.session.drain_events().for_each(drop);

    assert!(client.session.send_bullet(Vec3::ZERO, Vec3::Z));
    pump_for(&mut host, &mut client, 300);

    let events: Vec<_> = host.session.drain_events().collect();
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::BulletFired { owner_id: 2, .. }
    )));
}

#[test]
fn test_ping_measures_rtt() {
    let (mut host, mut client) = joined_pair();

    let measured = pump_until(&mut host, &mut client, 2000, |_, c| {
        c.session.rtt_ms().is_some()
    });
    assert!(measured);
}

#[test]
fn test_host_bullet_reaches_client() {
    let (mut host, mut client) = joined_pair();
    client.session.drain_events().for_each(drop);

    assert!(host.session.send_bullet(Vec3::Y, Vec3::X));
    pump_for(&mut host, &mut client, 300);

    let events: Vec<_> = client.session.drain_events().collect();
    assert!(events.contains(&SessionEvent::BulletFired {
        owner_id: 1,
        origin: Vec3::Y,
        direction: Vec3::X,
    }));
}

#[test]
fn test_channel_reports_steer_least_crowded() {
    let base = next_base_port();
    let mut host = Peer::new(test_config(base));
    host.session.start_as_host().unwrap();
    host.session.drain_events().for_each(drop);
    assert_eq!(host.session.find_least_crowded_channel(), 0);

    let reporter = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
    for (channel_id, user_count) in [(0, 6), (1, 0)] {
        let info = ChannelInfo {
            channel_id,
            user_count,
            base_port: u32::from(base),
            discovery_port: u32::from(base + 1),
        };
        reporter
            .send_to(&encode_channel_info(&info), ("127.0.0.1", base))
            .unwrap();
    }

    let start = Instant::now();
    while host.session.channels().reported() < 2 && start.elapsed() < Duration::from_secs(1) {
        host.update();
        thread::sleep(Duration::from_millis(5));
    }

    let events: Vec<_> = host.session.drain_events().collect();
    assert!(events.contains(&SessionEvent::ChannelReport {
        channel: 0,
        user_count: 6,
    }));
    assert!(events.contains(&SessionEvent::ChannelReport {
        channel: 1,
        user_count: 0,
    }));
    assert_eq!(host.session.find_least_crowded_channel(), 1);
}

#[test]
fn test_timed_out_client_rejoins_with_same_id() {
    let (mut host, mut client) = joined_pair_with(|config| NetConfig {
        client_timeout: Some(Duration::from_millis(400)),
        host_timeout: Some(Duration::from_millis(400)),
        ping_interval: Duration::from_millis(50),
        ..config
    });
    host.session.drain_events().for_each(drop);
    client.session.drain_events().for_each(drop);

    // The client goes quiet for longer than the host allows.
    thread::sleep(Duration::from_millis(600));
    host.update();
    assert_eq!(host.session.client_count(), 0);
    let host_events: Vec<_> = host.session.drain_events().collect();
    assert!(host_events.contains(&SessionEvent::ClientTimedOut { player_id: 2 }));

    // Its poses are ignored until it rejoins.
    client.local.position = Vec3::new(20.0, 0.0, 0.0);
    for _ in 0..5 {
        client.session.frame_sync(&client.local, &client.world);
    }
    thread::sleep(Duration::from_millis(50));
    host.update();
    assert_eq!(host.world.get(2).map(|o| o.position), Some(Vec3::new(0.0, 1.0, 0.0)));

    // The host stops answering, so the client notices and joins again.
    let rejoined = pump_until(&mut host, &mut client, 3000, |h, c| {
        h.session.client_count() == 1 && c.session.my_assigned_id() == 2
    });
    assert!(rejoined);
    assert_eq!(client.local.id, 2);
    assert!(!host.world.contains(3));

    let client_events: Vec<_> = client.session.drain_events().collect();
    assert!(client_events
        .iter()
        .any(|e| matches!(e, SessionEvent::HostLost { .. })));
    assert!(client_events.contains(&SessionEvent::Joined { player_id: 2 }));

    let host_events: Vec<_> = host.session.drain_events().collect();
    assert!(host_events
        .iter()
        .any(|e| matches!(e, SessionEvent::ClientJoined { player_id: 2, .. })));
}

#[test]
fn test_discover_without_host_fails() {
    let base = next_base_port();
    let mut client = NetworkSession::new(NetConfig {
        discovery_timeout: Duration::from_millis(50),
        ..test_config(base)
    });
    client.start_as_client().unwrap();

    assert!(matches!(
        client.discover_and_join(),
        Err(NetError::HostNotFound)
    ));
    assert_eq!(client.my_assigned_id(), 0);
}

#[test]
fn test_role_mismatch_and_unstarted() {
    let base = next_base_port();
    let mut session = NetworkSession::new(test_config(base));
    assert!(matches!(session.discover_and_join(), Err(NetError::NotStarted)));
    assert_eq!(session.my_assigned_id(), 0);
    assert!(!session.send_input(InputRecord::default()));

    session.start_as_host().unwrap();
    assert!(matches!(
        session.discover_and_join(),
        Err(NetError::WrongRole(_))
    ));
    assert!(!session.send_input(InputRecord::default()));
}

#[test]
fn test_switch_channel_rebinds_host() {
    let base = next_base_port();
    let mut host = NetworkSession::new(test_config(base));
    host.start_as_host().unwrap();

    host.switch_to_channel(2).unwrap();
    assert_eq!(host.active_channel(), Some(2));
    assert_eq!(host.local_addr().map(|a| a.port()), Some(base + 20));
    assert!(host.is_running());

    // The old channel is free again.
    UdpSocket::bind(("0.0.0.0", base)).unwrap();

    assert!(matches!(
        host.switch_to_channel(9),
        Err(NetError::UnknownChannel(9))
    ));
}

#[test]
fn test_channel_scan_is_rate_limited() {
    let base = next_base_port();
    let mut session = NetworkSession::new(test_config(base));
    assert!(session.scan_channel_usage());
    assert!(!session.scan_channel_usage());
    assert_eq!(session.find_least_crowded_channel(), 0);
}

#[test]
fn test_stop_is_idempotent() {
    let base = next_base_port();
    let mut host = NetworkSession::new(test_config(base));
    host.start_as_host().unwrap();

    host.stop();
    assert!(!host.is_running());
    assert_eq!(host.local_addr(), None);
    host.stop();

    // Both ports released.
    UdpSocket::bind(("0.0.0.0", base)).unwrap();
    UdpSocket::bind(("0.0.0.0", base + 1)).unwrap();

    // Restart after stop.
    host.start_as_host().unwrap();
    assert!(host.is_running());
}
