mod sim;

use std::net::Ipv4Addr;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use clap::{Parser, ValueEnum};

use sim::Orbit;
use tandem::{FRAME_SYNC_INTERVAL, NetConfig, NetError, NetworkSession, SessionEvent};

const DISCOVERY_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Role {
    Host,
    Client,
}

#[derive(Parser)]
#[command(name = "tandem-peer")]
#[command(about = "Headless LAN sync peer")]
struct Args {
    #[arg(value_enum)]
    role: Role,

    #[arg(short, long, default_value_t = 7777, help = "Session port of channel 0")]
    port: u16,

    #[arg(short, long, default_value_t = Ipv4Addr::BROADCAST)]
    broadcast: Ipv4Addr,

    #[arg(short, long, default_value_t = 600, help = "Frames to run before stopping")]
    frames: u64,

    #[arg(long, default_value_t = 60)]
    frame_rate: u32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.frame_rate == 0 {
        bail!("frame rate must be positive");
    }

    let config = NetConfig {
        broadcast_addr: args.broadcast,
        ..NetConfig::with_base_port(args.port)
    };
    let mut session = NetworkSession::new(config);

    match args.role {
        Role::Host => session.start_as_host()?,
        Role::Client => {
            session.start_as_client()?;
            join_with_retries(&mut session)?;
        }
    }

    run(&mut session, &args);

    let stats = session.stats();
    log::info!(
        "Sent {} packets ({} bytes), received {} packets ({} bytes), {} dropped",
        stats.packets_sent,
        stats.bytes_sent,
        stats.packets_received,
        stats.bytes_received,
        stats.queue_evictions + stats.decode_failures
    );
    session.stop();
    Ok(())
}

fn join_with_retries(session: &mut NetworkSession) -> Result<()> {
    for attempt in 1..=DISCOVERY_ATTEMPTS {
        match session.discover_and_join() {
            Ok(host) => {
                log::info!("Joining {}", host);
                return Ok(());
            }
            Err(NetError::HostNotFound) => {
                log::warn!("No host found (attempt {}/{})", attempt, DISCOVERY_ATTEMPTS);
            }
            Err(e) => return Err(e.into()),
        }
    }
    bail!("gave up looking for a host")
}

fn run(session: &mut NetworkSession, args: &Args) {
    let frame_time = Duration::from_secs_f64(1.0 / f64::from(args.frame_rate));
    let dt = frame_time.as_secs_f32();
    let mut orbit = Orbit::new(3.0, 1.0);
    let mut last_report = Instant::now();

    for frame in 0..args.frames {
        let frame_start = Instant::now();

        let input = orbit.step(dt);
        if args.role == Role::Client {
            session.send_input(input);
        }

        session.update(dt, &mut orbit.local, &mut orbit.world);

        if frame % u64::from(FRAME_SYNC_INTERVAL) == 0 {
            session.frame_sync(&orbit.local, &orbit.world);
        }

        for event in session.drain_events() {
            log_event(&event);
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            if session.is_host() {
                session.broadcast_state(&orbit.local, &orbit.world);
                session.scan_channel_usage();
            }
            log::info!("{}", orbit.summary());
            if let Some(rtt) = session.rtt_ms() {
                log::debug!("rtt {}ms", rtt);
            }
        }

        if let Some(remaining) = frame_time.checked_sub(frame_start.elapsed()) {
            thread::sleep(remaining);
        }
    }
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::Hosting { addr, channel } => match channel {
            Some(channel) => log::info!("Hosting at {} on channel {}", addr, channel),
            None => log::info!("Hosting at {} on dynamic ports", addr),
        },
        SessionEvent::HostFound { addr, channel } => {
            log::info!("Found host {} on channel {}", addr, channel)
        }
        SessionEvent::Joined { player_id } => log::info!("Joined as player {}", player_id),
        SessionEvent::ClientJoined { player_id, addr } => {
            log::info!("Player {} joined from {}", player_id, addr)
        }
        SessionEvent::ClientTimedOut { player_id } => {
            log::warn!("Player {} timed out", player_id)
        }
        SessionEvent::HostLost { addr } => log::warn!("Lost host {}, rejoining", addr),
        SessionEvent::Input { player_id, record } => {
            if !record.buttons.is_empty() {
                log::debug!("Player {} pressed {:?}", player_id, record.buttons);
            }
        }
        SessionEvent::BulletFired {
            owner_id,
            origin,
            direction,
        } => log::info!("Player {} fired from {} towards {}", owner_id, origin, direction),
        SessionEvent::ChannelReport {
            channel,
            user_count,
        } => log::debug!("Channel {} has {} user(s)", channel, user_count),
    }
}
