use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;

use super::config::NetConfig;
use super::host::Host;
use crate::error::NetResult;
use crate::net::{
    Datagram, PacketKind, ReceiveQueue, RecvPacket, Transport, encode_channel_info, encode_signal,
    peek_kind,
};

/// Datagrams read back-to-back after a session poll succeeds.
const SESSION_BURST: usize = 32;
const BURST_POLL_TIMEOUT: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy)]
pub struct WorkerTiming {
    pub session_poll_timeout: Duration,
    pub discovery_poll_timeout: Duration,
    pub idle_sleep: Duration,
    pub keepalive_interval: Duration,
}

impl From<&NetConfig> for WorkerTiming {
    fn from(config: &NetConfig) -> Self {
        Self {
            session_poll_timeout: config.session_poll_timeout,
            discovery_poll_timeout: config.discovery_poll_timeout,
            idle_sleep: config.worker_idle_sleep,
            keepalive_interval: config.keepalive_interval,
        }
    }
}

#[derive(Debug)]
pub enum WorkerRole {
    Host(Arc<Host>),
    /// Discovery replies are forwarded here instead of the queue.
    Client(Sender<SocketAddr>),
}

#[derive(Debug)]
pub struct WorkerContext {
    pub session: Transport,
    pub discovery: Transport,
    pub queue: Arc<ReceiveQueue>,
    pub role: WorkerRole,
    pub timing: WorkerTiming,
}

/// The single background thread of a session.
#[derive(Debug)]
pub struct Worker {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn spawn(context: WorkerContext) -> NetResult<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let handle = thread::Builder::new()
            .name("tandem-net".into())
            .spawn(move || run(context, flag))?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Signals the loop and waits for it. Safe to call more than once.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Network worker panicked");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(context: WorkerContext, running: Arc<AtomicBool>) {
    log::debug!(
        "Network worker started (session {}, discovery {})",
        context.session.local_addr(),
        context.discovery.local_addr()
    );

    let mut last_keepalive = Instant::now();

    while running.load(Ordering::SeqCst) {
        match context
            .session
            .poll_receive(Some(context.timing.session_poll_timeout))
        {
            Ok(Some(datagram)) => {
                context.route(datagram, false);
                for _ in 0..SESSION_BURST {
                    match context.session.poll_receive(Some(BURST_POLL_TIMEOUT)) {
                        Ok(Some(datagram)) => context.route(datagram, false),
                        _ => break,
                    }
                }
            }
            Ok(None) => {}
            Err(e) => log::debug!("Session receive failed: {}", e),
        }

        match context
            .discovery
            .poll_receive(Some(context.timing.discovery_poll_timeout))
        {
            Ok(Some(datagram)) => context.route(datagram, true),
            Ok(None) => {}
            Err(e) => log::debug!("Discovery receive failed: {}", e),
        }

        if let WorkerRole::Host(host) = &context.role {
            if last_keepalive.elapsed() >= context.timing.keepalive_interval {
                last_keepalive = Instant::now();
                host.send_state_round_robin();
            }
        }

        thread::sleep(context.timing.idle_sleep);
    }

    log::debug!("Network worker stopped");
}

impl WorkerContext {
    fn route(&self, datagram: Datagram, from_discovery: bool) {
        let kind = peek_kind(&datagram.payload).ok();

        match (&self.role, kind) {
            (WorkerRole::Host(_), Some(PacketKind::Discover)) if from_discovery => {
                log::debug!("Discover from {}", datagram.source);
                self.discovery
                    .send_to(datagram.source, &encode_signal(PacketKind::DiscoverReply));
            }
            (WorkerRole::Host(host), Some(PacketKind::ChannelScan)) if from_discovery => {
                self.discovery
                    .send_to(datagram.source, &encode_channel_info(&host.channel_info()));
            }
            (WorkerRole::Client(replies), Some(PacketKind::DiscoverReply)) => {
                if replies.try_send(datagram.source).is_err() {
                    log::trace!("Discovery reply from {} not awaited", datagram.source);
                }
            }
            _ => {
                let evicted = self.queue.push(RecvPacket {
                    payload: datagram.payload,
                    source: datagram.source,
                    from_discovery,
                });
                if evicted.is_some() {
                    log::debug!("Receive queue full, dropped oldest packet");
                }
            }
        }
    }
}
