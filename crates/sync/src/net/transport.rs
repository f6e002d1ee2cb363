use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use super::stats::{NetworkStats, TrafficCounters};
use crate::error::{NetError, NetResult};

/// Receive buffer size. Anything longer than this is truncated by the OS and
/// then rejected by the decoder.
pub const RECV_BUFFER_SIZE: usize = 2048;

pub const DYNAMIC_ATTEMPTS_PER_RANGE: usize = 100;

const MIN_POLL_TIMEOUT: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub payload: Vec<u8>,
    pub source: SocketAddr,
}

/// A bound UDP socket. Every handle created by [`Transport::try_clone`] shares
/// the same socket and traffic counters.
#[derive(Debug)]
pub struct Transport {
    socket: Option<UdpSocket>,
    local_addr: SocketAddr,
    counters: Arc<TrafficCounters>,
}

impl Transport {
    pub fn bind(port: u16) -> NetResult<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))
            .map_err(|source| NetError::Bind { port, source })?;
        let local_addr = socket.local_addr()?;

        log::debug!("Bound UDP socket on {}", local_addr);

        Ok(Self {
            socket: Some(socket),
            local_addr,
            counters: Arc::new(TrafficCounters::default()),
        })
    }

    pub fn bind_broadcast(port: u16) -> NetResult<Self> {
        let transport = Self::bind(port)?;
        if let Some(socket) = &transport.socket {
            socket.set_broadcast(true)?;
        }
        Ok(transport)
    }

    /// Tries each range with short-lived binds on random candidates and
    /// returns the first port that could be bound.
    pub fn find_dynamic_port(ranges: &[RangeInclusive<u16>]) -> Option<u16> {
        let mut rng = rand::thread_rng();
        for range in ranges.iter().filter(|r| !r.is_empty()) {
            for _ in 0..DYNAMIC_ATTEMPTS_PER_RANGE {
                let candidate = rng.gen_range(range.clone());
                if candidate == 0 {
                    continue;
                }
                if UdpSocket::bind((Ipv4Addr::UNSPECIFIED, candidate)).is_ok() {
                    return Some(candidate);
                }
            }
            log::debug!("No free port found in {:?}", range);
        }
        None
    }

    pub fn bind_dynamic(ranges: &[RangeInclusive<u16>], broadcast: bool) -> NetResult<Self> {
        let port = Self::find_dynamic_port(ranges).ok_or(NetError::NoUsablePort)?;
        if broadcast {
            Self::bind_broadcast(port)
        } else {
            Self::bind(port)
        }
    }

    pub fn try_clone(&self) -> NetResult<Self> {
        let socket = match &self.socket {
            Some(socket) => Some(socket.try_clone()?),
            None => None,
        };
        Ok(Self {
            socket,
            local_addr: self.local_addr,
            counters: Arc::clone(&self.counters),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    pub fn stats(&self) -> NetworkStats {
        self.counters.snapshot()
    }

    /// Returns true only if the OS accepted the whole datagram.
    pub fn send_to(&self, addr: SocketAddr, bytes: &[u8]) -> bool {
        let Some(socket) = &self.socket else {
            return false;
        };

        match socket.send_to(bytes, addr) {
            Ok(sent) if sent == bytes.len() => {
                self.counters.record_sent(sent);
                true
            }
            Ok(sent) => {
                log::debug!("Short send to {}: {} of {} bytes", addr, sent, bytes.len());
                self.counters.record_send_failure();
                false
            }
            Err(e) => {
                log::debug!("Send to {} failed: {}", addr, e);
                self.counters.record_send_failure();
                false
            }
        }
    }

    pub fn send_broadcast(&self, broadcast_ip: Ipv4Addr, port: u16, bytes: &[u8]) -> bool {
        self.send_to(SocketAddr::from((broadcast_ip, port)), bytes)
    }

    /// Waits up to `timeout` for one datagram. `None` blocks indefinitely.
    /// An expired timeout is `Ok(None)`, not an error.
    pub fn poll_receive(&self, timeout: Option<Duration>) -> io::Result<Option<Datagram>> {
        let Some(socket) = &self.socket else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "transport closed"));
        };

        socket.set_read_timeout(timeout.map(|t| t.max(MIN_POLL_TIMEOUT)))?;

        let mut buf = [0u8; RECV_BUFFER_SIZE];
        match socket.recv_from(&mut buf) {
            Ok((size, source)) => {
                self.counters.record_received(size);
                Ok(Some(Datagram {
                    payload: buf[..size].to_vec(),
                    source,
                }))
            }
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Releases the socket. Safe to call any number of times.
    pub fn close(&mut self) {
        if self.socket.take().is_some() {
            log::debug!("Closed UDP socket on {}", self.local_addr);
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Best-effort LAN-facing IPv4 address. Connecting a UDP socket sends nothing;
/// it only asks the OS which interface would route there.
pub fn local_ip() -> IpAddr {
    let resolve = || -> io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(10, 255, 255, 255), 1))?;
        Ok(socket.local_addr()?.ip())
    };

    match resolve() {
        Ok(ip) if !ip.is_unspecified() => ip,
        _ => IpAddr::V4(Ipv4Addr::LOCALHOST),
    }
}
