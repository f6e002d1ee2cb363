use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// A raw datagram handed from the worker to the simulation thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecvPacket {
    pub payload: Vec<u8>,
    pub source: SocketAddr,
    pub from_discovery: bool,
}

impl RecvPacket {
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Bounded FIFO. When full, the oldest entry is evicted so the newest state
/// always gets through.
#[derive(Debug)]
pub struct ReceiveQueue {
    packets: Mutex<VecDeque<RecvPacket>>,
    capacity: usize,
    evicted: AtomicU64,
}

impl ReceiveQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            packets: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            evicted: AtomicU64::new(0),
        }
    }

    /// Returns the evicted entry, if the push displaced one.
    pub fn push(&self, packet: RecvPacket) -> Option<RecvPacket> {
        let mut packets = self.packets.lock();
        let evicted = if packets.len() >= self.capacity {
            self.evicted.fetch_add(1, Ordering::Relaxed);
            packets.pop_front()
        } else {
            None
        };
        packets.push_back(packet);
        evicted
    }

    /// Removes up to `max` packets in arrival order.
    pub fn drain(&self, max: usize) -> Vec<RecvPacket> {
        let mut packets = self.packets.lock();
        let take = max.min(packets.len());
        packets.drain(..take).collect()
    }

    pub fn clear(&self) {
        self.packets.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.packets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evicted_count(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for ReceiveQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
