use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::net::FIRST_CLIENT_ID;

#[derive(Debug, Clone)]
pub struct ClientRecord {
    pub addr: SocketAddr,
    pub player_id: u32,
    pub last_seen: Instant,
}

impl ClientRecord {
    pub fn new(addr: SocketAddr, player_id: u32) -> Self {
        Self {
            addr,
            player_id,
            last_seen: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Host-side client records, kept in join order.
#[derive(Debug, Default)]
pub struct ClientList {
    clients: Vec<ClientRecord>,
    /// Timed-out clients. Their ids stay reserved for a rejoin from the same
    /// address.
    departed: Vec<ClientRecord>,
}

impl ClientList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, player_id: u32) -> Option<&ClientRecord> {
        self.clients.iter().find(|c| c.player_id == player_id)
    }

    pub fn get_mut(&mut self, player_id: u32) -> Option<&mut ClientRecord> {
        self.clients.iter_mut().find(|c| c.player_id == player_id)
    }

    pub fn get_by_addr(&self, addr: &SocketAddr) -> Option<&ClientRecord> {
        self.clients.iter().find(|c| c.addr == *addr)
    }

    pub fn get_by_addr_mut(&mut self, addr: &SocketAddr) -> Option<&mut ClientRecord> {
        self.clients.iter_mut().find(|c| c.addr == *addr)
    }

    pub fn at(&self, index: usize) -> Option<&ClientRecord> {
        self.clients.get(index)
    }

    pub fn push(&mut self, record: ClientRecord) {
        self.clients.push(record);
    }

    /// Smallest id >= [`FIRST_CLIENT_ID`] not held by a client, not reserved
    /// for a departed one and not rejected by `taken`.
    pub fn allocate_id(&self, taken: impl Fn(u32) -> bool) -> u32 {
        let mut id = FIRST_CLIENT_ID;
        while self.get(id).is_some() || self.is_departed_id(id) || taken(id) {
            id += 1;
        }
        id
    }

    pub fn is_departed(&self, addr: &SocketAddr) -> bool {
        self.departed.iter().any(|c| c.addr == *addr)
    }

    pub fn is_departed_id(&self, player_id: u32) -> bool {
        self.departed.iter().any(|c| c.player_id == player_id)
    }

    /// Forgets the departed record for `addr` and returns it.
    pub fn take_departed(&mut self, addr: &SocketAddr) -> Option<ClientRecord> {
        let index = self.departed.iter().position(|c| c.addr == *addr)?;
        Some(self.departed.remove(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientRecord> {
        self.clients.iter()
    }

    pub fn ids(&self) -> Vec<u32> {
        self.clients.iter().map(|c| c.player_id).collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Moves timed-out clients to the departed list and returns their ids.
    pub fn remove_timed_out(&mut self, timeout: Duration) -> Vec<u32> {
        let (timed_out, alive): (Vec<_>, Vec<_>) = self
            .clients
            .drain(..)
            .partition(|c| c.is_timed_out(timeout));
        self.clients = alive;

        let ids = timed_out.iter().map(|c| c.player_id).collect();
        for record in timed_out {
            self.departed.retain(|c| c.addr != record.addr);
            self.departed.push(record);
        }
        ids
    }
}
