use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// One remote ground-control endpoint that has sent us datagrams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcsPeer {
    pub addr: SocketAddr,
    pub last_seen: Instant,
    /// Datagrams forwarded from the autopilot to this peer.
    pub messages_sent: u64,
    /// Datagrams received from this peer.
    pub messages_received: u64,
}

/// Result of recording an inbound datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerTouch {
    /// Known peer; last-seen refreshed.
    Existing,
    /// New peer stored.
    Added,
    /// New peer, but the table is full; not tracked.
    Full,
}

/// Bounded set of GCS peers keyed by address and port.
///
/// All time-dependent methods take `now` explicitly so eviction can be
/// tested without sleeping.
#[derive(Debug)]
pub struct PeerTable {
    peers: Vec<GcsPeer>,
    capacity: usize,
}

impl PeerTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            peers: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.peers.iter().any(|p| p.addr == *addr)
    }

    /// Record a datagram from `addr`.
    pub fn touch(&mut self, addr: SocketAddr, now: Instant) -> PeerTouch {
        if let Some(peer) = self.peers.iter_mut().find(|p| p.addr == addr) {
            peer.last_seen = now;
            peer.messages_received += 1;
            return PeerTouch::Existing;
        }
        if self.peers.len() >= self.capacity {
            return PeerTouch::Full;
        }
        self.peers.push(GcsPeer {
            addr,
            last_seen: now,
            messages_sent: 0,
            messages_received: 1,
        });
        PeerTouch::Added
    }

    /// Remove peers silent for `timeout` or longer; returns their addresses.
    pub fn evict_stale(&mut self, now: Instant, timeout: Duration) -> Vec<SocketAddr> {
        let mut evicted = Vec::new();
        self.peers.retain(|p| {
            let alive = now.saturating_duration_since(p.last_seen) < timeout;
            if !alive {
                evicted.push(p.addr);
            }
            alive
        });
        evicted
    }

    pub fn record_sent(&mut self, addr: &SocketAddr) {
        if let Some(peer) = self.peers.iter_mut().find(|p| p.addr == *addr) {
            peer.messages_sent += 1;
        }
    }

    pub fn addrs(&self) -> Vec<SocketAddr> {
        self.peers.iter().map(|p| p.addr).collect()
    }

    pub fn snapshot(&self) -> Vec<GcsPeer> {
        self.peers.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([192, 168, 4, 2], port))
    }

    #[test]
    fn repeated_datagrams_one_peer() {
        let mut table = PeerTable::new(4);
        let now = Instant::now();
        assert_eq!(table.touch(addr(14550), now), PeerTouch::Added);
        for _ in 0..99 {
            assert_eq!(table.touch(addr(14550), now), PeerTouch::Existing);
        }
        assert_eq!(table.len(), 1);
        assert_eq!(table.snapshot()[0].messages_received, 100);
    }

    #[test]
    fn same_ip_different_port_is_distinct() {
        let mut table = PeerTable::new(4);
        let now = Instant::now();
        table.touch(addr(14550), now);
        table.touch(addr(14551), now);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn capacity_bound() {
        let mut table = PeerTable::new(2);
        let now = Instant::now();
        table.touch(addr(1), now);
        table.touch(addr(2), now);
        assert_eq!(table.touch(addr(3), now), PeerTouch::Full);
        assert_eq!(table.len(), 2);
        assert!(!table.contains(&addr(3)));
    }

    #[test]
    fn eviction_after_timeout() {
        let mut table = PeerTable::new(4);
        let t0 = Instant::now();
        let timeout = Duration::from_secs(30);
        table.touch(addr(1), t0);
        table.touch(addr(2), t0 + Duration::from_secs(20));

        assert!(table.evict_stale(t0 + Duration::from_secs(29), timeout).is_empty());

        let evicted = table.evict_stale(t0 + Duration::from_secs(30), timeout);
        assert_eq!(evicted, vec![addr(1)]);
        assert_eq!(table.addrs(), vec![addr(2)]);
    }

    #[test]
    fn touch_refreshes_liveness() {
        let mut table = PeerTable::new(4);
        let t0 = Instant::now();
        let timeout = Duration::from_secs(30);
        table.touch(addr(1), t0);
        table.touch(addr(1), t0 + Duration::from_secs(25));
        assert!(table.evict_stale(t0 + Duration::from_secs(40), timeout).is_empty());
    }

    #[test]
    fn sent_counter() {
        let mut table = PeerTable::new(4);
        table.touch(addr(1), Instant::now());
        table.record_sent(&addr(1));
        table.record_sent(&addr(1));
        table.record_sent(&addr(9));
        assert_eq!(table.snapshot()[0].messages_sent, 2);
    }
}
