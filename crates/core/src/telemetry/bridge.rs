use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use super::peers::{GcsPeer, PeerTable, PeerTouch};
use crate::error::{Result, SkycamError};
use crate::mavlink::{FeedResult, HeartbeatInfo, MAX_FRAME_LEN, MavlinkFrame, MavlinkFramer};

/// Default GCS-facing UDP port.
pub const DEFAULT_MAVLINK_PORT: u16 = 14550;

const IDLE_BACKOFF: Duration = Duration::from_millis(10);
const ERROR_BACKOFF: Duration = Duration::from_millis(100);
const STATS_LOG_INTERVAL: Duration = Duration::from_secs(30);
const UDP_BUFFER_LEN: usize = 2048;

/// Telemetry bridge configuration. Built once at startup.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Local UDP address GCS peers send to.
    pub udp_bind: SocketAddr,
    /// Maximum tracked GCS peers.
    pub max_peers: usize,
    /// A peer silent for this long is evicted.
    pub peer_timeout: Duration,
    /// How often the serial pump sweeps for stale peers.
    pub sweep_interval: Duration,
    /// Size of a single serial read.
    pub serial_buffer_len: usize,
    /// Bounded wait on the UDP socket, so the network pump can observe stop.
    pub recv_timeout: Duration,
    /// The autopilot counts as connected while its last heartbeat is
    /// younger than this.
    pub heartbeat_freshness: Duration,
    /// Frame GCS datagrams before writing them to serial and drop the ones
    /// with bad checksums. Off by default: datagrams go to the autopilot
    /// unmodified.
    pub validate_uplink: bool,
    /// Bound on queued [`BridgeEvent`]s; further events are dropped until
    /// the owner drains the channel.
    pub event_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            udp_bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_MAVLINK_PORT)),
            max_peers: 4,
            peer_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(5),
            serial_buffer_len: 2048,
            recv_timeout: Duration::from_millis(50),
            heartbeat_freshness: Duration::from_secs(3),
            validate_uplink: false,
            event_capacity: 64,
        }
    }
}

/// Notifications published by the bridge pumps.
///
/// Delivered over a bounded channel obtained from
/// [`TelemetryBridge::events`]. Sent from the pump threads with no bridge
/// lock held.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    PeerConnected(SocketAddr),
    PeerEvicted(SocketAddr),
    /// First heartbeat after start, or after the previous one went stale.
    AutopilotConnected { sysid: u8, compid: u8 },
    Heartbeat(HeartbeatInfo),
}

/// Point-in-time copy of the bridge counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub serial_rx_bytes: u64,
    pub serial_tx_bytes: u64,
    pub udp_rx_bytes: u64,
    pub udp_tx_bytes: u64,
    /// Valid frames decoded from the autopilot link.
    pub downlink_frames: u64,
    /// Datagrams (or validated frames) written to the autopilot.
    pub uplink_messages: u64,
    /// Serial frames dropped on checksum mismatch.
    pub parse_errors: u64,
    /// Uplink frames dropped by validation.
    pub uplink_rejected: u64,
    pub peers_added: u64,
    pub peers_evicted: u64,
    /// Datagrams from new addresses while the peer table was full.
    pub peers_rejected: u64,
    pub uptime: Duration,
}

#[derive(Debug, Default)]
struct Counters {
    serial_rx_bytes: AtomicU64,
    serial_tx_bytes: AtomicU64,
    udp_rx_bytes: AtomicU64,
    udp_tx_bytes: AtomicU64,
    downlink_frames: AtomicU64,
    uplink_messages: AtomicU64,
    parse_errors: AtomicU64,
    uplink_rejected: AtomicU64,
    peers_added: AtomicU64,
    peers_evicted: AtomicU64,
    peers_rejected: AtomicU64,
}

fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

struct Shared {
    config: BridgeConfig,
    socket: UdpSocket,
    peers: Mutex<PeerTable>,
    heartbeat: Mutex<Option<HeartbeatInfo>>,
    /// Serialises the uplink pump and [`TelemetryBridge::send_to_autopilot`].
    serial_writer: Mutex<Box<dyn Write + Send>>,
    counters: Counters,
    events: Sender<BridgeEvent>,
    running: AtomicBool,
    started_at: Instant,
}

impl Shared {
    fn emit(&self, event: BridgeEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::trace!(?event, "event channel full, dropping event");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn stats(&self) -> BridgeStats {
        let c = &self.counters;
        let get = |a: &AtomicU64| a.load(Ordering::Relaxed);
        BridgeStats {
            serial_rx_bytes: get(&c.serial_rx_bytes),
            serial_tx_bytes: get(&c.serial_tx_bytes),
            udp_rx_bytes: get(&c.udp_rx_bytes),
            udp_tx_bytes: get(&c.udp_tx_bytes),
            downlink_frames: get(&c.downlink_frames),
            uplink_messages: get(&c.uplink_messages),
            parse_errors: get(&c.parse_errors),
            uplink_rejected: get(&c.uplink_rejected),
            peers_added: get(&c.peers_added),
            peers_evicted: get(&c.peers_evicted),
            peers_rejected: get(&c.peers_rejected),
            uptime: self.started_at.elapsed(),
        }
    }

    /// Send `bytes` to every tracked peer. Returns the number of peers
    /// the datagram was handed to.
    fn forward_to_gcs(&self, bytes: &[u8]) -> usize {
        let targets = self.peers.lock().addrs();
        let mut delivered = Vec::with_capacity(targets.len());

        for addr in targets {
            match self.socket.send_to(bytes, addr) {
                Ok(n) => {
                    bump(&self.counters.udp_tx_bytes, n as u64);
                    delivered.push(addr);
                }
                Err(e) => {
                    tracing::warn!(peer = %addr, error = %e, "UDP send to GCS failed");
                }
            }
        }

        if !delivered.is_empty() {
            let mut peers = self.peers.lock();
            for addr in &delivered {
                peers.record_sent(addr);
            }
        }
        delivered.len()
    }

    fn write_serial(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut writer = self.serial_writer.lock();
        writer.write_all(bytes)?;
        writer.flush()?;
        bump(&self.counters.serial_tx_bytes, bytes.len() as u64);
        Ok(())
    }

    fn on_autopilot_frame(&self, frame: &MavlinkFrame, wire: &mut Vec<u8>) {
        bump(&self.counters.downlink_frames, 1);

        let now = Instant::now();
        if let Some(info) = HeartbeatInfo::from_frame(frame, now) {
            let was_fresh = {
                let mut hb = self.heartbeat.lock();
                let was_fresh = hb
                    .as_ref()
                    .is_some_and(|prev| prev.is_fresh(now, self.config.heartbeat_freshness));
                *hb = Some(info);
                was_fresh
            };
            if !was_fresh {
                tracing::info!(
                    sysid = info.sysid,
                    compid = info.compid,
                    mav_type = info.mav_type,
                    autopilot = info.autopilot,
                    "autopilot heartbeat received"
                );
                self.emit(BridgeEvent::AutopilotConnected {
                    sysid: info.sysid,
                    compid: info.compid,
                });
            }
            self.emit(BridgeEvent::Heartbeat(info));
        }

        wire.clear();
        frame.encode_into(wire);
        self.forward_to_gcs(wire);
    }

    fn note_peer(&self, addr: SocketAddr) {
        let touch = self.peers.lock().touch(addr, Instant::now());
        match touch {
            PeerTouch::Existing => {}
            PeerTouch::Added => {
                bump(&self.counters.peers_added, 1);
                tracing::info!(peer = %addr, "GCS connected");
                self.emit(BridgeEvent::PeerConnected(addr));
            }
            PeerTouch::Full => {
                bump(&self.counters.peers_rejected, 1);
                tracing::debug!(peer = %addr, "peer table full, datagram forwarded untracked");
            }
        }
    }

    fn sweep(&self, now: Instant) {
        let evicted = self
            .peers
            .lock()
            .evict_stale(now, self.config.peer_timeout);
        for addr in evicted {
            bump(&self.counters.peers_evicted, 1);
            tracing::info!(peer = %addr, "GCS timed out");
            self.emit(BridgeEvent::PeerEvicted(addr));
        }
    }
}

fn is_transient(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
    )
}

/// Serial-to-network pump: frames autopilot bytes and fans valid frames
/// out to every GCS peer. Also owns the periodic peer sweep.
fn serial_pump(shared: Arc<Shared>, mut reader: Box<dyn Read + Send>) {
    let mut framer = MavlinkFramer::new();
    let mut buf = vec![0u8; shared.config.serial_buffer_len.max(1)];
    let mut wire = Vec::with_capacity(MAX_FRAME_LEN);
    let mut last_sweep = Instant::now();
    let mut last_stats = Instant::now();

    while shared.running.load(Ordering::SeqCst) {
        match reader.read(&mut buf) {
            Ok(0) => thread::sleep(IDLE_BACKOFF),
            Ok(n) => {
                bump(&shared.counters.serial_rx_bytes, n as u64);
                for &byte in &buf[..n] {
                    match framer.feed(byte) {
                        FeedResult::Incomplete => {}
                        FeedResult::FrameReady(frame) => {
                            shared.on_autopilot_frame(&frame, &mut wire);
                        }
                        FeedResult::BadChecksum => {
                            bump(&shared.counters.parse_errors, 1);
                        }
                    }
                }
            }
            Err(e) if is_transient(e.kind()) => {}
            Err(e) => {
                tracing::warn!(error = %e, "serial read failed");
                thread::sleep(ERROR_BACKOFF);
            }
        }

        if last_sweep.elapsed() >= shared.config.sweep_interval {
            shared.sweep(Instant::now());
            last_sweep = Instant::now();
        }

        if last_stats.elapsed() >= STATS_LOG_INTERVAL {
            let s = shared.stats();
            tracing::info!(
                serial_rx = s.serial_rx_bytes,
                serial_tx = s.serial_tx_bytes,
                udp_rx = s.udp_rx_bytes,
                udp_tx = s.udp_tx_bytes,
                frames = s.downlink_frames,
                parse_errors = s.parse_errors,
                peers = shared.peers.lock().len(),
                "telemetry stats"
            );
            last_stats = Instant::now();
        }
    }
    tracing::debug!("serial pump exited");
}

/// Network-to-serial pump: tracks the sender as a GCS peer and writes the
/// datagram to the autopilot.
fn network_pump(shared: Arc<Shared>) {
    let mut buf = [0u8; UDP_BUFFER_LEN];
    let mut framer = MavlinkFramer::new();
    let mut wire = Vec::with_capacity(MAX_FRAME_LEN);

    while shared.running.load(Ordering::SeqCst) {
        let (n, src) = match shared.socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e) if is_transient(e.kind()) => continue,
            Err(e) => {
                if shared.running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "UDP receive failed");
                }
                thread::sleep(ERROR_BACKOFF);
                continue;
            }
        };

        bump(&shared.counters.udp_rx_bytes, n as u64);
        shared.note_peer(src);
        let datagram = &buf[..n];

        if !shared.config.validate_uplink {
            match shared.write_serial(datagram) {
                Ok(()) => bump(&shared.counters.uplink_messages, 1),
                Err(e) => tracing::warn!(peer = %src, error = %e, "serial write failed"),
            }
            continue;
        }

        // MAVLink over UDP carries whole frames per datagram.
        framer.reset();
        for &byte in datagram {
            match framer.feed(byte) {
                FeedResult::Incomplete => {}
                FeedResult::FrameReady(frame) => {
                    wire.clear();
                    frame.encode_into(&mut wire);
                    match shared.write_serial(&wire) {
                        Ok(()) => bump(&shared.counters.uplink_messages, 1),
                        Err(e) => {
                            tracing::warn!(peer = %src, error = %e, "serial write failed")
                        }
                    }
                }
                FeedResult::BadChecksum => {
                    bump(&shared.counters.uplink_rejected, 1);
                    tracing::debug!(peer = %src, "dropping uplink frame with bad checksum");
                }
            }
        }
    }
    tracing::debug!("network pump exited");
}

/// Serial ↔ UDP MAVLink bridge with multi-GCS fan-out.
///
/// Owns one serial endpoint (as separate reader and writer halves) and one
/// UDP socket, each served by its own pump thread. Frames from the
/// autopilot are validated and forwarded to every live GCS peer in the
/// order they were received; datagrams from any GCS go to the autopilot.
///
/// Stopping (or dropping) the bridge joins both pumps and closes the
/// socket. Every blocking call inside the pumps is bounded by a timeout,
/// so `stop` returns within roughly one read interval.
pub struct TelemetryBridge {
    shared: Arc<Shared>,
    events: Receiver<BridgeEvent>,
    local_addr: SocketAddr,
    handles: Vec<JoinHandle<()>>,
}

impl TelemetryBridge {
    pub fn start(
        config: BridgeConfig,
        serial_reader: Box<dyn Read + Send>,
        serial_writer: Box<dyn Write + Send>,
    ) -> Result<Self> {
        if config.max_peers == 0 {
            return Err(SkycamError::InvalidConfig(
                "max_peers must be at least 1".to_string(),
            ));
        }

        let socket = UdpSocket::bind(config.udp_bind)?;
        socket.set_read_timeout(Some(config.recv_timeout))?;
        let local_addr = socket.local_addr()?;

        let (tx, rx) = crossbeam_channel::bounded(config.event_capacity.max(1));

        let shared = Arc::new(Shared {
            peers: Mutex::new(PeerTable::new(config.max_peers)),
            heartbeat: Mutex::new(None),
            serial_writer: Mutex::new(serial_writer),
            counters: Counters::default(),
            events: tx,
            running: AtomicBool::new(true),
            started_at: Instant::now(),
            socket,
            config,
        });

        tracing::info!(
            addr = %local_addr,
            max_peers = shared.config.max_peers,
            validate_uplink = shared.config.validate_uplink,
            "MAVLink bridge listening"
        );

        let mut handles = Vec::with_capacity(2);

        let s = shared.clone();
        handles.push(
            thread::Builder::new()
                .name("mavlink-serial".to_string())
                .spawn(move || serial_pump(s, serial_reader))?,
        );

        let s = shared.clone();
        let spawned = thread::Builder::new()
            .name("mavlink-udp".to_string())
            .spawn(move || network_pump(s));
        match spawned {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                shared.running.store(false, Ordering::SeqCst);
                for h in handles {
                    let _ = h.join();
                }
                return Err(e.into());
            }
        }

        Ok(Self {
            shared,
            events: rx,
            local_addr,
            handles,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Most recent autopilot heartbeat, if any has been seen.
    pub fn heartbeat(&self) -> Option<HeartbeatInfo> {
        *self.shared.heartbeat.lock()
    }

    /// Whether a heartbeat arrived within the configured freshness window.
    pub fn autopilot_connected(&self) -> bool {
        self.heartbeat().is_some_and(|hb| {
            hb.is_fresh(Instant::now(), self.shared.config.heartbeat_freshness)
        })
    }

    pub fn gcs_connected(&self) -> bool {
        !self.shared.peers.lock().is_empty()
    }

    pub fn peers(&self) -> Vec<GcsPeer> {
        self.shared.peers.lock().snapshot()
    }

    pub fn stats(&self) -> BridgeStats {
        self.shared.stats()
    }

    /// Receiver for bridge notifications. All clones share one queue.
    pub fn events(&self) -> Receiver<BridgeEvent> {
        self.events.clone()
    }

    /// Send locally generated bytes to every GCS peer. Returns how many
    /// peers they were handed to.
    pub fn send_to_gcs(&self, bytes: &[u8]) -> usize {
        self.shared.forward_to_gcs(bytes)
    }

    /// Write locally generated bytes to the autopilot link.
    pub fn send_to_autopilot(&self, bytes: &[u8]) -> Result<()> {
        if !self.is_running() {
            return Err(SkycamError::NotStarted);
        }
        self.shared.write_serial(bytes)?;
        Ok(())
    }

    pub fn stop(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        self.shared.running.store(false, Ordering::SeqCst);
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                tracing::error!("telemetry pump panicked");
            }
        }
        tracing::info!("MAVLink bridge stopped");
    }
}

impl Drop for TelemetryBridge {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = BridgeConfig::default();
        assert_eq!(c.udp_bind.port(), 14550);
        assert_eq!(c.max_peers, 4);
        assert_eq!(c.peer_timeout, Duration::from_secs(30));
        assert_eq!(c.sweep_interval, Duration::from_secs(5));
        assert_eq!(c.heartbeat_freshness, Duration::from_secs(3));
        assert!(!c.validate_uplink);
    }

    #[test]
    fn transient_errors() {
        assert!(is_transient(ErrorKind::TimedOut));
        assert!(is_transient(ErrorKind::WouldBlock));
        assert!(!is_transient(ErrorKind::BrokenPipe));
    }

    #[test]
    fn zero_peers_rejected() {
        let config = BridgeConfig {
            udp_bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            max_peers: 0,
            ..Default::default()
        };
        let result = TelemetryBridge::start(
            config,
            Box::new(std::io::empty()),
            Box::new(std::io::sink()),
        );
        assert!(matches!(result, Err(SkycamError::InvalidConfig(_))));
    }
}
