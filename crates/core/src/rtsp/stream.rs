use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};

use crate::media::JpegPacketizer;
use crate::relay::VideoFrame;

/// RTP delivery state for one negotiated session.
///
/// Created by SETUP, started by PLAY, dropped by TEARDOWN or when the
/// control connection goes away. Each stream has its own socket, so the
/// `server_port` advertised in SETUP is a port that really sends.
#[derive(Debug)]
pub struct RtpStream {
    pub session_id: String,
    pub uri: String,
    /// Where RTP goes: the control connection's IP and the client RTP port.
    pub destination: SocketAddr,
    pub client_rtcp_port: u16,
    /// When the owning control connection was accepted.
    pub connected_at: Instant,
    socket: UdpSocket,
    packetizer: Mutex<JpegPacketizer>,
    playing: AtomicBool,
    closed: AtomicBool,
    frames_sent: AtomicU64,
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    send_errors: AtomicU64,
}

impl RtpStream {
    pub fn new(
        session_id: String,
        uri: String,
        destination: SocketAddr,
        client_rtcp_port: u16,
        socket: UdpSocket,
        packetizer: JpegPacketizer,
        connected_at: Instant,
    ) -> Self {
        Self {
            session_id,
            uri,
            destination,
            client_rtcp_port,
            connected_at,
            socket,
            packetizer: Mutex::new(packetizer),
            playing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            frames_sent: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            send_errors: AtomicU64::new(0),
        }
    }

    pub fn server_port(&self) -> u16 {
        self.socket.local_addr().map(|a| a.port()).unwrap_or(0)
    }

    pub fn ssrc(&self) -> u32 {
        self.packetizer.lock().ssrc()
    }

    /// `(sequence, rtptime)` the next frame will start with, for `RTP-Info`.
    pub fn rtp_position(&self) -> (u16, u32) {
        let p = self.packetizer.lock();
        (p.next_sequence(), p.next_rtp_timestamp())
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::SeqCst);
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    /// Stop delivery for good and tell the control connection to close.
    pub fn close(&self) {
        self.playing.store(false, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn send_errors(&self) -> u64 {
        self.send_errors.load(Ordering::Relaxed)
    }

    /// Packetize and send one frame. A failed send abandons the rest of
    /// this frame only; the stream stays up for the next one.
    pub fn send_frame(&self, frame: &VideoFrame) -> bool {
        // Sequence/timestamp state is advanced under the lock; the sends
        // happen after it is released.
        let packets = self
            .packetizer
            .lock()
            .packetize(&frame.data, frame.width, frame.height);
        if packets.is_empty() {
            return false;
        }

        for packet in &packets {
            match self.socket.send_to(packet, self.destination) {
                Ok(n) => {
                    self.packets_sent.fetch_add(1, Ordering::Relaxed);
                    self.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
                }
                Err(e) => {
                    self.send_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        session_id = %self.session_id,
                        dest = %self.destination,
                        sequence = frame.sequence,
                        error = %e,
                        "RTP send failed, frame abandoned"
                    );
                    return false;
                }
            }
        }
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        true
    }
}

/// Totals over every stream the registry has delivered to, including
/// streams since torn down.
#[derive(Debug, Default)]
struct DeliveryTotals {
    frames: AtomicU64,
    bytes: AtomicU64,
}

/// Thread-safe registry of negotiated RTP streams, keyed by session ID.
///
/// Backed by `parking_lot::RwLock`: the sender task reads it for every
/// frame, while writes happen only on SETUP and TEARDOWN.
#[derive(Clone, Default)]
pub struct StreamRegistry {
    streams: Arc<RwLock<HashMap<String, Arc<RtpStream>>>>,
    totals: Arc<DeliveryTotals>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, stream: Arc<RtpStream>) {
        let id = stream.session_id.clone();
        let mut streams = self.streams.write();
        streams.insert(id.clone(), stream);
        tracing::debug!(session_id = %id, total_streams = streams.len(), "stream registered");
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<RtpStream>> {
        self.streams.read().get(session_id).cloned()
    }

    pub fn remove(&self, session_id: &str) -> Option<Arc<RtpStream>> {
        let mut streams = self.streams.write();
        let removed = streams.remove(session_id);
        if removed.is_some() {
            tracing::debug!(session_id, total_streams = streams.len(), "stream removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.streams.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.read().is_empty()
    }

    pub fn playing(&self) -> Vec<Arc<RtpStream>> {
        self.streams
            .read()
            .values()
            .filter(|s| s.is_playing())
            .cloned()
            .collect()
    }

    /// Send `frame` to every playing stream. Returns how many streams got
    /// the whole frame.
    pub fn broadcast(&self, frame: &VideoFrame) -> usize {
        let mut delivered = 0;
        for stream in self.playing() {
            let before = stream.bytes_sent();
            let complete = stream.send_frame(frame);
            self.totals
                .bytes
                .fetch_add(stream.bytes_sent() - before, Ordering::Relaxed);
            if complete {
                delivered += 1;
            }
        }
        self.totals
            .frames
            .fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    /// Frames delivered in full, summed over streams.
    pub fn total_frames_sent(&self) -> u64 {
        self.totals.frames.load(Ordering::Relaxed)
    }

    /// RTP bytes sent, summed over streams.
    pub fn total_bytes_sent(&self) -> u64 {
        self.totals.bytes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::JpegParams;
    use std::time::Duration;

    fn stream_to(dest: SocketAddr, id: &str) -> Arc<RtpStream> {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        Arc::new(RtpStream::new(
            id.to_string(),
            "rtsp://127.0.0.1/stream".to_string(),
            dest,
            dest.port() + 1,
            socket,
            JpegPacketizer::new(JpegParams::default(), 0xDEADBEEF),
            Instant::now(),
        ))
    }

    fn frame(len: usize) -> VideoFrame {
        VideoFrame {
            data: vec![0x42; len],
            width: 320,
            height: 240,
            captured_at: Instant::now(),
            sequence: 1,
        }
    }

    #[test]
    fn broadcast_only_to_playing() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let dest = receiver.local_addr().unwrap();

        let registry = StreamRegistry::new();
        let playing = stream_to(dest, "A");
        let ready = stream_to(dest, "B");
        playing.set_playing(true);
        registry.insert(playing.clone());
        registry.insert(ready.clone());

        assert_eq!(registry.broadcast(&frame(100)), 1);
        assert_eq!(playing.frames_sent(), 1);
        assert_eq!(ready.frames_sent(), 0);
        assert_eq!(registry.total_frames_sent(), 1);
        assert_eq!(registry.total_bytes_sent(), 120);

        let mut buf = [0u8; 2048];
        let (n, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(n, 12 + 8 + 100);
        assert_eq!(buf[1], 0x80 | 26);
        assert_eq!(&buf[8..12], &0xDEADBEEFu32.to_be_bytes());
    }

    #[test]
    fn remove_stops_delivery() {
        let registry = StreamRegistry::new();
        let s = stream_to(SocketAddr::from(([127, 0, 0, 1], 9)), "X");
        s.set_playing(true);
        registry.insert(s);
        assert_eq!(registry.len(), 1);
        assert!(registry.remove("X").is_some());
        assert!(registry.is_empty());
        assert_eq!(registry.broadcast(&frame(10)), 0);
    }

    #[test]
    fn rtp_position_advances() {
        let s = stream_to(SocketAddr::from(([127, 0, 0, 1], 9)), "P");
        assert_eq!(s.rtp_position(), (0, 0));
        s.send_frame(&frame(3000));
        assert_eq!(s.rtp_position(), (3, 9000));
    }

    #[test]
    fn totals_survive_removal() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let registry = StreamRegistry::new();
        let s = stream_to(receiver.local_addr().unwrap(), "T");
        s.set_playing(true);
        registry.insert(s);
        assert_eq!(registry.broadcast(&frame(3000)), 1);
        registry.remove("T");
        assert_eq!(registry.total_frames_sent(), 1);
        assert_eq!(registry.total_bytes_sent(), 3000 + 3 * 20);
    }

    #[test]
    fn close_stops_playing() {
        let s = stream_to(SocketAddr::from(([127, 0, 0, 1], 9)), "C");
        s.set_playing(true);
        s.close();
        assert!(!s.is_playing());
        assert!(s.is_closed());
    }
}
