//! JPEG over RTP (RFC 2435).
//!
//! Each frame is cut into fragments that fit the MTU. A packet is the
//! 12-byte RTP fixed header (RFC 3550 §5.1) followed by the 8-byte JPEG
//! main header and one fragment:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|   PT = 26   |       Sequence Number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                   Timestamp (one per frame)                   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                             SSRC                              |
//! +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
//! | Type-specific |              Fragment Offset                  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |      Type     |       Q       |     Width     |     Height    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Width and height are in 8-pixel blocks. All fragments of a frame share
//! one timestamp; the marker bit is set on the last one.

use rand::Rng;

/// Static RTP payload type for JPEG (RFC 3551 §6).
pub const JPEG_PAYLOAD_TYPE: u8 = 26;
/// RTP clock rate for video.
pub const CLOCK_RATE: u32 = 90_000;
pub const RTP_HEADER_LEN: usize = 12;
pub const JPEG_HEADER_LEN: usize = 8;
/// Default maximum RTP packet size.
pub const DEFAULT_MTU: usize = 1400;

const RTP_VERSION: u8 = 2;

/// Per-stream JPEG packetization parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JpegParams {
    /// Maximum size of one RTP packet, headers included.
    pub mtu: usize,
    /// RFC 2435 type field (1 = 4:2:0 sampling).
    pub jpeg_type: u8,
    /// RFC 2435 Q field.
    pub quality: u8,
    pub fps: u32,
}

impl Default for JpegParams {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            jpeg_type: 1,
            quality: 80,
            fps: 10,
        }
    }
}

impl JpegParams {
    /// Largest JPEG fragment that fits in one packet.
    pub fn max_fragment(&self) -> usize {
        self.mtu
            .saturating_sub(RTP_HEADER_LEN + JPEG_HEADER_LEN)
            .max(1)
    }

    /// RTP timestamp advance per frame.
    pub fn timestamp_increment(&self) -> u32 {
        CLOCK_RATE / self.fps.max(1)
    }
}

/// RTP state of one session: SSRC, the next sequence number and the
/// timestamp the next frame will carry.
#[derive(Debug)]
pub struct JpegPacketizer {
    params: JpegParams,
    ssrc: u32,
    sequence: u16,
    timestamp: u32,
}

impl JpegPacketizer {
    pub fn new(params: JpegParams, ssrc: u32) -> Self {
        Self {
            params,
            ssrc,
            sequence: 0,
            timestamp: 0,
        }
    }

    /// SSRC drawn at random (RFC 3550 §8.1).
    pub fn with_random_ssrc(params: JpegParams) -> Self {
        Self::new(params, rand::rng().random())
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn params(&self) -> &JpegParams {
        &self.params
    }

    /// Sequence number the next packet will carry.
    pub fn next_sequence(&self) -> u16 {
        self.sequence
    }

    /// RTP timestamp the next frame will carry.
    pub fn next_rtp_timestamp(&self) -> u32 {
        self.timestamp
    }

    fn push_rtp_header(&mut self, packet: &mut Vec<u8>, marker: bool) {
        packet.push(RTP_VERSION << 6);
        packet.push((u8::from(marker) << 7) | JPEG_PAYLOAD_TYPE);
        packet.extend_from_slice(&self.sequence.to_be_bytes());
        packet.extend_from_slice(&self.timestamp.to_be_bytes());
        packet.extend_from_slice(&self.ssrc.to_be_bytes());
        self.sequence = self.sequence.wrapping_add(1);
    }

    /// Split one JPEG frame into RTP packets. Empty input yields no packets
    /// and leaves the timestamp untouched.
    pub fn packetize(&mut self, jpeg: &[u8], width: u16, height: u16) -> Vec<Vec<u8>> {
        if jpeg.is_empty() {
            return Vec::new();
        }

        let max_fragment = self.params.max_fragment();
        let width_blocks = (width / 8).min(255) as u8;
        let height_blocks = (height / 8).min(255) as u8;
        let fragments = jpeg.len().div_ceil(max_fragment);
        let mut packets = Vec::with_capacity(fragments);

        for (i, chunk) in jpeg.chunks(max_fragment).enumerate() {
            let offset = (i * max_fragment) as u32;
            let last = i + 1 == fragments;

            let mut packet = Vec::with_capacity(RTP_HEADER_LEN + JPEG_HEADER_LEN + chunk.len());
            self.push_rtp_header(&mut packet, last);
            packet.push(0);
            packet.extend_from_slice(&offset.to_be_bytes()[1..]);
            packet.push(self.params.jpeg_type);
            packet.push(self.params.quality);
            packet.push(width_blocks);
            packet.push(height_blocks);
            packet.extend_from_slice(chunk);
            packets.push(packet);
        }

        tracing::trace!(
            len = jpeg.len(),
            packets = packets.len(),
            timestamp = self.timestamp,
            "packetized JPEG frame"
        );

        self.timestamp = self.timestamp.wrapping_add(self.params.timestamp_increment());
        packets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packetizer() -> JpegPacketizer {
        JpegPacketizer::new(JpegParams::default(), 0x01020304)
    }

    fn offset_of(packet: &[u8]) -> u32 {
        u32::from_be_bytes([0, packet[13], packet[14], packet[15]])
    }

    fn sequence_of(packet: &[u8]) -> u16 {
        u16::from_be_bytes([packet[2], packet[3]])
    }

    fn timestamp_of(packet: &[u8]) -> u32 {
        u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]])
    }

    #[test]
    fn fragment_size_respects_mtu() {
        assert_eq!(JpegParams::default().max_fragment(), 1380);
        let mut p = packetizer();
        let packets = p.packetize(&vec![0x11; 5000], 640, 480);
        assert_eq!(packets.len(), 4);
        assert!(packets.iter().all(|pkt| pkt.len() <= 1400));
        assert_eq!(packets[3].len(), 20 + 5000 - 3 * 1380);
    }

    #[test]
    fn offsets_and_marker() {
        let mut p = packetizer();
        let packets = p.packetize(&vec![0x11; 3000], 640, 480);
        let offsets: Vec<u32> = packets.iter().map(|pkt| offset_of(pkt)).collect();
        assert_eq!(offsets, vec![0, 1380, 2760]);

        let markers: Vec<bool> = packets.iter().map(|pkt| pkt[1] & 0x80 != 0).collect();
        assert_eq!(markers, vec![false, false, true]);
    }

    #[test]
    fn header_fields() {
        let mut p = packetizer();
        let packets = p.packetize(&[1, 2, 3], 640, 480);
        let pkt = &packets[0];
        assert_eq!(pkt[0], 0x80);
        assert_eq!(pkt[1], 0x80 | 26);
        assert_eq!(&pkt[8..12], &[1, 2, 3, 4]);
        assert_eq!(pkt[12], 0);
        assert_eq!(&pkt[16..20], &[1, 80, 80, 60]);
        assert_eq!(&pkt[20..], &[1, 2, 3]);
    }

    #[test]
    fn fragments_reassemble() {
        let jpeg: Vec<u8> = (0..4000u32).map(|i| (i % 251) as u8).collect();
        let mut p = packetizer();
        let mut out = vec![0u8; jpeg.len()];
        for pkt in p.packetize(&jpeg, 320, 240) {
            let off = offset_of(&pkt) as usize;
            let body = &pkt[20..];
            out[off..off + body.len()].copy_from_slice(body);
        }
        assert_eq!(out, jpeg);
    }

    #[test]
    fn sequence_per_packet_timestamp_per_frame() {
        let mut p = packetizer();
        let first = p.packetize(&vec![0; 2000], 320, 240);
        let second = p.packetize(&vec![0; 10], 320, 240);

        let seqs: Vec<u16> = first.iter().chain(&second).map(|pkt| sequence_of(pkt)).collect();
        assert_eq!(seqs, vec![0, 1, 2]);

        assert_eq!(timestamp_of(&first[0]), timestamp_of(&first[1]));
        assert_eq!(timestamp_of(&second[0]), 9000);
        assert_eq!(p.next_rtp_timestamp(), 18000);
    }

    #[test]
    fn counters_wrap() {
        let mut p = packetizer();
        p.sequence = u16::MAX;
        p.timestamp = u32::MAX - 1;
        let packets = p.packetize(&vec![0; 2000], 320, 240);
        assert_eq!(sequence_of(&packets[0]), u16::MAX);
        assert_eq!(sequence_of(&packets[1]), 0);
        assert_eq!(p.next_rtp_timestamp(), 8998);
    }

    #[test]
    fn empty_frame_no_packets() {
        let mut p = packetizer();
        assert!(p.packetize(&[], 320, 240).is_empty());
        assert_eq!(p.next_rtp_timestamp(), 0);
        assert_eq!(p.next_sequence(), 0);
    }

    #[test]
    fn large_dimensions_clamped() {
        let mut p = packetizer();
        let pkt = &p.packetize(&[0], 4096, 4096)[0];
        assert_eq!(pkt[18], 255);
        assert_eq!(pkt[19], 255);
    }

    #[test]
    fn timestamp_increment_from_fps() {
        let params = JpegParams {
            fps: 25,
            ..Default::default()
        };
        assert_eq!(params.timestamp_increment(), 3600);
    }

    #[test]
    fn random_ssrc_per_session() {
        let a = JpegPacketizer::with_random_ssrc(JpegParams::default());
        let b = JpegPacketizer::with_random_ssrc(JpegParams::default());
        assert_ne!(a.ssrc(), b.ssrc());
    }
}
