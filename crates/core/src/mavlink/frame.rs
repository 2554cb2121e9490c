use super::crc::X25Crc;
use super::{INCOMPAT_FLAG_SIGNED, MAX_PAYLOAD_LEN, SIGNATURE_LEN, STX_V1, STX_V2, crc_extra};

/// MAVLink protocol revision, identified by the start marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MavlinkVersion {
    V1,
    V2,
}

impl MavlinkVersion {
    pub fn start_marker(self) -> u8 {
        match self {
            Self::V1 => STX_V1,
            Self::V2 => STX_V2,
        }
    }

    pub fn from_start_marker(byte: u8) -> Option<Self> {
        match byte {
            STX_V1 => Some(Self::V1),
            STX_V2 => Some(Self::V2),
            _ => None,
        }
    }

    /// Header length including the start marker.
    pub fn header_len(self) -> usize {
        match self {
            Self::V1 => 6,
            Self::V2 => 10,
        }
    }
}

/// One decoded MAVLink frame.
///
/// The payload is kept in a fixed buffer so the framer never allocates;
/// [`payload`](Self::payload) returns the used prefix. `checksum` holds the
/// value read from the wire (or computed, for frames built locally), so
/// [`encode`](Self::encode) reproduces the received bytes exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MavlinkFrame {
    pub version: MavlinkVersion,
    pub len: u8,
    /// Always 0 for v1.
    pub incompat_flags: u8,
    /// Always 0 for v1.
    pub compat_flags: u8,
    pub seq: u8,
    pub sysid: u8,
    pub compid: u8,
    /// 8 significant bits for v1, 24 for v2.
    pub msgid: u32,
    pub(crate) payload: [u8; MAX_PAYLOAD_LEN],
    pub checksum: u16,
    pub signature: Option<[u8; SIGNATURE_LEN]>,
}

impl MavlinkFrame {
    /// Build an outgoing frame with a freshly computed checksum.
    ///
    /// Payloads longer than 255 bytes are cut to 255. For v1 only the low
    /// 8 bits of `msgid` are kept, for v2 the low 24.
    pub fn new(
        version: MavlinkVersion,
        seq: u8,
        sysid: u8,
        compid: u8,
        msgid: u32,
        payload: &[u8],
    ) -> Self {
        let len = payload.len().min(MAX_PAYLOAD_LEN);
        let mut buf = [0u8; MAX_PAYLOAD_LEN];
        buf[..len].copy_from_slice(&payload[..len]);

        let msgid = match version {
            MavlinkVersion::V1 => msgid & 0xFF,
            MavlinkVersion::V2 => msgid & 0x00FF_FFFF,
        };

        let mut frame = Self {
            version,
            len: len as u8,
            incompat_flags: 0,
            compat_flags: 0,
            seq,
            sysid,
            compid,
            msgid,
            payload: buf,
            checksum: 0,
            signature: None,
        };
        frame.checksum = frame.compute_checksum();
        frame
    }

    pub(crate) fn empty(version: MavlinkVersion) -> Self {
        Self {
            version,
            len: 0,
            incompat_flags: 0,
            compat_flags: 0,
            seq: 0,
            sysid: 0,
            compid: 0,
            msgid: 0,
            payload: [0u8; MAX_PAYLOAD_LEN],
            checksum: 0,
            signature: None,
        }
    }

    /// Attach a v2 signature block and set the signed incompat flag.
    ///
    /// The checksum covers the incompat flags, so it is recomputed. Has no
    /// effect on v1 frames.
    pub fn with_signature(mut self, signature: [u8; SIGNATURE_LEN]) -> Self {
        if self.version == MavlinkVersion::V2 {
            self.incompat_flags |= INCOMPAT_FLAG_SIGNED;
            self.signature = Some(signature);
            self.checksum = self.compute_checksum();
        }
        self
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.len as usize]
    }

    pub fn is_signed(&self) -> bool {
        self.version == MavlinkVersion::V2 && self.incompat_flags & INCOMPAT_FLAG_SIGNED != 0
    }

    /// Header bytes covered by the checksum (everything after the marker).
    fn checked_header(&self) -> ([u8; 9], usize) {
        let mut h = [0u8; 9];
        match self.version {
            MavlinkVersion::V1 => {
                h[..5].copy_from_slice(&[
                    self.len,
                    self.seq,
                    self.sysid,
                    self.compid,
                    self.msgid as u8,
                ]);
                (h, 5)
            }
            MavlinkVersion::V2 => {
                let id = self.msgid.to_le_bytes();
                h.copy_from_slice(&[
                    self.len,
                    self.incompat_flags,
                    self.compat_flags,
                    self.seq,
                    self.sysid,
                    self.compid,
                    id[0],
                    id[1],
                    id[2],
                ]);
                (h, 9)
            }
        }
    }

    /// CRC over header and payload, finished with the message's CRC_EXTRA.
    pub fn compute_checksum(&self) -> u16 {
        let (header, n) = self.checked_header();
        let mut crc = X25Crc::new();
        crc.accumulate_slice(&header[..n]);
        crc.accumulate_slice(self.payload());
        crc.accumulate(crc_extra(self.msgid));
        crc.value()
    }

    pub fn checksum_valid(&self) -> bool {
        self.compute_checksum() == self.checksum
    }

    /// Total length of this frame on the wire.
    pub fn wire_len(&self) -> usize {
        let sig = if self.signature.is_some() {
            SIGNATURE_LEN
        } else {
            0
        };
        self.version.header_len() + self.len as usize + 2 + sig
    }

    /// Append the wire representation to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let (header, n) = self.checked_header();
        out.reserve(self.wire_len());
        out.push(self.version.start_marker());
        out.extend_from_slice(&header[..n]);
        out.extend_from_slice(self.payload());
        out.extend_from_slice(&self.checksum.to_le_bytes());
        if let Some(sig) = &self.signature {
            out.extend_from_slice(sig);
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_len());
        self.encode_into(&mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mavlink::MSG_ID_HEARTBEAT;

    #[test]
    fn v1_layout() {
        let frame = MavlinkFrame::new(MavlinkVersion::V1, 7, 1, 1, MSG_ID_HEARTBEAT, &[0u8; 9]);
        let bytes = frame.encode();
        assert_eq!(bytes.len(), 6 + 9 + 2);
        assert_eq!(&bytes[..6], &[0xFE, 9, 7, 1, 1, 0]);
        let crc = u16::from_le_bytes([bytes[15], bytes[16]]);
        assert_eq!(crc, frame.checksum);
    }

    #[test]
    fn v2_layout() {
        let frame = MavlinkFrame::new(MavlinkVersion::V2, 0, 42, 200, 0x012345, &[1, 2, 3]);
        let bytes = frame.encode();
        assert_eq!(bytes.len(), 10 + 3 + 2);
        assert_eq!(
            &bytes[..10],
            &[0xFD, 3, 0, 0, 0, 42, 200, 0x45, 0x23, 0x01]
        );
        assert_eq!(&bytes[10..13], &[1, 2, 3]);
    }

    #[test]
    fn checksum_covers_crc_extra() {
        let hb = MavlinkFrame::new(MavlinkVersion::V2, 0, 1, 1, MSG_ID_HEARTBEAT, &[0u8; 9]);
        let mut other = hb.clone();
        other.msgid = 3;
        // Same bytes except the id; the extra byte differs (50 vs 0).
        assert_ne!(hb.compute_checksum(), other.compute_checksum());
    }

    #[test]
    fn checksum_matches_manual_crc() {
        let frame = MavlinkFrame::new(MavlinkVersion::V1, 0, 1, 1, 0, &[0u8; 9]);
        let bytes = frame.encode();
        let mut crc = X25Crc::new();
        crc.accumulate_slice(&bytes[1..15]);
        crc.accumulate(50);
        assert_eq!(frame.checksum, crc.value());
    }

    #[test]
    fn v1_truncates_msgid() {
        let frame = MavlinkFrame::new(MavlinkVersion::V1, 0, 1, 1, 0x1FF, &[]);
        assert_eq!(frame.msgid, 0xFF);
    }

    #[test]
    fn oversized_payload_is_cut() {
        let frame = MavlinkFrame::new(MavlinkVersion::V2, 0, 1, 1, 0, &[7u8; 300]);
        assert_eq!(frame.len, 255);
        assert_eq!(frame.payload().len(), 255);
    }

    #[test]
    fn signature_appended() {
        let frame = MavlinkFrame::new(MavlinkVersion::V2, 0, 1, 1, 0, &[0u8; 9])
            .with_signature([0xAA; SIGNATURE_LEN]);
        assert!(frame.is_signed());
        assert!(frame.checksum_valid());
        let bytes = frame.encode();
        assert_eq!(bytes.len(), 10 + 9 + 2 + 13);
        assert_eq!(bytes[2], INCOMPAT_FLAG_SIGNED);
        assert_eq!(&bytes[bytes.len() - 13..], &[0xAA; 13]);
    }

    #[test]
    fn signature_ignored_for_v1() {
        let frame = MavlinkFrame::new(MavlinkVersion::V1, 0, 1, 1, 0, &[])
            .with_signature([0xAA; SIGNATURE_LEN]);
        assert!(!frame.is_signed());
        assert_eq!(frame.encode().len(), 8);
    }
}
