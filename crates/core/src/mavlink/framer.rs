use super::crc::X25Crc;
use super::frame::{MavlinkFrame, MavlinkVersion};
use super::{INCOMPAT_FLAG_SIGNED, SIGNATURE_LEN, crc_extra};

/// Parse cursor position: the last element of the frame that was consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramerState {
    Idle,
    GotStart,
    GotLength,
    GotIncompatFlags,
    GotCompatFlags,
    GotSequence,
    GotSystemId,
    GotComponentId,
    GotMessageIdByte1,
    GotMessageIdByte2,
    AccumulatingPayload,
    GotPayload,
    GotChecksumByte1,
    ReadingSignature,
}

/// Outcome of feeding one byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedResult {
    Incomplete,
    FrameReady(MavlinkFrame),
    BadChecksum,
}

/// Incremental byte-at-a-time MAVLink framer.
///
/// One instance per byte stream. Bytes outside a frame are skipped until
/// a start marker appears; a checksum mismatch discards the frame and the
/// framer waits for the next marker. There is no backtracking into the
/// discarded bytes.
#[derive(Debug)]
pub struct MavlinkFramer {
    state: FramerState,
    frame: MavlinkFrame,
    crc: X25Crc,
    payload_index: usize,
    signature_index: usize,
    signature: [u8; SIGNATURE_LEN],
    frames_decoded: u64,
    crc_errors: u64,
}

impl MavlinkFramer {
    pub fn new() -> Self {
        Self {
            state: FramerState::Idle,
            frame: MavlinkFrame::empty(MavlinkVersion::V1),
            crc: X25Crc::new(),
            payload_index: 0,
            signature_index: 0,
            signature: [0u8; SIGNATURE_LEN],
            frames_decoded: 0,
            crc_errors: 0,
        }
    }

    pub fn state(&self) -> FramerState {
        self.state
    }

    /// Frames that passed checksum validation since creation.
    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// Frames discarded on checksum mismatch since creation.
    pub fn crc_errors(&self) -> u64 {
        self.crc_errors
    }

    /// Drop any partial frame and wait for the next start marker.
    pub fn reset(&mut self) {
        self.state = FramerState::Idle;
        self.payload_index = 0;
        self.signature_index = 0;
    }

    fn is_v2(&self) -> bool {
        self.frame.version == MavlinkVersion::V2
    }

    fn header_byte(&mut self, byte: u8, next: FramerState) {
        self.crc.accumulate(byte);
        self.state = next;
    }

    /// Called once the message id is complete.
    fn begin_payload(&mut self) {
        self.payload_index = 0;
        if self.frame.len == 0 {
            self.crc.accumulate(crc_extra(self.frame.msgid));
            self.state = FramerState::GotPayload;
        } else {
            self.state = FramerState::AccumulatingPayload;
        }
    }

    fn complete(&mut self) -> FeedResult {
        self.frames_decoded += 1;
        let frame = self.frame.clone();
        self.reset();
        FeedResult::FrameReady(frame)
    }

    /// Consume one byte of the stream.
    pub fn feed(&mut self, byte: u8) -> FeedResult {
        match self.state {
            FramerState::Idle => {
                if let Some(version) = MavlinkVersion::from_start_marker(byte) {
                    self.frame = MavlinkFrame::empty(version);
                    self.crc = X25Crc::new();
                    self.state = FramerState::GotStart;
                }
            }
            FramerState::GotStart => {
                self.frame.len = byte;
                self.header_byte(byte, FramerState::GotLength);
            }
            FramerState::GotLength => {
                if self.is_v2() {
                    self.frame.incompat_flags = byte;
                    self.header_byte(byte, FramerState::GotIncompatFlags);
                } else {
                    self.frame.seq = byte;
                    self.header_byte(byte, FramerState::GotSequence);
                }
            }
            FramerState::GotIncompatFlags => {
                self.frame.compat_flags = byte;
                self.header_byte(byte, FramerState::GotCompatFlags);
            }
            FramerState::GotCompatFlags => {
                self.frame.seq = byte;
                self.header_byte(byte, FramerState::GotSequence);
            }
            FramerState::GotSequence => {
                self.frame.sysid = byte;
                self.header_byte(byte, FramerState::GotSystemId);
            }
            FramerState::GotSystemId => {
                self.frame.compid = byte;
                self.header_byte(byte, FramerState::GotComponentId);
            }
            FramerState::GotComponentId => {
                self.frame.msgid = byte as u32;
                self.header_byte(byte, FramerState::GotMessageIdByte1);
                if !self.is_v2() {
                    self.begin_payload();
                }
            }
            FramerState::GotMessageIdByte1 => {
                self.frame.msgid |= (byte as u32) << 8;
                self.header_byte(byte, FramerState::GotMessageIdByte2);
            }
            FramerState::GotMessageIdByte2 => {
                self.frame.msgid |= (byte as u32) << 16;
                self.crc.accumulate(byte);
                self.begin_payload();
            }
            FramerState::AccumulatingPayload => {
                self.frame.payload[self.payload_index] = byte;
                self.payload_index += 1;
                self.crc.accumulate(byte);
                if self.payload_index == self.frame.len as usize {
                    self.crc.accumulate(crc_extra(self.frame.msgid));
                    self.state = FramerState::GotPayload;
                }
            }
            FramerState::GotPayload => {
                self.frame.checksum = byte as u16;
                self.state = FramerState::GotChecksumByte1;
            }
            FramerState::GotChecksumByte1 => {
                self.frame.checksum |= (byte as u16) << 8;
                if self.frame.checksum != self.crc.value() {
                    tracing::trace!(
                        msgid = self.frame.msgid,
                        expected = self.crc.value(),
                        received = self.frame.checksum,
                        "MAVLink checksum mismatch"
                    );
                    self.crc_errors += 1;
                    self.reset();
                    return FeedResult::BadChecksum;
                }
                if self.is_v2() && self.frame.incompat_flags & INCOMPAT_FLAG_SIGNED != 0 {
                    self.signature_index = 0;
                    self.state = FramerState::ReadingSignature;
                } else {
                    self.frame.signature = None;
                    return self.complete();
                }
            }
            FramerState::ReadingSignature => {
                self.signature[self.signature_index] = byte;
                self.signature_index += 1;
                if self.signature_index == SIGNATURE_LEN {
                    self.frame.signature = Some(self.signature);
                    return self.complete();
                }
            }
        }
        FeedResult::Incomplete
    }

    /// Feed a buffer, invoking `on_frame` for every completed frame.
    ///
    /// Returns the number of checksum failures seen in this buffer.
    pub fn feed_slice<F: FnMut(MavlinkFrame)>(&mut self, bytes: &[u8], mut on_frame: F) -> u32 {
        let mut bad = 0;
        for &b in bytes {
            match self.feed(b) {
                FeedResult::Incomplete => {}
                FeedResult::FrameReady(frame) => on_frame(frame),
                FeedResult::BadChecksum => bad += 1,
            }
        }
        bad
    }
}

impl Default for MavlinkFramer {
    fn default() -> Self {
        Self::new()
    }
}
