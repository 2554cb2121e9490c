//! HEARTBEAT (message id 0) payload handling.
//!
//! Wire layout (MAVLink orders fields by size, largest first):
//!
//! ```text
//! 0..4  custom_mode      u32 LE
//! 4     type
//! 5     autopilot
//! 6     base_mode
//! 7     system_status
//! 8     mavlink_version
//! ```

use std::time::{Duration, Instant};

use super::frame::{MavlinkFrame, MavlinkVersion};
use super::MSG_ID_HEARTBEAT;

pub const HEARTBEAT_LEN: usize = 9;

/// `base_mode` bit set while the vehicle is armed.
pub const MODE_FLAG_SAFETY_ARMED: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Heartbeat {
    pub custom_mode: u32,
    pub mav_type: u8,
    pub autopilot: u8,
    pub base_mode: u8,
    pub system_status: u8,
    pub mavlink_version: u8,
}

impl Heartbeat {
    /// Decode a HEARTBEAT payload.
    ///
    /// v2 senders strip trailing zero bytes, so a short payload is
    /// zero-extended to the full length before decoding.
    pub fn decode(payload: &[u8]) -> Self {
        let mut buf = [0u8; HEARTBEAT_LEN];
        let n = payload.len().min(HEARTBEAT_LEN);
        buf[..n].copy_from_slice(&payload[..n]);
        Self {
            custom_mode: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            mav_type: buf[4],
            autopilot: buf[5],
            base_mode: buf[6],
            system_status: buf[7],
            mavlink_version: buf[8],
        }
    }

    pub fn encode(&self) -> [u8; HEARTBEAT_LEN] {
        let mut buf = [0u8; HEARTBEAT_LEN];
        buf[..4].copy_from_slice(&self.custom_mode.to_le_bytes());
        buf[4] = self.mav_type;
        buf[5] = self.autopilot;
        buf[6] = self.base_mode;
        buf[7] = self.system_status;
        buf[8] = self.mavlink_version;
        buf
    }

    pub fn to_frame(
        &self,
        version: MavlinkVersion,
        seq: u8,
        sysid: u8,
        compid: u8,
    ) -> MavlinkFrame {
        MavlinkFrame::new(version, seq, sysid, compid, MSG_ID_HEARTBEAT, &self.encode())
    }
}

/// Latest autopilot heartbeat, as seen by the telemetry bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatInfo {
    pub sysid: u8,
    pub compid: u8,
    pub mav_type: u8,
    pub autopilot: u8,
    pub base_mode: u8,
    pub custom_mode: u32,
    pub system_status: u8,
    pub received_at: Instant,
}

impl HeartbeatInfo {
    /// Extract heartbeat state from a validated frame. `None` for any
    /// other message id.
    pub fn from_frame(frame: &MavlinkFrame, received_at: Instant) -> Option<Self> {
        if frame.msgid != MSG_ID_HEARTBEAT {
            return None;
        }
        let hb = Heartbeat::decode(frame.payload());
        Some(Self {
            sysid: frame.sysid,
            compid: frame.compid,
            mav_type: hb.mav_type,
            autopilot: hb.autopilot,
            base_mode: hb.base_mode,
            custom_mode: hb.custom_mode,
            system_status: hb.system_status,
            received_at,
        })
    }

    /// Whether the heartbeat arrived less than `window` before `now`.
    pub fn is_fresh(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.received_at) < window
    }

    pub fn armed(&self) -> bool {
        self.base_mode & MODE_FLAG_SAFETY_ARMED != 0
    }
}
