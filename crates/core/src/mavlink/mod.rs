//! MAVLink wire framing (v1 and v2).
//!
//! Only the envelope is decoded here: start marker, header, payload,
//! checksum and the optional v2 signature. Payload contents are left
//! opaque except for HEARTBEAT, which the telemetry bridge inspects to
//! track autopilot liveness.
//!
//! ## Frame layout
//!
//! ```text
//! v1: FE len seq sys comp msg            payload crc_lo crc_hi
//! v2: FD len inc cmp seq sys comp m0 m1 m2 payload crc_lo crc_hi [signature(13)]
//! ```
//!
//! The checksum is CRC-16/MCRF4XX over every byte after the start marker
//! up to the end of the payload, followed by one extra byte (`CRC_EXTRA`)
//! that depends on the message id. See [`crc_extra`].

pub mod crc;
pub mod frame;
pub mod framer;
pub mod heartbeat;

pub use crc::X25Crc;
pub use frame::{MavlinkFrame, MavlinkVersion};
pub use framer::{FeedResult, FramerState, MavlinkFramer};
pub use heartbeat::{Heartbeat, HeartbeatInfo};

/// v1 start-of-frame marker.
pub const STX_V1: u8 = 0xFE;
/// v2 start-of-frame marker.
pub const STX_V2: u8 = 0xFD;

/// Largest payload a frame can carry.
pub const MAX_PAYLOAD_LEN: usize = 255;
/// Length of the v2 packet signature block.
pub const SIGNATURE_LEN: usize = 13;
/// Largest possible frame on the wire (signed v2 with a full payload).
pub const MAX_FRAME_LEN: usize = 10 + MAX_PAYLOAD_LEN + 2 + SIGNATURE_LEN;

/// v2 incompat flag: a 13-byte signature follows the checksum.
pub const INCOMPAT_FLAG_SIGNED: u8 = 0x01;

pub const MSG_ID_HEARTBEAT: u32 = 0;
pub const MSG_ID_SYS_STATUS: u32 = 1;
pub const MSG_ID_SYSTEM_TIME: u32 = 2;
pub const MSG_ID_PING: u32 = 4;
pub const MSG_ID_GPS_RAW_INT: u32 = 24;
pub const MSG_ID_ATTITUDE: u32 = 30;
pub const MSG_ID_GLOBAL_POSITION_INT: u32 = 33;
pub const MSG_ID_RC_CHANNELS_RAW: u32 = 35;
pub const MSG_ID_SERVO_OUTPUT_RAW: u32 = 36;
pub const MSG_ID_RC_CHANNELS: u32 = 65;
pub const MSG_ID_VFR_HUD: u32 = 74;
pub const MSG_ID_COMMAND_LONG: u32 = 76;
pub const MSG_ID_COMMAND_ACK: u32 = 77;
pub const MSG_ID_BATTERY_STATUS: u32 = 147;
pub const MSG_ID_STATUSTEXT: u32 = 253;

/// Per-message CRC seed byte mixed into the checksum after the payload.
///
/// Covers the messages a camera companion actually sees on the link.
/// Unknown ids yield 0, so their frames fail validation unless the sender
/// also used 0; such frames are counted as parse errors and dropped.
pub fn crc_extra(msgid: u32) -> u8 {
    match msgid {
        MSG_ID_HEARTBEAT => 50,
        MSG_ID_SYS_STATUS => 124,
        MSG_ID_SYSTEM_TIME => 137,
        MSG_ID_PING => 237,
        MSG_ID_GPS_RAW_INT => 24,
        MSG_ID_ATTITUDE => 39,
        MSG_ID_GLOBAL_POSITION_INT => 104,
        MSG_ID_RC_CHANNELS_RAW => 244,
        MSG_ID_SERVO_OUTPUT_RAW => 54,
        MSG_ID_RC_CHANNELS => 118,
        MSG_ID_VFR_HUD => 20,
        MSG_ID_COMMAND_LONG => 152,
        MSG_ID_COMMAND_ACK => 143,
        MSG_ID_BATTERY_STATUS => 154,
        MSG_ID_STATUSTEXT => 83,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_crc_extras() {
        assert_eq!(crc_extra(MSG_ID_HEARTBEAT), 50);
        assert_eq!(crc_extra(MSG_ID_ATTITUDE), 39);
        assert_eq!(crc_extra(MSG_ID_STATUSTEXT), 83);
    }

    #[test]
    fn unknown_crc_extra_is_zero() {
        assert_eq!(crc_extra(9999), 0);
        assert_eq!(crc_extra(3), 0);
    }

    #[test]
    fn max_frame_len() {
        assert_eq!(MAX_FRAME_LEN, 280);
    }
}
