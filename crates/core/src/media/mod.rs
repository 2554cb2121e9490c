//! RTP packetization for the RTSP output.
//!
//! Every JPEG frame becomes one or more RTP packets that share a 90 kHz
//! timestamp. Sequence numbers advance per packet and wrap at 16 bits;
//! the SSRC is drawn once per session.

pub mod jpeg;

pub use jpeg::{JPEG_PAYLOAD_TYPE, JpegPacketizer, JpegParams};
