//! Camera streaming with a MAVLink telemetry bridge.
//!
//! JPEG frames flow from a [`capture::FrameSource`] through a single-slot
//! [`relay::FrameRelay`] to the MJPEG-over-HTTP and RTSP/RTP outputs. Next
//! to the video pipeline, [`telemetry::TelemetryBridge`] relays MAVLink
//! between an autopilot serial link and ground stations on UDP.

pub mod capture;
pub mod error;
pub mod events;
pub mod mavlink;
pub mod media;
pub mod mjpeg;
mod net;
pub mod relay;
pub mod rtsp;
pub mod server;
pub mod telemetry;

pub use capture::{FrameSource, JpegFileSource};
pub use error::{ParseErrorKind, Result, SkycamError};
pub use events::ViewerEvent;
pub use mjpeg::{MjpegConfig, MjpegServer};
pub use relay::{FrameRelay, OverflowPolicy, RelayConfig, VideoFrame};
pub use rtsp::{RtspConfig, RtspServer, RtspStats, Viewer};
pub use server::{FrameSink, OutputMode, SerialLink, Server, ServerConfig};
pub use telemetry::{BridgeConfig, SerialConfig, TelemetryBridge};
