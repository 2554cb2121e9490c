//! MAVLink telemetry bridge between the autopilot serial link and ground
//! control stations on UDP.
//!
//! ```text
//! autopilot ──serial──▶ [serial pump] ──framer──▶ every live GcsPeer (UDP)
//! autopilot ◀──serial── [network pump] ◀──────── any GCS datagram
//! ```
//!
//! GCS peers are learned from inbound datagrams and forgotten after a
//! period of silence. HEARTBEAT frames from the autopilot update the
//! bridge's view of whether the autopilot is alive.

pub mod bridge;
pub mod peers;
pub mod serial;

pub use bridge::{BridgeConfig, BridgeEvent, BridgeStats, DEFAULT_MAVLINK_PORT, TelemetryBridge};
pub use peers::{GcsPeer, PeerTable, PeerTouch};
pub use serial::SerialConfig;
