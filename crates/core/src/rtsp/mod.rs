//! RTSP control protocol (RFC 2326) with RTP/JPEG delivery.
//!
//! Handles the standard RTSP request/response cycle:
//!
//! 1. **OPTIONS**: client discovers supported methods.
//! 2. **DESCRIBE**: server returns an SDP description of the JPEG track.
//! 3. **SETUP**: client proposes its RTP/RTCP ports; the server binds an
//!    RTP socket and creates a session.
//! 4. **PLAY**: the session starts receiving RTP.
//! 5. **TEARDOWN**: the session ends and the connection closes.
//!
//! GET_PARAMETER is accepted as a keepalive. Only UDP unicast transport is
//! offered; interleaved TCP is refused with 461.

pub mod request;
pub mod response;
pub mod sdp;
pub mod server;
pub mod session;
pub mod stream;
pub mod transport;

pub use request::{Method, RtspRequest};
pub use response::{RtspResponse, Status};
pub use server::{DEFAULT_RTSP_PORT, RtspConfig, RtspServer, RtspStats, Viewer};
pub use session::{RtspSession, SessionState};
pub use stream::{RtpStream, StreamRegistry};
