//! Per-connection RTSP state machine (RFC 2326 §A.1).
//!
//! ```text
//! Init ──SETUP──▶ Ready ──PLAY──▶ Playing
//!   │               │                │
//!   └───────────TEARDOWN─────────────┴──▶ Teardown (connection closes)
//! ```
//!
//! OPTIONS, DESCRIBE and GET_PARAMETER are accepted in every state and
//! never change it. SETUP outside Init and PLAY outside Ready are answered
//! with 455. Every response echoes the request's `CSeq`.

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Instant;

use rand::Rng;

use super::request::{Method, RtspRequest};
use super::response::{RtspResponse, Status};
use super::sdp::{self, SdpParams};
use super::server::RtspConfig;
use super::stream::{RtpStream, StreamRegistry};
use super::transport::TransportHeader;
use crate::media::JpegPacketizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected; no transport negotiated.
    Init,
    /// SETUP done; RTP socket bound, not yet sending.
    Ready,
    /// Receiving frames.
    Playing,
    /// TEARDOWN received; the connection closes after the response.
    Teardown,
}

/// RTSP methods advertised in the OPTIONS `Public` header.
pub const PUBLIC_METHODS: &str = "OPTIONS, DESCRIBE, SETUP, PLAY, TEARDOWN, GET_PARAMETER";

const INTERLEAVED_HINT: &str =
    "interleaved RTP/AVP/TCP not supported; use RTP/AVP over UDP (ffplay -rtsp_transport udp)";

/// Handles RTSP requests for a single TCP connection.
///
/// Each connection negotiates at most one session. The RTP stream it sets
/// up is registered in the shared [`StreamRegistry`] and removed again on
/// TEARDOWN or when the session is dropped with the connection.
pub struct RtspSession {
    state: SessionState,
    session_id: Option<String>,
    peer: SocketAddr,
    connected_at: Instant,
    registry: StreamRegistry,
    config: Arc<RtspConfig>,
    stream: Option<Arc<RtpStream>>,
}

fn new_session_id() -> String {
    format!("{:016X}", rand::rng().random::<u64>())
}

/// Host part of an `rtsp://` URI, without brackets for IPv6 literals.
fn uri_host(uri: &str) -> Option<&str> {
    let authority = uri.strip_prefix("rtsp://")?.split('/').next()?;
    let authority = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let host = match authority.strip_prefix('[') {
        Some(bracketed) => bracketed.split_once(']')?.0,
        None => authority.split(':').next()?,
    };
    let host = host.trim();
    (!host.is_empty()).then_some(host)
}

impl RtspSession {
    pub fn new(peer: SocketAddr, registry: StreamRegistry, config: Arc<RtspConfig>) -> Self {
        Self {
            state: SessionState::Init,
            session_id: None,
            peer,
            connected_at: Instant::now(),
            registry,
            config,
            stream: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn stream(&self) -> Option<&Arc<RtpStream>> {
        self.stream.as_ref()
    }

    /// When the control connection was accepted.
    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// Whether the server closed this session from outside the connection.
    pub fn is_revoked(&self) -> bool {
        self.stream.as_ref().is_some_and(|s| s.is_closed())
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(
            peer = %self.peer,
            session_id = self.session_id.as_deref().unwrap_or("-"),
            old_state = ?self.state,
            new_state = ?next,
            "state transition"
        );
        self.state = next;
    }

    fn session_header_value(&self, id: &str) -> String {
        format!("{};timeout={}", id, self.config.session_timeout_secs)
    }

    pub fn handle(&mut self, request: &RtspRequest) -> RtspResponse {
        let cseq = request.cseq();

        if request.version != "RTSP/1.0" {
            tracing::warn!(version = %request.version, "client sent non-RTSP/1.0 version");
        }

        match &request.method {
            Method::Options => self.handle_options(cseq),
            Method::Describe => self.handle_describe(cseq, &request.uri),
            Method::Setup => self.handle_setup(cseq, request),
            Method::Play => self.handle_play(cseq, request),
            Method::Teardown => self.handle_teardown(cseq),
            Method::GetParameter => self.handle_get_parameter(cseq),
            Method::Other(method) => {
                tracing::warn!(%method, %cseq, "unsupported RTSP method");
                RtspResponse::new(Status::NotImplemented, cseq)
            }
        }
    }

    fn handle_options(&self, cseq: &str) -> RtspResponse {
        tracing::debug!(%cseq, "OPTIONS");
        RtspResponse::ok(cseq).header("Public", PUBLIC_METHODS)
    }

    /// Host advertised in SDP: the configured public host, else the host the
    /// client dialled, else the client's own address.
    fn sdp_host(&self, uri: &str) -> String {
        if let Some(host) = &self.config.public_host {
            return host.clone();
        }
        uri_host(uri).map_or_else(|| self.peer.ip().to_string(), str::to_string)
    }

    /// Whether `uri` names the configured stream or its track.
    fn uri_matches(&self, uri: &str) -> bool {
        let path = match uri.strip_prefix("rtsp://") {
            Some(rest) => rest.find('/').map_or("/", |i| &rest[i..]),
            None => uri,
        };
        let path = path.trim_end_matches('/');
        let base = self.config.path.trim_end_matches('/');
        path == base
            || path
                .strip_prefix(base)
                .is_some_and(|rest| rest.starts_with('/'))
    }

    fn handle_describe(&self, cseq: &str, uri: &str) -> RtspResponse {
        tracing::debug!(%cseq, uri, "DESCRIBE");

        if !self.uri_matches(uri) {
            tracing::warn!(uri, "DESCRIBE for unknown stream");
            return RtspResponse::new(Status::NotFound, cseq);
        }

        let host = self.sdp_host(uri);
        let body = sdp::generate_sdp(&SdpParams {
            ip: &host,
            username: &self.config.sdp_username,
            session_id: &self.config.sdp_session_id,
            session_version: &self.config.sdp_session_version,
            session_name: &self.config.sdp_session_name,
            fps: self.config.jpeg.fps,
        });

        RtspResponse::ok(cseq)
            .header("Content-Base", format!("{}/", uri.trim_end_matches('/')))
            .sdp(body)
    }

    fn handle_setup(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        if self.state != SessionState::Init {
            tracing::warn!(%cseq, state = ?self.state, "SETUP in wrong state");
            return RtspResponse::new(Status::MethodNotValid, cseq);
        }

        if !self.uri_matches(&request.uri) {
            tracing::warn!(uri = %request.uri, "SETUP for unknown stream");
            return RtspResponse::new(Status::NotFound, cseq);
        }

        let Some(transport_header) = request.transport() else {
            tracing::warn!(%cseq, "SETUP missing Transport header");
            return RtspResponse::new(Status::BadRequest, cseq);
        };

        if TransportHeader::is_interleaved(transport_header) {
            tracing::warn!(%cseq, transport = %transport_header, "client requested TCP transport");
            return RtspResponse::new(Status::UnsupportedTransport, cseq)
                .header("Unsupported", INTERLEAVED_HINT);
        }

        let Some(client_transport) = TransportHeader::parse(transport_header) else {
            tracing::warn!(%cseq, transport_header, "SETUP invalid Transport header");
            return RtspResponse::new(Status::BadRequest, cseq);
        };

        let socket = match UdpSocket::bind(SocketAddr::new(self.config.rtp_bind_ip, 0)) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "failed to bind RTP socket");
                return RtspResponse::new(Status::InternalError, cseq);
            }
        };

        let session_id = self.session_id.get_or_insert_with(new_session_id).clone();
        let destination = SocketAddr::new(self.peer.ip(), client_transport.client_rtp_port);

        let stream = Arc::new(RtpStream::new(
            session_id.clone(),
            request.uri.clone(),
            destination,
            client_transport.client_rtcp_port,
            socket,
            JpegPacketizer::with_random_ssrc(self.config.jpeg),
            self.connected_at,
        ));
        let server_rtp_port = stream.server_port();
        let ssrc = stream.ssrc();

        self.registry.insert(stream.clone());
        self.stream = Some(stream);
        self.transition(SessionState::Ready);

        tracing::info!(
            session_id,
            uri = %request.uri,
            client_rtp = %destination,
            server_rtp_port,
            ssrc = format_args!("{:08X}", ssrc),
            "session created via SETUP"
        );

        let transport_response = format!(
            "RTP/AVP;unicast;client_port={}-{};server_port={}-{};ssrc={:08X}",
            client_transport.client_rtp_port,
            client_transport.client_rtcp_port,
            server_rtp_port,
            server_rtp_port.wrapping_add(1),
            ssrc
        );

        RtspResponse::ok(cseq)
            .header("Transport", transport_response)
            .header("Session", self.session_header_value(&session_id))
    }

    fn handle_play(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        if self.state != SessionState::Ready {
            tracing::warn!(%cseq, state = ?self.state, "PLAY in wrong state");
            return RtspResponse::new(Status::MethodNotValid, cseq);
        }

        let (Some(session_id), Some(stream)) = (self.session_id.clone(), self.stream.clone())
        else {
            return RtspResponse::new(Status::MethodNotValid, cseq);
        };

        if let Some(requested) = request.session_id()
            && requested != session_id
        {
            tracing::warn!(requested, session_id, "PLAY for unknown session");
            return RtspResponse::new(Status::SessionNotFound, cseq);
        }

        let (seq, rtptime) = stream.rtp_position();
        stream.set_playing(true);
        self.transition(SessionState::Playing);
        tracing::info!(session_id, dest = %stream.destination, "session started playing");

        RtspResponse::ok(cseq)
            .header("Session", self.session_header_value(&session_id))
            .header("Range", "npt=0.000-")
            .header("RTP-Info", format!("url={};seq={};rtptime={}", stream.uri, seq, rtptime))
    }

    fn handle_teardown(&mut self, cseq: &str) -> RtspResponse {
        self.release();
        self.transition(SessionState::Teardown);
        tracing::info!(
            session_id = self.session_id.as_deref().unwrap_or("-"),
            "session terminated via TEARDOWN"
        );
        RtspResponse::ok(cseq)
    }

    /// Keepalive used by VLC and others (RFC 2326 §10.8).
    fn handle_get_parameter(&self, cseq: &str) -> RtspResponse {
        tracing::trace!(%cseq, "GET_PARAMETER keepalive");

        let resp = RtspResponse::ok(cseq);
        match &self.session_id {
            Some(id) => resp.header("Session", id.as_str()),
            None => resp,
        }
    }

    /// Stop delivery and unregister the stream. Idempotent.
    pub fn release(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.set_playing(false);
            self.registry.remove(&stream.session_id);
        }
    }
}

impl Drop for RtspSession {
    fn drop(&mut self) {
        self.release();
    }
}
