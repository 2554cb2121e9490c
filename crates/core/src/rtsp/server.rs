use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use super::request::RtspRequest;
use super::response::{RtspResponse, Status};
use super::session::{RtspSession, SessionState};
use super::stream::StreamRegistry;
use crate::error::{Result, SkycamError};
use crate::events::{VIEWER_EVENT_CAPACITY, ViewerEvent, ViewerEvents};
use crate::media::JpegParams;
use crate::net;
use crate::relay::VideoFrame;

/// Default RTSP control port.
pub const DEFAULT_RTSP_PORT: u16 = 8554;

/// Largest request head accepted before the connection is dropped.
const MAX_REQUEST_HEAD: usize = 8 * 1024;

/// RTSP output configuration.
#[derive(Debug, Clone)]
pub struct RtspConfig {
    /// Control listener address.
    pub bind: SocketAddr,
    /// Stream path, e.g. `/stream` for `rtsp://host:8554/stream`.
    pub path: String,
    /// Concurrent control connections; further clients get 503.
    pub max_clients: usize,
    /// Packetization (MTU, JPEG type/Q, frame rate for timestamps).
    pub jpeg: JpegParams,
    /// Local IP the per-session RTP sockets bind to.
    pub rtp_bind_ip: IpAddr,
    /// A connection that has not reached PLAY within this time is closed.
    pub handshake_timeout: Duration,
    /// Bounded wait for one read on the control socket.
    pub read_poll: Duration,
    /// Advertised in the `Session` header.
    pub session_timeout_secs: u64,
    /// Public host advertised in SDP `o=` and `c=` lines.
    /// When `None`, host is inferred from request URI/client address.
    pub public_host: Option<String>,
    /// SDP origin username field (`o=<username> ...`).
    pub sdp_username: String,
    /// SDP origin session id field (`o=... <session-id> ...`).
    pub sdp_session_id: String,
    /// SDP origin session version field (`o=... ... <session-version> ...`).
    pub sdp_session_version: String,
    /// SDP session name (`s=`).
    pub sdp_session_name: String,
}

impl Default for RtspConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_RTSP_PORT)),
            path: "/stream".to_string(),
            max_clients: 4,
            jpeg: JpegParams::default(),
            rtp_bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            handshake_timeout: Duration::from_secs(10),
            read_poll: Duration::from_secs(1),
            session_timeout_secs: 60,
            public_host: None,
            sdp_username: "-".to_string(),
            sdp_session_id: "0".to_string(),
            sdp_session_version: "0".to_string(),
            sdp_session_name: "Camera".to_string(),
        }
    }
}

/// Information about a connected viewer (client in PLAY state).
#[derive(Debug, Clone)]
pub struct Viewer {
    pub session_id: String,
    pub uri: String,
    pub client_addr: SocketAddr,
    /// When its control connection was accepted.
    pub connected_at: Instant,
    pub frames_sent: u64,
    pub send_errors: u64,
}

/// Point-in-time copy of the RTSP counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtspStats {
    /// Control connections admitted since start.
    pub total_clients: u64,
    /// Control connections open now.
    pub active_clients: usize,
    /// Sessions currently in PLAY.
    pub playing: usize,
    /// Connections turned away with 503.
    pub rejected_clients: u64,
    /// Frames delivered in full, summed over sessions.
    pub total_frames_sent: u64,
    pub total_bytes_sent: u64,
    /// Zero while stopped.
    pub uptime: Duration,
}

struct Shared {
    config: Arc<RtspConfig>,
    registry: StreamRegistry,
    running: Arc<AtomicBool>,
    active: AtomicUsize,
    total_clients: AtomicU64,
    rejected_clients: AtomicU64,
    events: ViewerEvents,
}

/// RTSP/RTP JPEG streaming server.
///
/// Runs a non-blocking accept loop and one thread per control
/// connection. Frames handed to [`send_frame`](Self::send_frame) are
/// packetized separately for every playing session, each with its own
/// sequence numbers, timestamps and SSRC.
pub struct RtspServer {
    shared: Arc<Shared>,
    local_addr: Option<SocketAddr>,
    started_at: Option<Instant>,
    accept: Option<JoinHandle<()>>,
}

impl RtspServer {
    pub fn new(config: RtspConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config: Arc::new(config),
                registry: StreamRegistry::new(),
                running: Arc::new(AtomicBool::new(false)),
                active: AtomicUsize::new(0),
                total_clients: AtomicU64::new(0),
                rejected_clients: AtomicU64::new(0),
                events: ViewerEvents::new(VIEWER_EVENT_CAPACITY),
            }),
            local_addr: None,
            started_at: None,
            accept: None,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.shared.running.load(Ordering::SeqCst) {
            return Err(SkycamError::AlreadyRunning);
        }

        let (listener, local_addr) = net::bind_listener(self.shared.config.bind)?;
        self.local_addr = Some(local_addr);
        self.shared.running.store(true, Ordering::SeqCst);

        tracing::info!(
            addr = %local_addr,
            path = %self.shared.config.path,
            "RTSP server listening"
        );

        let shared = self.shared.clone();
        let running = self.shared.running.clone();
        let spawned = thread::Builder::new()
            .name("rtsp-accept".to_string())
            .spawn(move || {
                net::accept_loop(listener, running, "rtsp", move |stream, peer| {
                    admit(&shared, stream, peer);
                });
            });
        match spawned {
            Ok(handle) => self.accept = Some(handle),
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        }

        self.started_at = Some(Instant::now());
        Ok(())
    }

    pub fn stop(&mut self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.accept.take()
            && handle.join().is_err()
        {
            tracing::error!("RTSP accept thread panicked");
        }
        self.started_at = None;
        tracing::info!("RTSP server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Bound control address; `None` before [`start`](Self::start).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// URL clients should open, e.g. `rtsp://192.168.4.1:8554/stream`.
    pub fn rtsp_url(&self, host: &str) -> String {
        let config = &self.shared.config;
        let port = self.local_addr.map_or(config.bind.port(), |a| a.port());
        format!("rtsp://{}:{}{}", host, port, config.path)
    }

    /// Open control connections.
    pub fn client_count(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Send one frame to every playing session. Returns the number of
    /// sessions that received it in full.
    pub fn send_frame(&self, frame: &VideoFrame) -> usize {
        self.shared.registry.broadcast(frame)
    }

    pub fn viewers(&self) -> Vec<Viewer> {
        self.shared
            .registry
            .playing()
            .iter()
            .map(|stream| Viewer {
                session_id: stream.session_id.clone(),
                uri: stream.uri.clone(),
                client_addr: stream.destination,
                connected_at: stream.connected_at,
                frames_sent: stream.frames_sent(),
                send_errors: stream.send_errors(),
            })
            .collect()
    }

    pub fn stats(&self) -> RtspStats {
        let shared = &self.shared;
        RtspStats {
            total_clients: shared.total_clients.load(Ordering::Relaxed),
            active_clients: shared.active.load(Ordering::SeqCst),
            playing: shared.registry.playing().len(),
            rejected_clients: shared.rejected_clients.load(Ordering::Relaxed),
            total_frames_sent: shared.registry.total_frames_sent(),
            total_bytes_sent: shared.registry.total_bytes_sent(),
            uptime: self.started_at.map_or(Duration::ZERO, |t| t.elapsed()),
        }
    }

    /// End a session from the server side. Delivery stops at once; its
    /// control connection closes within one `read_poll`. Returns `false`
    /// for an unknown session.
    pub fn disconnect(&self, session_id: &str) -> bool {
        match self.shared.registry.remove(session_id) {
            Some(stream) => {
                stream.close();
                tracing::info!(session_id, "session disconnected by server");
                true
            }
            None => false,
        }
    }

    /// Connect/disconnect notifications for control connections. Events
    /// beyond [`VIEWER_EVENT_CAPACITY`] undrained ones are dropped.
    pub fn events(&self) -> Receiver<ViewerEvent> {
        self.shared.events.receiver()
    }

    pub fn config(&self) -> &RtspConfig {
        &self.shared.config
    }

    /// Handle to the session streams, for delivering frames from another
    /// thread.
    pub fn registry(&self) -> StreamRegistry {
        self.shared.registry.clone()
    }
}

impl Drop for RtspServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Hand an accepted connection to its own thread, or turn it away when
/// every slot is taken.
fn admit(shared: &Arc<Shared>, stream: TcpStream, peer: SocketAddr) {
    let max_clients = shared.config.max_clients;
    let claimed = shared
        .active
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            (n < max_clients).then_some(n + 1)
        })
        .is_ok();

    if !claimed {
        shared.rejected_clients.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(%peer, max_clients, "RTSP server full, rejecting client");
        let spawned = thread::Builder::new()
            .name("rtsp-reject".to_string())
            .spawn(move || reject_busy(stream));
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "failed to spawn reject thread");
        }
        return;
    }

    let id = shared.total_clients.fetch_add(1, Ordering::Relaxed) + 1;
    let slot = SlotGuard(shared.clone());
    let spawned = thread::Builder::new()
        .name(format!("rtsp-{peer}"))
        .spawn(move || {
            let shared = slot.0.clone();
            shared.events.emit(ViewerEvent::Connected { id, peer });
            let reason = Connection::handle(stream, peer, &shared);
            drop(slot);
            shared.events.emit(ViewerEvent::Disconnected { id, peer, reason });
        });
    if let Err(e) = spawned {
        tracing::error!(%peer, error = %e, "failed to spawn connection thread");
    }
}

/// Releases a client slot when the connection thread ends.
struct SlotGuard(Arc<Shared>);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Answer the first request with 503, echoing its CSeq, then close.
fn reject_busy(stream: TcpStream) {
    let _ = stream.set_read_timeout(Some(Duration::from_millis(500)));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(500)));

    let mut cseq = String::from("0");
    if let Ok(reader_stream) = stream.try_clone() {
        let mut reader = BufReader::new(reader_stream.take(MAX_REQUEST_HEAD as u64));
        let mut line = String::new();
        while let Ok(n) = reader.read_line(&mut line) {
            if n == 0 || line == "\r\n" || line == "\n" {
                break;
            }
            if let Some((name, value)) = line.split_once(':')
                && name.trim().eq_ignore_ascii_case("CSeq")
            {
                cseq = value.trim().to_string();
            }
            line.clear();
        }
    }

    let response = RtspResponse::new(Status::ServiceUnavailable, &cseq);
    let mut stream = stream;
    let _ = stream.write_all(response.serialize().as_bytes());
}

fn is_timeout(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

/// A single RTSP client connection with its own lifecycle.
struct Connection<'a> {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    session: RtspSession,
    peer_addr: SocketAddr,
    config: &'a RtspConfig,
}

impl<'a> Connection<'a> {
    /// Set up a connection and run its request loop. Returns why it ended.
    fn handle(stream: TcpStream, peer_addr: SocketAddr, shared: &'a Arc<Shared>) -> &'static str {
        tracing::info!(%peer_addr, "client connected");

        if stream.set_read_timeout(Some(shared.config.read_poll)).is_err() {
            return "socket setup failed";
        }
        let Ok(reader_stream) = stream.try_clone() else {
            return "socket setup failed";
        };

        let mut conn = Connection {
            reader: BufReader::new(reader_stream),
            writer: stream,
            session: RtspSession::new(peer_addr, shared.registry.clone(), shared.config.clone()),
            peer_addr,
            config: &shared.config,
        };

        let reason = conn.run(&shared.running);
        conn.session.release();

        tracing::info!(%peer_addr, reason, "client disconnected");
        reason
    }

    /// RTSP request/response loop. Returns the reason for exiting.
    fn run(&mut self, running: &AtomicBool) -> &'static str {
        let mut head: Vec<u8> = Vec::new();
        let mut line: Vec<u8> = Vec::new();

        while running.load(Ordering::SeqCst) {
            if self.session.is_revoked() {
                return "disconnected by server";
            }
            // Measured from accept: keepalives do not extend the handshake.
            if self.session.state() != SessionState::Playing
                && self.session.connected_at().elapsed() > self.config.handshake_timeout
            {
                return "handshake timeout";
            }

            // A timeout can leave a partial line in `line`; the next read
            // continues it. `take` keeps the buffered head within bounds.
            let budget = (MAX_REQUEST_HEAD + 1).saturating_sub(head.len() + line.len());
            let read = (&mut self.reader)
                .take(budget as u64)
                .read_until(b'\n', &mut line);
            if head.len() + line.len() > MAX_REQUEST_HEAD {
                tracing::warn!(
                    peer = %self.peer_addr,
                    limit = MAX_REQUEST_HEAD,
                    "request head too large"
                );
                return "request too large";
            }
            match read {
                Ok(0) => return "connection closed by client",
                Ok(_) => {}
                Err(e) if is_timeout(e.kind()) => continue,
                Err(_) => return "read error",
            }
            if !line.ends_with(b"\n") {
                continue;
            }

            let blank = line == b"\r\n" || line == b"\n";
            if blank && head.is_empty() {
                line.clear();
                continue;
            }
            head.append(&mut line);
            if !blank {
                continue;
            }

            let text = String::from_utf8_lossy(&head).into_owned();
            head.clear();

            let response = match RtspRequest::parse(&text) {
                Ok(request) => {
                    let Some(request) = self.read_body(request) else {
                        return "read error";
                    };

                    tracing::debug!(
                        peer = %self.peer_addr,
                        method = %request.method,
                        uri = %request.uri,
                        version = %request.version,
                        "request"
                    );
                    let response = self.session.handle(&request);
                    tracing::debug!(
                        peer = %self.peer_addr,
                        status = response.status_code(),
                        "response"
                    );
                    response
                }
                Err(e) => {
                    tracing::warn!(peer = %self.peer_addr, error = %e, "parse error");
                    RtspResponse::new(Status::BadRequest, "0")
                }
            };

            if self
                .writer
                .write_all(response.serialize().as_bytes())
                .is_err()
            {
                return "write error";
            }
            if self.session.state() == SessionState::Teardown {
                return "teardown";
            }
        }

        "server shutting down"
    }

    /// Read `Content-Length` body bytes following the head, if any.
    fn read_body(&mut self, request: RtspRequest) -> Option<RtspRequest> {
        let len = request.content_length();
        if len == 0 || request.body.is_some() {
            return Some(request);
        }
        if len > MAX_REQUEST_HEAD {
            tracing::warn!(peer = %self.peer_addr, len, "request body too large");
            return None;
        }
        let mut body = vec![0u8; len];
        let deadline = Instant::now() + self.config.handshake_timeout;
        let mut filled = 0;
        while filled < len {
            match self.reader.read(&mut body[filled..]) {
                Ok(0) => return None,
                Ok(n) => filled += n,
                Err(e) if is_timeout(e.kind()) && Instant::now() < deadline => continue,
                Err(_) => return None,
            }
        }
        Some(request.with_body(String::from_utf8_lossy(&body).into_owned()))
    }
}
