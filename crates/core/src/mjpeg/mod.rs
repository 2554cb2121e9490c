//! MJPEG over HTTP (`multipart/x-mixed-replace`) with a bounded client table.
//!
//! Every viewer gets its own delivery thread that waits for a frame newer
//! than the last one it sent, then writes it as one multipart part:
//!
//! ```text
//! --frame\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: <n>\r\n
//! \r\n
//! <n JPEG bytes>\r\n
//! ```
//!
//! A viewer whose socket fails is dropped alone; the others keep going.

pub mod clients;
pub mod http;
pub mod latest;

use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use crate::error::{Result, SkycamError};
use crate::events::{VIEWER_EVENT_CAPACITY, ViewerEvent, ViewerEvents};
use crate::net;
use crate::relay::VideoFrame;

pub use clients::{ClientLease, ClientTable, StreamClientInfo};
pub use latest::LatestFrame;

/// Default HTTP port.
pub const DEFAULT_HTTP_PORT: u16 = 8080;

const CLIENT_STATS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct MjpegConfig {
    pub bind: SocketAddr,
    pub max_clients: usize,
    /// Multipart boundary token.
    pub boundary: String,
    /// How long a new connection may take to send its whole request head.
    pub request_timeout: Duration,
    /// Bound on a single socket write; a viewer stuck longer is dropped.
    pub send_timeout: Duration,
    /// Longest a delivery loop waits for a new frame before re-checking
    /// whether the server is still running.
    pub poll_interval: Duration,
    /// Path that returns one JPEG instead of a stream.
    pub snapshot_path: String,
}

impl Default for MjpegConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_HTTP_PORT)),
            max_clients: 4,
            boundary: "frame".to_string(),
            request_timeout: Duration::from_secs(2),
            send_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(30),
            snapshot_path: "/snapshot".to_string(),
        }
    }
}

struct Shared {
    config: MjpegConfig,
    latest: LatestFrame,
    clients: Arc<ClientTable>,
    running: Arc<AtomicBool>,
    frames_published: AtomicU64,
    events: ViewerEvents,
}

/// HTTP MJPEG streaming server.
pub struct MjpegServer {
    shared: Arc<Shared>,
    local_addr: Option<SocketAddr>,
    accept: Option<JoinHandle<()>>,
}

impl MjpegServer {
    pub fn new(config: MjpegConfig) -> Self {
        let clients = Arc::new(ClientTable::new(config.max_clients));
        Self {
            shared: Arc::new(Shared {
                config,
                latest: LatestFrame::new(),
                clients,
                running: Arc::new(AtomicBool::new(false)),
                frames_published: AtomicU64::new(0),
                events: ViewerEvents::new(VIEWER_EVENT_CAPACITY),
            }),
            local_addr: None,
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
            max_clients = self.shared.config.max_clients,
            "MJPEG server listening"
        );

        let shared = self.shared.clone();
        let running = self.shared.running.clone();
        let spawned = thread::Builder::new()
            .name("mjpeg-accept".to_string())
            .spawn(move || {
                net::accept_loop(listener, running, "mjpeg", move |stream, peer| {
                    spawn_client(shared.clone(), stream, peer);
                });
            });
        match spawned {
            Ok(handle) => self.accept = Some(handle),
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        }
        Ok(())
    }

    pub fn stop(&mut self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shared.latest.wake_all();
        self.shared.clients.shutdown_all();
        if let Some(handle) = self.accept.take()
            && handle.join().is_err()
        {
            tracing::error!("MJPEG accept thread panicked");
        }
        tracing::info!("MJPEG server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Bound address; `None` before [`start`](Self::start).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Make `frame` the one every viewer sends next.
    pub fn publish(&self, frame: Arc<VideoFrame>) {
        self.publisher().publish(frame);
    }

    pub fn frames_published(&self) -> u64 {
        self.shared.frames_published.load(Ordering::Relaxed)
    }

    pub fn client_count(&self) -> usize {
        self.shared.clients.len()
    }

    pub fn clients(&self) -> Vec<StreamClientInfo> {
        self.shared.clients.snapshot()
    }

    /// Stream viewers admitted and released, keyed by client id. Snapshot
    /// requests and 503 rejections are not reported.
    pub fn events(&self) -> Receiver<ViewerEvent> {
        self.shared.events.receiver()
    }

    /// Handle that publishes into this server from another thread.
    pub fn publisher(&self) -> MjpegPublisher {
        MjpegPublisher {
            shared: self.shared.clone(),
        }
    }
}

/// Cloneable publishing handle for an [`MjpegServer`].
#[derive(Clone)]
pub struct MjpegPublisher {
    shared: Arc<Shared>,
}

impl MjpegPublisher {
    pub fn publish(&self, frame: Arc<VideoFrame>) {
        self.shared.frames_published.fetch_add(1, Ordering::Relaxed);
        self.shared.latest.publish(frame);
    }

    pub fn client_count(&self) -> usize {
        self.shared.clients.len()
    }
}

impl Drop for MjpegServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_client(shared: Arc<Shared>, stream: TcpStream, peer: SocketAddr) {
    let spawned = thread::Builder::new()
        .name(format!("mjpeg-{peer}"))
        .spawn(move || serve_client(&shared, stream, peer));
    if let Err(e) = spawned {
        tracing::error!(%peer, error = %e, "failed to spawn client thread");
    }
}

fn serve_client(shared: &Shared, mut stream: TcpStream, peer: SocketAddr) {
    let config = &shared.config;
    if stream.set_read_timeout(Some(config.request_timeout)).is_err()
        || stream.set_write_timeout(Some(config.send_timeout)).is_err()
    {
        return;
    }
    let _ = stream.set_nodelay(true);

    let deadline = Instant::now() + config.request_timeout;
    let Some(head) = http::read_request_head(&mut stream, deadline) else {
        tracing::debug!(%peer, "no request received");
        return;
    };

    let Some((method, path)) = http::request_line(&head) else {
        let _ = stream.write_all(http::BAD_REQUEST.as_bytes());
        return;
    };
    if method != "GET" {
        tracing::debug!(%peer, method, "rejecting non-GET request");
        let _ = stream.write_all(http::BAD_REQUEST.as_bytes());
        return;
    }

    if path == config.snapshot_path {
        serve_snapshot(shared, &mut stream, peer);
        return;
    }

    let lease = match stream
        .try_clone()
        .ok()
        .and_then(|s| shared.clients.claim(peer, s))
    {
        Some(lease) => lease,
        None => {
            tracing::warn!(
                %peer,
                max_clients = config.max_clients,
                "MJPEG server full, rejecting client"
            );
            let _ = stream.write_all(http::BUSY.as_bytes());
            return;
        }
    };

    tracing::info!(%peer, client = lease.id, path, "stream client connected");
    shared.events.emit(ViewerEvent::Connected { id: lease.id, peer });
    let reason = deliver(shared, &mut stream, &lease);
    tracing::info!(
        %peer,
        client = lease.id,
        frames = lease.frames_sent.load(Ordering::Relaxed),
        reason,
        "stream client disconnected"
    );
    let id = lease.id;
    drop(lease);
    shared.events.emit(ViewerEvent::Disconnected { id, peer, reason });
}

fn serve_snapshot(shared: &Shared, stream: &mut TcpStream, peer: SocketAddr) {
    match shared.latest.get() {
        Some(frame) => {
            let result = stream
                .write_all(http::snapshot_header(frame.data.len()).as_bytes())
                .and_then(|_| stream.write_all(&frame.data));
            if let Err(e) = result {
                tracing::debug!(%peer, error = %e, "snapshot write failed");
            } else {
                tracing::debug!(%peer, sequence = frame.sequence, "snapshot served");
            }
        }
        None => {
            let _ = stream.write_all(http::NO_FRAME.as_bytes());
        }
    }
}

/// Per-client delivery loop. Returns the reason it ended.
fn deliver(shared: &Shared, stream: &mut TcpStream, lease: &ClientLease) -> &'static str {
    let config = &shared.config;
    if stream
        .write_all(http::stream_header(&config.boundary).as_bytes())
        .is_err()
    {
        return "write error";
    }

    let mut delivered: Option<u64> = None;
    let mut window_frames: u32 = 0;
    let mut window_start = Instant::now();

    while shared.running.load(Ordering::SeqCst) {
        // Only the Arc copy happens under the frame lock.
        let Some(frame) = shared.latest.wait_newer(delivered, config.poll_interval) else {
            continue;
        };

        let header = http::part_header(&config.boundary, frame.data.len());
        let written = stream
            .write_all(header.as_bytes())
            .and_then(|_| stream.write_all(&frame.data))
            .and_then(|_| stream.write_all(b"\r\n"));
        if let Err(e) = written {
            tracing::debug!(client = lease.id, error = %e, "frame write failed");
            return "write error";
        }

        delivered = Some(frame.sequence);
        lease.frames_sent.fetch_add(1, Ordering::Relaxed);
        window_frames += 1;

        let elapsed = window_start.elapsed();
        if elapsed >= CLIENT_STATS_INTERVAL {
            tracing::info!(
                client = lease.id,
                fps = format_args!("{:.1}", window_frames as f64 / elapsed.as_secs_f64()),
                frames = lease.frames_sent.load(Ordering::Relaxed),
                "stream client stats"
            );
            window_frames = 0;
            window_start = Instant::now();
        }
    }
    "server shutting down"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = MjpegConfig::default();
        assert_eq!(c.bind.port(), 8080);
        assert_eq!(c.max_clients, 4);
        assert_eq!(c.boundary, "frame");
        assert_eq!(c.request_timeout, Duration::from_secs(2));
        assert_eq!(c.send_timeout, Duration::from_secs(5));
    }

    #[test]
    fn start_twice_fails() {
        let mut server = MjpegServer::new(MjpegConfig {
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..Default::default()
        });
        server.start().unwrap();
        assert!(matches!(server.start(), Err(SkycamError::AlreadyRunning)));
        server.stop();
        assert!(!server.is_running());
    }
}
