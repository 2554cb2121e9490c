use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::capture::{self, FrameSource};
use crate::error::{Result, SkycamError};
use crate::mjpeg::{MjpegConfig, MjpegPublisher, MjpegServer};
use crate::relay::{FrameRelay, RelayConfig, RelayStats, VideoFrame};
use crate::rtsp::{RtspConfig, RtspServer, StreamRegistry};
use crate::telemetry::{BridgeConfig, TelemetryBridge};

const STREAM_STATS_INTERVAL: Duration = Duration::from_secs(10);

/// Reader and writer halves of the autopilot serial link.
pub type SerialLink = (Box<dyn Read + Send>, Box<dyn Write + Send>);

/// A video output the sender task fans frames out to.
pub trait FrameSink: Send + Sync {
    fn name(&self) -> &'static str;

    /// Hand `frame` to every viewer. Returns how many viewers it went to.
    fn send_frame(&self, frame: &Arc<VideoFrame>) -> usize;
}

impl FrameSink for MjpegPublisher {
    fn name(&self) -> &'static str {
        "mjpeg"
    }

    fn send_frame(&self, frame: &Arc<VideoFrame>) -> usize {
        self.publish(frame.clone());
        self.client_count()
    }
}

impl FrameSink for StreamRegistry {
    fn name(&self) -> &'static str {
        "rtsp"
    }

    fn send_frame(&self, frame: &Arc<VideoFrame>) -> usize {
        self.broadcast(frame)
    }
}

/// Which video outputs run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    Mjpeg,
    Rtsp,
    #[default]
    Both,
}

impl OutputMode {
    pub fn mjpeg_enabled(self) -> bool {
        matches!(self, Self::Mjpeg | Self::Both)
    }

    pub fn rtsp_enabled(self) -> bool {
        matches!(self, Self::Rtsp | Self::Both)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub mode: OutputMode,
    pub relay: RelayConfig,
    pub mjpeg: MjpegConfig,
    pub rtsp: RtspConfig,
    /// Used only when a serial link is passed to [`Server::start`].
    pub bridge: BridgeConfig,
    /// Bounded wait of the sender task on the relay.
    pub consume_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            mode: OutputMode::default(),
            relay: RelayConfig::default(),
            mjpeg: MjpegConfig::default(),
            rtsp: RtspConfig::default(),
            bridge: BridgeConfig::default(),
            consume_timeout: Duration::from_millis(100),
        }
    }
}

/// Owns the video pipeline and the telemetry bridge.
///
/// ```text
/// FrameSource ─▶ [capture] ─▶ FrameRelay ─▶ [sender] ─┬─▶ MjpegServer
///                                                     └─▶ RtspServer
/// serial ◀──────────────▶ TelemetryBridge ◀──────────▶ GCS peers (UDP)
/// ```
pub struct Server {
    config: ServerConfig,
    relay: Arc<FrameRelay>,
    mjpeg: Option<MjpegServer>,
    rtsp: Option<RtspServer>,
    bridge: Option<TelemetryBridge>,
    running: Arc<AtomicBool>,
    frames_forwarded: Arc<AtomicU64>,
    tasks: Vec<JoinHandle<()>>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let relay = Arc::new(FrameRelay::new(config.relay.clone()));
        Self {
            config,
            relay,
            mjpeg: None,
            rtsp: None,
            bridge: None,
            running: Arc::new(AtomicBool::new(false)),
            frames_forwarded: Arc::new(AtomicU64::new(0)),
            tasks: Vec::new(),
        }
    }

    /// Start the enabled outputs, the bridge (when `serial` is given), the
    /// sender task and the capture task, in that order.
    ///
    /// Anything already started is stopped again if a later step fails.
    pub fn start(
        &mut self,
        source: Box<dyn FrameSource>,
        serial: Option<SerialLink>,
    ) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(SkycamError::AlreadyRunning);
        }

        let mut sinks: Vec<Box<dyn FrameSink>> = Vec::new();

        let mjpeg = if self.config.mode.mjpeg_enabled() {
            let mut server = MjpegServer::new(self.config.mjpeg.clone());
            server.start()?;
            sinks.push(Box::new(server.publisher()));
            Some(server)
        } else {
            None
        };

        let rtsp = if self.config.mode.rtsp_enabled() {
            let mut server = RtspServer::new(self.config.rtsp.clone());
            server.start()?;
            sinks.push(Box::new(server.registry()));
            Some(server)
        } else {
            None
        };

        let bridge = match serial {
            Some((reader, writer)) => Some(TelemetryBridge::start(
                self.config.bridge.clone(),
                reader,
                writer,
            )?),
            None => None,
        };

        self.running.store(true, Ordering::SeqCst);

        let spawned = spawn_sender(
            self.relay.clone(),
            sinks,
            self.running.clone(),
            self.config.consume_timeout,
            self.frames_forwarded.clone(),
        )
        .and_then(|sender| {
            self.tasks.push(sender);
            capture::spawn_capture(source, self.relay.clone(), self.running.clone())
        });
        match spawned {
            Ok(capture) => self.tasks.push(capture),
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                for task in self.tasks.drain(..) {
                    let _ = task.join();
                }
                return Err(e.into());
            }
        }

        self.mjpeg = mjpeg;
        self.rtsp = rtsp;
        self.bridge = bridge;

        tracing::info!(
            mode = ?self.config.mode,
            telemetry = self.bridge.is_some(),
            capacity = self.relay.capacity(),
            "server started"
        );
        Ok(())
    }

    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for task in self.tasks.drain(..) {
            if task.join().is_err() {
                tracing::error!("pipeline task panicked");
            }
        }
        if let Some(server) = self.mjpeg.as_mut() {
            server.stop();
        }
        if let Some(server) = self.rtsp.as_mut() {
            server.stop();
        }
        if let Some(bridge) = self.bridge.as_mut() {
            bridge.stop();
        }

        let stats = self.relay.stats();
        tracing::info!(
            published = stats.published,
            forwarded = self.frames_forwarded(),
            dropped = stats.dropped,
            oversized = stats.oversized,
            "server stopped"
        );
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn relay(&self) -> &Arc<FrameRelay> {
        &self.relay
    }

    pub fn relay_stats(&self) -> RelayStats {
        self.relay.stats()
    }

    /// Frames the sender task has taken from the relay and fanned out.
    pub fn frames_forwarded(&self) -> u64 {
        self.frames_forwarded.load(Ordering::Relaxed)
    }

    pub fn mjpeg(&self) -> Option<&MjpegServer> {
        self.mjpeg.as_ref()
    }

    pub fn rtsp(&self) -> Option<&RtspServer> {
        self.rtsp.as_ref()
    }

    pub fn bridge(&self) -> Option<&TelemetryBridge> {
        self.bridge.as_ref()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Consumer side of the relay: take the latest frame and hand it to every
/// sink, until `running` is cleared.
pub fn spawn_sender(
    relay: Arc<FrameRelay>,
    sinks: Vec<Box<dyn FrameSink>>,
    running: Arc<AtomicBool>,
    consume_timeout: Duration,
    forwarded: Arc<AtomicU64>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("sender".to_string())
        .spawn(move || {
            let mut window_frames: u32 = 0;
            let mut window_deliveries: u64 = 0;
            let mut window_start = Instant::now();

            while running.load(Ordering::SeqCst) {
                if let Some(frame) = relay.consume(consume_timeout) {
                    for sink in &sinks {
                        let viewers = sink.send_frame(&frame);
                        window_deliveries += viewers as u64;
                        tracing::trace!(
                            sink = sink.name(),
                            sequence = frame.sequence,
                            viewers,
                            "frame fanned out"
                        );
                    }
                    forwarded.fetch_add(1, Ordering::Relaxed);
                    window_frames += 1;
                }

                let elapsed = window_start.elapsed();
                if elapsed >= STREAM_STATS_INTERVAL {
                    let stats = relay.stats();
                    tracing::info!(
                        fps = format_args!("{:.1}", window_frames as f64 / elapsed.as_secs_f64()),
                        deliveries = window_deliveries,
                        forwarded = forwarded.load(Ordering::Relaxed),
                        dropped = stats.dropped,
                        "stream stats"
                    );
                    window_frames = 0;
                    window_deliveries = 0;
                    window_start = Instant::now();
                }
            }
            tracing::debug!("sender task exited");
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::JpegFileSource;
    use crate::capture::tests::fake_jpeg;
    use parking_lot::Mutex;
    use std::net::SocketAddr;

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<u64>>,
    }

    impl FrameSink for Arc<RecordingSink> {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn send_frame(&self, frame: &Arc<VideoFrame>) -> usize {
            self.seen.lock().push(frame.sequence);
            1
        }
    }

    fn frame(sequence: u64) -> VideoFrame {
        VideoFrame {
            data: vec![0xAB; 64],
            width: 8,
            height: 8,
            captured_at: Instant::now(),
            sequence,
        }
    }

    fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        check()
    }

    #[test]
    fn output_modes() {
        assert!(OutputMode::Both.mjpeg_enabled() && OutputMode::Both.rtsp_enabled());
        assert!(OutputMode::Mjpeg.mjpeg_enabled() && !OutputMode::Mjpeg.rtsp_enabled());
        assert!(!OutputMode::Rtsp.mjpeg_enabled() && OutputMode::Rtsp.rtsp_enabled());
    }

    #[test]
    fn sender_fans_out_to_every_sink() {
        let relay = Arc::new(FrameRelay::default());
        let running = Arc::new(AtomicBool::new(true));
        let forwarded = Arc::new(AtomicU64::new(0));
        let a = Arc::new(RecordingSink::default());
        let b = Arc::new(RecordingSink::default());

        let sinks: Vec<Box<dyn FrameSink>> = vec![
            Box::new(a.clone()) as Box<dyn FrameSink>,
            Box::new(b.clone()) as Box<dyn FrameSink>,
        ];
        let handle = spawn_sender(
            relay.clone(),
            sinks,
            running.clone(),
            Duration::from_millis(20),
            forwarded.clone(),
        )
        .unwrap();

        relay.publish(frame(1));
        assert!(wait_until(Duration::from_secs(2), || a.seen.lock().len() == 1));
        relay.publish(frame(2));
        assert!(wait_until(Duration::from_secs(2), || b.seen.lock().len() == 2));

        running.store(false, Ordering::SeqCst);
        handle.join().unwrap();

        assert_eq!(*a.seen.lock(), vec![1, 2]);
        assert_eq!(*b.seen.lock(), vec![1, 2]);
        assert_eq!(forwarded.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn server_runs_pipeline_into_mjpeg() {
        let config = ServerConfig {
            mode: OutputMode::Mjpeg,
            mjpeg: MjpegConfig {
                bind: SocketAddr::from(([127, 0, 0, 1], 0)),
                ..Default::default()
            },
            ..Default::default()
        };
        let source = JpegFileSource::from_frames(vec![fake_jpeg(16, 16, 32)], 50).unwrap();

        let mut server = Server::new(config);
        server.start(Box::new(source), None).unwrap();
        assert!(server.is_running());
        assert!(server.rtsp().is_none());
        assert!(server.bridge().is_none());

        let mjpeg = server.mjpeg().expect("mjpeg output");
        assert!(mjpeg.local_addr().is_some());
        assert!(wait_until(Duration::from_secs(3), || mjpeg.frames_published() >= 2));

        server.stop();
        assert!(!server.is_running());
        assert!(server.frames_forwarded() >= 2);
        assert!(server.relay_stats().published >= 2);
    }

    #[test]
    fn start_twice_fails() {
        let config = ServerConfig {
            mode: OutputMode::Rtsp,
            rtsp: RtspConfig {
                bind: SocketAddr::from(([127, 0, 0, 1], 0)),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut server = Server::new(config);
        let source =
            || Box::new(JpegFileSource::from_frames(vec![fake_jpeg(8, 8, 1)], 10).unwrap());
        server.start(source(), None).unwrap();
        assert!(matches!(
            server.start(source(), None),
            Err(SkycamError::AlreadyRunning)
        ));
    }
}
