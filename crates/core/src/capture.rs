//! Frame acquisition: the producer side of the video pipeline.
//!
//! Sensor drivers live outside this crate. Anything that yields encoded
//! JPEG frames implements [`FrameSource`]; [`spawn_capture`] runs it on
//! its own thread and publishes into a [`FrameRelay`].

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{Result, SkycamError};
use crate::relay::{FrameRelay, PublishOutcome, VideoFrame};

const POLL_TIMEOUT: Duration = Duration::from_millis(100);
const ERROR_BACKOFF: Duration = Duration::from_millis(100);
const STATS_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// A frame as delivered by a source, before sequencing.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub data: Vec<u8>,
    pub width: u16,
    pub height: u16,
}

/// A producer of encoded JPEG frames.
pub trait FrameSource: Send {
    /// Wait up to `timeout` for the next frame.
    ///
    /// `Ok(None)` means nothing was available this interval.
    /// [`SkycamError::FrameSourceExhausted`] ends the capture task; any
    /// other error is logged and retried after a short back-off.
    fn next_frame(&mut self, timeout: Duration) -> Result<Option<CapturedFrame>>;
}

/// Read `(width, height)` from the first SOF segment of a JPEG.
pub fn jpeg_dimensions(data: &[u8]) -> Option<(u16, u16)> {
    if data.len() < 4 || data[0] != 0xFF || data[1] != 0xD8 {
        return None;
    }
    let mut i = 2;
    while i + 3 < data.len() {
        if data[i] != 0xFF {
            i += 1;
            continue;
        }
        let marker = data[i + 1];
        match marker {
            // Fill bytes and standalone markers carry no length.
            0xFF => {
                i += 1;
                continue;
            }
            0x01 | 0xD0..=0xD8 => {
                i += 2;
                continue;
            }
            0xDA | 0xD9 => return None,
            _ => {}
        }
        let seg_len = u16::from_be_bytes([data[i + 2], data[i + 3]]) as usize;
        let is_sof = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            // FF Cn len(2) precision(1) height(2) width(2)
            if i + 9 > data.len() {
                return None;
            }
            let height = u16::from_be_bytes([data[i + 5], data[i + 6]]);
            let width = u16::from_be_bytes([data[i + 7], data[i + 8]]);
            return Some((width, height));
        }
        i += 2 + seg_len;
    }
    None
}

/// Replays a fixed set of JPEG images at a steady frame rate.
///
/// Stands in for a camera when running on a host: frames are loaded once
/// and cycled through, each stamped with the dimensions found in its SOF
/// header.
pub struct JpegFileSource {
    frames: Vec<CapturedFrame>,
    index: usize,
    interval: Duration,
    next_due: Instant,
    looping: bool,
}

impl JpegFileSource {
    pub fn from_frames(frames: Vec<Vec<u8>>, fps: u32) -> Result<Self> {
        if fps == 0 {
            return Err(SkycamError::InvalidConfig("fps must be at least 1".to_string()));
        }
        let frames = frames
            .into_iter()
            .map(|data| {
                let (width, height) = jpeg_dimensions(&data).unwrap_or((0, 0));
                if width == 0 {
                    tracing::warn!(len = data.len(), "no SOF marker found, dimensions unknown");
                }
                CapturedFrame {
                    data,
                    width,
                    height,
                }
            })
            .collect();
        Ok(Self {
            frames,
            index: 0,
            interval: Duration::from_secs(1) / fps,
            next_due: Instant::now(),
            looping: true,
        })
    }

    pub fn from_files<P: AsRef<Path>>(paths: &[P], fps: u32) -> Result<Self> {
        let mut frames = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            let data = fs::read(path)?;
            tracing::debug!(path = %path.display(), len = data.len(), "loaded frame");
            frames.push(data);
        }
        Self::from_frames(frames, fps)
    }

    /// Play the frames once instead of cycling.
    pub fn once(mut self) -> Self {
        self.looping = false;
        self
    }
}

impl FrameSource for JpegFileSource {
    fn next_frame(&mut self, timeout: Duration) -> Result<Option<CapturedFrame>> {
        if self.frames.is_empty() || (!self.looping && self.index >= self.frames.len()) {
            return Err(SkycamError::FrameSourceExhausted);
        }

        let now = Instant::now();
        if self.next_due > now {
            let wait = self.next_due - now;
            if wait > timeout {
                thread::sleep(timeout);
                return Ok(None);
            }
            thread::sleep(wait);
        }

        let frame = self.frames[self.index % self.frames.len()].clone();
        self.index += 1;

        // Don't try to catch up after a stall.
        self.next_due += self.interval;
        let now = Instant::now();
        if self.next_due < now {
            self.next_due = now + self.interval;
        }
        Ok(Some(frame))
    }
}

/// Run `source` on a dedicated thread until `running` is cleared or the
/// source is exhausted, publishing sequenced frames into `relay`.
pub fn spawn_capture(
    mut source: Box<dyn FrameSource>,
    relay: Arc<FrameRelay>,
    running: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("capture".to_string())
        .spawn(move || {
            let mut sequence: u64 = 0;
            let mut window_frames: u32 = 0;
            let mut window_start = Instant::now();

            while running.load(Ordering::SeqCst) {
                match source.next_frame(POLL_TIMEOUT) {
                    Ok(Some(captured)) => {
                        sequence += 1;
                        window_frames += 1;
                        let outcome = relay.publish(VideoFrame {
                            data: captured.data,
                            width: captured.width,
                            height: captured.height,
                            captured_at: Instant::now(),
                            sequence,
                        });
                        if let PublishOutcome::Rejected { len } = outcome {
                            tracing::trace!(sequence, len, "capture frame rejected");
                        }
                    }
                    Ok(None) => {}
                    Err(SkycamError::FrameSourceExhausted) => {
                        tracing::info!(frames = sequence, "frame source exhausted");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "frame capture failed");
                        thread::sleep(ERROR_BACKOFF);
                    }
                }

                let elapsed = window_start.elapsed();
                if elapsed >= STATS_LOG_INTERVAL {
                    let stats = relay.stats();
                    tracing::info!(
                        fps = format_args!("{:.1}", window_frames as f64 / elapsed.as_secs_f64()),
                        captured = sequence,
                        dropped = stats.dropped,
                        oversized = stats.oversized,
                        "capture stats"
                    );
                    window_frames = 0;
                    window_start = Instant::now();
                }
            }
            tracing::debug!("capture task exited");
        })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal baseline JPEG header: SOI, APP0 stub, SOF0 with the given size.
    pub(crate) fn fake_jpeg(width: u16, height: u16, body: usize) -> Vec<u8> {
        let mut v = vec![0xFF, 0xD8];
        v.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x04, 0x00, 0x00]);
        v.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x11, 0x08]);
        v.extend_from_slice(&height.to_be_bytes());
        v.extend_from_slice(&width.to_be_bytes());
        v.extend_from_slice(&[0x03, 1, 0x21, 0, 2, 0x11, 1, 3, 0x11, 1]);
        v.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x02]);
        v.extend(std::iter::repeat_n(0x55, body));
        v.extend_from_slice(&[0xFF, 0xD9]);
        v
    }

    #[test]
    fn dimensions_from_sof() {
        assert_eq!(jpeg_dimensions(&fake_jpeg(640, 480, 10)), Some((640, 480)));
    }

    #[test]
    fn dimensions_missing() {
        assert_eq!(jpeg_dimensions(b"not a jpeg"), None);
        assert_eq!(jpeg_dimensions(&[0xFF, 0xD8, 0xFF, 0xDA, 0, 2]), None);
    }

    #[test]
    fn file_source_cycles() {
        let mut src =
            JpegFileSource::from_frames(vec![fake_jpeg(8, 8, 1), fake_jpeg(16, 16, 1)], 1000)
                .unwrap();
        let sizes: Vec<u16> = (0..4)
            .map(|_| src.next_frame(Duration::from_secs(1)).unwrap().unwrap().width)
            .collect();
        assert_eq!(sizes, vec![8, 16, 8, 16]);
    }

    #[test]
    fn once_source_exhausts() {
        let mut src = JpegFileSource::from_frames(vec![fake_jpeg(8, 8, 1)], 1000)
            .unwrap()
            .once();
        assert!(src.next_frame(Duration::from_secs(1)).unwrap().is_some());
        assert!(matches!(
            src.next_frame(Duration::from_secs(1)),
            Err(SkycamError::FrameSourceExhausted)
        ));
    }

    #[test]
    fn zero_fps_rejected() {
        assert!(JpegFileSource::from_frames(vec![], 0).is_err());
    }

    #[test]
    fn capture_task_sequences_frames() {
        let relay = Arc::new(FrameRelay::default());
        let running = Arc::new(AtomicBool::new(true));
        let src = JpegFileSource::from_frames(vec![fake_jpeg(8, 8, 1)], 1000)
            .unwrap()
            .once();
        let handle = spawn_capture(Box::new(src), relay.clone(), running).unwrap();
        handle.join().unwrap();

        let frame = relay.consume(Duration::ZERO).expect("frame");
        assert_eq!(frame.sequence, 1);
        assert_eq!(frame.width, 8);
    }
}
