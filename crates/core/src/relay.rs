//! Single-slot "latest frame wins" handoff between capture and delivery.
//!
//! The capture task publishes into one slot; the sender task consumes from
//! it. Publishing never blocks: an unconsumed frame is simply overwritten
//! and counted as dropped, so a slow consumer sees fewer frames but never
//! stale ones.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Slot capacity when bulk memory (external RAM) is available.
pub const FRAME_CAPACITY_BULK: usize = 100 * 1024;
/// Slot capacity on memory-constrained targets.
pub const FRAME_CAPACITY_COMPACT: usize = 20 * 1024;

/// One encoded JPEG frame.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub data: Vec<u8>,
    pub width: u16,
    pub height: u16,
    pub captured_at: Instant,
    /// Monotonically increasing per capture source.
    pub sequence: u64,
}

impl VideoFrame {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// What happens to a frame larger than the slot capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Discard the frame and count it.
    #[default]
    Reject,
    /// Keep the first `capacity` bytes. The result is usually not a
    /// decodable JPEG.
    Truncate,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub capacity: usize,
    pub overflow: OverflowPolicy,
}

impl RelayConfig {
    pub fn compact() -> Self {
        Self {
            capacity: FRAME_CAPACITY_COMPACT,
            ..Default::default()
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            capacity: FRAME_CAPACITY_BULK,
            overflow: OverflowPolicy::Reject,
        }
    }
}

/// Result of [`FrameRelay::publish`].
///
/// Truncated frames report `Stored` or `Replaced` like any other frame;
/// they are counted in [`RelayStats::oversized`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The slot held nothing unconsumed.
    Stored,
    /// An unconsumed frame was overwritten and counted as dropped.
    Replaced,
    /// The frame exceeded capacity and was discarded.
    Rejected { len: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub published: u64,
    pub dropped: u64,
    pub oversized: u64,
    pub consumed: u64,
}

#[derive(Default)]
struct Slot {
    frame: Option<Arc<VideoFrame>>,
    /// The stored frame has not been consumed yet.
    fresh: bool,
}

pub struct FrameRelay {
    config: RelayConfig,
    slot: Mutex<Slot>,
    ready: Condvar,
    published: AtomicU64,
    dropped: AtomicU64,
    oversized: AtomicU64,
    consumed: AtomicU64,
}

impl FrameRelay {
    pub fn new(config: RelayConfig) -> Self {
        tracing::debug!(
            capacity = config.capacity,
            overflow = ?config.overflow,
            "frame relay created"
        );
        Self {
            config,
            slot: Mutex::new(Slot::default()),
            ready: Condvar::new(),
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            oversized: AtomicU64::new(0),
            consumed: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Place `frame` in the slot, overwriting whatever is there. Never
    /// blocks on the consumer.
    pub fn publish(&self, mut frame: VideoFrame) -> PublishOutcome {
        if frame.data.len() > self.config.capacity {
            self.oversized.fetch_add(1, Ordering::Relaxed);
            match self.config.overflow {
                OverflowPolicy::Reject => {
                    tracing::warn!(
                        sequence = frame.sequence,
                        len = frame.data.len(),
                        capacity = self.config.capacity,
                        "frame exceeds relay capacity, dropped"
                    );
                    return PublishOutcome::Rejected {
                        len: frame.data.len(),
                    };
                }
                OverflowPolicy::Truncate => {
                    tracing::warn!(
                        sequence = frame.sequence,
                        len = frame.data.len(),
                        capacity = self.config.capacity,
                        "frame exceeds relay capacity, truncated"
                    );
                    frame.data.truncate(self.config.capacity);
                }
            }
        }

        let frame = Arc::new(frame);
        let replaced = {
            let mut slot = self.slot.lock();
            let replaced = slot.fresh;
            slot.frame = Some(frame);
            slot.fresh = true;
            replaced
        };
        self.ready.notify_one();

        self.published.fetch_add(1, Ordering::Relaxed);
        if replaced {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            PublishOutcome::Replaced
        } else {
            PublishOutcome::Stored
        }
    }

    /// Take the latest unconsumed frame, waiting up to `timeout` for one.
    pub fn consume(&self, timeout: Duration) -> Option<Arc<VideoFrame>> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        while !slot.fresh {
            if self.ready.wait_until(&mut slot, deadline).timed_out() && !slot.fresh {
                return None;
            }
        }
        slot.fresh = false;
        let frame = slot.frame.clone();
        drop(slot);

        if frame.is_some() {
            self.consumed.fetch_add(1, Ordering::Relaxed);
        }
        frame
    }

    /// Latest frame regardless of whether it was consumed.
    pub fn latest(&self) -> Option<Arc<VideoFrame>> {
        self.slot.lock().frame.clone()
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            oversized: self.oversized.load(Ordering::Relaxed),
            consumed: self.consumed.load(Ordering::Relaxed),
        }
    }
}

impl Default for FrameRelay {
    fn default() -> Self {
        Self::new(RelayConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn frame(sequence: u64, len: usize) -> VideoFrame {
        VideoFrame {
            data: vec![0xAB; len],
            width: 320,
            height: 240,
            captured_at: Instant::now(),
            sequence,
        }
    }

    #[test]
    fn double_publish_keeps_latest() {
        let relay = FrameRelay::default();
        assert_eq!(relay.publish(frame(1, 100)), PublishOutcome::Stored);
        assert_eq!(relay.publish(frame(2, 100)), PublishOutcome::Replaced);

        let got = relay.consume(Duration::from_millis(10)).expect("frame");
        assert_eq!(got.sequence, 2);
        assert_eq!(relay.stats().dropped, 1);
        assert!(relay.consume(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn publish_after_consume_is_not_a_drop() {
        let relay = FrameRelay::default();
        relay.publish(frame(1, 10));
        relay.consume(Duration::ZERO);
        assert_eq!(relay.publish(frame(2, 10)), PublishOutcome::Stored);
        assert_eq!(relay.stats().dropped, 0);
    }

    #[test]
    fn consume_times_out_when_empty() {
        let relay = FrameRelay::default();
        let start = Instant::now();
        assert!(relay.consume(Duration::from_millis(30)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn consumer_wakes_on_publish() {
        let relay = Arc::new(FrameRelay::default());
        let r = relay.clone();
        let consumer = thread::spawn(move || r.consume(Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(20));
        relay.publish(frame(7, 10));
        let got = consumer.join().unwrap().expect("frame");
        assert_eq!(got.sequence, 7);
    }

    #[test]
    fn oversize_rejected_by_default() {
        let relay = FrameRelay::new(RelayConfig {
            capacity: 64,
            ..Default::default()
        });
        assert_eq!(
            relay.publish(frame(1, 65)),
            PublishOutcome::Rejected { len: 65 }
        );
        assert!(relay.latest().is_none());
        assert_eq!(relay.stats().oversized, 1);
        assert_eq!(relay.stats().published, 0);
    }

    #[test]
    fn oversize_truncated_when_configured() {
        let relay = FrameRelay::new(RelayConfig {
            capacity: 64,
            overflow: OverflowPolicy::Truncate,
        });
        assert_eq!(relay.publish(frame(1, 100)), PublishOutcome::Stored);
        let got = relay.consume(Duration::ZERO).expect("frame");
        assert_eq!(got.len(), 64);
        assert_eq!(relay.stats().oversized, 1);
    }

    #[test]
    fn exact_capacity_fits() {
        let relay = FrameRelay::new(RelayConfig {
            capacity: 64,
            ..Default::default()
        });
        assert_eq!(relay.publish(frame(1, 64)), PublishOutcome::Stored);
    }

    #[test]
    fn compact_capacity() {
        assert_eq!(RelayConfig::compact().capacity, 20 * 1024);
        assert_eq!(RelayConfig::default().capacity, 100 * 1024);
    }
}
