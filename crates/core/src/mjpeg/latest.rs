use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::relay::VideoFrame;

/// The most recently published frame, shared by every delivery loop.
///
/// Readers copy out an `Arc` under the lock and write to their socket
/// after releasing it, so a slow client never holds up publication or
/// other clients.
#[derive(Default)]
pub struct LatestFrame {
    slot: Mutex<Option<Arc<VideoFrame>>>,
    changed: Condvar,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, frame: Arc<VideoFrame>) {
        *self.slot.lock() = Some(frame);
        self.changed.notify_all();
    }

    pub fn get(&self) -> Option<Arc<VideoFrame>> {
        self.slot.lock().clone()
    }

    /// Wait up to `timeout` for a frame whose sequence differs from
    /// `delivered` (any frame when `delivered` is `None`).
    pub fn wait_newer(&self, delivered: Option<u64>, timeout: Duration) -> Option<Arc<VideoFrame>> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        loop {
            if let Some(frame) = slot.as_ref()
                && Some(frame.sequence) != delivered
            {
                return Some(frame.clone());
            }
            if self.changed.wait_until(&mut slot, deadline).timed_out() {
                return slot
                    .as_ref()
                    .filter(|f| Some(f.sequence) != delivered)
                    .cloned();
            }
        }
    }

    /// Wake every waiting delivery loop, e.g. on shutdown.
    pub fn wake_all(&self) {
        self.changed.notify_all();
    }
}
