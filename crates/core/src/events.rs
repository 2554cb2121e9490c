//! Viewer connect/disconnect notifications from the video outputs.
//!
//! Each output owns one bounded channel. Events are sent with `try_send`
//! from the connection threads; when nobody drains the channel the newest
//! events are dropped rather than blocking a viewer.

use std::net::SocketAddr;

use crossbeam_channel::{Receiver, Sender, TrySendError};

/// Events queued per output before new ones are dropped.
pub const VIEWER_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerEvent {
    /// A viewer was admitted. `id` is unique per output for its lifetime.
    Connected { id: u64, peer: SocketAddr },
    Disconnected {
        id: u64,
        peer: SocketAddr,
        reason: &'static str,
    },
}

impl ViewerEvent {
    pub fn id(&self) -> u64 {
        match self {
            Self::Connected { id, .. } | Self::Disconnected { id, .. } => *id,
        }
    }
}

#[derive(Clone)]
pub(crate) struct ViewerEvents {
    tx: Sender<ViewerEvent>,
    rx: Receiver<ViewerEvent>,
}

impl ViewerEvents {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        Self { tx, rx }
    }

    pub(crate) fn emit(&self, event: ViewerEvent) {
        if let Err(TrySendError::Full(event)) = self.tx.try_send(event) {
            tracing::trace!(?event, "viewer event channel full, dropping event");
        }
    }

    pub(crate) fn receiver(&self) -> Receiver<ViewerEvent> {
        self.rx.clone()
    }
}
