use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

/// Snapshot of one connected stream viewer.
#[derive(Debug, Clone)]
pub struct StreamClientInfo {
    pub id: u64,
    pub peer: SocketAddr,
    pub connected_at: Instant,
    pub frames_sent: u64,
}

struct Slot {
    id: u64,
    peer: SocketAddr,
    connected_at: Instant,
    /// Clone of the client socket, so `shutdown_all` can unblock a writer.
    socket: TcpStream,
    frames_sent: Arc<AtomicU64>,
}

/// Fixed-size table of streaming clients.
pub struct ClientTable {
    slots: Mutex<Vec<Option<Slot>>>,
    next_id: AtomicU64,
}

/// Proof of a claimed slot. Dropping it frees the slot.
pub struct ClientLease {
    table: Arc<ClientTable>,
    pub id: u64,
    pub frames_sent: Arc<AtomicU64>,
}

impl Drop for ClientLease {
    fn drop(&mut self) {
        self.table.release(self.id);
    }
}

impl ClientTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new((0..capacity).map(|_| None).collect()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Take a free slot for `peer`, or `None` when the table is full.
    pub fn claim(self: &Arc<Self>, peer: SocketAddr, socket: TcpStream) -> Option<ClientLease> {
        let mut slots = self.slots.lock();
        let free = slots.iter_mut().find(|s| s.is_none())?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frames_sent = Arc::new(AtomicU64::new(0));
        *free = Some(Slot {
            id,
            peer,
            connected_at: Instant::now(),
            socket,
            frames_sent: frames_sent.clone(),
        });
        drop(slots);

        Some(ClientLease {
            table: self.clone(),
            id,
            frames_sent,
        })
    }

    fn release(&self, id: u64) {
        let mut slots = self.slots.lock();
        for slot in slots.iter_mut() {
            if slot.as_ref().is_some_and(|s| s.id == id) {
                *slot = None;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<StreamClientInfo> {
        self.slots
            .lock()
            .iter()
            .flatten()
            .map(|s| StreamClientInfo {
                id: s.id,
                peer: s.peer,
                connected_at: s.connected_at,
                frames_sent: s.frames_sent.load(Ordering::Relaxed),
            })
            .collect()
    }

    /// Shut down every client socket; their delivery loops then fail their
    /// next write and release their slots.
    pub fn shutdown_all(&self) {
        for slot in self.slots.lock().iter().flatten() {
            let _ = slot.socket.shutdown(Shutdown::Both);
        }
    }
}
