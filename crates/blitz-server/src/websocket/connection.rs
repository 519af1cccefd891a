//! Per-client session state and its bounded outbound queue.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use blitz_core::ServerMessage;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Outcome of a non-blocking enqueue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Message accepted into the queue.
    Queued,
    /// Queue at capacity; message dropped for this session only.
    Full,
    /// Queue closed; the session is going away.
    Closed,
}

/// Lifecycle of a client session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Upgrade in progress, not yet registered.
    Connecting,
    /// Registered and exchanging frames.
    Open,
    /// Queue closed, writer draining.
    Closing,
    /// Transport released.
    Closed,
}

/// Connection admission counter.
///
/// A slot is reserved before the upgrade and held for the life of the
/// session, so concurrent upgrades can never exceed `max`.
#[derive(Debug)]
pub struct ConnectionSlots {
    max: usize,
    used: AtomicUsize,
}

impl ConnectionSlots {
    /// Allow at most `max` concurrent connections.
    pub fn new(max: usize) -> Self {
        Self {
            max,
            used: AtomicUsize::new(0),
        }
    }

    /// Reserve a slot, or `None` when all are taken.
    pub fn try_acquire(self: &Arc<Self>) -> Option<SlotGuard> {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < self.max).then_some(used + 1)
            })
            .ok()
            .map(|_| SlotGuard {
                slots: Arc::clone(self),
            })
    }

    /// Slots currently reserved.
    pub fn in_use(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    /// Configured limit.
    pub fn max(&self) -> usize {
        self.max
    }
}

/// A reserved connection slot, released on drop.
#[derive(Debug)]
pub struct SlotGuard {
    slots: Arc<ConnectionSlots>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let _ = self.slots.used.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Build a session id from the peer address and a time-ordered UUID.
pub fn new_session_id(remote: Option<SocketAddr>) -> String {
    let suffix = uuid::Uuid::now_v7();
    match remote {
        Some(addr) => format!("{addr}-{suffix}"),
        None => format!("local-{suffix}"),
    }
}

/// A connected client.
///
/// The outbound sender lives behind a mutex so the queue can be closed exactly
/// once from any task; later sends report [`Delivery::Closed`].
pub struct ClientSession {
    /// Unique session ID.
    pub id: String,
    /// Sender half of the outbound queue; `None` once closed.
    tx: Mutex<Option<mpsc::Sender<Arc<ServerMessage>>>>,
    state: Mutex<SessionState>,
    /// When this session was accepted.
    pub connected_at: Instant,
    /// Whether the client has shown activity since the last heartbeat check.
    pub is_alive: AtomicBool,
    /// When the last Pong (or any activity) was received, on the runtime clock.
    last_pong: Mutex<tokio::time::Instant>,
    /// Count of messages dropped due to a full queue.
    pub dropped_messages: AtomicU64,
}

impl ClientSession {
    /// Create a session around an existing sender.
    pub fn new(id: String, tx: mpsc::Sender<Arc<ServerMessage>>) -> Self {
        Self {
            id,
            tx: Mutex::new(Some(tx)),
            state: Mutex::new(SessionState::Connecting),
            connected_at: Instant::now(),
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(tokio::time::Instant::now()),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Create a session with a fresh queue of `capacity` (at least 1).
    pub fn channel(id: String, capacity: usize) -> (Self, mpsc::Receiver<Arc<ServerMessage>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(id, tx), rx)
    }

    /// Enqueue without waiting.
    pub fn send(&self, message: Arc<ServerMessage>) -> Delivery {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Delivery::Closed;
        };
        match tx.try_send(message) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Delivery::Full
            }
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Close the outbound queue. Returns `true` only for the call that closed it.
    ///
    /// Messages already queued are still delivered to the writer.
    pub fn close(&self) -> bool {
        let taken = self.tx.lock().take();
        if taken.is_some() {
            self.set_state(SessionState::Closing);
            true
        } else {
            false
        }
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Advance the lifecycle state.
    pub fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }

    /// Total messages dropped for this session.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Mark the client as alive (pong or any inbound frame).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = tokio::time::Instant::now();
    }

    /// Duration since the last pong (or session start).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the client was active since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Session age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
