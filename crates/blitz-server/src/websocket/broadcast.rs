//! Fan-out of server messages to every connected session.
//!
//! Each session owns its own bounded queue. A broadcast snapshots the registry
//! under the read lock, then `try_send`s one shared `Arc<ServerMessage>` into
//! every queue, so a slow client only ever loses its own messages.

use std::collections::HashMap;
use std::sync::Arc;

use blitz_core::ServerMessage;
use metrics::counter;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::connection::{ClientSession, Delivery};
use crate::metrics::{BROADCASTS_TOTAL, WS_BROADCAST_DROPS_TOTAL};

/// Registry of live sessions.
pub struct BroadcastHub {
    /// Sessions indexed by session ID.
    sessions: RwLock<HashMap<String, Arc<ClientSession>>>,
}

impl BroadcastHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Add a session.
    ///
    /// A session already registered under the same ID is replaced and its queue closed.
    pub async fn register(&self, session: Arc<ClientSession>) {
        let mut sessions = self.sessions.write().await;
        let id = session.id.clone();
        if let Some(displaced) = sessions.insert(id.clone(), session) {
            warn!(session_id = %id, "duplicate session id, closing displaced session");
            let _ = displaced.close();
        }
        debug!(session_id = %id, total = sessions.len(), "session registered");
    }

    /// Remove a session by ID and close its queue.
    ///
    /// Returns `false` when no such session is registered.
    pub async fn unregister(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(session_id);
        Self::finish_removal(removed)
    }

    /// Remove `session` only if it is still the one registered under its ID.
    ///
    /// Used by the session's own teardown so a displaced session never evicts
    /// its replacement.
    pub async fn unregister_session(&self, session: &Arc<ClientSession>) -> bool {
        let removed = {
            let mut sessions = self.sessions.write().await;
            match sessions.get(&session.id) {
                Some(current) if Arc::ptr_eq(current, session) => sessions.remove(&session.id),
                _ => None,
            }
        };
        if removed.is_none() {
            // Still close our own queue; the hub may have displaced us.
            let _ = session.close();
        }
        Self::finish_removal(removed)
    }

    fn finish_removal(removed: Option<Arc<ClientSession>>) -> bool {
        match removed {
            Some(session) => {
                let _ = session.close();
                info!(
                    session_id = %session.id,
                    dropped = session.drop_count(),
                    "session unregistered"
                );
                true
            }
            None => false,
        }
    }

    /// Deliver `message` to every registered session without blocking.
    ///
    /// Returns how many queues accepted it. Full queues drop the message for
    /// that session only.
    pub async fn broadcast(&self, message: impl Into<Arc<ServerMessage>>) -> usize {
        let message: Arc<ServerMessage> = message.into();
        let status = message.status.as_str();
        // Snapshot under the read lock; sends happen without it.
        let sessions: Vec<Arc<ClientSession>> =
            self.sessions.read().await.values().cloned().collect();
        if sessions.is_empty() {
            debug!(status, "no sessions connected, broadcast skipped");
            return 0;
        }

        counter!(BROADCASTS_TOTAL, "status" => status).increment(1);
        let mut delivered = 0;
        for session in &sessions {
            match session.send(Arc::clone(&message)) {
                Delivery::Queued => delivered += 1,
                Delivery::Full => {
                    counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
                    warn!(
                        session_id = %session.id,
                        status,
                        total_drops = session.drop_count(),
                        "outbound queue full, message dropped"
                    );
                }
                Delivery::Closed => {
                    debug!(session_id = %session.id, "outbound queue closed, skipped");
                }
            }
        }
        debug!(status, recipients = sessions.len(), delivered, "broadcast");
        delivered
    }

    /// Deliver `message` to one session. `None` when the ID is unknown.
    pub async fn send_to(
        &self,
        session_id: &str,
        message: impl Into<Arc<ServerMessage>>,
    ) -> Option<Delivery> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(session_id)?;
        let delivery = session.send(message.into());
        if delivery == Delivery::Full {
            counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
            warn!(session_id, "outbound queue full, message dropped");
        }
        Some(delivery)
    }

    /// Number of registered sessions.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// IDs of all registered sessions.
    pub async fn session_ids(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}
