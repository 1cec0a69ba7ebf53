// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Session Registry
//!
//! Tracks which identities are connected and how to reach them.
//!
//! Each session owns a bounded channel; the registry only holds the sending
//! half. The connection's own task drains the receiver and performs the
//! socket write, so a slow or broken peer never blocks the caller of
//! [`SessionRegistry::broadcast`]. No lock is held while delivering.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::error::{ChatError, ChatResult};
use crate::message::Message;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// A pre-encoded frame queued for one session.
#[derive(Debug, Clone)]
pub struct RegistryMessage {
    /// One JSON line, without the trailing newline.
    pub line: String,
}

/// Why a frame could not be queued for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The session's outbound queue is full; this frame is dropped.
    Full,
    /// The session's connection is gone.
    Closed,
}

/// Sending half of a session's outbound queue.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: u64,
    tx: mpsc::Sender<RegistryMessage>,
}

impl SessionHandle {
    /// Creates a handle and the receiver its connection task drains.
    pub fn channel(capacity: usize) -> (SessionHandle, mpsc::Receiver<RegistryMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed);
        (SessionHandle { id, tx }, rx)
    }

    /// Process-unique handle id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queues a frame without waiting.
    pub fn deliver(&self, frame: RegistryMessage) -> Result<(), DeliveryError> {
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Returns true once the connection task has dropped its receiver.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A registered session.
#[derive(Debug, Clone)]
pub struct Session {
    pub identity: String,
    pub handle: SessionHandle,
    pub connected_at: DateTime<Utc>,
}

/// Outcome of a broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sessions the frame was queued for.
    pub delivered: usize,
    /// Sessions skipped because their queue was full or closed.
    pub failed: usize,
}

/// Thread-safe registry of live sessions, keyed by identity.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        SessionRegistry {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a session.
    ///
    /// An identity that is already registered is rejected; the existing
    /// session is left untouched.
    pub fn register(&self, identity: &str, handle: SessionHandle) -> ChatResult<()> {
        let mut sessions = self.sessions.write().unwrap();
        if sessions.contains_key(identity) {
            return Err(ChatError::DuplicateIdentity(identity.to_string()));
        }
        sessions.insert(
            identity.to_string(),
            Session {
                identity: identity.to_string(),
                handle,
                connected_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Removes a session regardless of which handle it uses.
    pub fn unregister(&self, identity: &str) -> Option<Session> {
        self.sessions.write().unwrap().remove(identity)
    }

    /// Removes `identity` only if it is still registered with `handle`.
    ///
    /// Returns true if a session was removed.
    pub fn unregister_handle(&self, identity: &str, handle: &SessionHandle) -> bool {
        let mut sessions = self.sessions.write().unwrap();
        match sessions.get(identity) {
            Some(session) if session.handle.id == handle.id => {
                sessions.remove(identity);
                true
            }
            _ => false,
        }
    }

    /// Looks up the delivery handle of a connected identity.
    pub fn lookup(&self, identity: &str) -> ChatResult<SessionHandle> {
        self.sessions
            .read()
            .unwrap()
            .get(identity)
            .map(|s| s.handle.clone())
            .ok_or_else(|| ChatError::NotFound(identity.to_string()))
    }

    /// Returns a copy of the session record for `identity`.
    pub fn session(&self, identity: &str) -> Option<Session> {
        self.sessions.read().unwrap().get(identity).cloned()
    }

    /// Delivers a message to one identity.
    ///
    /// A closed handle is evicted and reported as `NotFound`.
    pub fn send_to(&self, identity: &str, message: &Message) -> ChatResult<()> {
        let handle = self.lookup(identity)?;
        let frame = RegistryMessage {
            line: message.encode()?,
        };
        match handle.deliver(frame) {
            Ok(()) => Ok(()),
            Err(DeliveryError::Full) => Err(ChatError::RoutingFailure(format!(
                "outbound queue full for {}",
                identity
            ))),
            Err(DeliveryError::Closed) => {
                self.evict(identity, &handle);
                Err(ChatError::NotFound(identity.to_string()))
            }
        }
    }

    /// Delivers a message to every registered session, the sender included.
    ///
    /// The frame is encoded once. Handles are snapshotted under the read
    /// lock and delivered to after it is released, so a session joining
    /// mid-broadcast may or may not receive this frame.
    pub fn broadcast(&self, message: &Message) -> ChatResult<BroadcastReport> {
        let line = message.encode()?;
        let mut report = BroadcastReport::default();

        for (identity, handle) in self.snapshot() {
            match handle.deliver(RegistryMessage { line: line.clone() }) {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::Full) => {
                    warn!("Outbound queue full, dropping broadcast frame");
                    report.failed += 1;
                }
                Err(DeliveryError::Closed) => {
                    self.evict(&identity, &handle);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Returns all registered identities, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut identities: Vec<String> = self.sessions.read().unwrap().keys().cloned().collect();
        identities.sort();
        identities
    }

    /// Copies out `(identity, handle)` pairs so callers can deliver without
    /// holding the registry lock.
    pub fn snapshot(&self) -> Vec<(String, SessionHandle)> {
        self.sessions
            .read()
            .unwrap()
            .values()
            .map(|s| (s.identity.clone(), s.handle.clone()))
            .collect()
    }

    /// Removes a session whose connection has gone away.
    pub fn evict(&self, identity: &str, handle: &SessionHandle) {
        if self.unregister_handle(identity, handle) {
            debug!("Evicted session with closed outbound queue");
        }
    }

    /// Returns the number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;
    use std::sync::Arc;

    fn recv_message(rx: &mut mpsc::Receiver<RegistryMessage>) -> Message {
        let frame = rx.try_recv().expect("expected a queued frame");
        Message::decode(&frame.line).unwrap()
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = SessionRegistry::new();
        let (handle, _rx) = SessionHandle::channel(8);
        registry.register("alice", handle.clone()).unwrap();

        let found = registry.lookup("alice").unwrap();
        assert_eq!(found.id(), handle.id());
        assert_eq!(registry.len(), 1);
        assert!(registry.session("alice").is_some());
    }

    #[tokio::test]
    async fn test_duplicate_identity_rejected() {
        let registry = SessionRegistry::new();
        let (first, _rx1) = SessionHandle::channel(8);
        let (second, _rx2) = SessionHandle::channel(8);
        registry.register("alice", first.clone()).unwrap();

        let err = registry.register("alice", second).unwrap_err();
        assert!(matches!(err, ChatError::DuplicateIdentity(ref id) if id == "alice"));
        // Original session is untouched
        assert_eq!(registry.lookup("alice").unwrap().id(), first.id());
    }

    #[tokio::test]
    async fn test_unregister_then_lookup_not_found() {
        let registry = SessionRegistry::new();
        let (handle, _rx) = SessionHandle::channel(8);
        registry.register("alice", handle).unwrap();

        assert!(registry.unregister("alice").is_some());
        assert!(matches!(
            registry.lookup("alice"),
            Err(ChatError::NotFound(_))
        ));
        assert!(registry.unregister("alice").is_none());
    }

    #[tokio::test]
    async fn test_unregister_handle_ignores_stale_handle() {
        let registry = SessionRegistry::new();
        let (old, _rx_old) = SessionHandle::channel(8);
        let (new, _rx_new) = SessionHandle::channel(8);
        registry.register("alice", old.clone()).unwrap();
        assert!(registry.unregister_handle("alice", &old));
        registry.register("alice", new.clone()).unwrap();

        // A late teardown of the old connection must not remove the new one
        assert!(!registry.unregister_handle("alice", &old));
        assert_eq!(registry.lookup("alice").unwrap().id(), new.id());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone_including_sender() {
        let registry = SessionRegistry::new();
        let (a, mut rx_a) = SessionHandle::channel(8);
        let (b, mut rx_b) = SessionHandle::channel(8);
        registry.register("alice", a).unwrap();
        registry.register("bob", b).unwrap();

        let report = registry
            .broadcast(&Message::new("alice", "ALL", MessageType::Text, "hi"))
            .unwrap();
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 0);

        assert_eq!(recv_message(&mut rx_a).body, "hi");
        assert_eq!(recv_message(&mut rx_b).body, "hi");
    }

    #[tokio::test]
    async fn test_join_broadcast_seen_by_earlier_sessions() {
        let registry = SessionRegistry::new();
        let (b, mut rx_b) = SessionHandle::channel(8);
        let (c, mut rx_c) = SessionHandle::channel(8);
        registry.register("bob", b).unwrap();
        registry.register("carol", c).unwrap();

        let (a, mut rx_a) = SessionHandle::channel(8);
        registry.register("alice", a).unwrap();
        registry.broadcast(&Message::join_notice("alice")).unwrap();

        for rx in [&mut rx_a, &mut rx_b, &mut rx_c] {
            let msg = recv_message(rx);
            assert_eq!(msg.kind, MessageType::Join);
            assert_eq!(msg.from, "alice");
        }
    }

    #[tokio::test]
    async fn test_broadcast_isolates_closed_session() {
        let registry = SessionRegistry::new();
        let (a, mut rx_a) = SessionHandle::channel(8);
        let (b, rx_b) = SessionHandle::channel(8);
        registry.register("alice", a).unwrap();
        registry.register("bob", b).unwrap();
        drop(rx_b);

        let report = registry
            .broadcast(&Message::new("alice", "ALL", MessageType::Text, "still here"))
            .unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(recv_message(&mut rx_a).body, "still here");

        // The broken session was evicted
        assert!(registry.lookup("bob").is_err());
        assert_eq!(registry.list(), vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_broadcast_full_queue_drops_only_that_frame() {
        let registry = SessionRegistry::new();
        let (a, mut rx_a) = SessionHandle::channel(1);
        registry.register("alice", a).unwrap();

        let first = registry
            .broadcast(&Message::new("bob", "ALL", MessageType::Text, "one"))
            .unwrap();
        let second = registry
            .broadcast(&Message::new("bob", "ALL", MessageType::Text, "two"))
            .unwrap();
        assert_eq!(first.delivered, 1);
        assert_eq!(second.failed, 1);

        assert_eq!(recv_message(&mut rx_a).body, "one");
        // Slow session stays registered
        assert!(registry.lookup("alice").is_ok());
    }

    #[tokio::test]
    async fn test_send_to_unknown_identity() {
        let registry = SessionRegistry::new();
        let msg = Message::new("alice", "nobody", MessageType::SecureText, "{}");
        assert!(matches!(
            registry.send_to("nobody", &msg),
            Err(ChatError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_send_to_closed_session_evicts() {
        let registry = SessionRegistry::new();
        let (b, rx_b) = SessionHandle::channel(8);
        registry.register("bob", b).unwrap();
        drop(rx_b);

        let msg = Message::new("alice", "bob", MessageType::Text, "hey");
        assert!(registry.send_to("bob", &msg).is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_list_is_sorted() {
        let registry = SessionRegistry::new();
        for name in ["carol", "alice", "bob"] {
            let (h, _rx) = SessionHandle::channel(1);
            registry.register(name, h).unwrap();
        }
        assert_eq!(registry.list(), vec!["alice", "bob", "carol"]);
    }

    #[tokio::test]
    async fn test_concurrent_register_and_broadcast() {
        let registry = Arc::new(SessionRegistry::new());
        let mut tasks = Vec::new();

        for i in 0..32 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let identity = format!("user-{}", i);
                let (handle, mut rx) = SessionHandle::channel(64);
                registry.register(&identity, handle.clone()).unwrap();
                registry
                    .broadcast(&Message::join_notice(&identity))
                    .unwrap();
                // Drain whatever arrived, then leave
                while rx.try_recv().is_ok() {}
                if i % 2 == 0 {
                    registry.unregister_handle(&identity, &handle);
                }
                // Keep odd receivers alive until the end of the test
                rx
            }));
        }

        let mut receivers = Vec::new();
        for task in tasks {
            receivers.push(task.await.unwrap());
        }

        assert_eq!(registry.len(), 16);
        assert!(registry.list().iter().all(|id| {
            let n: usize = id.trim_start_matches("user-").parse().unwrap();
            n % 2 == 1
        }));
    }
}
