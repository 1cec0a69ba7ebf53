// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Message Router
//!
//! Resolves a message's addressing against the registry. Delivery is
//! immediate, best-effort and at-most-once; an unknown addressee comes back
//! as `RoutingFailure` for the caller to log, it never tears anything down.

use std::sync::Arc;

use crate::error::{ChatError, ChatResult};
use crate::message::{Message, MessageType};
use crate::registry::SessionRegistry;

/// Where a routed message went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Broadcast { delivered: usize, failed: usize },
    Direct { recipient: String },
}

/// Routes messages to one identity or to every session.
#[derive(Clone)]
pub struct MessageRouter {
    registry: Arc<SessionRegistry>,
}

impl MessageRouter {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        MessageRouter { registry }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Routes a message.
    ///
    /// TEXT, JOIN and LEAVE addressed to `ALL` are broadcast; the sender
    /// gets their own copy. Anything addressed to an identity is delivered
    /// directly. PING, PONG and SECURE_TEXT cannot be broadcast, and frames
    /// addressed to `SERVER` are for the connection handler, not the router.
    pub fn route(&self, message: &Message) -> ChatResult<Delivery> {
        if message.is_broadcast() {
            return match message.kind {
                MessageType::Text | MessageType::Join | MessageType::Leave => {
                    let report = self.registry.broadcast(message)?;
                    Ok(Delivery::Broadcast {
                        delivered: report.delivered,
                        failed: report.failed,
                    })
                }
                other => Err(ChatError::RoutingFailure(format!(
                    "{:?} must be addressed to a single identity",
                    other
                ))),
            };
        }

        if message.is_for_server() {
            return Err(ChatError::RoutingFailure(
                "frames addressed to SERVER are not routable".to_string(),
            ));
        }

        match self.registry.send_to(&message.to, message) {
            Ok(()) => Ok(Delivery::Direct {
                recipient: message.to.clone(),
            }),
            Err(ChatError::NotFound(identity)) => Err(ChatError::RoutingFailure(format!(
                "unknown recipient {}",
                identity
            ))),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{RegistryMessage, SessionHandle};
    use tokio::sync::mpsc;

    fn setup(names: &[&str]) -> (MessageRouter, Vec<mpsc::Receiver<RegistryMessage>>) {
        let registry = Arc::new(SessionRegistry::new());
        let mut receivers = Vec::new();
        for name in names {
            let (handle, rx) = SessionHandle::channel(16);
            registry.register(name, handle).unwrap();
            receivers.push(rx);
        }
        (MessageRouter::new(registry), receivers)
    }

    fn next(rx: &mut mpsc::Receiver<RegistryMessage>) -> Option<Message> {
        rx.try_recv()
            .ok()
            .map(|frame| Message::decode(&frame.line).unwrap())
    }

    #[tokio::test]
    async fn test_text_to_all_includes_sender() {
        let (router, mut rx) = setup(&["alice", "bob"]);
        let msg = Message::new("bob", "ALL", MessageType::Text, "hello all");

        let delivery = router.route(&msg).unwrap();
        assert_eq!(
            delivery,
            Delivery::Broadcast {
                delivered: 2,
                failed: 0
            }
        );

        let at_alice = next(&mut rx[0]).unwrap();
        assert_eq!(at_alice.from, "bob");
        assert_eq!(at_alice.kind, MessageType::Text);
        assert_eq!(at_alice.body, "hello all");
        assert_eq!(next(&mut rx[1]).unwrap(), msg);
    }

    #[tokio::test]
    async fn test_secure_text_direct_only_to_recipient() {
        let (router, mut rx) = setup(&["alice", "bob", "carol"]);
        let msg = Message::new("alice", "bob", MessageType::SecureText, "{\"iv\":\"\"}");

        assert_eq!(
            router.route(&msg).unwrap(),
            Delivery::Direct {
                recipient: "bob".to_string()
            }
        );
        assert!(next(&mut rx[0]).is_none());
        assert_eq!(next(&mut rx[1]).unwrap().body, msg.body);
        assert!(next(&mut rx[2]).is_none());
    }

    #[tokio::test]
    async fn test_unknown_recipient_then_known_recipient() {
        let (router, mut rx) = setup(&["alice", "bob"]);

        let lost = Message::new("alice", "mallory", MessageType::SecureText, "{}");
        assert!(matches!(
            router.route(&lost),
            Err(ChatError::RoutingFailure(_))
        ));

        let ok = Message::new("alice", "bob", MessageType::SecureText, "{}");
        assert!(router.route(&ok).is_ok());
        assert_eq!(next(&mut rx[1]).unwrap().id, ok.id);
    }

    #[tokio::test]
    async fn test_secure_text_cannot_be_broadcast() {
        let (router, mut rx) = setup(&["alice"]);
        let msg = Message::new("alice", "ALL", MessageType::SecureText, "{}");
        assert!(matches!(
            router.route(&msg),
            Err(ChatError::RoutingFailure(_))
        ));
        assert!(next(&mut rx[0]).is_none());
    }

    #[tokio::test]
    async fn test_ping_between_peers_is_direct() {
        let (router, mut rx) = setup(&["alice", "bob"]);
        let ping = Message::new("alice", "bob", MessageType::Ping, "");
        router.route(&ping).unwrap();
        assert_eq!(next(&mut rx[1]).unwrap().kind, MessageType::Ping);
    }

    #[tokio::test]
    async fn test_server_addressed_frame_not_routed() {
        let (router, _rx) = setup(&["alice"]);
        let pong = Message::new("alice", "SERVER", MessageType::Pong, "");
        assert!(router.route(&pong).is_err());
    }
}
