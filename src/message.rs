// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Wire Protocol
//!
//! One JSON record per line:
//! `{"id","timestamp","from","to","type","body"}`. For `SECURE_TEXT` the
//! body is a serialized [`crate::envelope::Envelope`], which the relay
//! forwards without looking inside.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ChatError, ChatResult};

/// Address meaning "every registered session".
pub const BROADCAST: &str = "ALL";

/// Address of the relay itself (heartbeats and PING replies).
pub const SERVER_IDENTITY: &str = "SERVER";

/// Longest identity accepted on JOIN.
pub const MAX_IDENTITY_LEN: usize = 64;

/// Message verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Text,
    Join,
    Leave,
    Ping,
    Pong,
    SecureText,
}

/// A chat message as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub body: String,
}

impl Message {
    /// Creates a new message with a fresh id and the current time.
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        kind: MessageType,
        body: impl Into<String>,
    ) -> Self {
        Message {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            from: from.into(),
            to: to.into(),
            kind,
            body: body.into(),
        }
    }

    /// The JOIN frame a client sends first (empty body).
    pub fn join(identity: &str) -> Self {
        Message::new(identity, BROADCAST, MessageType::Join, "")
    }

    /// The LEAVE frame a client sends before closing.
    pub fn leave(identity: &str) -> Self {
        Message::new(identity, BROADCAST, MessageType::Leave, "")
    }

    /// Broadcast announcing that `identity` has joined.
    pub fn join_notice(identity: &str) -> Self {
        Message::new(
            identity,
            BROADCAST,
            MessageType::Join,
            format!("{} has joined", identity),
        )
    }

    /// Broadcast announcing that `identity` has left.
    pub fn leave_notice(identity: &str) -> Self {
        Message::new(
            identity,
            BROADCAST,
            MessageType::Leave,
            format!("{} has left", identity),
        )
    }

    /// Heartbeat probe from the relay.
    pub fn heartbeat_ping(identity: &str) -> Self {
        Message::new(SERVER_IDENTITY, identity, MessageType::Ping, "")
    }

    /// Relay reply to a client-issued PING.
    pub fn server_pong(identity: &str) -> Self {
        Message::new(SERVER_IDENTITY, identity, MessageType::Pong, "PONG")
    }

    /// Returns true if addressed to every session.
    pub fn is_broadcast(&self) -> bool {
        self.to == BROADCAST
    }

    /// Returns true if addressed to the relay itself.
    pub fn is_for_server(&self) -> bool {
        self.to == SERVER_IDENTITY
    }

    /// Encodes the message as a single JSON line (without the newline).
    pub fn encode(&self) -> ChatResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes one line into a message.
    pub fn decode(line: &str) -> ChatResult<Self> {
        Ok(serde_json::from_str(line.trim_end_matches('\r'))?)
    }
}

/// Validates an identity claimed in a JOIN frame.
pub fn validate_identity(identity: &str) -> ChatResult<()> {
    if identity.is_empty() {
        return Err(ChatError::ProtocolViolation("empty identity".to_string()));
    }
    if identity.chars().count() > MAX_IDENTITY_LEN {
        return Err(ChatError::ProtocolViolation(format!(
            "identity longer than {} characters",
            MAX_IDENTITY_LEN
        )));
    }
    if identity == BROADCAST || identity == SERVER_IDENTITY {
        return Err(ChatError::ProtocolViolation(format!(
            "identity {} is reserved",
            identity
        )));
    }
    if identity.starts_with('.')
        || identity
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '/' || c == '\\')
    {
        return Err(ChatError::ProtocolViolation(
            "identity contains invalid characters".to_string(),
        ));
    }
    Ok(())
}
