// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Error types
//!
//! One taxonomy shared by the relay, the router and the envelope codec.
//! Which variants are fatal depends on where they surface: a
//! `ProtocolViolation` closes one connection, a `RoutingFailure` only skips
//! one delivery, a `DecryptionFailure` loses one message.

use thiserror::Error;

/// Errors produced by the chat relay and client.
#[derive(Error, Debug)]
pub enum ChatError {
    /// Out-of-sequence or malformed frame before the session is established.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// JOIN for an identity that already has a live session.
    #[error("Identity already registered: {0}")]
    DuplicateIdentity(String),

    /// Registry lookup for an identity with no live session.
    #[error("No session for identity: {0}")]
    NotFound(String),

    /// A message could not be delivered to its addressee.
    #[error("Routing failed: {0}")]
    RoutingFailure(String),

    /// The key store has no key material for this identity.
    #[error("No key material for identity: {0}")]
    KeyNotFound(String),

    /// Key unwrap or AEAD authentication failed; no plaintext exists.
    #[error("Decryption failed: {0}")]
    DecryptionFailure(String),

    /// Signature did not verify (only raised by a strict codec).
    #[error("Signature verification failed")]
    SignatureMismatch,

    /// Building an envelope failed.
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// A frame could not be decoded or encoded.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// The key store could not read or write key material.
    #[error("Key store error: {0}")]
    KeyStore(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used across the crate.
pub type ChatResult<T> = Result<T, ChatError>;

impl From<serde_json::Error> for ChatError {
    fn from(e: serde_json::Error) -> Self {
        ChatError::MalformedFrame(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_identity() {
        let err = ChatError::DuplicateIdentity("alice".to_string());
        assert_eq!(err.to_string(), "Identity already registered: alice");
    }

    #[test]
    fn test_json_error_maps_to_malformed_frame() {
        let err: ChatError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert!(matches!(err, ChatError::MalformedFrame(_)));
    }
}
