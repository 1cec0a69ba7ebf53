// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod client;
pub mod codec;
pub mod config;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod heartbeat;
pub mod http;
pub mod key_store;
pub mod message;
pub mod metrics;
pub mod registry;
pub mod router;
pub mod server;
pub mod worker_pool;

pub use client::{ChatClient, ChatEvent};
pub use envelope::{Envelope, EnvelopeCodec};
pub use error::{ChatError, ChatResult};
pub use message::{Message, MessageType};
pub use server::ChatServer;
