// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Chat Client
//!
//! Connects to a relay, JOINs, and turns incoming frames into
//! [`ChatEvent`]s. Secure messages are encrypted here and decrypted here;
//! the relay only ever sees envelopes.
//!
//! Two tasks per client: a writer that owns the socket's sending half, and
//! a reader that decodes frames, answers PINGs and pushes events into an
//! unbounded channel so it never waits on the consumer.

use std::fmt;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::codec::{ChatCodec, Frame};
use crate::envelope::{Envelope, EnvelopeCodec};
use crate::error::{ChatError, ChatResult};
use crate::key_store::{Keypair, KeyStore};
use crate::message::{validate_identity, Message, MessageType, SERVER_IDENTITY};

/// Longest frame the client accepts from the relay.
const MAX_LINE_LENGTH: usize = 1_048_576;

/// Something the user should see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A plaintext message (TEXT, or a PONG reply).
    Message(Message),
    /// A message that was decrypted locally.
    SecureMessage {
        from: String,
        plaintext: String,
        verified: bool,
    },
    Joined(String),
    Left(String),
    /// A PING from the relay or a peer. It is answered automatically.
    Ping(String),
    /// A message that arrived but could not be shown.
    Error(String),
    Disconnected,
}

impl fmt::Display for ChatEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatEvent::Message(m) if m.is_broadcast() => write!(f, "{}: {}", m.from, m.body),
            ChatEvent::Message(m) => write!(f, "{} (private): {}", m.from, m.body),
            ChatEvent::SecureMessage {
                from,
                plaintext,
                verified: true,
            } => write!(f, "{} (secure): {}", from, plaintext),
            ChatEvent::SecureMessage {
                from, plaintext, ..
            } => write!(f, "{} (secure, UNVERIFIED): {}", from, plaintext),
            ChatEvent::Joined(who) => write!(f, "* {} has joined", who),
            ChatEvent::Left(who) => write!(f, "* {} has left", who),
            ChatEvent::Ping(from) => write!(f, "* ping from {}", from),
            ChatEvent::Error(reason) => write!(f, "! {}", reason),
            ChatEvent::Disconnected => write!(f, "* disconnected"),
        }
    }
}

enum Outbound {
    Line(String),
    Close,
}

/// State the reader task needs to open envelopes.
struct Inbox {
    identity: String,
    keypair: Keypair,
    key_store: Arc<dyn KeyStore>,
    codec: EnvelopeCodec,
    outbound: mpsc::UnboundedSender<Outbound>,
    events: mpsc::UnboundedSender<ChatEvent>,
}

impl Inbox {
    /// False once the consumer dropped its receiver.
    fn emit(&self, event: ChatEvent) -> bool {
        self.events.send(event).is_ok()
    }

    fn handle(&self, message: Message) -> bool {
        match message.kind {
            MessageType::Ping => {
                let pong = Message::new(&self.identity, &message.from, MessageType::Pong, "");
                match pong.encode() {
                    Ok(line) => {
                        let _ = self.outbound.send(Outbound::Line(line));
                    }
                    Err(e) => warn!("Failed to encode PONG: {}", e),
                }
                self.emit(ChatEvent::Ping(message.from))
            }
            MessageType::Join => self.emit(ChatEvent::Joined(message.from)),
            MessageType::Leave => self.emit(ChatEvent::Left(message.from)),
            MessageType::Text | MessageType::Pong => self.emit(ChatEvent::Message(message)),
            MessageType::SecureText => {
                let event = match self.open(&message.body) {
                    Ok(event) => event,
                    Err(e) => ChatEvent::Error(format!(
                        "Could not decrypt message from {}: {}",
                        message.from, e
                    )),
                };
                self.emit(event)
            }
        }
    }

    fn open(&self, body: &str) -> ChatResult<ChatEvent> {
        let envelope = Envelope::from_json(body)?;
        let sender_public = self.key_store.public_key(&envelope.sender_identity)?;
        let opened =
            self.codec
                .decrypt_and_verify(&envelope, &self.keypair.private, &sender_public)?;
        Ok(ChatEvent::SecureMessage {
            from: envelope.sender_identity,
            plaintext: String::from_utf8_lossy(&opened.plaintext).into_owned(),
            verified: opened.verified,
        })
    }
}

/// A connected chat client.
///
/// Dropping it without [`leave`](Self::leave) still closes the connection,
/// so the relay frees the identity.
pub struct ChatClient {
    identity: String,
    keypair: Keypair,
    key_store: Arc<dyn KeyStore>,
    codec: EnvelopeCodec,
    outbound: mpsc::UnboundedSender<Outbound>,
    writer: Option<JoinHandle<()>>,
    reader: JoinHandle<()>,
}

impl ChatClient {
    /// Connects to `addr` as `identity` with the default codec.
    ///
    /// The identity's keypair is loaded from `key_store`, or generated and
    /// stored if it has none yet.
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        identity: &str,
        key_store: Arc<dyn KeyStore>,
    ) -> ChatResult<(ChatClient, mpsc::UnboundedReceiver<ChatEvent>)> {
        Self::connect_with_codec(addr, identity, key_store, EnvelopeCodec::new()).await
    }

    /// Connects with an explicit codec, e.g. [`EnvelopeCodec::strict`].
    pub async fn connect_with_codec<A: ToSocketAddrs>(
        addr: A,
        identity: &str,
        key_store: Arc<dyn KeyStore>,
        codec: EnvelopeCodec,
    ) -> ChatResult<(ChatClient, mpsc::UnboundedReceiver<ChatEvent>)> {
        validate_identity(identity)?;
        let keypair = match key_store.load_keypair(identity) {
            Ok(keypair) => keypair,
            Err(ChatError::KeyNotFound(_)) => key_store.generate_and_persist_keypair(identity)?,
            Err(e) => return Err(e),
        };

        let stream = TcpStream::connect(addr).await?;
        let _ = stream.set_nodelay(true);
        let (mut write, mut read) = Framed::new(stream, ChatCodec::new(MAX_LINE_LENGTH)).split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
        let (events, events_rx) = mpsc::unbounded_channel();

        let writer = tokio::spawn(async move {
            while let Some(item) = outbound_rx.recv().await {
                match item {
                    Outbound::Line(line) => {
                        if let Err(e) = write.send(line).await {
                            debug!("Write failed: {}", e);
                            break;
                        }
                    }
                    Outbound::Close => {
                        let _ = write.close().await;
                        break;
                    }
                }
            }
        });

        let inbox = Inbox {
            identity: identity.to_string(),
            keypair: keypair.clone(),
            key_store: key_store.clone(),
            codec,
            outbound: outbound.clone(),
            events,
        };
        let reader = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Frame::Line(line)) => match Message::decode(&line) {
                        Ok(message) => {
                            if !inbox.handle(message) {
                                debug!("Event receiver dropped, stopping reader");
                                return;
                            }
                        }
                        Err(e) => debug!("Ignoring undecodable frame: {}", e),
                    },
                    Ok(Frame::Discarded(reason)) => debug!("Ignoring frame: {}", reason),
                    Err(e) => {
                        debug!("Read failed: {}", e);
                        break;
                    }
                }
            }
            inbox.emit(ChatEvent::Disconnected);
        });

        let client = ChatClient {
            identity: identity.to_string(),
            keypair,
            key_store,
            codec,
            outbound,
            writer: Some(writer),
            reader,
        };
        client.send(&Message::join(identity))?;
        Ok((client, events_rx))
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    fn send(&self, message: &Message) -> ChatResult<()> {
        let line = message.encode()?;
        self.outbound.send(Outbound::Line(line)).map_err(|_| {
            ChatError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "connection closed",
            ))
        })
    }

    /// Sends a plaintext message to one identity or to `ALL`.
    pub fn send_text(&self, to: &str, body: &str) -> ChatResult<()> {
        self.send(&Message::new(&self.identity, to, MessageType::Text, body))
    }

    /// Encrypts `plaintext` for `to` and sends it.
    pub fn send_secure(&self, to: &str, plaintext: &str) -> ChatResult<()> {
        let recipient_public = self.key_store.public_key(to)?;
        let envelope = self.codec.encrypt_with_key(
            self.key_store.generate_content_key()?,
            plaintext.as_bytes(),
            &self.identity,
            &recipient_public,
            &self.keypair.private,
        )?;
        self.send(&Message::new(
            &self.identity,
            to,
            MessageType::SecureText,
            envelope.to_json()?,
        ))
    }

    /// Encrypts once and sends one envelope per recipient.
    ///
    /// Recipients without a public key are logged and skipped. Returns the
    /// number of envelopes sent.
    pub fn send_secure_group<I, S>(&self, recipients: I, plaintext: &str) -> ChatResult<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let seal = self.codec.encrypt_for_group(
            plaintext.as_bytes(),
            &self.identity,
            recipients,
            &self.keypair.private,
            &*self.key_store,
        )?;

        let mut sent = 0;
        for (recipient, envelope) in &seal.envelopes {
            self.send(&Message::new(
                &self.identity,
                recipient,
                MessageType::SecureText,
                envelope.to_json()?,
            ))?;
            sent += 1;
        }
        Ok(sent)
    }

    /// Group send to every identity the key store knows, except ourselves.
    pub fn send_secure_to_known(&self, plaintext: &str) -> ChatResult<usize> {
        let recipients: Vec<String> = self
            .key_store
            .identities()
            .into_iter()
            .filter(|id| id != &self.identity)
            .collect();
        self.send_secure_group(recipients, plaintext)
    }

    /// Sends a PING to the relay, which answers with a PONG event.
    pub fn ping(&self) -> ChatResult<()> {
        self.send(&Message::new(
            &self.identity,
            SERVER_IDENTITY,
            MessageType::Ping,
            "",
        ))
    }

    /// Sends LEAVE, flushes everything queued, and closes the connection.
    pub async fn leave(mut self) -> ChatResult<()> {
        self.send(&Message::leave(&self.identity))?;
        let _ = self.outbound.send(Outbound::Close);
        if let Some(writer) = self.writer.take() {
            let _ = writer.await;
        }
        Ok(())
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        let _ = self.outbound.send(Outbound::Close);
        // After leave() the relay closes the socket and the reader sees EOF
        if self.writer.is_some() {
            self.reader.abort();
        }
    }
}
