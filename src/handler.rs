// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Connection Handler
//!
//! Drives one client connection through `AwaitingJoin → Active → Closed`.
//!
//! The stream is framed as newline-delimited JSON. The handler's task is
//! the only writer to the socket: frames routed to this session arrive on
//! its registry channel and are written from the same `select!` loop that
//! reads client frames.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{timeout_at, Instant};
use tokio_util::codec::{Framed, LinesCodecError};
use tracing::{debug, info, warn};

use crate::codec::{ChatCodec, Frame};
use crate::error::{ChatError, ChatResult};
use crate::message::{validate_identity, Message, MessageType};
use crate::metrics::ChatMetrics;
use crate::registry::{RegistryMessage, SessionHandle, SessionRegistry};
use crate::router::MessageRouter;

/// Shared dependencies for handling a connection.
pub struct ConnectionDeps {
    pub registry: Arc<SessionRegistry>,
    pub router: MessageRouter,
    pub metrics: ChatMetrics,
    /// Maximum frame length in bytes.
    pub max_line_length: usize,
    /// Capacity of this session's outbound queue.
    pub outbound_queue: usize,
    /// Close the connection after this long without an inbound frame.
    pub idle_timeout: Option<Duration>,
}

/// Lifecycle of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingJoin,
    Active,
    Closed,
}

/// Result of waiting for one inbound frame.
#[derive(Debug)]
enum ReadOutcome {
    Line(String),
    Discarded(&'static str),
    Eof,
    Failed(std::io::Error),
    TimedOut,
}

enum Event {
    Inbound(ReadOutcome),
    Outbound(Option<RegistryMessage>),
}

/// What the loop does after an Active-state frame.
#[derive(Debug, PartialEq)]
enum FrameAction {
    Continue,
    Reply(Message),
    Close,
}

async fn read_frame<R>(read: &mut R, deadline: Option<Instant>) -> ReadOutcome
where
    R: Stream<Item = Result<Frame, LinesCodecError>> + Unpin,
{
    let next = match deadline {
        Some(deadline) => match timeout_at(deadline, read.next()).await {
            Ok(next) => next,
            Err(_) => return ReadOutcome::TimedOut,
        },
        None => read.next().await,
    };
    match next {
        Some(Ok(Frame::Line(line))) => ReadOutcome::Line(line),
        Some(Ok(Frame::Discarded(reason))) => ReadOutcome::Discarded(reason),
        Some(Err(LinesCodecError::MaxLineLengthExceeded)) => ReadOutcome::Discarded("line too long"),
        Some(Err(LinesCodecError::Io(e))) => ReadOutcome::Failed(e),
        None => ReadOutcome::Eof,
    }
}

fn next_deadline(idle_timeout: Option<Duration>) -> Option<Instant> {
    idle_timeout.map(|d| Instant::now() + d)
}

/// Checks that the first frame is a JOIN carrying a usable identity.
fn accept_join(line: &str) -> ChatResult<String> {
    let message = Message::decode(line)
        .map_err(|e| ChatError::ProtocolViolation(format!("undecodable first frame: {}", e)))?;
    if message.kind != MessageType::Join {
        return Err(ChatError::ProtocolViolation(format!(
            "expected JOIN, got {:?}",
            message.kind
        )));
    }
    validate_identity(&message.from)?;
    Ok(message.from)
}

/// Decides what to do with one frame from an Active session.
fn process_frame(
    line: &str,
    identity: &str,
    router: &MessageRouter,
    metrics: &ChatMetrics,
    session: &str,
) -> FrameAction {
    let message = match Message::decode(line) {
        Ok(message) => message,
        Err(e) => {
            metrics.malformed_frames.inc();
            warn!("[{}] Dropping malformed frame: {}", session, e);
            return FrameAction::Continue;
        }
    };

    match message.kind {
        MessageType::Ping if message.is_for_server() => {
            FrameAction::Reply(Message::server_pong(identity))
        }
        MessageType::Pong if message.is_for_server() => {
            metrics.pongs_received.inc();
            debug!("[{}] Heartbeat PONG", session);
            FrameAction::Continue
        }
        MessageType::Leave => FrameAction::Close,
        MessageType::Join => {
            debug!("[{}] Ignoring repeated JOIN", session);
            FrameAction::Continue
        }
        _ => {
            match router.route(&message) {
                Ok(_) => metrics.messages_routed.inc(),
                Err(e) => {
                    metrics.routing_failures.inc();
                    debug!("[{}] {}", session, e);
                }
            }
            FrameAction::Continue
        }
    }
}

fn announce(router: &MessageRouter, metrics: &ChatMetrics, notice: &Message, session: &str) {
    match router.route(notice) {
        Ok(_) => metrics.messages_routed.inc(),
        Err(e) => {
            metrics.routing_failures.inc();
            warn!("[{}] Failed to announce {:?}: {}", session, notice.kind, e);
        }
    }
}

/// Handles a connection until it closes.
pub async fn handle_connection<S>(stream: S, deps: ConnectionDeps)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ConnectionDeps {
        registry,
        router,
        metrics,
        max_line_length,
        outbound_queue,
        idle_timeout,
    } = deps;
    // Random label so log lines of one connection can be correlated
    let session = &uuid::Uuid::new_v4().to_string()[..8];

    let framed = Framed::new(stream, ChatCodec::new(max_line_length));
    let (mut write, mut read) = framed.split();

    // Exactly one frame decides the connection's fate
    let mut state = ConnectionState::AwaitingJoin;
    debug!("[{}] {:?}", session, state);
    let first = match read_frame(&mut read, next_deadline(idle_timeout)).await {
        ReadOutcome::Line(line) => line,
        ReadOutcome::Discarded(reason) => {
            metrics.protocol_violations.inc();
            warn!("[{}] Unusable first frame: {}", session, reason);
            return;
        }
        ReadOutcome::Eof => {
            debug!("[{}] Connection closed before JOIN", session);
            return;
        }
        ReadOutcome::Failed(e) => {
            metrics.connection_errors.inc();
            warn!("[{}] Error reading JOIN: {}", session, e);
            return;
        }
        ReadOutcome::TimedOut => {
            warn!("[{}] JOIN timeout", session);
            return;
        }
    };
    metrics.frames_received.inc();

    let identity = match accept_join(&first) {
        Ok(identity) => identity,
        Err(e) => {
            metrics.protocol_violations.inc();
            warn!("[{}] {}", session, e);
            return;
        }
    };

    let (handle, mut registry_rx) = SessionHandle::channel(outbound_queue);
    if let Err(e) = registry.register(&identity, handle.clone()) {
        metrics.protocol_violations.inc();
        warn!("[{}] {}", session, e);
        return;
    }
    metrics.sessions_registered.set(registry.len() as i64);
    info!("[{}] Session joined", session);

    state = ConnectionState::Active;
    announce(&router, &metrics, &Message::join_notice(&identity), session);

    let mut deadline = next_deadline(idle_timeout);
    while state == ConnectionState::Active {
        let event = tokio::select! {
            outcome = read_frame(&mut read, deadline) => Event::Inbound(outcome),
            frame = registry_rx.recv() => Event::Outbound(frame),
        };

        state = match event {
            Event::Outbound(Some(frame)) => match write.send(frame.line).await {
                Ok(()) => ConnectionState::Active,
                Err(e) => {
                    metrics.connection_errors.inc();
                    debug!("[{}] Write failed: {}", session, e);
                    ConnectionState::Closed
                }
            },
            Event::Outbound(None) => ConnectionState::Closed,
            Event::Inbound(ReadOutcome::Line(line)) => {
                metrics.frames_received.inc();
                deadline = next_deadline(idle_timeout);
                match process_frame(&line, &identity, &router, &metrics, session) {
                    FrameAction::Continue => ConnectionState::Active,
                    FrameAction::Close => {
                        debug!("[{}] LEAVE", session);
                        ConnectionState::Closed
                    }
                    FrameAction::Reply(reply) => {
                        let sent = match reply.encode() {
                            Ok(line) => write.send(line).await.map_err(|e| e.to_string()),
                            Err(e) => Err(e.to_string()),
                        };
                        match sent {
                            Ok(()) => ConnectionState::Active,
                            Err(e) => {
                                metrics.connection_errors.inc();
                                debug!("[{}] Reply failed: {}", session, e);
                                ConnectionState::Closed
                            }
                        }
                    }
                }
            }
            Event::Inbound(ReadOutcome::Discarded(reason)) => {
                metrics.malformed_frames.inc();
                warn!("[{}] Dropping frame: {}", session, reason);
                ConnectionState::Active
            }
            Event::Inbound(ReadOutcome::Eof) => {
                debug!("[{}] Disconnected", session);
                ConnectionState::Closed
            }
            Event::Inbound(ReadOutcome::Failed(e)) => {
                metrics.connection_errors.inc();
                debug!("[{}] Read failed: {}", session, e);
                ConnectionState::Closed
            }
            Event::Inbound(ReadOutcome::TimedOut) => {
                warn!("[{}] Idle timeout", session);
                ConnectionState::Closed
            }
        };
    }

    // Closed
    if registry.unregister_handle(&identity, &handle) {
        announce(&router, &metrics, &Message::leave_notice(&identity), session);
    }
    metrics.sessions_registered.set(registry.len() as i64);
    info!("[{}] Session closed", session);
}
