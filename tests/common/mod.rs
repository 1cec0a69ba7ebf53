// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Common test utilities for relay integration tests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;
use tokio_util::codec::{Framed, LinesCodec};

use chat_relay::config::ChatConfig;
use chat_relay::key_store::{Keypair, MemoryKeyStore};
use chat_relay::metrics::ChatMetrics;
use chat_relay::registry::SessionRegistry;
use chat_relay::{ChatEvent, ChatServer, Message};

/// How long a test waits for any single frame or event.
#[allow(dead_code)]
pub const WAIT: Duration = Duration::from_secs(5);

/// A raw line-framed connection, for driving the wire protocol directly.
#[allow(dead_code)]
pub type RawClient = Framed<TcpStream, LinesCodec>;

/// Handles into a relay running in the background.
#[allow(dead_code)]
pub struct TestRelay {
    pub addr: SocketAddr,
    pub registry: Arc<SessionRegistry>,
    pub metrics: ChatMetrics,
}

/// Config with a heartbeat slow enough to stay out of the way.
#[allow(dead_code)]
pub fn test_config() -> ChatConfig {
    ChatConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        pool_size: 16,
        heartbeat_interval_secs: 3600,
        max_line_length: 64 * 1024,
        outbound_queue: 64,
        idle_timeout_secs: 0,
        metrics_addr: "127.0.0.1:0".parse().unwrap(),
        metrics_token: None,
    }
}

/// Starts a relay on an ephemeral port.
#[allow(dead_code)]
pub async fn start_relay(config: ChatConfig) -> TestRelay {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().unwrap();

    let server = ChatServer::new(config);
    let registry = server.registry();
    let metrics = server.metrics();
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });

    TestRelay {
        addr,
        registry,
        metrics,
    }
}

#[allow(dead_code)]
pub async fn raw_connect(addr: SocketAddr) -> RawClient {
    let stream = TcpStream::connect(addr).await.unwrap();
    Framed::new(stream, LinesCodec::new())
}

#[allow(dead_code)]
pub async fn send_message(client: &mut RawClient, message: &Message) {
    client.send(message.encode().unwrap()).await.unwrap();
}

#[allow(dead_code)]
pub async fn send_json(client: &mut RawClient, value: serde_json::Value) {
    client.send(value.to_string()).await.unwrap();
}

/// Next frame from the relay, or None once it closed the connection.
#[allow(dead_code)]
pub async fn recv_message(client: &mut RawClient) -> Option<Message> {
    match timeout(WAIT, client.next()).await.expect("timed out waiting for frame") {
        Some(Ok(line)) => Some(Message::decode(&line).unwrap()),
        Some(Err(_)) | None => None,
    }
}

/// Connects, JOINs and consumes the JOIN notice.
#[allow(dead_code)]
pub async fn raw_join(addr: SocketAddr, identity: &str) -> RawClient {
    let mut client = raw_connect(addr).await;
    send_message(&mut client, &Message::join(identity)).await;
    let notice = recv_message(&mut client).await.expect("JOIN notice");
    assert_eq!(notice.body, format!("{} has joined", identity));
    client
}

/// Skips frames until one matches.
#[allow(dead_code)]
pub async fn recv_until<F>(client: &mut RawClient, mut matches: F) -> Message
where
    F: FnMut(&Message) -> bool,
{
    loop {
        let message = recv_message(client).await.expect("connection closed");
        if matches(&message) {
            return message;
        }
    }
}

/// Test keypairs, generated once per process. Small modulus for speed.
#[allow(dead_code)]
pub fn keypair(identity: &str) -> Keypair {
    static KEYS: OnceLock<Mutex<HashMap<String, Keypair>>> = OnceLock::new();
    let keys = KEYS.get_or_init(|| Mutex::new(HashMap::new()));
    keys.lock()
        .unwrap()
        .entry(identity.to_string())
        .or_insert_with(|| Keypair::generate(1024).unwrap())
        .clone()
}

/// A key store holding `owner`'s keypair and the public keys of `peers`.
#[allow(dead_code)]
pub fn key_store_for(owner: &str, peers: &[&str]) -> Arc<MemoryKeyStore> {
    let store = MemoryKeyStore::with_modulus_bits(1024);
    store.insert_keypair(owner, keypair(owner));
    for peer in peers {
        store.import_public_key(peer, keypair(peer).public);
    }
    Arc::new(store)
}

#[allow(dead_code)]
pub async fn next_event(events: &mut UnboundedReceiver<ChatEvent>) -> ChatEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Skips events until one matches.
#[allow(dead_code)]
pub async fn wait_for<F>(events: &mut UnboundedReceiver<ChatEvent>, mut matches: F) -> ChatEvent
where
    F: FnMut(&ChatEvent) -> bool,
{
    loop {
        let event = next_event(events).await;
        if matches(&event) {
            return event;
        }
    }
}
