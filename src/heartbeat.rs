// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Heartbeat Scheduler
//!
//! Periodically queues a `PING` from `SERVER` to every registered session.
//! Liveness is observational only: PONGs are counted by the connection
//! handler, and a silent session is never evicted for being silent. Only a
//! session whose connection task is already gone is dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::message::Message;
use crate::metrics::ChatMetrics;
use crate::registry::{DeliveryError, RegistryMessage, SessionRegistry};

/// Runs one heartbeat round and returns the number of PINGs queued.
pub fn sweep(registry: &SessionRegistry, metrics: &ChatMetrics) -> usize {
    let mut sent = 0;

    for (identity, handle) in registry.snapshot() {
        let line = match Message::heartbeat_ping(&identity).encode() {
            Ok(line) => line,
            Err(e) => {
                debug!("Failed to encode heartbeat: {}", e);
                continue;
            }
        };
        match handle.deliver(RegistryMessage { line }) {
            Ok(()) => sent += 1,
            Err(DeliveryError::Full) => trace!("Outbound queue full, skipping heartbeat"),
            Err(DeliveryError::Closed) => registry.evict(&identity, &handle),
        }
    }

    metrics.pings_sent.inc_by(sent as u64);
    metrics.sessions_registered.set(registry.len() as i64);
    sent
}

/// Spawns the heartbeat task. The first round runs one `interval` after
/// the call.
pub fn spawn_heartbeat(
    registry: Arc<SessionRegistry>,
    interval: Duration,
    metrics: ChatMetrics,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let sent = sweep(&registry, &metrics);
            if sent > 0 {
                debug!("Heartbeat: {} pings queued", sent);
            }
        }
    })
}
