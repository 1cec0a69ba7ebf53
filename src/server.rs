// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Chat Server
//!
//! Accept loop: one task per connection, bounded by the worker pool, plus
//! the heartbeat task.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::ChatConfig;
use crate::error::ChatResult;
use crate::handler::{self, ConnectionDeps};
use crate::heartbeat::spawn_heartbeat;
use crate::metrics::ChatMetrics;
use crate::registry::SessionRegistry;
use crate::router::MessageRouter;
use crate::worker_pool::WorkerPool;

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Records an accept error and waits out [`ACCEPT_BACKOFF`].
async fn accept_failed(metrics: &ChatMetrics, error: &std::io::Error) {
    warn!("Accept failed: {}", error);
    metrics.connection_errors.inc();
    tokio::time::sleep(ACCEPT_BACKOFF).await;
}

/// The relay: registry, router and pool wired together.
pub struct ChatServer {
    config: ChatConfig,
    registry: Arc<SessionRegistry>,
    router: MessageRouter,
    metrics: ChatMetrics,
    pool: WorkerPool,
}

impl ChatServer {
    pub fn new(config: ChatConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        ChatServer {
            router: MessageRouter::new(registry.clone()),
            pool: WorkerPool::new(config.pool_size),
            metrics: ChatMetrics::new(),
            registry,
            config,
        }
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    pub fn metrics(&self) -> ChatMetrics {
        self.metrics.clone()
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Serves connections from `listener` until the pool is closed.
    pub async fn serve(&self, listener: TcpListener) -> ChatResult<()> {
        let heartbeat = spawn_heartbeat(
            self.registry.clone(),
            self.config.heartbeat_interval(),
            self.metrics.clone(),
        );
        info!(
            "Chat relay listening on {} (pool size {})",
            listener.local_addr()?,
            self.pool.size()
        );

        // Wait for a free slot before accepting, so excess clients queue
        // in the listen backlog
        while let Some(slot) = self.pool.acquire().await {
            let stream = match listener.accept().await {
                Ok((stream, _addr)) => stream,
                Err(e) => {
                    drop(slot);
                    accept_failed(&self.metrics, &e).await;
                    continue;
                }
            };
            let _ = stream.set_nodelay(true);

            let deps = ConnectionDeps {
                registry: self.registry.clone(),
                router: self.router.clone(),
                metrics: self.metrics.clone(),
                max_line_length: self.config.max_line_length,
                outbound_queue: self.config.outbound_queue,
                idle_timeout: self.config.idle_timeout(),
            };
            let metrics = self.metrics.clone();

            tokio::spawn(async move {
                metrics.connections_total.inc();
                metrics.connections_active.inc();
                handler::handle_connection(stream, deps).await;
                metrics.connections_active.dec();
                // slot dropped here, freeing the worker
                drop(slot);
            });
        }

        heartbeat.abort();
        Ok(())
    }
}
