// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Chat Relay Server
//!
//! A line-framed chat relay. Provides:
//! - TCP endpoint for JOIN / TEXT / SECURE_TEXT / PING traffic
//! - Periodic heartbeat PINGs to every session
//! - HTTP endpoints for health checks and Prometheus metrics

use tokio::net::TcpListener;
use tracing::{error, info};

use chat_relay::config::ChatConfig;
use chat_relay::http::{create_router, HttpState};
use chat_relay::server::ChatServer;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("chat_relay=info".parse().unwrap()),
        )
        .init();

    let config = ChatConfig::from_env();

    info!("Starting Chat Relay v{}", env!("CARGO_PKG_VERSION"));
    info!("Chat: {}", config.listen_addr);
    info!("Metrics endpoint: {}", config.metrics_addr);
    info!("Worker pool: {}", config.pool_size);
    info!("Heartbeat interval: {}s", config.heartbeat_interval_secs);
    match config.idle_timeout() {
        Some(timeout) => info!("Idle timeout: {}s", timeout.as_secs()),
        None => info!("Idle timeout: disabled"),
    }
    if config.metrics_token.is_none() && !config.metrics_addr.ip().is_loopback() {
        info!("WARNING: Metrics exposed on non-localhost without auth token");
        info!("Consider setting CHAT_METRICS_TOKEN for production use");
    }

    let server = ChatServer::new(config.clone());

    // Start HTTP server for health/metrics
    let http_state = HttpState {
        metrics: server.metrics(),
        metrics_token: config.metrics_token.clone(),
        registry: server.registry(),
    };
    let http_router = create_router(http_state);

    let http_listener = TcpListener::bind(&config.metrics_addr)
        .await
        .expect("Failed to bind HTTP listener");

    let http_addr = config.metrics_addr;
    tokio::spawn(async move {
        info!("HTTP server listening on {}", http_addr);
        if let Err(e) = axum::serve(http_listener, http_router).await {
            error!("HTTP server failed: {}", e);
        }
    });

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .expect("Failed to bind chat listener");

    tokio::select! {
        result = server.serve(listener) => {
            if let Err(e) = result {
                error!("Chat server stopped: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }
}
