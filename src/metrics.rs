//! Prometheus Metrics for the Chat Relay
//!
//! Provides observability metrics for monitoring the relay server.

use prometheus::{IntCounter, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Chat relay metrics.
#[derive(Clone)]
pub struct ChatMetrics {
    /// Registry for all metrics.
    pub registry: Arc<Registry>,

    // Connection metrics
    /// Total TCP connections accepted.
    pub connections_total: IntCounter,
    /// Current active connections.
    pub connections_active: IntGauge,
    /// Connections that ended with an I/O error.
    pub connection_errors: IntCounter,
    /// Connections closed for breaking the JOIN handshake.
    pub protocol_violations: IntCounter,

    // Frame metrics
    /// Total frames read from clients.
    pub frames_received: IntCounter,
    /// Frames dropped because they did not decode.
    pub malformed_frames: IntCounter,
    /// Messages handed to at least one session.
    pub messages_routed: IntCounter,
    /// Messages with no reachable addressee.
    pub routing_failures: IntCounter,

    // Heartbeat metrics
    /// Heartbeat PINGs queued to sessions.
    pub pings_sent: IntCounter,
    /// PONG replies received from clients.
    pub pongs_received: IntCounter,

    /// Current number of registered sessions.
    pub sessions_registered: IntGauge,
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let metric = IntCounter::with_opts(Opts::new(name, help)).unwrap();
    registry.register(Box::new(metric.clone())).unwrap();
    metric
}

fn gauge(registry: &Registry, name: &str, help: &str) -> IntGauge {
    let metric = IntGauge::with_opts(Opts::new(name, help)).unwrap();
    registry.register(Box::new(metric.clone())).unwrap();
    metric
}

impl ChatMetrics {
    /// Creates a new metrics instance with all counters registered.
    pub fn new() -> Self {
        let registry = Registry::new();

        ChatMetrics {
            connections_total: counter(
                &registry,
                "chat_connections_total",
                "Total TCP connections accepted",
            ),
            connections_active: gauge(
                &registry,
                "chat_connections_active",
                "Current active connections",
            ),
            connection_errors: counter(
                &registry,
                "chat_connection_errors_total",
                "Total connection I/O errors",
            ),
            protocol_violations: counter(
                &registry,
                "chat_protocol_violations_total",
                "Connections closed for protocol violations",
            ),
            frames_received: counter(
                &registry,
                "chat_frames_received_total",
                "Total frames received",
            ),
            malformed_frames: counter(
                &registry,
                "chat_malformed_frames_total",
                "Frames dropped as malformed",
            ),
            messages_routed: counter(
                &registry,
                "chat_messages_routed_total",
                "Total messages routed",
            ),
            routing_failures: counter(
                &registry,
                "chat_routing_failures_total",
                "Messages that could not be routed",
            ),
            pings_sent: counter(
                &registry,
                "chat_heartbeat_pings_total",
                "Heartbeat PINGs sent",
            ),
            pongs_received: counter(
                &registry,
                "chat_heartbeat_pongs_total",
                "PONG replies received",
            ),
            sessions_registered: gauge(
                &registry,
                "chat_sessions_registered",
                "Current number of registered sessions",
            ),
            registry: Arc::new(registry),
        }
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }
}

impl Default for ChatMetrics {
    fn default() -> Self {
        Self::new()
    }
}
