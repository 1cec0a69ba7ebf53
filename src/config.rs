//! Chat Relay Configuration
//!
//! Configuration loaded from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

/// Chat relay configuration.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Address the chat protocol listens on.
    pub listen_addr: SocketAddr,
    /// Maximum connections served concurrently; further accepts wait.
    pub pool_size: usize,
    /// Seconds between heartbeat PINGs.
    pub heartbeat_interval_secs: u64,
    /// Maximum frame length in bytes, excluding the newline.
    pub max_line_length: usize,
    /// Outbound frames buffered per session before deliveries fail.
    pub outbound_queue: usize,
    /// Idle timeout in seconds (0 disables it).
    pub idle_timeout_secs: u64,
    /// Address of the admin HTTP endpoint.
    pub metrics_addr: SocketAddr,
    /// Bearer token required by `/metrics`, if set.
    pub metrics_token: Option<String>,
}

fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(8)
}

impl Default for ChatConfig {
    fn default() -> Self {
        ChatConfig {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 1234)),
            pool_size: default_pool_size(),
            heartbeat_interval_secs: 30,
            max_line_length: 1_048_576, // 1 MiB
            outbound_queue: 256,
            idle_timeout_secs: 0,
            metrics_addr: SocketAddr::from(([127, 0, 0, 1], 8081)),
            metrics_token: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, target: &mut T) {
    if let Ok(val) = std::env::var(name) {
        if let Ok(parsed) = val.trim().parse() {
            *target = parsed;
        }
    }
}

impl ChatConfig {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        env_parse("CHAT_LISTEN_ADDR", &mut config.listen_addr);
        env_parse("CHAT_POOL_SIZE", &mut config.pool_size);
        env_parse("CHAT_HEARTBEAT_INTERVAL", &mut config.heartbeat_interval_secs);
        env_parse("CHAT_MAX_LINE_LENGTH", &mut config.max_line_length);
        env_parse("CHAT_OUTBOUND_QUEUE", &mut config.outbound_queue);
        env_parse("CHAT_IDLE_TIMEOUT", &mut config.idle_timeout_secs);
        env_parse("CHAT_METRICS_ADDR", &mut config.metrics_addr);

        if let Ok(token) = std::env::var("CHAT_METRICS_TOKEN") {
            if !token.is_empty() {
                config.metrics_token = Some(token);
            }
        }

        // Zero would stall the accept loop or the timer forever
        if config.pool_size == 0 {
            config.pool_size = 1;
        }
        if config.heartbeat_interval_secs == 0 {
            config.heartbeat_interval_secs = 1;
        }
        if config.outbound_queue == 0 {
            config.outbound_queue = 1;
        }

        config
    }

    /// Returns the heartbeat interval as a Duration.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Returns the idle timeout, or None when disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ChatConfig::default();

        assert_eq!(config.listen_addr.port(), 1234);
        assert!(config.pool_size >= 2);
        assert_eq!(config.heartbeat_interval_secs, 30);
        assert_eq!(config.max_line_length, 1_048_576);
        assert_eq!(config.outbound_queue, 256);
        assert_eq!(config.metrics_addr.port(), 8081);
        assert!(config.metrics_token.is_none());
    }

    #[test]
    fn test_heartbeat_interval_duration() {
        let config = ChatConfig::default();
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_idle_timeout_zero_disables() {
        let mut config = ChatConfig::default();
        assert_eq!(config.idle_timeout(), None);
        config.idle_timeout_secs = 90;
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_env_parse_keeps_default_on_garbage() {
        let mut port: u16 = 1234;
        std::env::set_var("CHAT_TEST_GARBAGE_PORT", "not-a-number");
        env_parse("CHAT_TEST_GARBAGE_PORT", &mut port);
        assert_eq!(port, 1234);

        std::env::set_var("CHAT_TEST_GOOD_PORT", " 4321 ");
        env_parse("CHAT_TEST_GOOD_PORT", &mut port);
        assert_eq!(port, 4321);
    }
}
