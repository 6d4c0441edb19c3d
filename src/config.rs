//! Runtime configuration, sourced from the environment.
//!
//! Every knob has a default good enough for local development against a
//! directory on `localhost`; production deployments override through
//! environment variables (`A2A_SERVER_URL`, `A2A_WEBSOCKET_URL`, timers,
//! retry counts, and retention ceilings).

use std::env;
use std::time::Duration;

/// Configuration for an agent runtime instance.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Directory HTTP base URL.
    pub server_url: String,
    /// Directory WebSocket base URL.
    pub websocket_url: String,
    /// Heartbeat period. Must stay below the directory's heartbeat window.
    pub ping_interval: Duration,
    /// Total registration attempts before giving up.
    pub max_register_attempts: u32,
    /// Total dial attempts for an explicitly requested connection.
    pub max_connect_attempts: u32,
    /// Reconnection attempts after an unclean close.
    pub max_reconnect_attempts: u32,
    /// Base delay for registration backoff, in seconds.
    pub register_backoff_secs: f64,
    /// Base delay for reconnection backoff, in seconds.
    pub reconnect_backoff_secs: f64,
    /// Ceiling applied to reconnection backoff before jitter.
    pub max_backoff_secs: f64,
    /// Per-call timeout for registration HTTP requests.
    pub http_timeout: Duration,
    /// Per-call timeout for cross-agent task requests.
    pub request_timeout: Duration,
    /// Default wall-clock limit for a task executed through `run()`.
    pub task_timeout: Duration,
    /// Maximum frames buffered while disconnected.
    pub max_outbox_size: usize,
    /// Per-skill ledger ceiling; oldest terminal records are evicted past it.
    pub tracker_retention: usize,
    /// Age after which a terminal ledger record may be evicted early.
    pub tracker_ttl: Duration,
    /// Confidence stamped on successful results that do not supply one.
    pub default_confidence: f64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8001".to_string(),
            websocket_url: "ws://localhost:8001".to_string(),
            ping_interval: Duration::from_secs(25),
            max_register_attempts: 3,
            max_connect_attempts: 5,
            max_reconnect_attempts: 10,
            register_backoff_secs: 2.0,
            reconnect_backoff_secs: 1.0,
            max_backoff_secs: 60.0,
            http_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            task_timeout: Duration::from_secs(30),
            max_outbox_size: 256,
            tracker_retention: 100,
            tracker_ttl: Duration::from_secs(3600),
            default_confidence: 0.8,
        }
    }
}

impl RuntimeConfig {
    /// Build a configuration from the environment, falling back to defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_url: env_string("A2A_SERVER_URL", defaults.server_url),
            websocket_url: env_string("A2A_WEBSOCKET_URL", defaults.websocket_url),
            ping_interval: env_secs("A2A_PING_INTERVAL_SECS", defaults.ping_interval),
            max_register_attempts: env_parse(
                "A2A_MAX_REGISTER_ATTEMPTS",
                defaults.max_register_attempts,
            ),
            max_connect_attempts: env_parse(
                "A2A_MAX_CONNECT_ATTEMPTS",
                defaults.max_connect_attempts,
            ),
            max_reconnect_attempts: env_parse(
                "A2A_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            register_backoff_secs: env_parse(
                "A2A_BASE_BACKOFF_SECS",
                defaults.register_backoff_secs,
            ),
            reconnect_backoff_secs: env_parse(
                "A2A_RECONNECT_BACKOFF_SECS",
                defaults.reconnect_backoff_secs,
            ),
            max_backoff_secs: env_parse("A2A_MAX_BACKOFF_SECS", defaults.max_backoff_secs),
            http_timeout: env_secs("A2A_HTTP_TIMEOUT_SECS", defaults.http_timeout),
            request_timeout: env_secs("A2A_REQUEST_TIMEOUT_SECS", defaults.request_timeout),
            task_timeout: env_secs("A2A_TASK_TIMEOUT_SECS", defaults.task_timeout),
            max_outbox_size: env_parse("A2A_MAX_OUTBOX_SIZE", defaults.max_outbox_size),
            tracker_retention: env_parse("A2A_TRACKER_RETENTION", defaults.tracker_retention),
            tracker_ttl: env_secs("A2A_TRACKER_TTL_SECS", defaults.tracker_ttl),
            default_confidence: env_parse("A2A_DEFAULT_CONFIDENCE", defaults.default_confidence),
        }
    }
}

fn env_string(key: &str, default: String) -> String {
    env::var(key).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse::<f64>().ok())
        .map(Duration::from_secs_f64)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.ping_interval, Duration::from_secs(25));
        assert_eq!(config.max_register_attempts, 3);
        assert_eq!(config.max_connect_attempts, 5);
        assert_eq!(config.max_reconnect_attempts, 10);
        assert_eq!(config.max_outbox_size, 256);
        assert_eq!(config.tracker_retention, 100);
        assert!(config.server_url.starts_with("http://"));
        assert!(config.websocket_url.starts_with("ws://"));
    }

    #[test]
    fn test_env_overrides() {
        env::set_var("A2A_PING_INTERVAL_SECS", "7.5");
        env::set_var("A2A_MAX_OUTBOX_SIZE", "32");
        let config = RuntimeConfig::from_env();
        assert_eq!(config.ping_interval, Duration::from_secs_f64(7.5));
        assert_eq!(config.max_outbox_size, 32);
        env::remove_var("A2A_PING_INTERVAL_SECS");
        env::remove_var("A2A_MAX_OUTBOX_SIZE");
    }

    #[test]
    fn test_unparsable_env_falls_back() {
        env::set_var("A2A_MAX_RECONNECT_ATTEMPTS", "not-a-number");
        let config = RuntimeConfig::from_env();
        assert_eq!(config.max_reconnect_attempts, 10);
        env::remove_var("A2A_MAX_RECONNECT_ATTEMPTS");
    }
}
