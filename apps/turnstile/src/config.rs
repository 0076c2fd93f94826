use std::env;
use std::time::Duration;

/// Turnstile client configuration, loaded from `TURNSTILE_*` environment
/// variables with working defaults for local development.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the queue service (registration, status, stream, cleanup).
    pub queue_url: String,
    /// Cadence of the status poll fallback.
    pub poll_interval: Duration,
    /// How long the live stream may stay silent (heartbeats included) before
    /// it is treated as stalled.
    pub heartbeat_grace: Duration,
    /// Pause before the single stream reopen attempt.
    pub stream_retry_backoff: Duration,
    /// Cadence of the popup liveness poll.
    pub liveness_interval: Duration,
    /// How long a payment callback page waits for the opener's ack.
    pub ack_bound: Duration,
    /// How long a login callback page stays open after a successful send.
    pub oauth_close_delay: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let url = env::var("TURNSTILE_QUEUE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8080/queue".to_string());
        // Normalize localhost to IPv4 to avoid IPv6 (::1) preference
        let url = if url.contains("localhost") {
            url.replacen("localhost", "127.0.0.1", 1)
        } else {
            url
        };
        Self {
            queue_url: url,
            poll_interval: millis_env("TURNSTILE_POLL_INTERVAL_MS", 1_000),
            heartbeat_grace: millis_env("TURNSTILE_HEARTBEAT_GRACE_MS", 30_000),
            stream_retry_backoff: millis_env("TURNSTILE_STREAM_RETRY_BACKOFF_MS", 2_000),
            liveness_interval: millis_env("TURNSTILE_POPUP_LIVENESS_MS", 500),
            ack_bound: millis_env("TURNSTILE_PAYMENT_ACK_BOUND_MS", 3_000),
            oauth_close_delay: millis_env("TURNSTILE_OAUTH_CLOSE_DELAY_MS", 1_500),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_url: "http://127.0.0.1:8080/queue".to_string(),
            poll_interval: Duration::from_millis(1_000),
            heartbeat_grace: Duration::from_millis(30_000),
            stream_retry_backoff: Duration::from_millis(2_000),
            liveness_interval: Duration::from_millis(500),
            ack_bound: Duration::from_millis(3_000),
            oauth_close_delay: Duration::from_millis(1_500),
        }
    }
}

fn millis_env(var: &str, default_ms: u64) -> Duration {
    let ms = env::var(var)
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .unwrap_or(default_ms);
    Duration::from_millis(ms)
}
