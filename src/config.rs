//! Engine configuration.
//!
//! Reference values match the deployed defaults: 2 s queue polling, 30 s
//! heartbeats, reconnect backoff from 3 s doubling to a 30 s cap. All values
//! can be overridden from `GAMELINK_*` environment variables; the config is
//! then passed into constructors explicitly — nothing in the engine reads
//! the environment after startup.

use std::time::Duration;

/// Configuration for the queue client and session transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Base URL of the queue RPC endpoint, e.g. `http://127.0.0.1:8080`.
    pub base_url: String,
    /// Base URL of the session WebSocket endpoint, e.g. `ws://127.0.0.1:8080`.
    pub ws_url: String,
    /// Fixed interval between queue status polls.
    pub poll_interval: Duration,
    /// Interval between `ping` envelopes on an open session.
    pub heartbeat_interval: Duration,
    /// First reconnect delay after an unrequested close.
    pub reconnect_initial: Duration,
    /// Cap for the doubling reconnect delay.
    pub reconnect_max: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_owned(),
            ws_url: "ws://127.0.0.1:8080".to_owned(),
            poll_interval: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(30),
            reconnect_initial: Duration::from_secs(3),
            reconnect_max: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    /// Build a config from the process environment, falling back to defaults
    /// for anything unset or unparseable.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        if let Some(url) = lookup("GAMELINK_BASE_URL") {
            cfg.base_url = url;
        }
        if let Some(url) = lookup("GAMELINK_WS_URL") {
            cfg.ws_url = url;
        }
        if let Some(ms) = duration_ms(lookup("GAMELINK_POLL_INTERVAL_MS")) {
            cfg.poll_interval = ms;
        }
        if let Some(ms) = duration_ms(lookup("GAMELINK_HEARTBEAT_INTERVAL_MS")) {
            cfg.heartbeat_interval = ms;
        }
        if let Some(ms) = duration_ms(lookup("GAMELINK_RECONNECT_INITIAL_MS")) {
            cfg.reconnect_initial = ms;
        }
        if let Some(ms) = duration_ms(lookup("GAMELINK_RECONNECT_MAX_MS")) {
            cfg.reconnect_max = ms;
        }
        cfg
    }
}

fn duration_ms(value: Option<String>) -> Option<Duration> {
    value?.parse().ok().map(Duration::from_millis)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
