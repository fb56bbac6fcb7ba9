/*
[INPUT]:  Realtime endpoint URL, timeouts, heartbeat and reconnect tuning
[OUTPUT]: Validated RealtimeConfig and ReconnectPolicy
[POS]:    Configuration layer - connection manager settings
[UPDATE]: When adding connection options or changing backoff defaults
*/

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{RealtimeError, Result};

const DEFAULT_URL: &str = "ws://localhost:3001";
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
const DEFAULT_BASE_DELAY_MS: u64 = 3_000;
const DEFAULT_GROWTH: f64 = 1.5;
const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Connection manager configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// WebSocket endpoint (`ws://` or `wss://`)
    pub url: String,
    /// How long a single attempt may take before the transport must be open
    pub connect_timeout_ms: u64,
    /// Interval between application-level PING frames while open
    pub heartbeat_interval_ms: u64,
    /// Reconnection backoff
    pub reconnect: ReconnectPolicy,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl RealtimeConfig {
    /// Default configuration pointed at `url`
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Reject settings the connection manager cannot run with.
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(RealtimeError::Config(format!(
                "url scheme must be ws or wss, got {}",
                url.scheme()
            )));
        }
        if self.connect_timeout_ms == 0 {
            return Err(RealtimeError::Config(
                "connect_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(RealtimeError::Config(
                "heartbeat_interval_ms must be greater than zero".to_string(),
            ));
        }
        self.reconnect.validate()
    }
}

/// Exponential backoff with a cap and a fixed attempt ceiling.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub base_delay_ms: u64,
    pub growth: f64,
    pub max_delay_ms: u64,
    /// Consecutive failed attempts after which the manager stops retrying
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            growth: DEFAULT_GROWTH,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based):
    /// `min(max_delay, base_delay * growth^(attempt - 1))`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let cap = Duration::from_millis(self.max_delay_ms);
        let scaled = self.base_delay_ms as f64 * self.growth.powi(exp);
        if !scaled.is_finite() || scaled >= self.max_delay_ms as f64 {
            return cap;
        }
        Duration::from_secs_f64(scaled / 1000.0).min(cap)
    }

    /// Whether `attempt` failed attempts exhaust the budget
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }

    fn validate(&self) -> Result<()> {
        if self.base_delay_ms == 0 || self.max_delay_ms == 0 {
            return Err(RealtimeError::Config(
                "reconnect delays must be greater than zero".to_string(),
            ));
        }
        if !(self.growth.is_finite() && self.growth >= 1.0) {
            return Err(RealtimeError::Config(
                "reconnect growth must be a finite value >= 1.0".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(RealtimeError::Config(
                "reconnect max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
