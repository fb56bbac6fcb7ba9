/*
[INPUT]:  YAML configuration file
[OUTPUT]: Parsed stream monitor configuration
[POS]:    Configuration layer - stream setup
[UPDATE]: When adding new configuration options
*/

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use tradedash_realtime::RealtimeConfig;

/// Top-level configuration for the stream monitor
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StreamConfig {
    /// Connection manager settings
    #[serde(default)]
    pub realtime: RealtimeConfig,
    /// Raw topics to log as they arrive
    #[serde(default)]
    pub topics: Vec<String>,
    /// Chart candles to request
    #[serde(default)]
    pub chart: Option<ChartConfig>,
    #[serde(default)]
    pub positions: bool,
    #[serde(default)]
    pub signals: bool,
    #[serde(default)]
    pub smart_grid: bool,
    /// Trading pair to select on the backend (e.g., "BTC/USDT")
    #[serde(default)]
    pub trading_pair: Option<String>,
    /// Exchange to select on the backend (e.g., "binance")
    #[serde(default)]
    pub exchange: Option<String>,
}

/// Chart subscription
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChartConfig {
    pub symbol: String,
    #[serde(default = "default_interval")]
    pub interval: String,
}

fn default_interval() -> String {
    "1m".to_string()
}

impl StreamConfig {
    /// Load configuration from YAML file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        self.realtime.validate().context("realtime section")?;
        if let Some(chart) = &self.chart {
            if chart.symbol.trim().is_empty() || chart.interval.trim().is_empty() {
                bail!("chart symbol and interval must not be empty");
            }
        }
        if self.topics.iter().any(|topic| topic.trim().is_empty()) {
            bail!("topics must not contain empty names");
        }
        Ok(())
    }

    /// Whether the config asks for anything to be streamed
    pub fn has_subscriptions(&self) -> bool {
        !self.topics.is_empty()
            || self.chart.is_some()
            || self.positions
            || self.signals
            || self.smart_grid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let yaml = r#"
realtime:
  url: wss://dash.example.com/ws
  heartbeat_interval_ms: 15000
topics: [INITIAL_STATE]
chart:
  symbol: BTCUSDT
positions: true
trading_pair: BTC/USDT
exchange: binance
"#;
        let config = StreamConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.realtime.heartbeat_interval_ms, 15_000);
        assert_eq!(config.realtime.reconnect.max_attempts, 5);
        assert_eq!(config.chart.as_ref().unwrap().interval, "1m");
        assert!(config.positions);
        assert!(!config.signals);
        assert!(config.has_subscriptions());
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = StreamConfig::from_yaml("{}").unwrap();
        assert_eq!(config.realtime, RealtimeConfig::default());
        assert!(!config.has_subscriptions());
    }

    #[test]
    fn rejects_bad_url() {
        let err = StreamConfig::from_yaml("realtime:\n  url: ftp://nope\n").unwrap_err();
        assert!(format!("{err:#}").contains("realtime section"));
    }

    #[test]
    fn rejects_blank_chart_symbol() {
        assert!(StreamConfig::from_yaml("chart:\n  symbol: ' '\n").is_err());
    }
}
