/*
[INPUT]:  YAML configuration file
[OUTPUT]: Parsed collector configuration and the derived subscription set
[POS]:    Configuration layer - desired-set seeding
[UPDATE]: When adding new configuration options
*/

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use bitget_stream_adapter::{SubscribeKey, PUBLIC_WS_URL};

/// Top-level configuration for the stream collector
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CollectorConfig {
    /// WebSocket endpoint to stream from
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// Strategies whose universes drive the initial subscription set
    pub strategies: BTreeMap<String, StrategyConfig>,
}

/// One strategy's streaming universe
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyConfig {
    /// Instrument type, e.g. "USDT-FUTURES"
    pub product_type: String,
    /// Candle intervals to stream, e.g. ["1m", "5m"]
    pub intervals: Vec<String>,
    /// Symbols to stream, e.g. ["BTCUSDT", "ETHUSDT"]
    pub universe: Vec<String>,
}

fn default_ws_url() -> String {
    PUBLIC_WS_URL.to_string()
}

impl CollectorConfig {
    /// Load configuration from YAML file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Derive the initial desired subscription set: one candle channel per
    /// strategy x interval x symbol. Overlapping strategies may repeat a
    /// key; the registry's set semantics absorb duplicates.
    pub fn subscription_keys(&self) -> Vec<SubscribeKey> {
        self.strategies
            .values()
            .flat_map(|strategy| {
                strategy.intervals.iter().flat_map(|interval| {
                    strategy.universe.iter().map(|symbol| {
                        SubscribeKey::candle(
                            strategy.product_type.as_str(),
                            interval,
                            symbol.as_str(),
                        )
                    })
                })
            })
            .collect()
    }
}
