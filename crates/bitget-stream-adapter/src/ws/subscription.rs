/*
[INPUT]:  Channel subscription requests from callers and the reconnect path
[OUTPUT]: Desired-set deltas and wire-ready request envelopes
[POS]:    WebSocket layer - subscription state and outbound message types
[UPDATE]: When adding new operations or changing the wire format
*/

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Identifies one logical channel subscription on the exchange.
///
/// Equality and hashing are structural over all three fields, so keys can be
/// held in sets without duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeKey {
    /// Instrument type, e.g. "USDT-FUTURES"
    pub inst_type: String,
    /// Channel name, e.g. "candle1m"
    pub channel: String,
    /// Instrument identifier, e.g. "BTCUSDT"
    pub inst_id: String,
}

impl SubscribeKey {
    pub fn new(
        inst_type: impl Into<String>,
        channel: impl Into<String>,
        inst_id: impl Into<String>,
    ) -> Self {
        Self {
            inst_type: inst_type.into(),
            channel: channel.into(),
            inst_id: inst_id.into(),
        }
    }

    /// Create a candlestick subscription key for the given interval
    /// (e.g. "1m" maps to the "candle1m" channel).
    pub fn candle(
        inst_type: impl Into<String>,
        interval: &str,
        inst_id: impl Into<String>,
    ) -> Self {
        Self::new(inst_type, format!("candle{interval}"), inst_id)
    }
}

impl std::fmt::Display for SubscribeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.inst_type, self.channel, self.inst_id)
    }
}

/// Operation carried by an outbound request envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WsOp {
    Subscribe,
    Unsubscribe,
    Login,
}

/// Outbound request envelope: `{"op": ..., "args": [...]}`
///
/// Constructed per send, never persisted. Args order is the discovery order
/// of the triggering call's input.
#[derive(Debug, Clone, Serialize)]
pub struct WsRequest<T> {
    pub op: WsOp,
    pub args: Vec<T>,
}

impl WsRequest<SubscribeKey> {
    pub fn subscribe(keys: Vec<SubscribeKey>) -> Self {
        Self {
            op: WsOp::Subscribe,
            args: keys,
        }
    }

    pub fn unsubscribe(keys: Vec<SubscribeKey>) -> Self {
        Self {
            op: WsOp::Unsubscribe,
            args: keys,
        }
    }
}

impl WsRequest<LoginArgs> {
    pub fn login(args: LoginArgs) -> Self {
        Self {
            op: WsOp::Login,
            args: vec![args],
        }
    }
}

/// Credentials for the optional login frame.
///
/// The signature is produced by the caller; this type only carries the frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginArgs {
    pub api_key: String,
    pub passphrase: String,
    pub timestamp: String,
    pub sign: String,
}

/// Owns the desired subscription set and computes wire deltas.
///
/// The registry is constructor-injected into the client; it holds no global
/// state. Mutations are valid at any time regardless of connection status -
/// while disconnected the wire effect is deferred to the next full
/// resubscription.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    desired: Mutex<HashSet<SubscribeKey>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry seeded with an initial desired set.
    pub fn with_keys(keys: impl IntoIterator<Item = SubscribeKey>) -> Self {
        Self {
            desired: Mutex::new(keys.into_iter().collect()),
        }
    }

    /// Membership test against the desired set
    pub async fn contains(&self, key: &SubscribeKey) -> bool {
        self.desired.lock().await.contains(key)
    }

    /// Add keys to the desired set, returning only the keys that were not
    /// already present, in input order. An empty return means no wire
    /// traffic is needed.
    pub async fn subscribe(&self, keys: &[SubscribeKey]) -> Vec<SubscribeKey> {
        let mut desired = self.desired.lock().await;
        keys.iter()
            .filter(|key| desired.insert((*key).clone()))
            .cloned()
            .collect()
    }

    /// Remove keys from the desired set, returning only the keys that were
    /// actually present, in input order.
    pub async fn unsubscribe(&self, keys: &[SubscribeKey]) -> Vec<SubscribeKey> {
        let mut desired = self.desired.lock().await;
        keys.iter()
            .filter(|key| desired.remove(*key))
            .cloned()
            .collect()
    }

    /// Snapshot of the full desired set, used for resubscription after a
    /// reconnect. Order is unspecified.
    pub async fn snapshot(&self) -> Vec<SubscribeKey> {
        self.desired.lock().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.desired.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.desired.lock().await.is_empty()
    }
}
