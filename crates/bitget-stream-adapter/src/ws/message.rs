/*
[INPUT]:  Decoded inbound JSON payloads from the stream client
[OUTPUT]: Classified event acks and data pushes with typed candle rows
[POS]:    WebSocket layer - inbound message parsing for consumers
[UPDATE]: When adding new push channels or changing the frame format
*/

use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::ws::subscription::SubscribeKey;

/// One inbound frame, classified.
///
/// The client hands consumers raw `serde_json::Value` payloads; this is the
/// optional typed layer on top. Frames that match neither shape simply
/// return `None` from [`from_value`] and can be handled raw.
///
/// [`from_value`]: InboundMessage::from_value
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum InboundMessage {
    /// Server acknowledgment: `{"event": ..., "arg": ...}`
    Event(EventMessage),
    /// Data push: `{"action": ..., "arg": ..., "data": [...]}`
    Push(PushMessage),
}

impl InboundMessage {
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// Acknowledgment of a subscribe/unsubscribe/login operation, or an error
#[derive(Debug, Clone, Deserialize)]
pub struct EventMessage {
    pub event: String,
    #[serde(default)]
    pub arg: Option<SubscribeKey>,
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub msg: Option<String>,
}

impl EventMessage {
    pub fn is_error(&self) -> bool {
        self.event == "error"
    }
}

/// Channel data push
#[derive(Debug, Clone, Deserialize)]
pub struct PushMessage {
    /// "snapshot" on first delivery after subscribing, "update" afterwards
    pub action: String,
    /// The subscription this push belongs to
    pub arg: SubscribeKey,
    #[serde(default)]
    pub data: Vec<serde_json::Value>,
    /// Server-side send time in epoch milliseconds
    #[serde(default)]
    pub ts: Option<i64>,
}

impl PushMessage {
    pub fn is_snapshot(&self) -> bool {
        self.action == "snapshot"
    }

    /// Parse candle rows out of the data array, skipping rows that are not
    /// candle-shaped.
    pub fn candles(&self) -> impl Iterator<Item = Candle> + '_ {
        self.data.iter().filter_map(|row| {
            let row: Vec<String> = serde_json::from_value(row.clone()).ok()?;
            Candle::from_row(&row)
        })
    }
}

/// One candlestick, parsed from the wire row
/// `[ts, open, high, low, close, baseVolume, quoteVolume?]`
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub ts: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub base_volume: Decimal,
    pub quote_volume: Option<Decimal>,
}

impl Candle {
    /// Parse a wire row. Returns `None` for rows that are too short or hold
    /// unparseable numbers.
    pub fn from_row(row: &[String]) -> Option<Self> {
        let millis: i64 = row.first()?.trim().parse().ok()?;
        let ts = Utc.timestamp_millis_opt(millis).single()?;
        let price = |idx: usize| {
            row.get(idx)
                .and_then(|field| Decimal::from_str(field.trim()).ok())
        };

        Some(Self {
            ts,
            open: price(1)?,
            high: price(2)?,
            low: price(3)?,
            close: price(4)?,
            base_volume: price(5)?,
            quote_volume: price(6),
        })
    }
}
