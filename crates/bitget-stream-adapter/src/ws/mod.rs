/*
[INPUT]:  WebSocket configuration and subscription channels
[OUTPUT]: Resilient real-time market data stream
[POS]:    WebSocket layer - connection lifecycle and subscription state
[UPDATE]: When adding new channels or changing connection logic
*/

pub mod client;
pub mod message;
pub mod subscription;

pub use client::{BitgetWsClient, ConnectionState, WsConfig, PUBLIC_WS_URL};
pub use message::{Candle, EventMessage, InboundMessage, PushMessage};
pub use subscription::{LoginArgs, SubscribeKey, SubscriptionRegistry, WsOp, WsRequest};
