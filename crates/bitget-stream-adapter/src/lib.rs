/*
[INPUT]:  Crate modules and public type definitions
[OUTPUT]: Public Bitget stream adapter crate surface
[POS]:    Crate root - module wiring
[UPDATE]: When public modules or exports change
*/

pub mod error;
pub mod ws;

// Re-export commonly used types from error
pub use error::{Result, StreamError};

// Re-export commonly used types from ws
pub use ws::{
    BitgetWsClient,
    Candle,
    ConnectionState,
    EventMessage,
    InboundMessage,
    LoginArgs,
    PushMessage,
    SubscribeKey,
    SubscriptionRegistry,
    WsConfig,
    WsOp,
    WsRequest,
    PUBLIC_WS_URL,
};
