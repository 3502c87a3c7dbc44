/*
[INPUT]:  Error sources (WebSocket transport, serialization, URL parsing)
[OUTPUT]: Structured error types with retry hints
[POS]:    Error handling layer - unified error types for entire crate
[UPDATE]: When adding new error sources or improving error messages
*/

use thiserror::Error;

/// Main error type for the Bitget stream adapter
#[derive(Error, Debug)]
pub enum StreamError {
    /// WebSocket transport failed (connect, read or write)
    #[error("websocket transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// Serialization/deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parsing failed
    #[error("invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Send attempted while no session is open
    #[error("websocket not connected")]
    NotConnected,
}

impl StreamError {
    /// Check if the error is retryable
    ///
    /// Transport failures are always recoverable by reconnecting; a send in
    /// the no-session window resolves itself at the next resubscription.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StreamError::Transport(_) | StreamError::NotConnected)
    }
}

/// Result type alias for stream adapter operations
pub type Result<T> = std::result::Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        assert!(StreamError::NotConnected.is_retryable());

        let decode_err: serde_json::Error =
            serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        assert!(!StreamError::Serialization(decode_err).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = StreamError::NotConnected;
        assert_eq!(err.to_string(), "websocket not connected");
    }
}
