/*
[INPUT]:  WebSocket URL, reconnect/heartbeat configuration, subscription registry
[OUTPUT]: Resilient stream of decoded inbound JSON payloads via a bounded channel
[POS]:    WebSocket layer - connection supervisor, heartbeat and receive loops
[UPDATE]: When changing reconnection backoff, heartbeat, or shutdown semantics
*/

use std::sync::Arc;
use std::time::Duration;

use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Result, StreamError};
use crate::ws::subscription::{LoginArgs, SubscribeKey, SubscriptionRegistry, WsRequest};

/// Public market data WebSocket endpoint
pub const PUBLIC_WS_URL: &str = "wss://ws.bitget.com/v2/ws/public";

/// Application-level heartbeat frames. The server closes idle connections
/// faster than transport-level pings would detect, so liveness is managed
/// with literal text frames instead.
const WS_PING: &str = "ping";
const WS_PONG: &str = "pong";

const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_RECONNECT_INITIAL_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_RECONNECT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Capacity of the inbound payload channel handed to the consumer
const INBOUND_CHANNEL_CAPACITY: usize = 100;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;
type SharedSink = Arc<Mutex<Option<WsSink>>>;

/// Connection state of the WebSocket client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Attempting to connect
    Connecting,
    /// Connected and ready
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
        }
    }
}

/// Configuration for the WebSocket client
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Endpoint to connect to
    pub url: Url,
    /// Interval between application-level pings
    pub heartbeat_interval: Duration,
    /// Delay before the first reconnect attempt
    pub reconnect_initial_delay: Duration,
    /// Upper bound for the exponential backoff
    pub reconnect_max_delay: Duration,
    /// Credentials sent as a login frame on every new session, if set
    pub login: Option<LoginArgs>,
}

impl WsConfig {
    /// Create a configuration with default timings for the given endpoint
    pub fn new(url: &str) -> Result<Self> {
        Ok(Self {
            url: Url::parse(url)?,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect_initial_delay: DEFAULT_RECONNECT_INITIAL_DELAY,
            reconnect_max_delay: DEFAULT_RECONNECT_MAX_DELAY,
            login: None,
        })
    }

    /// Create a configuration for the public market data endpoint
    pub fn public() -> Result<Self> {
        Self::new(PUBLIC_WS_URL)
    }
}

/// Resilient WebSocket client for the Bitget streaming API.
///
/// One supervisor task drives repeated connection attempts with capped
/// exponential backoff. Every new session sends the optional login frame and
/// one subscribe envelope for the full desired set, then runs a heartbeat
/// task and a receive loop until either fails. Decoded inbound payloads are
/// published into a bounded channel obtained via [`take_receiver`].
///
/// [`take_receiver`]: BitgetWsClient::take_receiver
pub struct BitgetWsClient {
    config: WsConfig,
    registry: Arc<SubscriptionRegistry>,
    sink: SharedSink,
    state_tx: watch::Sender<ConnectionState>,
    message_tx: mpsc::Sender<serde_json::Value>,
    message_rx: Option<mpsc::Receiver<serde_json::Value>>,
    stop: CancellationToken,
    worker_handle: Option<tokio::task::JoinHandle<()>>,
}

impl std::fmt::Debug for BitgetWsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitgetWsClient")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl BitgetWsClient {
    /// Create a new client around a caller-constructed registry.
    ///
    /// The registry seeds the desired set; nothing is sent until [`start`]
    /// establishes a session.
    ///
    /// [`start`]: BitgetWsClient::start
    pub fn new(config: WsConfig, registry: SubscriptionRegistry) -> Self {
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Disconnected);
        let (message_tx, message_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);

        Self {
            config,
            registry: Arc::new(registry),
            sink: Arc::new(Mutex::new(None)),
            state_tx,
            message_tx,
            message_rx: Some(message_rx),
            stop: CancellationToken::new(),
            worker_handle: None,
        }
    }

    /// Take the inbound payload receiver. Returns `None` after the first call.
    pub fn take_receiver(&mut self) -> Option<mpsc::Receiver<serde_json::Value>> {
        self.message_rx.take()
    }

    /// Read-only access to the injected subscription registry
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Check if a session is currently established
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Subscribe to connection state changes
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Spawn the supervisor task. Idempotent; requires a Tokio runtime.
    pub fn start(&mut self) {
        if self.worker_handle.is_some() {
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            warn!("BitgetWsClient started without Tokio runtime; supervisor not spawned");
            return;
        }

        let worker = SupervisorWorker {
            config: self.config.clone(),
            registry: self.registry.clone(),
            sink: self.sink.clone(),
            state_tx: self.state_tx.clone(),
            message_tx: self.message_tx.clone(),
            stop: self.stop.clone(),
        };
        self.worker_handle = Some(tokio::spawn(worker.run()));
    }

    /// Block until the client first reaches [`ConnectionState::Connected`],
    /// or until the client is closed.
    ///
    /// Callers do not have to wait before subscribing: mutations made while
    /// disconnected are picked up by the resubscription on the next session.
    pub async fn wait_connected(&self) {
        let mut state_rx = self.state_tx.subscribe();
        tokio::select! {
            _ = self.stop.cancelled() => {}
            _ = state_rx.wait_for(|state| *state == ConnectionState::Connected) => {}
        }
    }

    /// Add keys to the desired set, returning the keys that were new.
    ///
    /// If a session is established, one subscribe envelope containing
    /// exactly the new keys is sent. Otherwise the mutation still happens
    /// and the wire effect is deferred to the next resubscription. Empty
    /// input and already-subscribed keys produce no wire traffic.
    pub async fn subscribe(&self, keys: &[SubscribeKey]) -> Vec<SubscribeKey> {
        let added = self.registry.subscribe(keys).await;
        if !added.is_empty() {
            self.send_delta(WsRequest::subscribe(added.clone())).await;
        }
        added
    }

    /// Remove keys from the desired set, returning the keys that were
    /// actually subscribed. Symmetric to [`subscribe`].
    ///
    /// [`subscribe`]: BitgetWsClient::subscribe
    pub async fn unsubscribe(&self, keys: &[SubscribeKey]) -> Vec<SubscribeKey> {
        let removed = self.registry.unsubscribe(keys).await;
        if !removed.is_empty() {
            self.send_delta(WsRequest::unsubscribe(removed.clone())).await;
        }
        removed
    }

    async fn send_delta(&self, request: WsRequest<SubscribeKey>) {
        if !self.is_connected() {
            debug!(count = request.args.len(), "no session; delta deferred to resubscription");
            return;
        }
        match send_envelope(&self.sink, &request).await {
            Ok(()) => {}
            Err(StreamError::NotConnected) => {
                // Session went away between the state check and the send;
                // the desired set already holds the keys, so the next
                // resubscription covers them.
                debug!(count = request.args.len(), "session lost; delta deferred to resubscription");
            }
            Err(err) => {
                warn!(error = %err, "delta send failed; session will be recycled");
            }
        }
    }

    /// Stop the client: no further reconnect attempts are made and all
    /// internal tasks wind down. Idempotent.
    pub async fn close(&self) {
        self.stop.cancel();

        let mut guard = self.sink.lock().await;
        if let Some(mut sink) = guard.take() {
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        }
        drop(guard);

        let _ = self.state_tx.send(ConnectionState::Disconnected);
        info!("websocket client closed");
    }
}

impl Drop for BitgetWsClient {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Serialize and write one request envelope to the shared sink.
///
/// Fails with [`StreamError::NotConnected`] when no session is open; callers
/// on the subscribe path suppress that case instead of propagating it.
async fn send_envelope<T: Serialize>(sink: &SharedSink, request: &WsRequest<T>) -> Result<()> {
    let payload = serde_json::to_string(request)?;
    let mut guard = sink.lock().await;
    let Some(ws) = guard.as_mut() else {
        return Err(StreamError::NotConnected);
    };
    debug!(%payload, "sending request");
    ws.send(Message::Text(payload.into())).await?;
    Ok(())
}

/// Next backoff delay: double the current one, capped at `max`
fn next_delay(delay: Duration, max: Duration) -> Duration {
    (delay * 2).min(max)
}

/// Supervisor task state: owns the outer reconnect loop and, per session,
/// the heartbeat task handle and the receive loop.
struct SupervisorWorker {
    config: WsConfig,
    registry: Arc<SubscriptionRegistry>,
    sink: SharedSink,
    state_tx: watch::Sender<ConnectionState>,
    message_tx: mpsc::Sender<serde_json::Value>,
    stop: CancellationToken,
}

impl SupervisorWorker {
    async fn run(self) {
        let mut delay = self.config.reconnect_initial_delay;

        loop {
            if self.stop.is_cancelled() {
                break;
            }

            let _ = self.state_tx.send(ConnectionState::Connecting);
            info!(url = %self.config.url, "connecting");

            match connect_async(self.config.url.as_str()).await {
                Ok((stream, _response)) => {
                    delay = self.config.reconnect_initial_delay;

                    let (sink_half, read_half) = stream.split();
                    *self.sink.lock().await = Some(sink_half);
                    let _ = self.state_tx.send(ConnectionState::Connected);
                    info!("connected");

                    self.run_session(read_half).await;

                    *self.sink.lock().await = None;
                    let _ = self.state_tx.send(ConnectionState::Disconnected);

                    if self.stop.is_cancelled() {
                        break;
                    }
                    warn!(delay_secs = delay.as_secs(), "connection lost; reconnecting");
                }
                Err(err) => {
                    let _ = self.state_tx.send(ConnectionState::Disconnected);
                    if self.stop.is_cancelled() {
                        break;
                    }
                    warn!(error = %err, delay_secs = delay.as_secs(), "connect failed; reconnecting");
                }
            }

            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            delay = next_delay(delay, self.config.reconnect_max_delay);
        }

        let _ = self.state_tx.send(ConnectionState::Disconnected);
        debug!("supervisor exited");
    }

    /// Run one session to completion: login, resubscribe, then heartbeat +
    /// receive until either fails or a stop is requested.
    async fn run_session(&self, mut read: WsStream) {
        let session = self.stop.child_token();

        if let Some(login) = self.config.login.clone() {
            if let Err(err) = send_envelope(&self.sink, &WsRequest::login(login)).await {
                warn!(error = %err, "login frame failed");
                return;
            }
        }

        if let Err(err) = self.resubscribe_all().await {
            warn!(error = %err, "resubscription failed");
            return;
        }

        let heartbeat = tokio::spawn(heartbeat_loop(
            self.sink.clone(),
            session.clone(),
            self.config.heartbeat_interval,
        ));

        self.receive_loop(&mut read, &session).await;

        // Tear the session down in one place so the heartbeat task never
        // outlives the connection it pings.
        session.cancel();
        heartbeat.abort();
        let _ = heartbeat.await;
    }

    /// Send one subscribe envelope with the entire desired set. The server
    /// holds no memory of prior sessions, so this is the sole recovery
    /// mechanism for subscription state after a reconnect.
    async fn resubscribe_all(&self) -> Result<()> {
        let snapshot = self.registry.snapshot().await;
        if snapshot.is_empty() {
            return Ok(());
        }
        info!(count = snapshot.len(), "resubscribing channels");
        send_envelope(&self.sink, &WsRequest::subscribe(snapshot)).await
    }

    async fn receive_loop(&self, read: &mut WsStream, session: &CancellationToken) {
        loop {
            tokio::select! {
                _ = self.stop.cancelled() => return,
                _ = session.cancelled() => return,
                frame = read.next() => {
                    match frame {
                        Some(Ok(message)) => {
                            if !self.handle_frame(message, session).await {
                                return;
                            }
                        }
                        Some(Err(err)) => {
                            warn!(error = %err, "read failed");
                            return;
                        }
                        None => {
                            warn!("stream ended");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Handle one inbound frame. Returns `false` when the session must end.
    async fn handle_frame(&self, message: Message, session: &CancellationToken) -> bool {
        let text = match message {
            Message::Text(text) => text.to_string(),
            Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    warn!("non-utf8 binary frame dropped");
                    return true;
                }
            },
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => return true,
            Message::Close(_) => {
                info!("close frame received");
                return false;
            }
        };

        if text == WS_PONG {
            debug!("pong received");
            return true;
        }

        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(value) => {
                tokio::select! {
                    _ = session.cancelled() => return false,
                    sent = self.message_tx.send(value) => {
                        if sent.is_err() {
                            debug!("payload receiver dropped; frame discarded");
                        }
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, bytes = text.len(), "invalid json frame dropped");
            }
        }
        true
    }
}

/// Per-session heartbeat: a `"ping"` text frame every interval. A failed
/// send is the half-open-connection detector and recycles the session.
async fn heartbeat_loop(sink: SharedSink, session: CancellationToken, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = session.cancelled() => return,
            _ = ticker.tick() => {
                let mut guard = sink.lock().await;
                let Some(ws) = guard.as_mut() else {
                    session.cancel();
                    return;
                };
                if let Err(err) = ws.send(Message::Text(WS_PING.into())).await {
                    warn!(error = %err, "heartbeat send failed; recycling session");
                    session.cancel();
                    return;
                }
                debug!("ping sent");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    // ============ ConnectionState Tests ============

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "Disconnected");
        assert_eq!(ConnectionState::Connecting.to_string(), "Connecting");
        assert_eq!(ConnectionState::Connected.to_string(), "Connected");
    }

    // ============ WsConfig Tests ============

    #[test]
    fn test_config_defaults() {
        let config = WsConfig::public().unwrap();
        assert_eq!(config.url.as_str(), PUBLIC_WS_URL);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.reconnect_initial_delay, Duration::from_secs(1));
        assert_eq!(config.reconnect_max_delay, Duration::from_secs(60));
        assert!(config.login.is_none());
    }

    #[test]
    fn test_config_rejects_invalid_url() {
        let result = WsConfig::new("not a url");
        assert!(matches!(result, Err(StreamError::UrlParse(_))));
    }

    // ============ Backoff Tests ============

    #[rstest]
    #[case(1, 2)]
    #[case(2, 4)]
    #[case(4, 8)]
    #[case(16, 32)]
    #[case(32, 60)]
    #[case(60, 60)]
    fn test_backoff_doubles_and_caps(#[case] current_secs: u64, #[case] expected_secs: u64) {
        let next = next_delay(
            Duration::from_secs(current_secs),
            Duration::from_secs(60),
        );
        assert_eq!(next, Duration::from_secs(expected_secs));
    }

    #[test]
    fn test_backoff_schedule_from_initial() {
        let max = Duration::from_secs(60);
        let mut delay = Duration::from_secs(1);
        let mut schedule = vec![delay];
        for _ in 0..7 {
            delay = next_delay(delay, max);
            schedule.push(delay);
        }
        let secs: Vec<u64> = schedule.iter().map(Duration::as_secs).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    // ============ Client Tests ============

    fn test_client() -> BitgetWsClient {
        let config = WsConfig::public().unwrap();
        BitgetWsClient::new(config, SubscriptionRegistry::new())
    }

    #[test]
    fn test_client_initial_state() {
        let client = test_client();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.is_connected());
    }

    #[test]
    fn test_client_receiver_take_once() {
        let mut client = test_client();
        assert!(client.take_receiver().is_some());
        assert!(client.take_receiver().is_none());
    }

    #[tokio::test]
    async fn test_subscribe_without_session_mutates_desired_set() {
        let client = test_client();
        let key = SubscribeKey::candle("USDT-FUTURES", "1m", "BTCUSDT");

        let added = client.subscribe(std::slice::from_ref(&key)).await;
        assert_eq!(added, vec![key.clone()]);
        assert!(client.registry().contains(&key).await);

        // Idempotent: no new keys on the second call.
        let added = client.subscribe(&[key]).await;
        assert!(added.is_empty());
    }

    #[tokio::test]
    async fn test_wait_connected_returns_after_close() {
        let client = test_client();
        client.close().await;

        tokio::time::timeout(Duration::from_secs(1), client.wait_connected())
            .await
            .expect("wait_connected should unblock once closed");
    }

    #[test]
    fn test_client_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<BitgetWsClient>();
        assert_sync::<BitgetWsClient>();
    }
}
