//! Live update channel: reconnecting WebSocket price feed
//!
//! One logical connection per channel lifetime. Any non-deliberate closure
//! transitions the channel back to `Connecting` and retries with
//! exponential backoff; a deliberate `close()` is terminal. Inbound price
//! events are forwarded over an mpsc queue to a single dedicated task that
//! applies them to the cache, so network delivery stays decoupled from
//! cache mutation.

use backoff::{backoff::Backoff, ExponentialBackoff};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::sync::cache::PriceUpdate;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Connection error: {0}")]
    Connection(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Channel send error")]
    ChannelSend,
    #[error("Connection dropped by peer")]
    Disconnected,
}

/// Commands that can be sent to the channel task
#[derive(Debug)]
enum ChannelCommand {
    /// Push a price update to the server (data-admin clients only)
    Publish(PriceUpdate),
    /// Deliberate close; terminal, never reconnects
    Close,
}

/// Observable connection state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed(CloseReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `close()` was called
    Deliberate,
    /// Reconnection attempts exhausted
    Exhausted,
}

/// Live update channel configuration
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Price feed URL
    pub url: String,
    /// Heartbeat interval in seconds
    pub heartbeat_interval: u64,
    /// Maximum reconnection attempts (0 = infinite)
    pub max_reconnection_attempts: u32,
    /// Initial reconnection delay in milliseconds
    pub initial_reconnection_delay: u64,
    /// Maximum reconnection delay in milliseconds
    pub max_reconnection_delay: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8000/ws/prices/".to_string(),
            heartbeat_interval: 10,
            max_reconnection_attempts: 0, // Infinite retries
            initial_reconnection_delay: 1000,
            max_reconnection_delay: 30000,
        }
    }
}

/// Handle to the single logical price feed connection
pub struct LiveChannel {
    command_tx: mpsc::UnboundedSender<ChannelCommand>,
    state_rx: watch::Receiver<ChannelState>,
}

impl LiveChannel {
    /// Spawn the connection task. Received price events are delivered on
    /// `events`; the caller decides who drains it (see `spawn_apply_task`).
    pub fn connect(config: ChannelConfig, events: mpsc::UnboundedSender<PriceUpdate>) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);

        tokio::spawn(async move {
            Self::connection_task(config, command_rx, events, state_tx).await;
        });

        Self {
            command_tx,
            state_rx,
        }
    }

    /// Observe connection state transitions.
    pub fn state(&self) -> watch::Receiver<ChannelState> {
        self.state_rx.clone()
    }

    /// Publish a price update to the server, fire-and-forget.
    pub fn publish_price_update(&self, update: PriceUpdate) -> Result<(), ChannelError> {
        self.command_tx
            .send(ChannelCommand::Publish(update))
            .map_err(|_| ChannelError::ChannelSend)
    }

    /// Deliberate close. Terminal: the channel never reconnects after this.
    pub fn close(&self) -> Result<(), ChannelError> {
        self.command_tx
            .send(ChannelCommand::Close)
            .map_err(|_| ChannelError::ChannelSend)
    }

    /// Main connection task with auto-reconnection
    async fn connection_task(
        config: ChannelConfig,
        mut command_rx: mpsc::UnboundedReceiver<ChannelCommand>,
        events_tx: mpsc::UnboundedSender<PriceUpdate>,
        state_tx: watch::Sender<ChannelState>,
    ) {
        let mut reconnection_attempts = 0;
        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(config.initial_reconnection_delay),
            max_interval: Duration::from_millis(config.max_reconnection_delay),
            max_elapsed_time: None,
            ..Default::default()
        };

        loop {
            let _ = state_tx.send(ChannelState::Connecting);

            match Self::connect_and_run(
                &config,
                &mut command_rx,
                &events_tx,
                &state_tx,
                &mut backoff,
                &mut reconnection_attempts,
            )
            .await
            {
                Ok(()) => {
                    info!("Live update channel closed deliberately");
                    let _ = state_tx.send(ChannelState::Closed(CloseReason::Deliberate));
                    break;
                }
                Err(e) => {
                    warn!("Live update channel error: {}", e);

                    if config.max_reconnection_attempts > 0
                        && reconnection_attempts >= config.max_reconnection_attempts
                    {
                        warn!("Maximum reconnection attempts reached");
                        let _ = state_tx.send(ChannelState::Closed(CloseReason::Exhausted));
                        break;
                    }

                    reconnection_attempts += 1;

                    if let Some(delay) = backoff.next_backoff() {
                        debug!(
                            "Reconnecting in {:?} (attempt {})",
                            delay, reconnection_attempts
                        );
                        // A deliberate close must win even while we are
                        // between connections.
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            cmd = command_rx.recv() => {
                                match cmd {
                                    Some(ChannelCommand::Close) | None => {
                                        info!("Live update channel closed deliberately");
                                        let _ = state_tx.send(
                                            ChannelState::Closed(CloseReason::Deliberate),
                                        );
                                        return;
                                    }
                                    Some(ChannelCommand::Publish(update)) => {
                                        debug!(
                                            asset_id = update.asset_id,
                                            "Dropping publish while disconnected"
                                        );
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    /// Connect and run one WebSocket session
    async fn connect_and_run(
        config: &ChannelConfig,
        command_rx: &mut mpsc::UnboundedReceiver<ChannelCommand>,
        events_tx: &mpsc::UnboundedSender<PriceUpdate>,
        state_tx: &watch::Sender<ChannelState>,
        backoff: &mut ExponentialBackoff,
        reconnection_attempts: &mut u32,
    ) -> Result<(), ChannelError> {
        debug!("Connecting to price feed: {}", config.url);

        let (ws_stream, _response) = connect_async(&config.url).await?;
        let (mut write, mut read) = ws_stream.split();

        info!("Price feed connected");
        let _ = state_tx.send(ChannelState::Open);
        backoff.reset();
        *reconnection_attempts = 0;

        let mut heartbeat = interval(Duration::from_secs(config.heartbeat_interval));
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut last_pong = Instant::now();
        let pong_timeout = Duration::from_secs(config.heartbeat_interval * 2);

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            // A single bad message must not tear down the
                            // connection: log it and move on.
                            match serde_json::from_str::<PriceUpdate>(&text) {
                                Ok(update) => {
                                    debug!(
                                        asset_id = update.asset_id,
                                        new_price = %update.new_price,
                                        "Price event received"
                                    );
                                    if events_tx.send(update).is_err() {
                                        warn!("Event consumer gone, dropping price event");
                                    }
                                }
                                Err(e) => {
                                    warn!("Dropping malformed price event: {} - Raw: {}", e, text);
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            last_pong = Instant::now();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            // Server-initiated close is not deliberate from
                            // our side; reconnect.
                            info!("Price feed closed by server: {:?}", frame);
                            return Err(ChannelError::Disconnected);
                        }
                        Some(Err(e)) => {
                            return Err(ChannelError::Connection(e));
                        }
                        None => {
                            return Err(ChannelError::Disconnected);
                        }
                        _ => {
                            // Ignore other message types
                        }
                    }
                }

                cmd = command_rx.recv() => {
                    match cmd {
                        Some(ChannelCommand::Publish(update)) => {
                            let msg = serde_json::to_string(&serde_json::json!({
                                "type": "price_update",
                                "asset_id": update.asset_id,
                                "new_price": update.new_price.to_string(),
                            }))?;
                            debug!(asset_id = update.asset_id, "Publishing price update");
                            write.send(Message::Text(msg.into())).await?;
                        }
                        Some(ChannelCommand::Close) | None => {
                            // Handle dropped == deliberate close
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(());
                        }
                    }
                }

                _ = heartbeat.tick() => {
                    if last_pong.elapsed() > pong_timeout {
                        warn!("Heartbeat timeout - no pong received");
                        return Err(ChannelError::Disconnected);
                    }

                    if let Err(e) = write.send(Message::Ping(vec![].into())).await {
                        return Err(ChannelError::Connection(e));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    #[test]
    fn test_channel_config_default() {
        let config = ChannelConfig::default();
        assert_eq!(config.heartbeat_interval, 10);
        assert_eq!(config.max_reconnection_attempts, 0);
        assert!(config.url.ends_with("/ws/prices/"));
    }

    /// Local WebSocket server that counts connections and runs the given
    /// per-connection script.
    async fn spawn_server<F, Fut>(script: F) -> (String, Arc<AtomicUsize>)
    where
        F: Fn(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>, usize) -> Fut
            + Send
            + Sync
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&connections);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                script(ws, n).await;
            }
        });

        (format!("ws://{addr}"), connections)
    }

    fn fast_config(url: String) -> ChannelConfig {
        ChannelConfig {
            url,
            heartbeat_interval: 30,
            max_reconnection_attempts: 0,
            initial_reconnection_delay: 20,
            max_reconnection_delay: 50,
        }
    }

    #[tokio::test]
    async fn test_events_are_delivered_and_malformed_ones_dropped() {
        let (url, _connections) = spawn_server(|mut ws, _n| async move {
            ws.send(Message::Text("not json".into())).await.ok();
            ws.send(Message::Text(r#"{"wrong": "shape"}"#.into())).await.ok();
            ws.send(Message::Text(r#"{"asset_id": 7, "new_price": "25.50"}"#.into()))
                .await
                .ok();
            // keep the connection open until the client goes away
            while ws.next().await.is_some() {}
        })
        .await;

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let channel = LiveChannel::connect(fast_config(url), events_tx);

        let update = tokio::time::timeout(Duration::from_secs(5), events_rx.recv())
            .await
            .expect("timed out waiting for price event")
            .expect("event channel closed");

        // the two malformed messages were dropped, not fatal
        assert_eq!(
            update,
            PriceUpdate {
                asset_id: 7,
                new_price: dec!(25.50)
            }
        );

        channel.close().unwrap();
    }

    #[tokio::test]
    async fn test_reconnects_after_server_drop() {
        let (url, connections) = spawn_server(|mut ws, n| async move {
            if n == 0 {
                // first connection: drop immediately
                ws.close(None).await.ok();
            } else {
                ws.send(Message::Text(r#"{"asset_id": 1, "new_price": "2.00"}"#.into()))
                    .await
                    .ok();
                while ws.next().await.is_some() {}
            }
        })
        .await;

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let channel = LiveChannel::connect(fast_config(url), events_tx);

        // receiving an event proves the second connection happened without
        // application intervention
        let update = tokio::time::timeout(Duration::from_secs(5), events_rx.recv())
            .await
            .expect("timed out waiting for reconnect")
            .expect("event channel closed");
        assert_eq!(update.asset_id, 1);
        assert!(connections.load(Ordering::SeqCst) >= 2);

        let mut state = channel.state();
        assert_eq!(*state.borrow_and_update(), ChannelState::Open);

        channel.close().unwrap();
    }

    #[tokio::test]
    async fn test_deliberate_close_never_reconnects() {
        let (url, connections) = spawn_server(|mut ws, _n| async move {
            while ws.next().await.is_some() {}
        })
        .await;

        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let channel = LiveChannel::connect(fast_config(url), events_tx);

        let mut state = channel.state();
        // wait for the connection to open, then close deliberately
        tokio::time::timeout(Duration::from_secs(5), async {
            while *state.borrow_and_update() != ChannelState::Open {
                state.changed().await.unwrap();
            }
        })
        .await
        .expect("never opened");

        channel.close().unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if *state.borrow_and_update() == ChannelState::Closed(CloseReason::Deliberate) {
                    break;
                }
                state.changed().await.unwrap();
            }
        })
        .await
        .expect("never reached terminal state");

        let before = connections.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(connections.load(Ordering::SeqCst), before);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_close_the_channel() {
        // nothing listening here
        let config = ChannelConfig {
            url: "ws://127.0.0.1:9/".to_string(),
            heartbeat_interval: 30,
            max_reconnection_attempts: 2,
            initial_reconnection_delay: 10,
            max_reconnection_delay: 20,
        };

        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let channel = LiveChannel::connect(config, events_tx);

        let mut state = channel.state();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if *state.borrow_and_update() == ChannelState::Closed(CloseReason::Exhausted) {
                    break;
                }
                state.changed().await.unwrap();
            }
        })
        .await
        .expect("never exhausted");
    }
}
