use crate::error::{with_timeout, PipelineError, Result};
use crate::models::BookSnapshot;
use crate::runtime::Shutdown;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const BINANCE_WS_BASE: &str = "wss://stream.binance.com:9443/ws";
const BINANCE_TESTNET_WS_BASE: &str = "wss://testnet.binance.vision/ws";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
// Depth updates arrive every 100ms and the server pings every 20s
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Why a single connection ended
#[derive(Debug, PartialEq, Eq)]
enum StreamEnd {
    Shutdown,
    Closed,
    Idle,
    ReceiverGone,
}

/// Partial book depth stream for one symbol, with reconnect
pub struct DepthStream {
    base_url: String,
    symbol: String,
    depth: u32,
    reconnect_delay: Duration,
    connect_timeout: Duration,
    idle_timeout: Duration,
}

/// Parse one `<symbol>@depth<n>` message
pub fn parse_depth(text: &str) -> Result<BookSnapshot> {
    Ok(serde_json::from_str(text)?)
}

impl DepthStream {
    pub fn new(symbol: &str, depth: u32, use_testnet: bool, reconnect_delay: Duration) -> Self {
        let base_url = if use_testnet {
            BINANCE_TESTNET_WS_BASE
        } else {
            BINANCE_WS_BASE
        };
        Self::with_base_url(base_url, symbol, depth, reconnect_delay)
    }

    pub fn with_base_url(
        base_url: &str,
        symbol: &str,
        depth: u32,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            symbol: symbol.to_string(),
            depth,
            reconnect_delay,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    /// Bound the websocket handshake and the silence tolerated on an open socket
    pub fn with_timeouts(mut self, connect_timeout: Duration, idle_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn url(&self) -> String {
        format!(
            "{}/{}@depth{}@100ms",
            self.base_url,
            self.symbol.to_lowercase(),
            self.depth
        )
    }

    /// Forward snapshots into `tx` until shutdown or until the receiver is dropped
    ///
    /// Disconnects and connection failures are logged and retried after the
    /// reconnect delay.
    pub async fn run(&self, tx: mpsc::Sender<BookSnapshot>, mut shutdown: Shutdown) {
        tracing::info!("📡 Depth stream starting: {}", self.url());

        loop {
            if shutdown.is_triggered() {
                break;
            }

            match self.stream_once(&tx, &mut shutdown).await {
                Ok(StreamEnd::Shutdown) => break,
                Ok(StreamEnd::ReceiverGone) => {
                    tracing::info!("Snapshot receiver dropped, stopping depth stream");
                    break;
                }
                Ok(StreamEnd::Idle) => {
                    tracing::warn!(
                        "No depth message for {:?}, reconnecting in {:?}",
                        self.idle_timeout,
                        self.reconnect_delay
                    );
                }
                Ok(StreamEnd::Closed) => {
                    tracing::warn!(
                        "Depth stream closed by server, reconnecting in {:?}",
                        self.reconnect_delay
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "Depth stream error: {}, reconnecting in {:?}",
                        e,
                        self.reconnect_delay
                    );
                }
            }

            tokio::select! {
                _ = shutdown.wait() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        tracing::info!("Depth stream stopped");
    }

    async fn stream_once(
        &self,
        tx: &mpsc::Sender<BookSnapshot>,
        shutdown: &mut Shutdown,
    ) -> Result<StreamEnd> {
        let url = self.url();
        let connect = with_timeout("depth_stream.connect", self.connect_timeout, async {
            connect_async(url.as_str()).await.map_err(PipelineError::from)
        });
        let (ws_stream, _) = tokio::select! {
            _ = shutdown.wait() => return Ok(StreamEnd::Shutdown),
            connected = connect => connected?,
        };
        let (mut write, mut read) = ws_stream.split();

        tracing::info!(symbol = %self.symbol, "Depth stream connected");

        loop {
            let message = tokio::select! {
                _ = shutdown.wait() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(StreamEnd::Shutdown);
                }
                message = tokio::time::timeout(self.idle_timeout, read.next()) => match message {
                    Ok(message) => message,
                    Err(_) => return Ok(StreamEnd::Idle),
                },
            };

            match message {
                Some(Ok(Message::Text(text))) => match parse_depth(&text) {
                    Ok(snapshot) => {
                        if tx.send(snapshot).await.is_err() {
                            return Ok(StreamEnd::ReceiverGone);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping malformed depth message");
                    }
                },
                Some(Ok(Message::Ping(payload))) => {
                    write.send(Message::Pong(payload)).await?;
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!("Close frame received: {:?}", frame);
                    return Ok(StreamEnd::Closed);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(StreamEnd::Closed),
            }
        }
    }
}
