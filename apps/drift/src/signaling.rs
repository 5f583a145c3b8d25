//! Client end of the signaling channel: a WebSocket to the pier carrying the
//! search/match control messages, surfaced to the session controller as a
//! plain event stream. The fallback simulator implements the same traits, so
//! the controller never knows which one it is holding.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use drift_proto::{ClientMessage, PairRole, ServerMessage};

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("signaling channel unavailable: {0}")]
    Unavailable(String),
    #[error("signaling channel closed")]
    Closed,
}

/// What a signal channel reports to the controller
#[derive(Debug, Clone)]
pub enum SignalEvent {
    /// A pairing was formed for this client
    MatchFound {
        partner_peer_id: String,
        role: PairRole,
    },
    /// The channel failed and will produce no further events
    Lost { reason: String },
}

/// One duplex signaling connection. `send` must be cheap and non-blocking;
/// events come back in arrival order.
#[async_trait]
pub trait SignalChannel: Send {
    fn send(&self, msg: &ClientMessage) -> Result<(), SignalError>;

    /// Next event, or `None` once the channel is gone
    async fn next_event(&mut self) -> Option<SignalEvent>;
}

/// Opens signal channels on demand. The controller reconnects through this
/// whenever it enters a search without a live channel.
#[async_trait]
pub trait SignalConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn SignalChannel>, SignalError>;
}

/// Interval between protocol-level keepalive pings
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub struct WebSocketSignaling {
    outbound: mpsc::UnboundedSender<ClientMessage>,
    events: mpsc::UnboundedReceiver<SignalEvent>,
    reader: tokio::task::JoinHandle<()>,
    heartbeat: tokio::task::JoinHandle<()>,
}

impl WebSocketSignaling {
    /// Connect to the pier's `/ws` endpoint and spawn the pump tasks
    pub async fn connect(url: &str) -> Result<Self, SignalError> {
        let ws_url = if url.ends_with("/ws") {
            url.to_string()
        } else {
            format!("{}/ws", url.trim_end_matches('/'))
        };

        let (stream, _) = connect_async(&ws_url)
            .await
            .map_err(|e| SignalError::Unavailable(e.to_string()))?;
        let (mut write, mut read) = stream.split();
        debug!("signaling channel open: {ws_url}");

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (events_tx, events) = mpsc::unbounded_channel::<SignalEvent>();

        // Writer: everything outbound funnels through one queue.
        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                match serde_json::to_string(&msg) {
                    Ok(json) => {
                        if write.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(%err, "failed to encode client message"),
                }
            }
        });

        // Reader: decode server messages into controller events.
        let reader = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                let frame = match frame {
                    Ok(f) => f,
                    Err(err) => {
                        let _ = events_tx.send(SignalEvent::Lost {
                            reason: err.to_string(),
                        });
                        return;
                    }
                };
                match frame {
                    Message::Text(text) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(ServerMessage::MatchFound {
                            partner_peer_id,
                            role,
                        }) => {
                            let _ = events_tx.send(SignalEvent::MatchFound {
                                partner_peer_id,
                                role,
                            });
                        }
                        Ok(ServerMessage::Pong) => {}
                        Ok(ServerMessage::Error { message }) => {
                            // The pier rejected something we sent; the search
                            // state on the server is unchanged, so log and
                            // carry on.
                            warn!(%message, "pier reported an error");
                        }
                        Err(err) => warn!(%err, "unparseable server message"),
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            let _ = events_tx.send(SignalEvent::Lost {
                reason: "channel closed".to_string(),
            });
        });

        let heartbeat_tx = outbound.clone();
        let heartbeat = tokio::spawn(async move {
            let mut ticker = interval(HEARTBEAT_INTERVAL);
            ticker.tick().await; // immediate first tick
            loop {
                ticker.tick().await;
                if heartbeat_tx.send(ClientMessage::Ping).is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            outbound,
            events,
            reader,
            heartbeat,
        })
    }
}

#[async_trait]
impl SignalChannel for WebSocketSignaling {
    fn send(&self, msg: &ClientMessage) -> Result<(), SignalError> {
        self.outbound
            .send(msg.clone())
            .map_err(|_| SignalError::Closed)
    }

    async fn next_event(&mut self) -> Option<SignalEvent> {
        self.events.recv().await
    }
}

impl Drop for WebSocketSignaling {
    fn drop(&mut self) {
        self.heartbeat.abort();
        self.reader.abort();
    }
}

/// Connector for a real pier
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl SignalConnector for WebSocketConnector {
    async fn connect(&self) -> Result<Box<dyn SignalChannel>, SignalError> {
        let channel = WebSocketSignaling::connect(&self.url).await?;
        Ok(Box::new(channel))
    }
}
