use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use drift_proto::{ClientMessage, ServerMessage};

use crate::registry::{MatchRegistry, PairOutcome, PairedSession, RegistryError, WaitingEntry};

/// Server-side state for one signaling channel
struct ChannelHandle {
    tx: mpsc::UnboundedSender<ServerMessage>,
    last_heartbeat: Mutex<Instant>,
}

/// Shared state: the registry plus the fan-out map used to reach every
/// connected channel by connection id.
#[derive(Clone)]
pub struct SignalingState {
    registry: Arc<MatchRegistry>,
    channels: Arc<DashMap<String, Arc<ChannelHandle>>>,
}

impl SignalingState {
    pub fn new(registry: Arc<MatchRegistry>) -> Self {
        Self {
            registry,
            channels: Arc::new(DashMap::new()),
        }
    }

    pub fn registry(&self) -> &MatchRegistry {
        &self.registry
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Periodically drop channels whose heartbeat went stale and release
    /// whatever they held in the registry.
    pub fn spawn_sweeper(&self, interval: Duration, timeout: Duration) {
        let state = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;

                let stale: Vec<String> = state
                    .channels
                    .iter()
                    .filter(|entry| {
                        let last = *entry.value().last_heartbeat.lock().unwrap_or_else(|e| e.into_inner());
                        last.elapsed() > timeout
                    })
                    .map(|entry| entry.key().clone())
                    .collect();

                for connection_id in stale {
                    info!(%connection_id, "dropping stale channel (heartbeat timeout)");
                    state.channels.remove(&connection_id);
                    state.registry.release(&connection_id);
                }
            }
        });
    }

    /// Send a message to a specific channel. Returns false if the channel is
    /// gone or its writer task has shut down.
    fn send_to(&self, connection_id: &str, message: ServerMessage) -> bool {
        match self.channels.get(connection_id) {
            Some(handle) => handle.tx.send(message).is_ok(),
            None => false,
        }
    }

    /// Hand the match notification to both members. Exactly one
    /// `match-found` goes to each side; the session only turns Active once
    /// both hand-offs succeed. If a member's channel is already gone the
    /// session is torn down on the spot and the survivor recovers through
    /// its own handshake timeout.
    fn notify_pairing(&self, session: &PairedSession) {
        let caller_ok = self.send_to(
            &session.caller.connection_id,
            ServerMessage::MatchFound {
                partner_peer_id: session.receiver.peer_id.clone(),
                role: drift_proto::PairRole::Caller,
            },
        );
        let receiver_ok = self.send_to(
            &session.receiver.connection_id,
            ServerMessage::MatchFound {
                partner_peer_id: session.caller.peer_id.clone(),
                role: drift_proto::PairRole::Receiver,
            },
        );

        if caller_ok && receiver_ok {
            self.registry.mark_active(&session.session_id);
            return;
        }

        let gone = if caller_ok {
            &session.receiver.connection_id
        } else {
            &session.caller.connection_id
        };
        warn!(
            session_id = %session.session_id,
            connection_id = %gone,
            "pairing member unreachable at notification time; closing session"
        );
        self.registry.release(gone);
    }
}

/// WebSocket upgrade handler for `GET /ws`
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<SignalingState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive one signaling channel from upgrade to teardown
async fn handle_socket(socket: WebSocket, state: SignalingState) {
    let connection_id = Uuid::new_v4().to_string();
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Writer task: everything addressed to this channel funnels through one
    // mpsc so registry notifications never block on the socket.
    let writer_id = connection_id.clone();
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(connection_id = %writer_id, %err, "failed to encode server message");
                }
            }
        }
        debug!(connection_id = %writer_id, "writer task ended");
    });

    state.channels.insert(
        connection_id.clone(),
        Arc::new(ChannelHandle {
            tx: tx.clone(),
            last_heartbeat: Mutex::new(Instant::now()),
        }),
    );
    debug!(%connection_id, "channel connected");

    while let Some(frame) = receiver.next().await {
        let frame = match frame {
            Ok(f) => f,
            Err(err) => {
                debug!(%connection_id, %err, "channel read error");
                break;
            }
        };

        match frame {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => handle_client_message(msg, &connection_id, &state, &tx),
                Err(err) => {
                    warn!(%connection_id, %err, "unparseable client message");
                    let _ = tx.send(ServerMessage::Error {
                        message: format!("invalid message format: {err}"),
                    });
                }
            },
            Message::Close(_) => {
                debug!(%connection_id, "close frame");
                break;
            }
            // Protocol-level keepalive rides on json ping, not ws frames
            _ => {}
        }
    }

    // Channel closure is an implicit stop-search plus session teardown.
    state.channels.remove(&connection_id);
    let released = state.registry.release(&connection_id);
    if released.was_waiting || released.closed_session.is_some() {
        debug!(
            %connection_id,
            was_waiting = released.was_waiting,
            closed_session = released.closed_session.is_some(),
            "channel teardown released registry state"
        );
    }
    debug!(%connection_id, "channel disconnected");
}

fn handle_client_message(
    message: ClientMessage,
    connection_id: &str,
    state: &SignalingState,
    tx: &mpsc::UnboundedSender<ServerMessage>,
) {
    match message {
        ClientMessage::StartSearch {
            peer_id,
            attributes,
        } => {
            info!(%connection_id, %peer_id, interests = ?attributes.interests, "start-search");
            let entry = WaitingEntry::new(connection_id.to_string(), peer_id, attributes);
            match state.registry.find_and_pair(entry) {
                // NoMatchAvailable is not an error; the entry simply waits.
                Ok(PairOutcome::Queued) => {}
                Ok(PairOutcome::Paired(session)) => state.notify_pairing(&session),
                Err(err @ RegistryError::DuplicateEntry(_)) => {
                    warn!(%connection_id, %err, "rejected search");
                    let _ = tx.send(ServerMessage::Error {
                        message: err.to_string(),
                    });
                }
            }
        }
        ClientMessage::StopSearch => {
            info!(%connection_id, "stop-search");
            state.registry.release(connection_id);
        }
        ClientMessage::Ping => {
            if let Some(handle) = state.channels.get(connection_id) {
                *handle.last_heartbeat.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
            }
            let _ = tx.send(ServerMessage::Pong);
        }
    }
}
