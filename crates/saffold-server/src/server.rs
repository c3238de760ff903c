//! WebSocket server and connection handling.

use crate::manager::MatchManager;
use crate::protocol::{ClientMessage, SeatInfo, ServerMessage};
use crate::transport::{Notification, SeatId, Transport};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use saffold_core::PlayerId;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Outgoing channels of the connections currently attached to seats.
#[derive(Default)]
pub struct ConnectionRegistry {
    senders: DashMap<SeatId, mpsc::UnboundedSender<ServerMessage>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a connection to a seat, replacing any older one
    pub fn register(&self, seat: SeatId, tx: mpsc::UnboundedSender<ServerMessage>) {
        if self.senders.insert(seat, tx).is_some() {
            debug!(seat = %seat, "replaced older connection for seat");
        }
    }

    pub fn remove(&self, seat: SeatId) {
        self.senders.remove(&seat);
    }

    /// Remove the seat only if `tx` is still the connection attached to it
    pub fn release(&self, seat: SeatId, tx: &mpsc::UnboundedSender<ServerMessage>) -> bool {
        self.senders
            .remove_if(&seat, |_, current| current.same_channel(tx))
            .is_some()
    }

    pub fn is_attached(&self, seat: SeatId) -> bool {
        self.senders.contains_key(&seat)
    }
}

impl Transport for ConnectionRegistry {
    fn deliver(&self, seat: SeatId, notification: Notification) {
        if let Some(sender) = self.senders.get(&seat) {
            let _ = sender.send(ServerMessage::Notification(notification));
        }
    }
}

/// Server state shared across all connections.
pub struct ServerState {
    pub manager: Arc<MatchManager>,
    pub registry: Arc<ConnectionRegistry>,
}

impl ServerState {
    pub fn new(manager: Arc<MatchManager>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { manager, registry }
    }
}

/// Run the WebSocket server.
pub async fn run_server(addr: SocketAddr, state: Arc<ServerState>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Saffold server listening on {}", addr);

    while let Ok((stream, peer_addr)) = listener.accept().await {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer_addr, state).await {
                error!("Connection error from {}: {}", peer_addr, e);
            }
        });
    }

    Ok(())
}

/// Handle a single WebSocket connection.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    state: Arc<ServerState>,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream).await?;
    info!("New WebSocket connection from {}", addr);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Create channel for outgoing messages
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Spawn task to forward messages from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(text) = serde_json::to_string(&msg) {
                if ws_sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    let mut seat: Option<SeatId> = None;

    // Handle incoming messages
    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => {
                    if let Err(message) = handle_message(client_msg, &mut seat, &tx, &state) {
                        let _ = tx.send(ServerMessage::Error { message });
                    }
                }
                Err(e) => {
                    warn!("Invalid message from {}: {}", addr, e);
                    let _ = tx.send(ServerMessage::Error {
                        message: format!("Invalid message: {}", e),
                    });
                }
            },
            Ok(Message::Close(_)) => {
                info!("Client {} closing connection", addr);
                break;
            }
            Ok(Message::Ping(_)) => {
                let _ = tx.send(ServerMessage::Pong);
            }
            Err(e) => {
                error!("WebSocket error from {}: {}", addr, e);
                break;
            }
            _ => {}
        }
    }

    // Clean up on disconnect, unless a newer connection took the seat over
    if let Some(seat) = seat {
        if state.registry.release(seat, &tx) {
            detach(seat, &state);
        }
    }
    send_task.abort();

    info!("Connection closed for {}", addr);
    Ok(())
}

/// Handle a client message. Errors go back to the client as text.
fn handle_message(
    msg: ClientMessage,
    seat: &mut Option<SeatId>,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    state: &ServerState,
) -> Result<(), String> {
    match msg {
        ClientMessage::CreateMatch { players, seed } => {
            let created = state
                .manager
                .create_match(players.clone(), seed)
                .map_err(|e| e.to_string())?;
            let seats = created
                .seats
                .iter()
                .zip(players)
                .enumerate()
                .map(|(idx, (&seat_id, name))| SeatInfo {
                    player: idx as PlayerId,
                    name,
                    seat_id,
                })
                .collect();
            let _ = tx.send(ServerMessage::MatchCreated {
                match_id: created.match_id,
                seats,
            });
        }

        ClientMessage::JoinMatch { match_id, seat_id } => {
            // Validate before attaching so a bad join leaves the connection as it was
            let (owner, player) = state.manager.locate(seat_id).map_err(|e| e.to_string())?;
            if owner != match_id {
                return Err(format!("Seat {} is not part of match {}", seat_id, match_id));
            }

            if let Some(previous) = seat.take() {
                if previous != seat_id {
                    detach(previous, state);
                }
            }
            state.registry.register(seat_id, tx.clone());
            *seat = Some(seat_id);

            // Joined goes out before the session's catch-up notifications
            let _ = tx.send(ServerMessage::Joined { match_id, player });
            if let Err(e) = state.manager.connect(match_id, seat_id) {
                state.registry.remove(seat_id);
                *seat = None;
                return Err(e.to_string());
            }
        }

        ClientMessage::Intent { intent } => {
            let seat = seat.ok_or_else(|| "Join a match first".to_string())?;
            state
                .manager
                .submit(seat, intent)
                .map_err(|e| e.to_string())?;
        }

        ClientMessage::Ping => {
            let _ = tx.send(ServerMessage::Pong);
        }
    }
    Ok(())
}

/// Drop a seat's connection and tell its match.
fn detach(seat: SeatId, state: &ServerState) {
    state.registry.remove(seat);
    if let Err(e) = state.manager.disconnect(seat) {
        debug!(seat = %seat, "disconnect not delivered: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;
    use std::time::Duration;
    use uuid::Uuid;

    fn state() -> ServerState {
        let registry = Arc::new(ConnectionRegistry::new());
        let manager = MatchManager::new(
            Arc::new(MemoryStore::new()),
            registry.clone(),
            Duration::from_secs(300),
        );
        ServerState::new(Arc::new(manager), registry)
    }

    fn create(
        state: &ServerState,
        tx: &mpsc::UnboundedSender<ServerMessage>,
        rx: &mut mpsc::UnboundedReceiver<ServerMessage>,
    ) -> (Uuid, Vec<SeatInfo>) {
        let mut seat = None;
        handle_message(
            ClientMessage::CreateMatch {
                players: vec!["Alice".into(), "Bob".into()],
                seed: Some("wire".into()),
            },
            &mut seat,
            tx,
            state,
        )
        .unwrap();
        assert!(seat.is_none());
        match rx.try_recv().unwrap() {
            ServerMessage::MatchCreated { match_id, seats } => (match_id, seats),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_registry_wraps_notifications() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let seat = Uuid::new_v4();
        registry.register(seat, tx);

        registry.deliver(
            seat,
            Notification::Rejected {
                reason: "no".into(),
            },
        );
        registry.deliver(Uuid::new_v4(), Notification::YourTurn { intents: vec![] });

        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerMessage::Notification(Notification::Rejected { .. })
        ));
        assert!(rx.try_recv().is_err());

        let (other, _other_rx) = mpsc::unbounded_channel();
        assert!(!registry.release(seat, &other));
        assert!(registry.is_attached(seat));

        registry.remove(seat);
        assert!(!registry.is_attached(seat));
    }

    #[tokio::test]
    async fn test_create_match_lists_seats() {
        let state = state();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_, seats) = create(&state, &tx, &mut rx);

        assert_eq!(seats.len(), 2);
        assert_eq!(seats[0].name, "Alice");
        assert_eq!(seats[1].player, 1);
        assert_ne!(seats[0].seat_id, seats[1].seat_id);
    }

    #[tokio::test]
    async fn test_intent_requires_join() {
        let state = state();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut seat = None;
        let err = handle_message(
            ClientMessage::Intent {
                intent: saffold_core::Intent::EndTurn,
            },
            &mut seat,
            &tx,
            &state,
        )
        .unwrap_err();
        assert_eq!(err, "Join a match first");
    }

    #[tokio::test]
    async fn test_join_attaches_seat() {
        let state = state();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (match_id, seats) = create(&state, &tx, &mut rx);

        let mut seat = None;
        handle_message(
            ClientMessage::JoinMatch {
                match_id,
                seat_id: seats[1].seat_id,
            },
            &mut seat,
            &tx,
            &state,
        )
        .unwrap();

        assert_eq!(seat, Some(seats[1].seat_id));
        assert!(state.registry.is_attached(seats[1].seat_id));
        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerMessage::Joined { player: 1, .. }
        ));

        // The session replays its latest view and prompt
        let mut saw_view = false;
        while let Some(msg) = rx.recv().await {
            if let ServerMessage::Notification(note) = msg {
                if matches!(note, Notification::StateChanged { .. }) {
                    saw_view = true;
                }
                if note.is_prompt() {
                    break;
                }
            }
        }
        assert!(saw_view);
    }

    #[tokio::test]
    async fn test_join_wrong_match_is_refused() {
        let state = state();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_, seats) = create(&state, &tx, &mut rx);

        let mut seat = None;
        let err = handle_message(
            ClientMessage::JoinMatch {
                match_id: Uuid::new_v4(),
                seat_id: seats[0].seat_id,
            },
            &mut seat,
            &tx,
            &state,
        )
        .unwrap_err();
        assert!(err.contains("is not part of match"));
        assert!(seat.is_none());
        assert!(!state.registry.is_attached(seats[0].seat_id));
    }

    #[tokio::test]
    async fn test_detach_marks_session_disconnected() {
        let state = state();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (match_id, seats) = create(&state, &tx, &mut rx);
        let seat_id = seats[0].seat_id;

        let mut seat = None;
        handle_message(
            ClientMessage::JoinMatch { match_id, seat_id },
            &mut seat,
            &tx,
            &state,
        )
        .unwrap();
        detach(seat_id, &state);

        let snapshot = state.manager.snapshot(match_id).await.unwrap();
        assert_eq!(
            snapshot.players[0].connection,
            saffold_core::ConnectionStatus::Disconnected
        );
        assert!(!state.registry.is_attached(seat_id));
    }
}
