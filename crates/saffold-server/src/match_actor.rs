//! Match actor: the single writer of one match's state.
//!
//! Every intent, connection change and query for a match goes through one
//! inbox and is handled to completion before the next is taken. After each
//! change the actor saves a snapshot, sends every seat a fresh view, and
//! tells each seat whether it must act or wait.

use crate::persistence::{MatchRecord, StoreWriter};
use crate::session::{SessionCommand, SessionHandle, SessionStart};
use crate::transport::{MatchId, Notification, SeatId, Transport};
use crate::view::MatchView;
use saffold_core::{final_standings, ConnectionStatus, Intent, Match, PlayerId};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ActorError {
    #[error("Match {0} is no longer running")]
    MatchClosed(MatchId),

    #[error("Session for player {0} has ended")]
    SessionClosed(PlayerId),
}

/// Messages a match actor accepts
#[derive(Debug)]
pub enum MatchCommand {
    Intent { player: PlayerId, intent: Intent },
    Disconnected(PlayerId),
    Reconnected(PlayerId),
    Abandoned(PlayerId),
    /// Reply with a copy of the current state
    Snapshot(oneshot::Sender<Match>),
    /// End the match now
    Terminate,
}

/// Handle to a running match and its sessions
pub struct MatchHandle {
    pub id: MatchId,
    /// Seat ids in table order
    pub seats: Vec<SeatId>,
    tx: mpsc::UnboundedSender<MatchCommand>,
    sessions: Vec<SessionHandle>,
    task: JoinHandle<()>,
}

impl MatchHandle {
    /// Start the actor and one session per seat.
    ///
    /// Seats marked disconnected or abandoned in `game` get sessions that
    /// start in that state.
    pub fn spawn(
        id: MatchId,
        seats: Vec<SeatId>,
        game: Match,
        transport: Arc<dyn Transport>,
        writer: StoreWriter,
        timeout: Duration,
    ) -> Self {
        let (tx, inbox) = mpsc::unbounded_channel();

        let sessions: Vec<SessionHandle> = game
            .players
            .iter()
            .zip(&seats)
            .map(|(player, &seat)| {
                let start = match player.connection {
                    ConnectionStatus::Connected => SessionStart::Connected,
                    ConnectionStatus::Disconnected => SessionStart::Disconnected,
                    ConnectionStatus::Abandoned => SessionStart::Abandoned,
                };
                SessionHandle::spawn(
                    seat,
                    player.id,
                    start,
                    tx.clone(),
                    Arc::clone(&transport),
                    timeout,
                )
            })
            .collect();

        let actor = MatchActor {
            id,
            game,
            seats: seats.clone(),
            sessions: sessions.clone(),
            writer,
            inbox,
        };
        let task = tokio::spawn(actor.run());

        Self {
            id,
            seats,
            tx,
            sessions,
            task,
        }
    }

    pub fn send(&self, command: MatchCommand) -> Result<(), ActorError> {
        self.tx
            .send(command)
            .map_err(|_| ActorError::MatchClosed(self.id))
    }

    pub fn session(&self, player: PlayerId) -> Option<&SessionHandle> {
        self.sessions.get(player as usize)
    }

    /// Current state, as the actor sees it
    pub async fn snapshot(&self) -> Result<Match, ActorError> {
        let (reply, rx) = oneshot::channel();
        self.send(MatchCommand::Snapshot(reply))?;
        rx.await.map_err(|_| ActorError::MatchClosed(self.id))
    }

    /// Whether the actor has stopped
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

struct MatchActor {
    id: MatchId,
    game: Match,
    seats: Vec<SeatId>,
    sessions: Vec<SessionHandle>,
    writer: StoreWriter,
    inbox: mpsc::UnboundedReceiver<MatchCommand>,
}

impl MatchActor {
    async fn run(mut self) {
        info!(match_id = %self.id, players = self.game.player_count(), "match started");
        self.announce();

        while let Some(command) = self.inbox.recv().await {
            match command {
                MatchCommand::Intent { player, intent } => self.handle_intent(player, intent),
                MatchCommand::Disconnected(player) => {
                    self.set_connection(player, ConnectionStatus::Disconnected)
                }
                MatchCommand::Reconnected(player) => {
                    self.set_connection(player, ConnectionStatus::Connected)
                }
                MatchCommand::Abandoned(player) => {
                    self.set_connection(player, ConnectionStatus::Abandoned)
                }
                MatchCommand::Snapshot(reply) => {
                    let _ = reply.send(self.game.clone());
                }
                MatchCommand::Terminate => {
                    info!(match_id = %self.id, "match terminated");
                    self.game.terminate();
                    self.commit();
                }
            }

            if self.game.is_finished() {
                break;
            }
        }

        for session in &self.sessions {
            let _ = session.send(SessionCommand::Close);
        }
        info!(match_id = %self.id, "match ended");
    }

    fn handle_intent(&mut self, player: PlayerId, intent: Intent) {
        match self.game.apply(player, intent) {
            Ok(events) => {
                debug!(match_id = %self.id, player, events = events.len(), "intent applied");
                self.commit();
            }
            Err(err) => {
                if err.is_rule_violation() {
                    warn!(match_id = %self.id, player, "rule violation: {}", err);
                } else {
                    debug!(match_id = %self.id, player, "intent rejected: {}", err);
                }
                self.notify(
                    player,
                    Notification::Rejected {
                        reason: err.to_string(),
                    },
                );
            }
        }
    }

    fn set_connection(&mut self, player: PlayerId, status: ConnectionStatus) {
        if let Err(err) = self.game.set_connection(player, status) {
            warn!(match_id = %self.id, player, "connection change ignored: {}", err);
            return;
        }

        let forward = match status {
            ConnectionStatus::Connected => Some(SessionCommand::Connected),
            ConnectionStatus::Disconnected => Some(SessionCommand::Disconnected),
            ConnectionStatus::Abandoned => None,
        };
        if let Some(command) = forward {
            if let Some(session) = self.sessions.get(player as usize) {
                if session.send(command).is_err() {
                    warn!(match_id = %self.id, player, "session has ended");
                }
            }
        }

        self.commit();
    }

    /// Save the new state and tell every seat about it
    fn commit(&self) {
        self.writer.save(MatchRecord::new(
            self.id,
            self.seats.clone(),
            self.game.clone(),
        ));
        self.announce();
    }

    /// Send each live seat its view, then its prompt
    fn announce(&self) {
        let active = self.game.active_player();
        let decision = self.game.pending_decision();
        let standings = self
            .game
            .is_finished()
            .then(|| final_standings(&self.game));

        for player in &self.game.players {
            if !player.is_active() {
                continue;
            }
            let id = player.id;

            self.notify(
                id,
                Notification::StateChanged {
                    view: Box::new(MatchView::for_player(&self.game, id)),
                },
            );

            let prompt = match (&standings, active) {
                (Some(standings), _) => Notification::GameOver {
                    standings: standings.clone(),
                },
                (None, Some(actor)) if actor == id => {
                    let intents = self.game.valid_intents(id);
                    match &decision {
                        Some(decision) => Notification::YourDecision {
                            decision: decision.clone(),
                            intents,
                        },
                        None => Notification::YourTurn { intents },
                    }
                }
                (None, Some(actor)) => Notification::Waiting {
                    for_player: actor,
                    name: self.game.player_name(actor).to_string(),
                },
                (None, None) => continue,
            };
            self.notify(id, prompt);
        }
    }

    fn notify(&self, player: PlayerId, notification: Notification) {
        let delivered = self
            .sessions
            .get(player as usize)
            .map(|s| s.send(SessionCommand::Notify(notification)).is_ok())
            .unwrap_or(false);
        if !delivered {
            warn!(match_id = %self.id, player, "session unavailable; notification dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{MatchStore, MemoryStore};
    use crate::session::SessionStatus;
    use saffold_core::Stage;
    use uuid::Uuid;

    const TIMEOUT: Duration = Duration::from_secs(300);

    struct Harness {
        handle: MatchHandle,
        store: Arc<MemoryStore>,
        writer: StoreWriter,
        delivered: mpsc::UnboundedReceiver<(SeatId, Notification)>,
    }

    fn start(game: Match) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let writer = StoreWriter::spawn(store.clone());
        let (transport, delivered) = mpsc::unbounded_channel();
        let seats = game.players.iter().map(|_| Uuid::new_v4()).collect();
        let handle = MatchHandle::spawn(
            Uuid::new_v4(),
            seats,
            game,
            Arc::new(transport),
            writer.clone(),
            TIMEOUT,
        );
        Harness {
            handle,
            store,
            writer,
            delivered,
        }
    }

    fn started_match() -> Match {
        let mut game = Match::new("actor", vec!["Alice".into(), "Bob".into()]).unwrap();
        game.begin().unwrap();
        game
    }

    /// Everything delivered so far, once the actor and sessions are idle
    async fn drain(h: &mut Harness) -> Vec<(SeatId, Notification)> {
        settle().await;
        h.handle.snapshot().await.unwrap();
        settle().await;
        collect(h)
    }

    async fn drain_until_closed(h: &mut Harness) -> Vec<(SeatId, Notification)> {
        while !h.handle.is_finished() {
            tokio::task::yield_now().await;
        }
        settle().await;
        collect(h)
    }

    /// Let session tasks pass along whatever they hold
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn collect(h: &mut Harness) -> Vec<(SeatId, Notification)> {
        let mut out = Vec::new();
        while let Ok(item) = h.delivered.try_recv() {
            out.push(item);
        }
        out
    }

    #[tokio::test]
    async fn test_start_announces_turn_and_waiting() {
        let game = started_match();
        let first = game.turn_index;
        let mut h = start(game);
        let delivered = drain(&mut h).await;

        let first_seat = h.handle.seats[first as usize];
        let other_seat = h.handle.seats[1 - first as usize];

        assert!(delivered.iter().any(|(seat, n)| *seat == first_seat
            && matches!(n, Notification::YourTurn { intents } if !intents.is_empty())));
        assert!(delivered.iter().any(|(seat, n)| *seat == other_seat
            && matches!(n, Notification::Waiting { for_player, .. } if *for_player == first)));
        assert_eq!(
            h.handle.session(first).unwrap().status(),
            SessionStatus::Active
        );
    }

    #[tokio::test]
    async fn test_rejection_goes_only_to_sender() {
        let game = started_match();
        let waiting = 1 - game.turn_index;
        let mut h = start(game);
        drain(&mut h).await;

        h.handle
            .session(waiting)
            .unwrap()
            .submit(Intent::EndTurn)
            .unwrap();
        let delivered = drain(&mut h).await;

        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, h.handle.seats[waiting as usize]);
        assert_eq!(
            delivered[0].1,
            Notification::Rejected {
                reason: "Not your turn".into()
            }
        );
    }

    #[tokio::test]
    async fn test_applied_intent_is_saved_and_broadcast() {
        let game = started_match();
        let me = game.turn_index;
        let tile = game.playable_tiles(me)[0];
        let mut h = start(game);
        drain(&mut h).await;

        h.handle
            .session(me)
            .unwrap()
            .submit(Intent::PlaceTile(tile))
            .unwrap();
        let delivered = drain(&mut h).await;

        let views = delivered
            .iter()
            .filter(|(_, n)| matches!(n, Notification::StateChanged { .. }))
            .count();
        assert_eq!(views, 2);

        h.writer.flush().await;
        let saved = h.store.load(h.handle.id).unwrap();
        assert!(saved.state.board.is_placed(tile));
        assert_eq!(saved.seats, h.handle.seats);
    }

    #[tokio::test]
    async fn test_terminate_stops_actor_and_saves_end() {
        let mut h = start(started_match());
        drain(&mut h).await;

        h.handle.send(MatchCommand::Terminate).unwrap();
        let delivered = drain_until_closed(&mut h).await;
        assert!(delivered
            .iter()
            .any(|(_, n)| matches!(n, Notification::GameOver { .. })));

        h.writer.flush().await;
        assert_eq!(h.store.load(h.handle.id).unwrap().state.stage, Stage::End);
        assert!(h.handle.snapshot().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_seat_is_skipped() {
        let names = vec!["Alice".into(), "Bob".into(), "Carol".into()];
        let mut game = Match::new("abandon", names).unwrap();
        game.begin().unwrap();
        let first = game.turn_index;
        let mut h = start(game);
        drain(&mut h).await;

        h.handle
            .send(MatchCommand::Disconnected(first))
            .unwrap();
        tokio::time::sleep(TIMEOUT + Duration::from_secs(1)).await;

        let state = h.handle.snapshot().await.unwrap();
        assert_eq!(state.players[first as usize].connection, ConnectionStatus::Abandoned);
        assert_ne!(state.turn_index, first);
        assert_eq!(state.stage, Stage::Play);
    }
}
