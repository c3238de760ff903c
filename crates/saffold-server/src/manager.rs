//! Live match registry.
//!
//! The manager creates and restores match actors and routes seat traffic to
//! them. It never touches match state itself.

use crate::match_actor::{ActorError, MatchCommand, MatchHandle};
use crate::persistence::{MatchRecord, MatchStore, StoreError, StoreWriter};
use crate::transport::{MatchId, SeatId, Transport};
use dashmap::DashMap;
use saffold_core::{ConnectionStatus, GameError, Intent, Match, PlayerId};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("Unknown seat {0}")]
    UnknownSeat(SeatId),

    #[error("Unknown match {0}")]
    UnknownMatch(MatchId),

    #[error("Seat {seat} is not part of match {match_id}")]
    SeatNotInMatch { seat: SeatId, match_id: MatchId },

    #[error(transparent)]
    Game(#[from] GameError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Actor(#[from] ActorError),
}

/// A newly created match
#[derive(Debug, Clone)]
pub struct CreatedMatch {
    pub match_id: MatchId,
    /// Seat ids in table order
    pub seats: Vec<SeatId>,
}

pub struct MatchManager {
    matches: DashMap<MatchId, MatchHandle>,
    seats: DashMap<SeatId, (MatchId, PlayerId)>,
    store: Arc<dyn MatchStore>,
    writer: StoreWriter,
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl MatchManager {
    /// Must be called inside a Tokio runtime
    pub fn new(store: Arc<dyn MatchStore>, transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self {
            matches: DashMap::new(),
            seats: DashMap::new(),
            writer: StoreWriter::spawn(Arc::clone(&store)),
            store,
            transport,
            timeout,
        }
    }

    /// Seat the players, deal, and start the match.
    ///
    /// Without a seed the match id is used, so every match gets its own bag.
    pub fn create_match(
        &self,
        players: Vec<String>,
        seed: Option<String>,
    ) -> Result<CreatedMatch, ManagerError> {
        self.prune();

        let match_id = Uuid::new_v4();
        let seed = seed.unwrap_or_else(|| match_id.to_string());
        let mut game = Match::new(seed, players)?;
        game.begin()?;

        let seats: Vec<SeatId> = game.players.iter().map(|_| Uuid::new_v4()).collect();
        self.writer
            .save(MatchRecord::new(match_id, seats.clone(), game.clone()));
        info!(match_id = %match_id, players = seats.len(), "match created");

        self.start(match_id, seats.clone(), game);
        Ok(CreatedMatch { match_id, seats })
    }

    /// Bring back every unfinished match in the store.
    ///
    /// Nobody is connected after a restart, so every remaining seat starts
    /// disconnected with its abandon timer running. Returns how many matches
    /// were restored.
    pub fn restore(&self) -> Result<usize, ManagerError> {
        let mut restored = 0;

        for match_id in self.store.list()? {
            let record = match self.store.load(match_id) {
                Ok(record) => record,
                Err(e) => {
                    warn!(match_id = %match_id, "skipping saved match: {}", e);
                    continue;
                }
            };
            if record.state.is_finished() || self.matches.contains_key(&match_id) {
                continue;
            }

            let mut game = record.state;
            for player in game.players.iter_mut() {
                if player.connection == ConnectionStatus::Connected {
                    player.connection = ConnectionStatus::Disconnected;
                }
            }

            self.start(match_id, record.seats, game);
            restored += 1;
        }

        info!(count = restored, "restored saved matches");
        Ok(restored)
    }

    fn start(&self, match_id: MatchId, seats: Vec<SeatId>, game: Match) {
        for (idx, &seat) in seats.iter().enumerate() {
            self.seats.insert(seat, (match_id, idx as PlayerId));
        }
        let handle = MatchHandle::spawn(
            match_id,
            seats,
            game,
            Arc::clone(&self.transport),
            self.writer.clone(),
            self.timeout,
        );
        self.matches.insert(match_id, handle);
    }

    /// Which match and player a seat belongs to
    pub fn locate(&self, seat: SeatId) -> Result<(MatchId, PlayerId), ManagerError> {
        self.seats
            .get(&seat)
            .map(|entry| *entry)
            .ok_or(ManagerError::UnknownSeat(seat))
    }

    /// Route an intent through the seat's session
    pub fn submit(&self, seat: SeatId, intent: Intent) -> Result<(), ManagerError> {
        let (match_id, player) = self.locate(seat)?;
        let handle = self
            .matches
            .get(&match_id)
            .ok_or(ManagerError::UnknownMatch(match_id))?;
        let session = handle
            .session(player)
            .ok_or(ManagerError::UnknownSeat(seat))?;
        session.submit(intent)?;
        Ok(())
    }

    /// A client has attached to a seat
    pub fn connect(&self, match_id: MatchId, seat: SeatId) -> Result<PlayerId, ManagerError> {
        let (owner, player) = self.locate(seat)?;
        if owner != match_id {
            return Err(ManagerError::SeatNotInMatch { seat, match_id });
        }
        self.send(match_id, MatchCommand::Reconnected(player))?;
        Ok(player)
    }

    /// A seat's client went away
    pub fn disconnect(&self, seat: SeatId) -> Result<(), ManagerError> {
        let (match_id, player) = self.locate(seat)?;
        self.send(match_id, MatchCommand::Disconnected(player))
    }

    pub fn terminate(&self, match_id: MatchId) -> Result<(), ManagerError> {
        self.send(match_id, MatchCommand::Terminate)
    }

    /// Current state of a live match
    pub async fn snapshot(&self, match_id: MatchId) -> Result<Match, ManagerError> {
        let (reply, rx) = tokio::sync::oneshot::channel();
        self.send(match_id, MatchCommand::Snapshot(reply))?;
        rx.await
            .map_err(|_| ManagerError::Actor(ActorError::MatchClosed(match_id)))
    }

    /// Drop a match and its seats
    pub fn remove(&self, match_id: MatchId) -> bool {
        match self.matches.remove(&match_id) {
            Some((_, handle)) => {
                for seat in &handle.seats {
                    self.seats.remove(seat);
                }
                true
            }
            None => false,
        }
    }

    /// Drop every match whose actor has stopped
    pub fn prune(&self) -> usize {
        let finished: Vec<MatchId> = self
            .matches
            .iter()
            .filter(|entry| entry.is_finished())
            .map(|entry| *entry.key())
            .collect();
        for &id in &finished {
            self.remove(id);
        }
        finished.len()
    }

    pub fn live_matches(&self) -> usize {
        self.matches.len()
    }

    fn send(&self, match_id: MatchId, command: MatchCommand) -> Result<(), ManagerError> {
        let handle = self
            .matches
            .get(&match_id)
            .ok_or(ManagerError::UnknownMatch(match_id))?;
        handle.send(command)?;
        Ok(())
    }
}
