//! Player state: cash, tile hand and share portfolio.

use crate::chain::ChainId;
use crate::grid::Coord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Seat index in turn order
pub type PlayerId = u8;

/// Tiles held at the start of each turn
pub const HAND_SIZE: usize = 6;

/// Cash every player starts with
pub const STARTING_CASH: u32 = 6000;

/// Whether a seat is currently being played
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionStatus {
    #[default]
    Connected,
    Disconnected,
    /// Gone for good; the seat no longer takes part
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub cash: u32,
    /// Tiles not yet placed, at most [`HAND_SIZE`]
    pub hand: Vec<Coord>,
    /// Shares owned per chain. Absent means zero.
    pub portfolio: BTreeMap<ChainId, u32>,
    pub connection: ConnectionStatus,
    /// Most recent tile this player committed, for highlighting
    pub last_placed: Option<Coord>,
}

impl Player {
    pub fn new(id: PlayerId, name: String) -> Self {
        Self {
            id,
            name,
            cash: STARTING_CASH,
            hand: Vec::with_capacity(HAND_SIZE),
            portfolio: BTreeMap::new(),
            connection: ConnectionStatus::Connected,
            last_placed: None,
        }
    }

    pub fn shares(&self, chain: ChainId) -> u32 {
        self.portfolio.get(&chain).copied().unwrap_or(0)
    }

    pub fn add_shares(&mut self, chain: ChainId, count: u32) {
        if count > 0 {
            *self.portfolio.entry(chain).or_insert(0) += count;
        }
    }

    /// Remove shares, dropping the entry when it reaches zero.
    /// Returns false (and changes nothing) when the player holds too few.
    pub fn remove_shares(&mut self, chain: ChainId, count: u32) -> bool {
        let held = self.shares(chain);
        if held < count {
            return false;
        }
        if held == count {
            self.portfolio.remove(&chain);
        } else {
            self.portfolio.insert(chain, held - count);
        }
        true
    }

    pub fn holds_tile(&self, coord: Coord) -> bool {
        self.hand.contains(&coord)
    }

    /// Remove a tile from hand; returns whether it was there
    pub fn remove_tile(&mut self, coord: Coord) -> bool {
        match self.hand.iter().position(|&t| t == coord) {
            Some(pos) => {
                self.hand.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn hand_is_full(&self) -> bool {
        self.hand.len() >= HAND_SIZE
    }

    /// Hand in display order
    pub fn sorted_hand(&self) -> Vec<Coord> {
        let mut hand = self.hand.clone();
        hand.sort();
        hand
    }

    pub fn is_active(&self) -> bool {
        self.connection != ConnectionStatus::Abandoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(s: &str) -> Coord {
        s.parse().unwrap()
    }

    #[test]
    fn test_new_player_defaults() {
        let player = Player::new(2, "Carol".into());
        assert_eq!(player.cash, STARTING_CASH);
        assert!(player.hand.is_empty());
        assert!(player.portfolio.is_empty());
        assert_eq!(player.connection, ConnectionStatus::Connected);
    }

    #[test]
    fn test_share_bookkeeping() {
        let mut player = Player::new(0, "Alice".into());
        player.add_shares(ChainId::Messla, 3);
        player.add_shares(ChainId::Messla, 0);
        assert_eq!(player.shares(ChainId::Messla), 3);

        assert!(!player.remove_shares(ChainId::Messla, 4));
        assert_eq!(player.shares(ChainId::Messla), 3);

        assert!(player.remove_shares(ChainId::Messla, 3));
        assert!(!player.portfolio.contains_key(&ChainId::Messla));
    }

    #[test]
    fn test_hand_operations() {
        let mut player = Player::new(0, "Alice".into());
        player.hand = vec![c("C3"), c("A9"), c("B1")];

        assert!(player.holds_tile(c("A9")));
        assert_eq!(player.sorted_hand(), vec![c("A9"), c("B1"), c("C3")]);

        assert!(player.remove_tile(c("A9")));
        assert!(!player.remove_tile(c("A9")));
        assert_eq!(player.hand.len(), 2);
        assert!(!player.hand_is_full());
    }
}
