//! Per-seat snapshots of a match.
//!
//! Every seat sees the whole board, all chains and every portfolio, but only
//! its own tiles. Snapshots are plain data built from a `Match` the actor
//! owns, never a live reference into it.

use saffold_core::{Board, ChainId, ConnectionStatus, Coord, Match, PlayerId, Tier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainView {
    pub id: ChainId,
    pub tier: Tier,
    pub founded: bool,
    pub size: usize,
    pub price: u32,
    pub safe: bool,
    pub available_shares: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatView {
    pub id: PlayerId,
    pub name: String,
    pub cash: u32,
    pub portfolio: BTreeMap<ChainId, u32>,
    pub hand_size: usize,
    pub connection: ConnectionStatus,
    pub last_placed: Option<Coord>,
}

/// What one seat is allowed to see
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchView {
    pub viewer: PlayerId,
    pub stage: String,
    pub turn: PlayerId,
    pub active_player: Option<PlayerId>,
    pub board: Board,
    pub chains: Vec<ChainView>,
    pub seats: Vec<SeatView>,
    /// The viewer's own tiles, sorted
    pub hand: Vec<Coord>,
    pub tiles_remaining: usize,
    pub log: Vec<String>,
}

impl MatchView {
    pub fn for_player(game: &Match, viewer: PlayerId) -> Self {
        let chains = game
            .chains
            .iter()
            .map(|chain| ChainView {
                id: chain.id,
                tier: chain.tier,
                founded: chain.founded,
                size: game.board.chain_size(chain.id),
                price: game.chains.price(&game.board, chain.id),
                safe: game.chains.is_safe(&game.board, chain.id),
                available_shares: chain.available_shares,
            })
            .collect();

        let seats = game
            .players
            .iter()
            .map(|p| SeatView {
                id: p.id,
                name: p.name.clone(),
                cash: p.cash,
                portfolio: p.portfolio.clone(),
                hand_size: p.hand.len(),
                connection: p.connection,
                last_placed: p.last_placed,
            })
            .collect();

        Self {
            viewer,
            stage: game.stage.name().to_string(),
            turn: game.turn_index,
            active_player: game.active_player(),
            board: game.board.clone(),
            chains,
            seats,
            hand: game
                .get_player(viewer)
                .map(|p| p.sorted_hand())
                .unwrap_or_default(),
            tiles_remaining: game.bag.len(),
            log: game.log.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_hides_other_hands() {
        let mut game = Match::new("view", vec!["Alice".into(), "Bob".into()]).unwrap();
        game.begin().unwrap();

        let view = MatchView::for_player(&game, 1);
        assert_eq!(view.hand, game.players[1].sorted_hand());
        assert!(view.seats.iter().all(|s| s.hand_size == 6));

        let json = serde_json::to_string(&view).unwrap();
        for tile in &game.players[0].hand {
            assert!(!json.contains(&format!("\"{}\"", tile)));
        }
    }

    #[test]
    fn test_view_reports_chain_prices() {
        let game = Match::new("view", vec!["Alice".into(), "Bob".into()]).unwrap();
        let view = MatchView::for_player(&game, 0);
        assert_eq!(view.stage, "draw");
        assert_eq!(view.chains.len(), 7);
        assert!(view.chains.iter().all(|c| !c.founded && c.available_shares == 25));
    }
}
