//! End-of-game scoring.
//!
//! When a match ends, every chain still on the board pays its stockholder
//! bonuses and every share is sold back at the chain's current price.
//! Scoring is a read-only view over the final `Match`; it never mutates it.

use crate::chain::ChainId;
use crate::game::Match;
use crate::merger;
use crate::player::PlayerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One player's final result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
    pub player: PlayerId,
    pub name: String,
    /// Cash on hand when the game ended
    pub cash: u32,
    /// Final bonuses per chain
    pub bonuses: BTreeMap<ChainId, u32>,
    /// Proceeds from selling every share back
    pub sales: u32,
    pub total: u32,
    /// 1 for the winner; equal totals share a rank
    pub rank: usize,
}

/// Final standings, best first. Seats with equal totals keep table order.
pub fn final_standings(game: &Match) -> Vec<Standing> {
    let mut standings: Vec<Standing> = game
        .players
        .iter()
        .map(|p| Standing {
            player: p.id,
            name: p.name.clone(),
            cash: p.cash,
            bonuses: BTreeMap::new(),
            sales: 0,
            total: 0,
            rank: 0,
        })
        .collect();

    for chain in game.chains.founded() {
        let price = game.chains.price(&game.board, chain);
        for bonus in merger::merger_bonuses(&game.players, chain, price) {
            *standings[bonus.player as usize]
                .bonuses
                .entry(chain)
                .or_insert(0) += bonus.amount;
        }
        for player in &game.players {
            standings[player.id as usize].sales += player.shares(chain) * price;
        }
    }

    for s in standings.iter_mut() {
        s.total = s.cash + s.sales + s.bonuses.values().sum::<u32>();
    }

    standings.sort_by(|a, b| b.total.cmp(&a.total).then(a.player.cmp(&b.player)));

    let mut rank = 0;
    let mut last_total = None;
    for (i, s) in standings.iter_mut().enumerate() {
        if last_total != Some(s.total) {
            rank = i + 1;
            last_total = Some(s.total);
        }
        s.rank = rank;
    }

    standings
}

/// Seats sharing first place
pub fn winners(standings: &[Standing]) -> Vec<PlayerId> {
    standings
        .iter()
        .filter(|s| s.rank == 1)
        .map(|s| s.player)
        .collect()
}
