//! Stockholder bonuses and liquidation order.
//!
//! Both are pure functions of the players' portfolios so they can be shared
//! by merger resolution and end-of-game scoring.

use crate::actions::{Bonus, BonusKind};
use crate::chain::{ChainId, MAJORITY_MULTIPLIER, MINORITY_MULTIPLIER};
use crate::player::{Player, PlayerId};

/// Majority and minority bonuses for one chain at a fixed share price.
///
/// - One largest holder takes `price × 10`. If exactly one holding size sits
///   below it, those holders take `price × 5`, split evenly when tied.
/// - Several largest holders pool `price × 15` and split it evenly; nobody
///   gets a separate minority bonus.
/// - No second holding means no minority bonus.
///
/// Splits round down. Results are in seat order within each bonus kind.
pub fn merger_bonuses(players: &[Player], chain: ChainId, price: u32) -> Vec<Bonus> {
    let holdings: Vec<(PlayerId, u32)> = players
        .iter()
        .map(|p| (p.id, p.shares(chain)))
        .filter(|&(_, shares)| shares > 0)
        .collect();

    let Some(top) = holdings.iter().map(|&(_, s)| s).max() else {
        return Vec::new();
    };

    let majority = MAJORITY_MULTIPLIER * price;
    let minority = MINORITY_MULTIPLIER * price;

    let leaders: Vec<PlayerId> = holders_with(&holdings, top);
    if leaders.len() > 1 {
        let share = (majority + minority) / leaders.len() as u32;
        return leaders
            .into_iter()
            .map(|player| Bonus {
                player,
                chain,
                kind: BonusKind::SharedMajority,
                amount: share,
            })
            .collect();
    }

    let mut bonuses = vec![Bonus {
        player: leaders[0],
        chain,
        kind: BonusKind::Majority,
        amount: majority,
    }];

    let second = holdings
        .iter()
        .map(|&(_, s)| s)
        .filter(|&s| s < top)
        .max();

    if let Some(second) = second {
        let runners_up = holders_with(&holdings, second);
        let (kind, amount) = if runners_up.len() > 1 {
            (BonusKind::SharedMinority, minority / runners_up.len() as u32)
        } else {
            (BonusKind::Minority, minority)
        };
        bonuses.extend(runners_up.into_iter().map(|player| Bonus {
            player,
            chain,
            kind,
            amount,
        }));
    }

    bonuses
}

fn holders_with(holdings: &[(PlayerId, u32)], shares: u32) -> Vec<PlayerId> {
    holdings
        .iter()
        .filter(|&&(_, s)| s == shares)
        .map(|&(p, _)| p)
        .collect()
}

/// Shareholders of `chain` in table order, starting with `start` and
/// wrapping around. Abandoned seats are left out; their shares stay held.
pub fn liquidation_queue(players: &[Player], chain: ChainId, start: PlayerId) -> Vec<PlayerId> {
    let count = players.len();
    (0..count)
        .map(|offset| &players[(start as usize + offset) % count])
        .filter(|p| p.is_active() && p.shares(chain) > 0)
        .map(|p| p.id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::ConnectionStatus;

    fn table(holdings: &[u32]) -> Vec<Player> {
        holdings
            .iter()
            .enumerate()
            .map(|(i, &shares)| {
                let mut p = Player::new(i as PlayerId, format!("P{}", i));
                p.add_shares(ChainId::Messla, shares);
                p
            })
            .collect()
    }

    fn amounts(bonuses: &[Bonus]) -> Vec<(PlayerId, BonusKind, u32)> {
        bonuses.iter().map(|b| (b.player, b.kind, b.amount)).collect()
    }

    #[test]
    fn test_majority_and_minority() {
        let players = table(&[5, 3, 0]);
        let bonuses = merger_bonuses(&players, ChainId::Messla, 500);
        assert_eq!(
            amounts(&bonuses),
            vec![(0, BonusKind::Majority, 5000), (1, BonusKind::Minority, 2500)]
        );
    }

    #[test]
    fn test_majority_tie_pools_both_bonuses() {
        let players = table(&[5, 5, 2]);
        let bonuses = merger_bonuses(&players, ChainId::Messla, 400);
        assert_eq!(
            amounts(&bonuses),
            vec![
                (0, BonusKind::SharedMajority, 3000),
                (1, BonusKind::SharedMajority, 3000)
            ]
        );
    }

    #[test]
    fn test_three_way_majority_tie_rounds_down() {
        let players = table(&[4, 4, 4]);
        let bonuses = merger_bonuses(&players, ChainId::Messla, 300);
        // 4500 / 3
        assert!(bonuses.iter().all(|b| b.amount == 1500));
        assert_eq!(bonuses.len(), 3);

        let players = table(&[2, 2, 2]);
        let bonuses = merger_bonuses(&players, ChainId::Messla, 700);
        // 10500 / 3
        assert!(bonuses.iter().all(|b| b.amount == 3500));
    }

    #[test]
    fn test_sole_holder_gets_no_minority() {
        let players = table(&[0, 7, 0]);
        let bonuses = merger_bonuses(&players, ChainId::Messla, 600);
        assert_eq!(amounts(&bonuses), vec![(1, BonusKind::Majority, 6000)]);
    }

    #[test]
    fn test_minority_tie_splits() {
        let players = table(&[6, 2, 2]);
        let bonuses = merger_bonuses(&players, ChainId::Messla, 300);
        assert_eq!(
            amounts(&bonuses),
            vec![
                (0, BonusKind::Majority, 3000),
                (1, BonusKind::SharedMinority, 750),
                (2, BonusKind::SharedMinority, 750)
            ]
        );
    }

    #[test]
    fn test_no_holders_no_bonuses() {
        let players = table(&[0, 0]);
        assert!(merger_bonuses(&players, ChainId::Messla, 300).is_empty());
    }

    #[test]
    fn test_queue_starts_at_turn_player_and_wraps() {
        let players = table(&[2, 0, 1, 4]);
        assert_eq!(liquidation_queue(&players, ChainId::Messla, 2), vec![2, 3, 0]);
        assert_eq!(liquidation_queue(&players, ChainId::Messla, 0), vec![0, 2, 3]);
    }

    #[test]
    fn test_queue_skips_abandoned_seats() {
        let mut players = table(&[2, 3, 1]);
        players[1].connection = ConnectionStatus::Abandoned;
        assert_eq!(liquidation_queue(&players, ChainId::Messla, 0), vec![0, 2]);
    }
}
