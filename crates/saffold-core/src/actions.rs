//! Player intents and the events they produce.
//!
//! Intents are what a seat asks for; events are what actually happened.
//! Every applied intent yields one or more events, which are also rendered
//! into the match log.

use crate::chain::ChainId;
use crate::grid::Coord;
use crate::player::PlayerId;
use serde::{Deserialize, Serialize};

/// Everything a player can ask the engine to do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Intent {
    // ==================== Placement ====================
    /// Put a tile from hand on the board
    PlaceTile(Coord),
    /// Skip placement because no tile in hand can legally be played
    PassPlacement,
    /// Name the chain founded by the pending tile
    FoundChain(ChainId),
    /// Pick the surviving chain of a tied merger
    ChooseSurvivor(ChainId),
    /// Take back a tile whose decision hasn't been made yet
    CancelPlacement,

    // ==================== Merger ====================
    /// Acknowledge the bonus payout and start liquidation
    ResolvePayout,
    /// Dispose of all shares held in the chain being liquidated
    Liquidate(LiquidationChoice),

    // ==================== Buying ====================
    /// Buy shares of a founded chain
    BuyShares { chain: ChainId, count: u32 },
    /// Finish buying and pass the turn
    EndTurn,

    // ==================== Game ====================
    /// Call the game
    EndGame,
}

/// How a shareholder splits their holding of an absorbed chain.
///
/// All three counts are in shares of the absorbed chain and must add up to
/// the full holding. `trade` must be even: every two absorbed shares become
/// one share of the survivor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LiquidationChoice {
    pub trade: u32,
    pub sell: u32,
    pub hold: u32,
}

impl LiquidationChoice {
    pub fn new(trade: u32, sell: u32, hold: u32) -> Self {
        Self { trade, sell, hold }
    }

    pub fn hold_all(held: u32) -> Self {
        Self::new(0, 0, held)
    }

    pub fn sell_all(held: u32) -> Self {
        Self::new(0, held, 0)
    }

    pub fn total(&self) -> u32 {
        self.trade + self.sell + self.hold
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BonusKind {
    Majority,
    Minority,
    /// Majority tie: majority and minority pooled and split
    SharedMajority,
    /// Minority tie: minority split
    SharedMinority,
}

/// A stockholder bonus paid to one player
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bonus {
    pub player: PlayerId,
    pub chain: ChainId,
    pub kind: BonusKind,
    pub amount: u32,
}

/// Something that happened in the match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameEvent {
    /// Turn order was drawn
    InitialDraw {
        draws: Vec<(PlayerId, Coord)>,
        first: PlayerId,
    },

    /// Opening hands were dealt
    HandsDealt { tiles_each: usize },

    /// A tile went down
    TilePlaced { player: PlayerId, coord: Coord },

    /// A pending tile was taken back (not logged)
    PlacementCancelled { player: PlayerId, coord: Coord },

    /// The player had no playable tile
    PlacementPassed { player: PlayerId },

    /// A new chain was founded
    ChainFounded {
        player: PlayerId,
        chain: ChainId,
        size: usize,
        free_share: bool,
    },

    /// A chain grew
    ChainExpanded { chain: ChainId, size: usize },

    /// A merger began
    MergerStarted {
        survivor: ChainId,
        absorbed: Vec<ChainId>,
    },

    /// A stockholder bonus was credited
    BonusPaid(Bonus),

    /// A shareholder disposed of absorbed shares
    SharesLiquidated {
        player: PlayerId,
        chain: ChainId,
        survivor: ChainId,
        choice: LiquidationChoice,
        proceeds: u32,
    },

    /// An absorbed chain left the board
    ChainDefunct { chain: ChainId, held: u32 },

    /// Shares were bought
    SharesPurchased {
        player: PlayerId,
        chain: ChainId,
        count: u32,
        cost: u32,
    },

    /// A tile was drawn to refill a hand
    TileDrawn { player: PlayerId },

    /// Turn passed to the next player
    TurnEnded { player: PlayerId, next_player: PlayerId },

    /// An abandoned seat's turn was skipped
    TurnSkipped { player: PlayerId, next_player: PlayerId },

    /// The game was called
    GameEnded { player: Option<PlayerId> },
}

impl GameEvent {
    /// Whether the event is written to the match log
    pub fn is_logged(&self) -> bool {
        !matches!(
            self,
            GameEvent::PlacementCancelled { .. } | GameEvent::TileDrawn { .. }
        )
    }

    /// Human-readable log line
    pub fn describe<'a, F>(&self, name_of: F) -> String
    where
        F: Fn(PlayerId) -> &'a str,
    {
        match self {
            GameEvent::InitialDraw { draws, first } => {
                let drawn: Vec<String> = draws
                    .iter()
                    .map(|(p, c)| format!("{}→{}", name_of(*p), c))
                    .collect();
                format!(
                    "Initial draw: {}. {} will go first.",
                    drawn.join(", "),
                    name_of(*first)
                )
            }
            GameEvent::HandsDealt { tiles_each } => {
                format!("Dealt {} tiles to each player", tiles_each)
            }
            GameEvent::TilePlaced { player, coord } => {
                format!("{} placed {}", name_of(*player), coord)
            }
            GameEvent::PlacementCancelled { player, coord } => {
                format!("{} took back {}", name_of(*player), coord)
            }
            GameEvent::PlacementPassed { player } => {
                format!("{} has no playable tile", name_of(*player))
            }
            GameEvent::ChainFounded {
                player,
                chain,
                size,
                free_share,
            } => {
                let bonus = if *free_share { " and received a free share" } else { "" };
                format!(
                    "{} founded {} with {} tiles{}",
                    name_of(*player),
                    chain,
                    size,
                    bonus
                )
            }
            GameEvent::ChainExpanded { chain, size } => {
                format!("{} expanded to {} tiles", chain, size)
            }
            GameEvent::MergerStarted { survivor, absorbed } => {
                let names: Vec<&str> = absorbed.iter().map(|c| c.name()).collect();
                format!("{} absorbs {}", survivor, names.join(" and "))
            }
            GameEvent::BonusPaid(bonus) => {
                let kind = match bonus.kind {
                    BonusKind::Majority => "majority",
                    BonusKind::Minority => "minority",
                    BonusKind::SharedMajority => "shared majority",
                    BonusKind::SharedMinority => "shared minority",
                };
                format!(
                    "{} receives ${} {} bonus for {}",
                    name_of(bonus.player),
                    bonus.amount,
                    kind,
                    bonus.chain
                )
            }
            GameEvent::SharesLiquidated {
                player,
                chain,
                survivor,
                choice,
                proceeds,
            } => format!(
                "{} traded {} {} for {} {}, sold {} for ${}, kept {}",
                name_of(*player),
                choice.trade,
                chain,
                choice.trade / 2,
                survivor,
                choice.sell,
                proceeds,
                choice.hold
            ),
            GameEvent::ChainDefunct { chain, held } => {
                format!("{} is defunct ({} shares still held)", chain, held)
            }
            GameEvent::SharesPurchased {
                player,
                chain,
                count,
                cost,
            } => format!(
                "{} bought {} {} for ${}",
                name_of(*player),
                count,
                chain,
                cost
            ),
            GameEvent::TileDrawn { player } => format!("{} drew a tile", name_of(*player)),
            GameEvent::TurnEnded { player, next_player } => format!(
                "{} ended their turn; {} is up",
                name_of(*player),
                name_of(*next_player)
            ),
            GameEvent::TurnSkipped {
                player,
                next_player,
            } => format!(
                "{} has left; {} is up",
                name_of(*player),
                name_of(*next_player)
            ),
            GameEvent::GameEnded { player: Some(p) } => {
                format!("{} ended the game", name_of(*p))
            }
            GameEvent::GameEnded { player: None } => "The game was terminated".to_string(),
        }
    }
}
