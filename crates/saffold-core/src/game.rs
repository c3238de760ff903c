//! Core match state machine.
//!
//! This module contains the `Match` struct and all rule enforcement. The
//! engine is synchronous and never blocks: `apply` takes one intent from one
//! player and either applies it completely or rejects it without touching
//! any state.

use crate::actions::{Bonus, GameEvent, Intent, LiquidationChoice};
use crate::board::Board;
use crate::chain::{self, ChainId, ChainRegistry, Tier, GAME_END_SIZE};
use crate::grid::{self, Coord};
use crate::merger;
use crate::player::{ConnectionStatus, Player, PlayerId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Fewest seats a match can start with
pub const MIN_PLAYERS: usize = 2;

/// Most seats a match can start with
pub const MAX_PLAYERS: usize = 6;

/// Shares a player may buy per turn
pub const MAX_BUY_PER_TURN: u32 = 3;

/// Where the match is in its turn cycle.
///
/// Decision stages carry exactly the data their decision needs, so there is
/// no merger context outside the two merger stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    /// Waiting for the opening draw
    Draw,
    /// Turn player must place a tile
    Play,
    /// Pending tile founds a chain; turn player names it
    FoundChain(FoundingDecision),
    /// Pending tile ties a merger; turn player picks the survivor
    ChooseSurvivor(SurvivorChoice),
    /// Turn player may buy shares
    Buy { purchased: u32 },
    /// Bonuses paid; turn player acknowledges
    MergerPayout(MergerContext),
    /// Shareholders dispose of absorbed shares, one at a time
    MergerLiquidation(MergerContext),
    /// Game over
    End,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Draw => "draw",
            Stage::Play => "play",
            Stage::FoundChain(_) => "foundChain",
            Stage::ChooseSurvivor(_) => "chooseSurvivor",
            Stage::Buy { .. } => "buy",
            Stage::MergerPayout(_) => "mergerPayout",
            Stage::MergerLiquidation(_) => "mergerLiquidation",
            Stage::End => "end",
        }
    }

    /// The merger context, in the two stages that have one
    pub fn merger(&self) -> Option<&MergerContext> {
        match self {
            Stage::MergerPayout(ctx) | Stage::MergerLiquidation(ctx) => Some(ctx),
            _ => None,
        }
    }
}

/// A tile on the board whose placement isn't confirmed yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPlacement {
    pub coord: Coord,
    /// Log length before the placement was logged; rollback truncates to it
    pub log_len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoundingDecision {
    pub placement: PendingPlacement,
    pub options: Vec<ChainId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurvivorChoice {
    pub placement: PendingPlacement,
    /// Largest chains, equal in size
    pub tied: Vec<ChainId>,
    /// Every chain the tile touches
    pub chains: Vec<ChainId>,
}

/// State of a merger from payout to the end of liquidation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergerContext {
    pub survivor: ChainId,
    /// Absorbed chains in liquidation order
    pub absorbed: Vec<ChainId>,
    /// Share price of each absorbed chain, read before any tile moved
    pub absorbed_prices: BTreeMap<ChainId, u32>,
    pub bonuses: Vec<Bonus>,
    /// Position in `absorbed`
    pub liquidation_index: usize,
    /// Shareholders of the chain being liquidated, in decision order
    pub shareholder_queue: Vec<PlayerId>,
    /// Position in `shareholder_queue`
    pub shareholder_index: usize,
}

impl MergerContext {
    pub fn current_chain(&self) -> Option<ChainId> {
        self.absorbed.get(self.liquidation_index).copied()
    }

    pub fn current_shareholder(&self) -> Option<PlayerId> {
        self.shareholder_queue.get(self.shareholder_index).copied()
    }

    /// Frozen pre-merger price of an absorbed chain
    pub fn price_of(&self, chain: ChainId) -> u32 {
        self.absorbed_prices.get(&chain).copied().unwrap_or(0)
    }
}

/// An outstanding decision, described for the player who must make it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    FoundChain {
        options: Vec<ChainId>,
    },
    ChooseSurvivor {
        tied: Vec<ChainId>,
    },
    AcknowledgePayout {
        bonuses: Vec<Bonus>,
    },
    Liquidate {
        chain: ChainId,
        survivor: ChainId,
        held: u32,
        price: u32,
        /// Largest even number of shares that can be traded
        max_trade: u32,
    },
}

/// Why an intent was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum GameError {
    #[error("Not your turn")]
    NotYourTurn,

    #[error("Not allowed during the {0} stage")]
    InvalidStage(String),

    #[error("Tile {0} is not in your hand")]
    TileNotInHand(Coord),

    #[error("Tile {0} has already been placed")]
    TileAlreadyPlaced(Coord),

    #[error("Placing {0} would merge two safe chains")]
    SafeChainMerger(Coord),

    #[error("Placing {0} would found a chain, but every chain is already on the board")]
    NoChainAvailable(Coord),

    #[error("You have a playable tile")]
    HasPlayableTile,

    #[error("{0} cannot be founded now")]
    ChainUnavailable(ChainId),

    #[error("{0} is not one of the tied chains")]
    NotTied(ChainId),

    #[error("{0} is not on the board")]
    ChainNotFounded(ChainId),

    #[error("Share count must be at least 1")]
    InvalidShareCount,

    #[error("Only {remaining} more shares may be bought this turn")]
    BuyLimitExceeded { remaining: u32 },

    #[error("Only {available} shares of {chain} are left")]
    SharesUnavailable { chain: ChainId, available: u32 },

    #[error("Costs ${needed} but you have ${available}")]
    InsufficientCash { needed: u32, available: u32 },

    #[error("Trade, sell and hold must add up to the {held} shares you hold")]
    InvalidSplit { held: u32 },

    #[error("Shares are traded two for one; trade an even number")]
    OddTrade,

    #[error("Trade needs {needed} survivor shares but only {available} are left")]
    SurvivorSharesUnavailable { needed: u32, available: u32 },

    #[error("No player {0} in this match")]
    UnknownPlayer(PlayerId),

    #[error("A match needs 2 to 6 players, got {0}")]
    PlayerCount(usize),

    #[error("Game is over")]
    GameOver,
}

impl GameError {
    /// Rejections caused by a game rule rather than a malformed request
    pub fn is_rule_violation(&self) -> bool {
        matches!(self, GameError::SafeChainMerger(_))
    }
}

/// A broken bookkeeping invariant. Always a bug.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("{chain}: {available} available + {held} held != {total}")]
    ShareConservation {
        chain: ChainId,
        available: u32,
        held: u32,
        total: u32,
    },

    #[error("{chain} owns {tiles} tiles but is not founded")]
    OrphanedTiles { chain: ChainId, tiles: usize },

    #[error("Player {player} holds placed tile {coord}")]
    PlacedTileInHand { player: PlayerId, coord: Coord },

    #[error("Player {player} holds {size} tiles")]
    OversizedHand { player: PlayerId, size: usize },
}

/// The complete state of one match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    /// Seed the tile bag was shuffled from
    pub seed: String,
    pub stage: Stage,
    /// All seats in table order
    pub players: Vec<Player>,
    /// Seat whose turn it is
    pub turn_index: PlayerId,
    pub board: Board,
    /// Undrawn tiles; drawn from the front
    pub bag: Vec<Coord>,
    /// Append-only, player-facing history
    pub log: Vec<String>,
    pub chains: ChainRegistry,
}

impl Match {
    /// Create a match with default chain tiers
    pub fn new(seed: impl Into<String>, player_names: Vec<String>) -> Result<Self, GameError> {
        Self::with_tiers(seed, player_names, |id| id.default_tier())
    }

    /// Create a match with a custom tier for each chain
    pub fn with_tiers<F>(
        seed: impl Into<String>,
        player_names: Vec<String>,
        tier_of: F,
    ) -> Result<Self, GameError>
    where
        F: Fn(ChainId) -> Tier,
    {
        if !(MIN_PLAYERS..=MAX_PLAYERS).contains(&player_names.len()) {
            return Err(GameError::PlayerCount(player_names.len()));
        }

        let seed = seed.into();
        let players = player_names
            .into_iter()
            .enumerate()
            .map(|(i, name)| Player::new(i as PlayerId, name))
            .collect();

        Ok(Self {
            bag: grid::shuffled_bag(&seed),
            seed,
            stage: Stage::Draw,
            players,
            turn_index: 0,
            board: Board::new(),
            log: Vec::new(),
            chains: ChainRegistry::with_tiers(tier_of),
        })
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn get_player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(id as usize)
    }

    pub fn player_name(&self, id: PlayerId) -> &str {
        self.get_player(id).map(|p| p.name.as_str()).unwrap_or("?")
    }

    pub fn current_player(&self) -> &Player {
        &self.players[self.turn_index as usize]
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.stage, Stage::End)
    }

    /// Who must act next: the turn player, or the shareholder whose
    /// liquidation decision is due. Nobody before the draw or after the end.
    pub fn active_player(&self) -> Option<PlayerId> {
        match &self.stage {
            Stage::Draw | Stage::End => None,
            Stage::MergerLiquidation(ctx) => ctx.current_shareholder(),
            _ => Some(self.turn_index),
        }
    }

    /// The outstanding decision, if the active player owes one
    pub fn pending_decision(&self) -> Option<Decision> {
        match &self.stage {
            Stage::FoundChain(d) => Some(Decision::FoundChain {
                options: d.options.clone(),
            }),
            Stage::ChooseSurvivor(c) => Some(Decision::ChooseSurvivor {
                tied: c.tied.clone(),
            }),
            Stage::MergerPayout(ctx) => Some(Decision::AcknowledgePayout {
                bonuses: ctx.bonuses.clone(),
            }),
            Stage::MergerLiquidation(ctx) => {
                let chain = ctx.current_chain()?;
                let player = ctx.current_shareholder()?;
                let held = self.players[player as usize].shares(chain);
                let survivor_left = self.chains.get(ctx.survivor).available_shares;
                Some(Decision::Liquidate {
                    chain,
                    survivor: ctx.survivor,
                    held,
                    price: ctx.price_of(chain),
                    max_trade: (held / 2).min(survivor_left) * 2,
                })
            }
            _ => None,
        }
    }

    /// Whether the classic end condition holds: a chain of 41+ tiles, or
    /// every chain on the board is safe.
    pub fn end_condition_met(&self) -> bool {
        let founded = self.chains.founded();
        if founded.is_empty() {
            return false;
        }
        founded
            .iter()
            .any(|&id| self.board.chain_size(id) >= GAME_END_SIZE)
            || founded.iter().all(|&id| self.chains.is_safe(&self.board, id))
    }

    /// Why placing `coord` would be illegal right now, if it would
    pub fn check_placement(&self, coord: Coord) -> Result<(), GameError> {
        if self.board.is_placed(coord) {
            return Err(GameError::TileAlreadyPlaced(coord));
        }

        let chains = self.board.adjacent_chains(coord);
        if chains.len() >= 2 {
            let safe = chains
                .iter()
                .filter(|&&id| self.chains.is_safe(&self.board, id))
                .count();
            if safe > 1 {
                return Err(GameError::SafeChainMerger(coord));
            }
        }

        if chains.is_empty()
            && !self.board.adjacent_unclaimed(coord).is_empty()
            && self.chains.unfounded().is_empty()
        {
            return Err(GameError::NoChainAvailable(coord));
        }

        Ok(())
    }

    /// Tiles in a player's hand that could be placed now, sorted
    pub fn playable_tiles(&self, player: PlayerId) -> Vec<Coord> {
        self.get_player(player)
            .map(|p| {
                p.sorted_hand()
                    .into_iter()
                    .filter(|&c| self.check_placement(c).is_ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every intent `player` could submit right now
    pub fn valid_intents(&self, player: PlayerId) -> Vec<Intent> {
        let mut intents = Vec::new();
        let is_turn = player == self.turn_index;

        match &self.stage {
            Stage::Draw | Stage::End => {}

            Stage::Play => {
                if !is_turn {
                    return intents;
                }
                let playable = self.playable_tiles(player);
                if playable.is_empty() {
                    intents.push(Intent::PassPlacement);
                }
                intents.extend(playable.into_iter().map(Intent::PlaceTile));
                intents.push(Intent::EndGame);
            }

            Stage::FoundChain(d) => {
                if !is_turn {
                    return intents;
                }
                intents.extend(d.options.iter().copied().map(Intent::FoundChain));
                intents.push(Intent::CancelPlacement);
            }

            Stage::ChooseSurvivor(c) => {
                if !is_turn {
                    return intents;
                }
                intents.extend(c.tied.iter().copied().map(Intent::ChooseSurvivor));
                intents.push(Intent::CancelPlacement);
            }

            Stage::MergerPayout(_) => {
                if is_turn {
                    intents.push(Intent::ResolvePayout);
                }
            }

            Stage::MergerLiquidation(ctx) => {
                if ctx.current_shareholder() != Some(player) {
                    return intents;
                }
                let Some(chain) = ctx.current_chain() else {
                    return intents;
                };
                let held = self.players[player as usize].shares(chain);
                let survivor_left = self.chains.get(ctx.survivor).available_shares;
                for trade in (0..=held).step_by(2) {
                    if trade / 2 > survivor_left {
                        break;
                    }
                    for sell in 0..=(held - trade) {
                        intents.push(Intent::Liquidate(LiquidationChoice::new(
                            trade,
                            sell,
                            held - trade - sell,
                        )));
                    }
                }
            }

            Stage::Buy { purchased } => {
                if !is_turn {
                    return intents;
                }
                let cash = self.players[player as usize].cash;
                let remaining = MAX_BUY_PER_TURN.saturating_sub(*purchased);
                for id in self.chains.founded() {
                    let available = self.chains.get(id).available_shares;
                    let price = self.chains.price(&self.board, id);
                    for count in 1..=remaining.min(available) {
                        if price * count <= cash {
                            intents.push(Intent::BuyShares { chain: id, count });
                        }
                    }
                }
                intents.push(Intent::EndTurn);
                intents.push(Intent::EndGame);
            }
        }

        intents
    }

    // ==================== Lifecycle ====================

    /// Opening draw and deal. Moves the match from `draw` to `play`.
    ///
    /// Each player draws one tile, which goes onto the board. The lowest
    /// tile (row letter first, then number) goes first. Hands are then
    /// dealt one tile per player per round until full.
    pub fn begin(&mut self) -> Result<Vec<GameEvent>, GameError> {
        if self.stage != Stage::Draw {
            return Err(self.wrong_stage());
        }

        let mut draws = Vec::with_capacity(self.players.len());
        for id in 0..self.players.len() as PlayerId {
            if let Some(tile) = self.draw_tile() {
                self.board.place(tile);
                draws.push((id, tile));
            }
        }

        let first = draws
            .iter()
            .min_by_key(|(_, tile)| *tile)
            .map(|(id, _)| *id)
            .unwrap_or(0);
        self.turn_index = first;

        loop {
            let mut dealt = false;
            for idx in 0..self.players.len() {
                if self.players[idx].hand_is_full() {
                    continue;
                }
                if let Some(tile) = self.draw_tile() {
                    self.players[idx].hand.push(tile);
                    dealt = true;
                }
            }
            if !dealt {
                break;
            }
        }

        let tiles_each = self.players.iter().map(|p| p.hand.len()).min().unwrap_or(0);
        let events = vec![
            GameEvent::InitialDraw { draws, first },
            GameEvent::HandsDealt { tiles_each },
        ];
        self.stage = Stage::Play;
        self.record(&events);
        Ok(events)
    }

    /// Force the match to `end`, whatever stage it is in.
    ///
    /// A pending placement is rolled back first so the board never keeps an
    /// unconfirmed tile.
    pub fn terminate(&mut self) -> Vec<GameEvent> {
        if self.is_finished() {
            return Vec::new();
        }
        let events = self.finish();
        self.record(&events);
        events
    }

    /// Update a seat's connection status.
    ///
    /// Abandoned seats drop out of turn rotation and liquidation queues. If
    /// the seat owed the current liquidation decision, its shares are held.
    pub fn set_connection(
        &mut self,
        player: PlayerId,
        status: ConnectionStatus,
    ) -> Result<Vec<GameEvent>, GameError> {
        let seat = self
            .players
            .get_mut(player as usize)
            .ok_or(GameError::UnknownPlayer(player))?;
        if seat.connection == ConnectionStatus::Abandoned {
            return Ok(Vec::new());
        }
        seat.connection = status;

        if status != ConnectionStatus::Abandoned {
            return Ok(Vec::new());
        }

        let events = self.skip_abandoned_turn();
        self.record(&events);
        Ok(events)
    }

    // ==================== Intents ====================

    /// Apply one intent. On error nothing has changed.
    pub fn apply(&mut self, player: PlayerId, intent: Intent) -> Result<Vec<GameEvent>, GameError> {
        if self.is_finished() {
            return Err(GameError::GameOver);
        }
        if player as usize >= self.players.len() {
            return Err(GameError::UnknownPlayer(player));
        }

        let mut events = match intent {
            Intent::PlaceTile(coord) => self.place_tile(player, coord)?,
            Intent::PassPlacement => self.pass_placement(player)?,
            Intent::FoundChain(chain) => self.found_chain(player, chain)?,
            Intent::ChooseSurvivor(chain) => self.choose_survivor(player, chain)?,
            Intent::CancelPlacement => self.cancel_placement(player)?,
            Intent::ResolvePayout => self.resolve_payout(player)?,
            Intent::Liquidate(choice) => self.liquidate(player, choice)?,
            Intent::BuyShares { chain, count } => self.buy_shares(player, chain, count)?,
            Intent::EndTurn => self.end_turn(player)?,
            Intent::EndGame => self.end_game(player)?,
        };
        events.extend(self.skip_abandoned_turn());

        self.record(&events);
        Ok(events)
    }

    fn place_tile(&mut self, player: PlayerId, coord: Coord) -> Result<Vec<GameEvent>, GameError> {
        self.expect_turn(player)?;
        if self.stage != Stage::Play {
            return Err(self.wrong_stage());
        }
        if !self.players[player as usize].holds_tile(coord) {
            return Err(GameError::TileNotInHand(coord));
        }
        self.check_placement(coord)?;

        let chains = self.board.adjacent_chains(coord);
        let has_unclaimed = !self.board.adjacent_unclaimed(coord).is_empty();
        let placement = PendingPlacement {
            coord,
            log_len: self.log.len(),
        };

        self.board.place(coord);
        let mut events = vec![GameEvent::TilePlaced { player, coord }];

        match chains.len() {
            0 if !has_unclaimed => {
                events.extend(self.commit_placement(player, coord));
                self.stage = Stage::Buy { purchased: 0 };
            }
            0 => {
                self.stage = Stage::FoundChain(FoundingDecision {
                    placement,
                    options: self.chains.unfounded(),
                });
            }
            1 => {
                events.push(self.expand_chain(chains[0], coord));
                events.extend(self.commit_placement(player, coord));
                self.stage = Stage::Buy { purchased: 0 };
            }
            _ => {
                let largest = chains
                    .iter()
                    .map(|&id| self.board.chain_size(id))
                    .max()
                    .unwrap_or(0);
                let tied: Vec<ChainId> = chains
                    .iter()
                    .copied()
                    .filter(|&id| self.board.chain_size(id) == largest)
                    .collect();

                if tied.len() > 1 {
                    self.stage = Stage::ChooseSurvivor(SurvivorChoice {
                        placement,
                        tied,
                        chains,
                    });
                } else {
                    events.extend(self.start_merger(tied[0], &chains, coord));
                    events.extend(self.commit_placement(player, coord));
                }
            }
        }

        Ok(events)
    }

    fn pass_placement(&mut self, player: PlayerId) -> Result<Vec<GameEvent>, GameError> {
        self.expect_turn(player)?;
        if self.stage != Stage::Play {
            return Err(self.wrong_stage());
        }
        if !self.playable_tiles(player).is_empty() {
            return Err(GameError::HasPlayableTile);
        }

        self.stage = Stage::Buy { purchased: 0 };
        Ok(vec![GameEvent::PlacementPassed { player }])
    }

    fn found_chain(&mut self, player: PlayerId, chain: ChainId) -> Result<Vec<GameEvent>, GameError> {
        self.expect_turn(player)?;
        let decision = match &self.stage {
            Stage::FoundChain(d) => d.clone(),
            _ => return Err(self.wrong_stage()),
        };
        if !decision.options.contains(&chain) || self.chains.is_founded(chain) {
            return Err(GameError::ChainUnavailable(chain));
        }

        let coord = decision.placement.coord;
        self.chains.found(chain);
        let region = self.board.flood_fill_unclaimed(&[coord]);
        let size = region.len();
        self.board.claim_all(region, chain);

        let free = self.chains.take_shares(chain, 1);
        self.players[player as usize].add_shares(chain, free);

        let mut events = vec![GameEvent::ChainFounded {
            player,
            chain,
            size,
            free_share: free > 0,
        }];
        events.extend(self.commit_placement(player, coord));
        self.stage = Stage::Buy { purchased: 0 };
        Ok(events)
    }

    fn choose_survivor(
        &mut self,
        player: PlayerId,
        survivor: ChainId,
    ) -> Result<Vec<GameEvent>, GameError> {
        self.expect_turn(player)?;
        let choice = match &self.stage {
            Stage::ChooseSurvivor(c) => c.clone(),
            _ => return Err(self.wrong_stage()),
        };
        if !choice.tied.contains(&survivor) {
            return Err(GameError::NotTied(survivor));
        }

        let coord = choice.placement.coord;
        let mut events = self.start_merger(survivor, &choice.chains, coord);
        events.extend(self.commit_placement(player, coord));
        Ok(events)
    }

    fn cancel_placement(&mut self, player: PlayerId) -> Result<Vec<GameEvent>, GameError> {
        self.expect_turn(player)?;
        let pending = self.pending_placement().ok_or_else(|| self.wrong_stage())?;

        self.board.unplace(pending.coord);
        self.log.truncate(pending.log_len);
        self.stage = Stage::Play;
        Ok(vec![GameEvent::PlacementCancelled {
            player,
            coord: pending.coord,
        }])
    }

    fn resolve_payout(&mut self, player: PlayerId) -> Result<Vec<GameEvent>, GameError> {
        self.expect_turn(player)?;
        let ctx = match &self.stage {
            Stage::MergerPayout(ctx) => ctx.clone(),
            _ => return Err(self.wrong_stage()),
        };
        Ok(self.open_liquidation(ctx, 0))
    }

    fn liquidate(
        &mut self,
        player: PlayerId,
        choice: LiquidationChoice,
    ) -> Result<Vec<GameEvent>, GameError> {
        let mut ctx = match &self.stage {
            Stage::MergerLiquidation(ctx) => ctx.clone(),
            _ => return Err(self.wrong_stage()),
        };
        let chain = ctx.current_chain().ok_or_else(|| self.wrong_stage())?;
        if ctx.current_shareholder() != Some(player) {
            return Err(GameError::NotYourTurn);
        }

        let held = self.players[player as usize].shares(chain);
        if choice.total() != held {
            return Err(GameError::InvalidSplit { held });
        }
        if choice.trade % 2 != 0 {
            return Err(GameError::OddTrade);
        }
        let received = choice.trade / 2;
        let survivor_left = self.chains.get(ctx.survivor).available_shares;
        if received > survivor_left {
            return Err(GameError::SurvivorSharesUnavailable {
                needed: received,
                available: survivor_left,
            });
        }

        let proceeds = ctx.price_of(chain) * choice.sell;
        let returned = choice.trade + choice.sell;

        let seat = &mut self.players[player as usize];
        seat.remove_shares(chain, returned);
        seat.add_shares(ctx.survivor, received);
        seat.cash += proceeds;
        self.chains.return_shares(chain, returned);
        self.chains.take_shares(ctx.survivor, received);

        let mut events = vec![GameEvent::SharesLiquidated {
            player,
            chain,
            survivor: ctx.survivor,
            choice,
            proceeds,
        }];

        ctx.shareholder_index += 1;
        if ctx.current_shareholder().is_some() {
            self.stage = Stage::MergerLiquidation(ctx);
        } else {
            events.push(self.retire_chain(chain));
            let next = ctx.liquidation_index + 1;
            events.extend(self.open_liquidation(ctx, next));
        }
        Ok(events)
    }

    fn buy_shares(
        &mut self,
        player: PlayerId,
        chain: ChainId,
        count: u32,
    ) -> Result<Vec<GameEvent>, GameError> {
        self.expect_turn(player)?;
        let purchased = match self.stage {
            Stage::Buy { purchased } => purchased,
            _ => return Err(self.wrong_stage()),
        };
        if count == 0 {
            return Err(GameError::InvalidShareCount);
        }
        let remaining = MAX_BUY_PER_TURN.saturating_sub(purchased);
        if count > remaining {
            return Err(GameError::BuyLimitExceeded { remaining });
        }
        if !self.chains.is_founded(chain) {
            return Err(GameError::ChainNotFounded(chain));
        }
        let available = self.chains.get(chain).available_shares;
        if available < count {
            return Err(GameError::SharesUnavailable { chain, available });
        }
        let cost = self.chains.price(&self.board, chain) * count;
        let cash = self.players[player as usize].cash;
        if cost > cash {
            return Err(GameError::InsufficientCash {
                needed: cost,
                available: cash,
            });
        }

        self.chains.take_shares(chain, count);
        let seat = &mut self.players[player as usize];
        seat.cash -= cost;
        seat.add_shares(chain, count);
        self.stage = Stage::Buy {
            purchased: purchased + count,
        };

        Ok(vec![GameEvent::SharesPurchased {
            player,
            chain,
            count,
            cost,
        }])
    }

    fn end_turn(&mut self, player: PlayerId) -> Result<Vec<GameEvent>, GameError> {
        self.expect_turn(player)?;
        if !matches!(self.stage, Stage::Buy { .. }) {
            return Err(self.wrong_stage());
        }

        let next_player = self.next_seat();
        self.turn_index = next_player;
        self.stage = Stage::Play;
        Ok(vec![GameEvent::TurnEnded {
            player,
            next_player,
        }])
    }

    fn end_game(&mut self, player: PlayerId) -> Result<Vec<GameEvent>, GameError> {
        self.expect_turn(player)?;
        if !matches!(self.stage, Stage::Play | Stage::Buy { .. }) {
            return Err(self.wrong_stage());
        }

        self.stage = Stage::End;
        Ok(vec![GameEvent::GameEnded {
            player: Some(player),
        }])
    }

    // ==================== Helper Methods ====================

    fn expect_turn(&self, player: PlayerId) -> Result<(), GameError> {
        if player != self.turn_index {
            return Err(GameError::NotYourTurn);
        }
        Ok(())
    }

    fn wrong_stage(&self) -> GameError {
        GameError::InvalidStage(self.stage.name().to_string())
    }

    fn pending_placement(&self) -> Option<PendingPlacement> {
        match &self.stage {
            Stage::FoundChain(d) => Some(d.placement),
            Stage::ChooseSurvivor(c) => Some(c.placement),
            _ => None,
        }
    }

    fn draw_tile(&mut self) -> Option<Coord> {
        if self.bag.is_empty() {
            None
        } else {
            Some(self.bag.remove(0))
        }
    }

    /// Roll back any pending tile and move to `end`, without logging
    fn finish(&mut self) -> Vec<GameEvent> {
        if let Some(pending) = self.pending_placement() {
            self.board.unplace(pending.coord);
            self.log.truncate(pending.log_len);
        }
        self.stage = Stage::End;
        vec![GameEvent::GameEnded { player: None }]
    }

    /// Keep the match moving past abandoned seats.
    ///
    /// An abandoned shareholder owing a liquidation decision holds every
    /// share. When the turn belongs to an abandoned seat, a pending tile goes
    /// back to the hand, an unacknowledged payout is resolved, and the turn
    /// passes on. With nobody left the match ends.
    fn skip_abandoned_turn(&mut self) -> Vec<GameEvent> {
        let mut events = Vec::new();

        while !self.is_finished() {
            if !self.players.iter().any(Player::is_active) {
                events.extend(self.finish());
                break;
            }

            if let Some((holder, chain)) = self.abandoned_shareholder() {
                let held = self.players[holder as usize].shares(chain);
                match self.liquidate(holder, LiquidationChoice::hold_all(held)) {
                    Ok(held) => {
                        events.extend(held);
                        continue;
                    }
                    Err(_) => break,
                }
            }

            if self.current_player().is_active() {
                break;
            }

            let player = self.turn_index;
            match self.stage {
                Stage::Draw | Stage::End | Stage::MergerLiquidation(_) => break,
                Stage::MergerPayout(_) => match self.resolve_payout(player) {
                    Ok(resolved) => events.extend(resolved),
                    Err(_) => break,
                },
                Stage::Play
                | Stage::Buy { .. }
                | Stage::FoundChain(_)
                | Stage::ChooseSurvivor(_) => {
                    if let Some(pending) = self.pending_placement() {
                        self.board.unplace(pending.coord);
                        self.log.truncate(pending.log_len);
                    }
                    let next_player = self.next_seat();
                    self.turn_index = next_player;
                    self.stage = Stage::Play;
                    events.push(GameEvent::TurnSkipped {
                        player,
                        next_player,
                    });
                }
            }
        }

        events
    }

    /// The liquidation shareholder up next, if their seat has been abandoned
    fn abandoned_shareholder(&self) -> Option<(PlayerId, ChainId)> {
        let ctx = match &self.stage {
            Stage::MergerLiquidation(ctx) => ctx,
            _ => return None,
        };
        let holder = ctx.current_shareholder()?;
        if self.players[holder as usize].is_active() {
            return None;
        }
        Some((holder, ctx.current_chain()?))
    }

    /// Next seat in table order that hasn't been abandoned
    fn next_seat(&self) -> PlayerId {
        let count = self.players.len();
        (1..=count)
            .map(|offset| (self.turn_index as usize + offset) % count)
            .find(|&idx| self.players[idx].is_active())
            .unwrap_or(self.turn_index as usize) as PlayerId
    }

    /// Confirm a placement: the tile leaves the hand and a replacement is drawn
    fn commit_placement(&mut self, player: PlayerId, coord: Coord) -> Vec<GameEvent> {
        let replacement = self.draw_tile();
        let seat = &mut self.players[player as usize];
        seat.remove_tile(coord);
        seat.last_placed = Some(coord);

        match replacement {
            Some(tile) => {
                seat.hand.push(tile);
                vec![GameEvent::TileDrawn { player }]
            }
            None => Vec::new(),
        }
    }

    /// Claim the tile and every unclaimed tile connected to it
    fn expand_chain(&mut self, chain: ChainId, coord: Coord) -> GameEvent {
        let region = self.board.flood_fill_unclaimed(&[coord]);
        self.board.claim_all(region, chain);
        GameEvent::ChainExpanded {
            chain,
            size: self.board.chain_size(chain),
        }
    }

    /// Fold every other chain into `survivor` and pay bonuses.
    ///
    /// Absorbed prices are frozen before a single tile moves: bonuses and
    /// every later liquidation sale use them, not the post-merger board.
    fn start_merger(&mut self, survivor: ChainId, chains: &[ChainId], coord: Coord) -> Vec<GameEvent> {
        let mut absorbed: Vec<(ChainId, usize)> = chains
            .iter()
            .copied()
            .filter(|&id| id != survivor)
            .map(|id| (id, self.board.chain_size(id)))
            .collect();
        absorbed.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let absorbed_prices: BTreeMap<ChainId, u32> = absorbed
            .iter()
            .map(|&(id, size)| (id, chain::share_price(self.chains.get(id).tier, size)))
            .collect();
        let absorbed: Vec<ChainId> = absorbed.into_iter().map(|(id, _)| id).collect();

        let region = self.board.flood_fill_unclaimed(&[coord]);
        self.board.claim_all(region, survivor);
        for &id in &absorbed {
            self.board.reassign(id, survivor);
        }

        let mut events = vec![GameEvent::MergerStarted {
            survivor,
            absorbed: absorbed.clone(),
        }];

        let bonuses: Vec<Bonus> = absorbed
            .iter()
            .flat_map(|&id| merger::merger_bonuses(&self.players, id, absorbed_prices[&id]))
            .collect();
        for bonus in &bonuses {
            self.players[bonus.player as usize].cash += bonus.amount;
            events.push(GameEvent::BonusPaid(bonus.clone()));
        }

        self.stage = Stage::MergerPayout(MergerContext {
            survivor,
            absorbed,
            absorbed_prices,
            bonuses,
            liquidation_index: 0,
            shareholder_queue: Vec::new(),
            shareholder_index: 0,
        });
        events
    }

    /// Move liquidation to `absorbed[index]`, retiring chains nobody holds,
    /// and fall through to buying once every absorbed chain is done.
    fn open_liquidation(&mut self, mut ctx: MergerContext, index: usize) -> Vec<GameEvent> {
        let mut events = Vec::new();
        let mut index = index;

        while let Some(&chain) = ctx.absorbed.get(index) {
            let queue = merger::liquidation_queue(&self.players, chain, self.turn_index);
            if !queue.is_empty() {
                ctx.liquidation_index = index;
                ctx.shareholder_queue = queue;
                ctx.shareholder_index = 0;
                self.stage = Stage::MergerLiquidation(ctx);
                return events;
            }
            events.push(self.retire_chain(chain));
            index += 1;
        }

        self.stage = Stage::Buy { purchased: 0 };
        events
    }

    /// Take a fully liquidated chain off the market
    fn retire_chain(&mut self, chain: ChainId) -> GameEvent {
        let held: u32 = self.players.iter().map(|p| p.shares(chain)).sum();
        self.chains.reset(chain, held);
        GameEvent::ChainDefunct { chain, held }
    }

    fn record(&mut self, events: &[GameEvent]) {
        for event in events.iter().filter(|e| e.is_logged()) {
            let line = event.describe(|p| self.player_name(p));
            self.log.push(line);
        }
    }

    // ==================== Invariants ====================

    /// Verify share and tile bookkeeping
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        for chain in self.chains.iter() {
            let held: u32 = self.players.iter().map(|p| p.shares(chain.id)).sum();
            if held != chain.issued_shares() {
                return Err(InvariantViolation::ShareConservation {
                    chain: chain.id,
                    available: chain.available_shares,
                    held,
                    total: chain.total_shares,
                });
            }
            let tiles = self.board.chain_size(chain.id);
            if !chain.founded && tiles > 0 {
                return Err(InvariantViolation::OrphanedTiles {
                    chain: chain.id,
                    tiles,
                });
            }
        }

        let pending = self.pending_placement().map(|p| p.coord);
        for player in &self.players {
            if player.hand.len() > crate::player::HAND_SIZE {
                return Err(InvariantViolation::OversizedHand {
                    player: player.id,
                    size: player.hand.len(),
                });
            }
            for &coord in &player.hand {
                let is_pending = player.id == self.turn_index && pending == Some(coord);
                if self.board.is_placed(coord) && !is_pending {
                    return Err(InvariantViolation::PlacedTileInHand {
                        player: player.id,
                        coord,
                    });
                }
            }
        }

        Ok(())
    }
}
