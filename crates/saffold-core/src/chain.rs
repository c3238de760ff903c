//! Chains and their share inventory.
//!
//! A chain's tiles are never stored here: the board is the single source of
//! truth for which cells a chain owns, and sizes are recounted on demand.
//! The registry only tracks what the board can't tell us: whether a chain is
//! founded, its price tier, and how many of its shares the bank still holds.

use crate::board::Board;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Shares issued per chain
pub const TOTAL_SHARES: u32 = 25;

/// A chain this size or larger can never be absorbed
pub const SAFE_SIZE: usize = 11;

/// Chain size at which a player may call the game
pub const GAME_END_SIZE: usize = 41;

/// Lower bounds of each price bracket
pub const SIZE_THRESHOLDS: [usize; 9] = [2, 3, 4, 5, 6, 11, 21, 31, 41];

/// Share price per bracket, one row per tier
pub const PRICE_TABLES: [[u32; 9]; 3] = [
    [200, 300, 400, 500, 600, 700, 800, 900, 1000],
    [300, 400, 500, 600, 700, 800, 900, 1000, 1100],
    [400, 500, 600, 700, 800, 900, 1000, 1100, 1200],
];

/// Majority holder bonus, as a multiple of share price
pub const MAJORITY_MULTIPLIER: u32 = 10;

/// Minority holder bonus, as a multiple of share price
pub const MINORITY_MULTIPLIER: u32 = 5;

/// The seven chains that can be founded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChainId {
    Gobble,
    Scrapple,
    PaperfulPost,
    CamCrooned,
    Messla,
    ZuckFace,
    WrecksonMobil,
}

impl ChainId {
    /// Catalog order
    pub const ALL: [ChainId; 7] = [
        ChainId::Gobble,
        ChainId::Scrapple,
        ChainId::PaperfulPost,
        ChainId::CamCrooned,
        ChainId::Messla,
        ChainId::ZuckFace,
        ChainId::WrecksonMobil,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ChainId::Gobble => "Gobble",
            ChainId::Scrapple => "Scrapple",
            ChainId::PaperfulPost => "PaperfulPost",
            ChainId::CamCrooned => "CamCrooned",
            ChainId::Messla => "Messla",
            ChainId::ZuckFace => "ZuckFace",
            ChainId::WrecksonMobil => "WrecksonMobil",
        }
    }

    /// Tier used when a match doesn't override it
    pub fn default_tier(&self) -> Tier {
        match self {
            ChainId::Scrapple | ChainId::ZuckFace => Tier::Budget,
            ChainId::PaperfulPost | ChainId::CamCrooned | ChainId::Messla => Tier::Standard,
            ChainId::Gobble | ChainId::WrecksonMobil => Tier::Premium,
        }
    }

    fn slot(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown chain '{0}'")]
pub struct UnknownChain(pub String);

impl FromStr for ChainId {
    type Err = UnknownChain;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChainId::ALL
            .into_iter()
            .find(|id| id.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownChain(s.to_string()))
    }
}

/// Price class of a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    Budget,
    Standard,
    Premium,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Budget, Tier::Standard, Tier::Premium];

    /// Row into [`PRICE_TABLES`] (0, 1 or 2)
    pub fn index(&self) -> usize {
        *self as usize
    }
}

/// Price bracket for a chain size. Sizes below the first threshold clamp to it.
pub fn price_index(size: usize) -> usize {
    SIZE_THRESHOLDS
        .iter()
        .rposition(|&threshold| size >= threshold)
        .unwrap_or(0)
}

/// Share price for a chain of `size` tiles in `tier`.
///
/// Pure function of the size passed in; callers that need a price to stay
/// fixed across a board mutation must read it before mutating.
pub fn share_price(tier: Tier, size: usize) -> u32 {
    PRICE_TABLES[tier.index()][price_index(size)]
}

/// Whether a chain of this size is immune to absorption
pub fn is_safe_size(size: usize) -> bool {
    size >= SAFE_SIZE
}

/// Bookkeeping for one chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    pub id: ChainId,
    pub tier: Tier,
    pub founded: bool,
    pub total_shares: u32,
    /// Shares still held by the bank
    pub available_shares: u32,
}

impl Chain {
    pub fn new(id: ChainId, tier: Tier) -> Self {
        Self {
            id,
            tier,
            founded: false,
            total_shares: TOTAL_SHARES,
            available_shares: TOTAL_SHARES,
        }
    }

    /// Shares currently in players' portfolios
    pub fn issued_shares(&self) -> u32 {
        self.total_shares - self.available_shares
    }
}

/// Every chain in the catalog, founded or not
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainRegistry {
    chains: Vec<Chain>,
}

impl ChainRegistry {
    /// All chains unfounded, default tiers
    pub fn new() -> Self {
        Self::with_tiers(|id| id.default_tier())
    }

    /// All chains unfounded, tiers chosen by the caller
    pub fn with_tiers<F>(tier_of: F) -> Self
    where
        F: Fn(ChainId) -> Tier,
    {
        Self {
            chains: ChainId::ALL
                .into_iter()
                .map(|id| Chain::new(id, tier_of(id)))
                .collect(),
        }
    }

    pub fn get(&self, id: ChainId) -> &Chain {
        &self.chains[id.slot()]
    }

    pub fn get_mut(&mut self, id: ChainId) -> &mut Chain {
        &mut self.chains[id.slot()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chain> {
        self.chains.iter()
    }

    pub fn is_founded(&self, id: ChainId) -> bool {
        self.get(id).founded
    }

    /// Founded chains in catalog order
    pub fn founded(&self) -> Vec<ChainId> {
        self.chains.iter().filter(|c| c.founded).map(|c| c.id).collect()
    }

    /// Chains available to be founded, in catalog order
    pub fn unfounded(&self) -> Vec<ChainId> {
        self.chains.iter().filter(|c| !c.founded).map(|c| c.id).collect()
    }

    /// Tile count, read from the board
    pub fn size(&self, board: &Board, id: ChainId) -> usize {
        board.chain_size(id)
    }

    /// Current share price, from the chain's tier and current board size
    pub fn price(&self, board: &Board, id: ChainId) -> u32 {
        share_price(self.get(id).tier, board.chain_size(id))
    }

    pub fn is_safe(&self, board: &Board, id: ChainId) -> bool {
        is_safe_size(board.chain_size(id))
    }

    /// Mark a chain founded. Its share inventory is untouched.
    pub fn found(&mut self, id: ChainId) {
        self.get_mut(id).founded = true;
    }

    /// Move up to `count` shares from the bank; returns how many moved
    pub fn take_shares(&mut self, id: ChainId, count: u32) -> u32 {
        let chain = self.get_mut(id);
        let taken = count.min(chain.available_shares);
        chain.available_shares -= taken;
        taken
    }

    /// Return shares to the bank
    pub fn return_shares(&mut self, id: ChainId, count: u32) {
        let chain = self.get_mut(id);
        chain.available_shares = (chain.available_shares + count).min(chain.total_shares);
    }

    /// Retire a chain after it has been absorbed and liquidated.
    ///
    /// `still_held` is the number of shares players kept. Those stay in their
    /// portfolios and remain out of the bank, so the chain comes back with
    /// `total - still_held` available rather than a full stack.
    pub fn reset(&mut self, id: ChainId, still_held: u32) {
        let chain = self.get_mut(id);
        chain.founded = false;
        chain.available_shares = chain.total_shares.saturating_sub(still_held);
    }
}

impl Default for ChainRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_brackets() {
        assert_eq!(share_price(Tier::Budget, 2), 200);
        assert_eq!(share_price(Tier::Budget, 5), 500);
        assert_eq!(share_price(Tier::Budget, 6), 600);
        assert_eq!(share_price(Tier::Budget, 10), 600);
        assert_eq!(share_price(Tier::Budget, 11), 700);
        assert_eq!(share_price(Tier::Budget, 41), 1000);
        assert_eq!(share_price(Tier::Budget, 108), 1000);
        assert_eq!(share_price(Tier::Standard, 3), 400);
        assert_eq!(share_price(Tier::Premium, 2), 400);
        assert_eq!(share_price(Tier::Premium, 45), 1200);
    }

    #[test]
    fn test_tiny_sizes_clamp_to_first_bracket() {
        assert_eq!(price_index(0), 0);
        assert_eq!(price_index(1), 0);
        assert_eq!(share_price(Tier::Standard, 0), 300);
    }

    #[test]
    fn test_price_monotonic_in_size_and_tier() {
        for tier in Tier::ALL {
            for size in 1..108 {
                assert!(share_price(tier, size) <= share_price(tier, size + 1));
            }
        }
        for size in 0..=108 {
            assert!(share_price(Tier::Budget, size) <= share_price(Tier::Standard, size));
            assert!(share_price(Tier::Standard, size) <= share_price(Tier::Premium, size));
        }
    }

    #[test]
    fn test_safe_threshold() {
        assert!(!is_safe_size(10));
        assert!(is_safe_size(11));
    }

    #[test]
    fn test_chain_names_parse() {
        for id in ChainId::ALL {
            assert_eq!(id.name().parse::<ChainId>(), Ok(id));
        }
        assert_eq!("messla".parse::<ChainId>(), Ok(ChainId::Messla));
        assert!("Acme".parse::<ChainId>().is_err());
    }

    #[test]
    fn test_default_tiers_cover_all_three() {
        let registry = ChainRegistry::new();
        for tier in Tier::ALL {
            assert!(registry.iter().any(|c| c.tier == tier));
        }
    }

    #[test]
    fn test_take_and_return_shares_are_bounded() {
        let mut registry = ChainRegistry::new();
        assert_eq!(registry.take_shares(ChainId::Messla, 30), TOTAL_SHARES);
        assert_eq!(registry.get(ChainId::Messla).available_shares, 0);
        assert_eq!(registry.take_shares(ChainId::Messla, 1), 0);

        registry.return_shares(ChainId::Messla, 40);
        assert_eq!(registry.get(ChainId::Messla).available_shares, TOTAL_SHARES);
    }

    #[test]
    fn test_reset_keeps_held_shares_out_of_bank() {
        let mut registry = ChainRegistry::new();
        registry.found(ChainId::Gobble);
        registry.take_shares(ChainId::Gobble, 4);

        registry.reset(ChainId::Gobble, 4);
        let chain = registry.get(ChainId::Gobble);
        assert!(!chain.founded);
        assert_eq!(chain.available_shares, TOTAL_SHARES - 4);
        assert_eq!(chain.issued_shares(), 4);
        assert_eq!(registry.unfounded().len(), 7);
    }
}
