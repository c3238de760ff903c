//! Board representation.
//!
//! Each of the 108 cells is in exactly one state: not yet placed, placed but
//! not part of any chain, or claimed by one chain. Chain membership lives
//! only here.

use crate::chain::ChainId;
use crate::grid::{self, Coord, CELL_COUNT};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// State of a single cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Cell {
    #[default]
    Unplaced,
    Unclaimed,
    Claimed(ChainId),
}

impl Cell {
    pub fn is_placed(&self) -> bool {
        !matches!(self, Cell::Unplaced)
    }

    pub fn chain(&self) -> Option<ChainId> {
        match self {
            Cell::Claimed(id) => Some(*id),
            _ => None,
        }
    }
}

/// The 9×12 game board
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    cells: Vec<Cell>,
}

impl Board {
    /// An empty board
    pub fn new() -> Self {
        Self {
            cells: vec![Cell::Unplaced; CELL_COUNT],
        }
    }

    pub fn get(&self, coord: Coord) -> Cell {
        self.cells[coord.index()]
    }

    pub fn is_placed(&self, coord: Coord) -> bool {
        self.get(coord).is_placed()
    }

    /// All cells with their coordinates, row-major
    pub fn cells(&self) -> impl Iterator<Item = (Coord, Cell)> + '_ {
        Coord::all().map(move |c| (c, self.get(c)))
    }

    /// Put a tile down as unclaimed
    pub fn place(&mut self, coord: Coord) {
        debug_assert_eq!(self.get(coord), Cell::Unplaced, "{coord} placed twice");
        self.cells[coord.index()] = Cell::Unclaimed;
    }

    /// Take back a pending placement. Only valid for an unclaimed cell.
    pub fn unplace(&mut self, coord: Coord) {
        debug_assert_eq!(self.get(coord), Cell::Unclaimed, "{coord} is not a pending tile");
        self.cells[coord.index()] = Cell::Unplaced;
    }

    /// Claim a placed cell for a chain
    pub fn claim(&mut self, coord: Coord, chain: ChainId) {
        debug_assert!(self.is_placed(coord), "{coord} claimed before placement");
        self.cells[coord.index()] = Cell::Claimed(chain);
    }

    pub fn claim_all<I>(&mut self, coords: I, chain: ChainId)
    where
        I: IntoIterator<Item = Coord>,
    {
        for coord in coords {
            self.claim(coord, chain);
        }
    }

    /// Move every cell of `from` to `to`; returns how many moved
    pub fn reassign(&mut self, from: ChainId, to: ChainId) -> usize {
        let mut moved = 0;
        for cell in self.cells.iter_mut() {
            if *cell == Cell::Claimed(from) {
                *cell = Cell::Claimed(to);
                moved += 1;
            }
        }
        moved
    }

    /// Number of cells claimed by a chain
    pub fn chain_size(&self, chain: ChainId) -> usize {
        self.cells.iter().filter(|c| **c == Cell::Claimed(chain)).count()
    }

    /// Cells claimed by a chain, row-major
    pub fn chain_tiles(&self, chain: ChainId) -> Vec<Coord> {
        self.cells()
            .filter(|(_, cell)| *cell == Cell::Claimed(chain))
            .map(|(coord, _)| coord)
            .collect()
    }

    /// Distinct chains touching a cell, in catalog order
    pub fn adjacent_chains(&self, coord: Coord) -> Vec<ChainId> {
        let set: BTreeSet<ChainId> = coord
            .neighbors()
            .into_iter()
            .filter_map(|n| self.get(n).chain())
            .collect();
        set.into_iter().collect()
    }

    /// Placed, unclaimed neighbours of a cell
    pub fn adjacent_unclaimed(&self, coord: Coord) -> Vec<Coord> {
        coord
            .neighbors()
            .into_iter()
            .filter(|n| self.get(*n) == Cell::Unclaimed)
            .collect()
    }

    /// The seeds plus every placed, unclaimed cell reachable from them
    /// through other placed, unclaimed cells.
    pub fn flood_fill_unclaimed(&self, seeds: &[Coord]) -> BTreeSet<Coord> {
        grid::flood_fill(seeds, |c| self.get(c) == Cell::Unclaimed)
    }

    /// Number of tiles on the board
    pub fn placed_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_placed()).count()
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(s: &str) -> Coord {
        s.parse().unwrap()
    }

    #[test]
    fn test_new_board_is_empty() {
        let board = Board::new();
        assert_eq!(board.placed_count(), 0);
        assert!(board.cells().all(|(_, cell)| cell == Cell::Unplaced));
    }

    #[test]
    fn test_place_claim_and_count() {
        let mut board = Board::new();
        for name in ["A1", "A2", "A3"] {
            board.place(c(name));
        }
        board.claim_all([c("A1"), c("A2")], ChainId::Messla);

        assert_eq!(board.chain_size(ChainId::Messla), 2);
        assert_eq!(board.get(c("A3")), Cell::Unclaimed);
        assert_eq!(board.chain_tiles(ChainId::Messla), vec![c("A1"), c("A2")]);
        assert_eq!(board.placed_count(), 3);
    }

    #[test]
    fn test_adjacent_chains_are_distinct() {
        let mut board = Board::new();
        for name in ["B1", "B3", "A2", "C2"] {
            board.place(c(name));
        }
        board.claim_all([c("B1"), c("A2")], ChainId::Gobble);
        board.claim(c("B3"), ChainId::Scrapple);

        assert_eq!(
            board.adjacent_chains(c("B2")),
            vec![ChainId::Gobble, ChainId::Scrapple]
        );
        assert_eq!(board.adjacent_unclaimed(c("B2")), vec![c("C2")]);
    }

    #[test]
    fn test_flood_fill_stops_at_claimed_cells() {
        let mut board = Board::new();
        for name in ["A2", "A3", "A4", "B4", "A6"] {
            board.place(c(name));
        }
        board.claim(c("A4"), ChainId::Gobble);

        let region = board.flood_fill_unclaimed(&[c("A1")]);
        let expected: BTreeSet<Coord> = [c("A1"), c("A2"), c("A3")].into_iter().collect();
        assert_eq!(region, expected);
    }

    #[test]
    fn test_reassign_moves_every_cell() {
        let mut board = Board::new();
        for name in ["A1", "A2", "C1"] {
            board.place(c(name));
        }
        board.claim_all([c("A1"), c("A2")], ChainId::Messla);
        board.claim(c("C1"), ChainId::Gobble);

        assert_eq!(board.reassign(ChainId::Messla, ChainId::Gobble), 2);
        assert_eq!(board.chain_size(ChainId::Messla), 0);
        assert_eq!(board.chain_size(ChainId::Gobble), 3);
    }

    #[test]
    fn test_unplace_reverts_pending_tile() {
        let mut board = Board::new();
        board.place(c("E5"));
        board.unplace(c("E5"));
        assert_eq!(board.get(c("E5")), Cell::Unplaced);
    }
}
