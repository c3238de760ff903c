//! Board geometry: coordinates, 4-neighbour adjacency and the seeded tile bag.
//!
//! The board is a fixed 9×12 grid. Rows are lettered `A`..`I` from the top and
//! columns are numbered `1`..`12` from the left, so every tile has a short
//! display name such as `C7`.
//!
//! Coordinates order row-major (`A1 < A2 < ... < A12 < B1`), which is the
//! order used to break the initial-draw tie and to sort hands for display.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of rows on the board (`A`..`I`)
pub const ROWS: u8 = 9;

/// Number of columns on the board (`1`..`12`)
pub const COLS: u8 = 12;

/// Total number of cells (and tiles in the bag)
pub const CELL_COUNT: usize = ROWS as usize * COLS as usize;

const ROW_LETTERS: [char; ROWS as usize] = ['A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I'];

/// Errors from parsing a tile name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordError {
    #[error("Tile name is empty")]
    Empty,

    #[error("Unknown row '{0}', expected A-I")]
    BadRow(char),

    #[error("Bad column in '{0}', expected 1-12")]
    BadColumn(String),
}

/// A cell on the board.
///
/// `row` is zero-based (`0` is row `A`), `col` is one-based to match the
/// printed tile names. Field order gives the derived `Ord` its row-major
/// meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Coord {
    row: u8,
    col: u8,
}

impl Coord {
    /// Create a coordinate, returning `None` when it falls off the board
    pub const fn new(row: u8, col: u8) -> Option<Self> {
        if row < ROWS && col >= 1 && col <= COLS {
            Some(Self { row, col })
        } else {
            None
        }
    }

    /// Zero-based row index (`0` = `A`)
    pub const fn row(&self) -> u8 {
        self.row
    }

    /// One-based column number
    pub const fn col(&self) -> u8 {
        self.col
    }

    /// Row letter as printed on the tile
    pub fn row_letter(&self) -> char {
        ROW_LETTERS[self.row as usize]
    }

    /// Dense index into a row-major cell array
    pub const fn index(&self) -> usize {
        self.row as usize * COLS as usize + (self.col as usize - 1)
    }

    /// Inverse of [`Coord::index`]
    pub fn from_index(index: usize) -> Option<Self> {
        if index >= CELL_COUNT {
            return None;
        }
        Self::new(
            (index / COLS as usize) as u8,
            (index % COLS as usize) as u8 + 1,
        )
    }

    /// Every coordinate on the board in row-major order
    pub fn all() -> impl Iterator<Item = Coord> {
        (0..CELL_COUNT).filter_map(Coord::from_index)
    }

    /// The up-to-four orthogonal neighbours (north, south, west, east).
    ///
    /// Edge and corner cells have fewer neighbours; there is no wraparound.
    pub fn neighbors(&self) -> Vec<Coord> {
        let mut out = Vec::with_capacity(4);
        if self.row > 0 {
            out.push(Coord { row: self.row - 1, col: self.col });
        }
        if self.row + 1 < ROWS {
            out.push(Coord { row: self.row + 1, col: self.col });
        }
        if self.col > 1 {
            out.push(Coord { row: self.row, col: self.col - 1 });
        }
        if self.col < COLS {
            out.push(Coord { row: self.row, col: self.col + 1 });
        }
        out
    }

    /// Whether two cells share an edge
    pub fn is_adjacent(&self, other: &Coord) -> bool {
        let dr = (self.row as i16 - other.row as i16).abs();
        let dc = (self.col as i16 - other.col as i16).abs();
        dr + dc == 1
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.row_letter(), self.col)
    }
}

impl FromStr for Coord {
    type Err = CoordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut chars = s.chars();
        let letter = chars.next().ok_or(CoordError::Empty)?;
        let row = ROW_LETTERS
            .iter()
            .position(|&c| c == letter.to_ascii_uppercase())
            .ok_or(CoordError::BadRow(letter))? as u8;
        let col: u8 = chars
            .as_str()
            .parse()
            .map_err(|_| CoordError::BadColumn(s.to_string()))?;
        Coord::new(row, col).ok_or_else(|| CoordError::BadColumn(s.to_string()))
    }
}

impl TryFrom<String> for Coord {
    type Error = CoordError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Coord> for String {
    fn from(coord: Coord) -> Self {
        coord.to_string()
    }
}

/// Breadth-first fill over orthogonal neighbours.
///
/// Every seed is part of the result. From there the fill spreads to any
/// neighbour for which `passable` returns true, and keeps spreading through
/// those cells.
pub fn flood_fill<F>(seeds: &[Coord], mut passable: F) -> BTreeSet<Coord>
where
    F: FnMut(Coord) -> bool,
{
    let mut visited: BTreeSet<Coord> = BTreeSet::new();
    let mut queue: Vec<Coord> = seeds.to_vec();

    while let Some(current) = queue.pop() {
        if !visited.insert(current) {
            continue;
        }
        for next in current.neighbors() {
            if !visited.contains(&next) && passable(next) {
                queue.push(next);
            }
        }
    }

    visited
}

/// Stable 64-bit digest of a seed string (FNV-1a).
///
/// `DefaultHasher` is not guaranteed stable across releases, and a stored
/// match must reshuffle identically after an upgrade.
pub fn seed_digest(seed: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    seed.bytes()
        .fold(OFFSET, |hash, byte| (hash ^ byte as u64).wrapping_mul(PRIME))
}

/// All 108 tiles, shuffled deterministically from the seed string
pub fn shuffled_bag(seed: &str) -> Vec<Coord> {
    let mut bag: Vec<Coord> = Coord::all().collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed_digest(seed));
    bag.shuffle(&mut rng);
    bag
}
