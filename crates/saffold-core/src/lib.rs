//! Saffold - a hotel-chain merger board game engine
//!
//! This crate provides the core rules for Saffold:
//! - Grid coordinates and the seeded tile bag
//! - Board cells and chain membership
//! - Chain catalog, share pool and price tables
//! - Player cash, hands and portfolios
//! - Match state machine with full rule enforcement
//!
//! # Architecture
//!
//! The engine is pure and synchronous. Every intent is validated against the
//! current `Match` and either applied completely or rejected with a
//! [`GameError`], leaving the match untouched. Hosting, persistence and
//! networking live in the server crate.
//!
//! # Modules
//!
//! - [`grid`]: Board coordinates, flood fill and the tile bag
//! - [`board`]: Cell states and chain membership
//! - [`chain`]: Chain catalog, share counts and pricing
//! - [`player`]: Player state
//! - [`merger`]: Stockholder bonuses and liquidation order
//! - [`game`]: Match state machine
//! - [`scoring`]: Final standings

pub mod actions;
pub mod board;
pub mod chain;
pub mod game;
pub mod grid;
pub mod merger;
pub mod player;
pub mod scoring;

// Re-export commonly used types
pub use actions::{Bonus, BonusKind, GameEvent, Intent, LiquidationChoice};
pub use board::{Board, Cell};
pub use chain::{Chain, ChainId, ChainRegistry, Tier};
pub use game::{Decision, GameError, InvariantViolation, Match, MergerContext, Stage};
pub use grid::Coord;
pub use player::{ConnectionStatus, Player, PlayerId};
pub use scoring::{final_standings, Standing};
