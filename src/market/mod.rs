//! Capacity model for one optimization pass: the shared schedule grid, the
//! per-node capacity tree and the offers built from it.

pub mod grid;
pub mod offer;
pub mod setpoints;
pub mod tree;

pub use grid::PassContext;
pub use offer::Offer;
pub use tree::{Direction, MarketId, MarketTree};
