//! Tiles: the unit of storage, residency and communication

pub mod kernels;
mod layout;
#[allow(clippy::module_inception)]
mod tile;

pub use layout::{Layout, LayoutConvert, Location, Op, Side, Uplo};
pub use tile::{Tile, TileKind};
