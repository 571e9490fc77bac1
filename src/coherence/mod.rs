//! Tile residency and coherence across host and devices
//!
//! Each tile has at most one instance per location. Instances carry a MOSI
//! state: at most one is Modified, and while one is Modified every other
//! instance is Invalid. Only the operations in [`engine`] change states, and
//! they move data as a side effect.
//!
//! Workspace instances come from a per-matrix [`Memory`] and are released
//! explicitly, by life count for received tiles or in bulk at the end of a
//! block column. Origin instances (caller buffers or matrix-owned tiles) are
//! never released or evicted.

pub mod engine;
mod memory;
mod node;

pub use memory::{Memory, PoolStats};
pub use node::{Mosi, MosiState, TileNode};
