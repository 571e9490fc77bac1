//! Distributed tile matrices
//!
//! A [`Distribution`] says who owns each tile and how big it is. A
//! [`Matrix`] pairs a distribution with a tile arena shared by all of its
//! views, and [`HermitianMatrix`] tags a square one with its stored triangle.
//! Tile messaging between ranks lives in [`comm`].

pub mod comm;
mod distribution;
mod hermitian;
#[allow(clippy::module_inception)]
mod matrix;

pub use comm::{BcastList, ReduceList, DEFAULT_RADIX};
pub use distribution::{
    block_cyclic_rank, device_1d_grid, uniform_tile_size, Distribution, GridOrder, ProcessGrid,
    TileMapFn, TileSizeFn,
};
pub use hermitian::HermitianMatrix;
pub use matrix::{Matrix, MatrixConfig};
