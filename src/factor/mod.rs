//! Distributed factorization drivers built on the tile layers

mod geqrf;
mod potrf;

pub use geqrf::{geqrf, TriangularFactors};
pub use potrf::potrf;
