//! # tessel
//!
//! **Distributed tile-based dense linear algebra.**
//!
//! tessel stores a dense matrix as a grid of tiles spread block-cyclically
//! over a process grid, keeps every tile's copies on host and accelerators
//! coherent, moves tiles between ranks with tree broadcasts and reductions,
//! and schedules factorization steps as a lookahead task graph.
//!
//! ## Layers
//!
//! - [`tile`]: a dense block with layout, stride and transpose flags, plus
//!   naive host kernels
//! - [`matrix`]: distributed matrices and views, tile arenas, tile
//!   communication
//! - [`coherence`]: MOSI states per tile instance, workspace and eviction
//! - [`comm`]: the communicator interface, an in-process cluster and
//!   hypercube schedules
//! - [`batch`]: grouping of device tiles into batched kernel launches
//! - [`internal`]: tile-level steps dispatched on a [`internal::Target`]
//! - [`task`]: dependency-token task graph and lookahead plan
//! - [`factor`]: distributed drivers (Cholesky and QR)
//!
//! ## Quick Start
//!
//! ```
//! use tessel::prelude::*;
//!
//! // four ranks on a 2 x 2 grid, each a thread of this process
//! LocalCluster::run(4, |comm| {
//!     let a = HermitianMatrix::<f64>::new(Uplo::Lower, 8, 2, 2, 2, comm).unwrap();
//!     a.insert_local_tiles(Target::HostTask).unwrap();
//!     tessel::internal::set(Target::HostTask, 1.0, 9.0, &a).unwrap();
//!     potrf(&a, &Options::default().with_num_threads(2)).unwrap();
//! });
//! ```
//!
//! ## Feature Flags
//!
//! - `rayon` (default): parallel host loops for `HostTask` and `HostNest`
//! - `serde`: `Serialize`/`Deserialize` for [`Options`] and the small enums

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod coherence;
pub mod comm;
pub mod dtype;
pub mod error;
pub mod factor;
pub mod internal;
pub mod matrix;
mod options;
pub mod runtime;
pub mod task;
pub mod tile;

pub use options::Options;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::comm::{Communicator, LocalCluster};
    pub use crate::dtype::{Complex64, Complex128, Scalar};
    pub use crate::error::{Error, Result};
    pub use crate::factor::{geqrf, potrf, TriangularFactors};
    pub use crate::internal::Target;
    pub use crate::matrix::{HermitianMatrix, Matrix, MatrixConfig};
    pub use crate::options::Options;
    pub use crate::runtime::cpu::CpuRuntime;
    pub use crate::runtime::Runtime;
    pub use crate::tile::{Layout, LayoutConvert, Location, Op, Tile, Uplo};
}
