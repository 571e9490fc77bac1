//! Error types for tessel

use crate::dtype::DType;
use crate::tile::{Layout, Location};
use thiserror::Error;

/// Result type alias using tessel's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tessel operations
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid argument provided to an operation
    #[error("Invalid argument '{arg}': {reason}")]
    InvalidArgument {
        /// The argument name
        arg: &'static str,
        /// Reason for invalidity
        reason: String,
    },

    /// Tile or matrix dimensions disagree
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Expected (rows, cols)
        expected: (usize, usize),
        /// Actual (rows, cols)
        got: (usize, usize),
    },

    /// Element type of a received tile does not match the matrix
    #[error("DType mismatch: expected {expected}, got {got}")]
    DTypeMismatch {
        /// Expected dtype
        expected: DType,
        /// Received dtype
        got: DType,
    },

    /// Direct data access to a tile this rank neither owns nor has received
    #[error("Tile ({i}, {j}) is not local to rank {rank}")]
    TileNotLocal {
        /// Tile row index
        i: usize,
        /// Tile column index
        j: usize,
        /// Calling rank
        rank: usize,
    },

    /// No instance of the tile exists at the requested location
    #[error("Tile ({i}, {j}) has no instance on {location}")]
    TileNotFound {
        /// Tile row index
        i: usize,
        /// Tile column index
        j: usize,
        /// Requested location
        location: Location,
    },

    /// A tile arrived or was found in a different layout than required
    #[error("Layout mismatch: expected {expected:?}, got {got:?}")]
    LayoutMismatch {
        /// Required layout
        expected: Layout,
        /// Actual layout
        got: Layout,
    },

    /// In-place layout conversion is impossible for this tile
    #[error("Unsupported layout conversion for {mb}x{nb} tile with stride {stride}")]
    UnsupportedLayout {
        /// Tile rows
        mb: usize,
        /// Tile columns
        nb: usize,
        /// Tile stride
        stride: usize,
    },

    /// Workspace allocation failed
    #[error("Out of memory on {location}: failed to allocate {size} bytes")]
    OutOfMemory {
        /// Location of the failed allocation
        location: Location,
        /// Requested size in bytes
        size: usize,
    },

    /// Target/operation combination that is an explicit placeholder
    #[error("Not implemented: {feature}")]
    NotImplemented {
        /// Description of the unimplemented feature
        feature: &'static str,
    },

    /// Message passing failed
    #[error("Communication error: {0}")]
    Comm(String),

    /// A blocking receive exceeded the communicator's timeout
    #[error("Timed out receiving from rank {src} with tag {tag}")]
    CommTimeout {
        /// Source rank
        src: usize,
        /// Message tag
        tag: i32,
    },

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument(arg: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            arg,
            reason: reason.into(),
        }
    }

    /// Create a shape mismatch error
    pub fn shape_mismatch(expected: (usize, usize), got: (usize, usize)) -> Self {
        Self::ShapeMismatch { expected, got }
    }

    /// Create a communication error
    pub fn comm(msg: impl Into<String>) -> Self {
        Self::Comm(msg.into())
    }
}
