//! Element types stored in tiles
//!
//! Tiles hold one of four scalar types: `f32`, `f64`, [`Complex64`] and
//! [`Complex128`]. The [`Scalar`] trait ties a Rust type to its [`DType`]
//! tag, which travels in tile message headers so a receiver can reject a
//! payload of the wrong element type.

pub mod complex;
mod scalar;

pub use complex::{Complex64, Complex128};
pub use scalar::Scalar;

use std::fmt;

/// Runtime tag for a tile's element type
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DType {
    /// 32-bit float
    F32 = 0,
    /// 64-bit float
    F64 = 1,
    /// Complex with f32 parts
    Complex64 = 2,
    /// Complex with f64 parts
    Complex128 = 3,
}

impl DType {
    /// Size of one element in bytes
    #[inline]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F64 | DType::Complex64 => 8,
            DType::Complex128 => 16,
        }
    }

    /// Whether elements carry an imaginary part
    #[inline]
    pub const fn is_complex(self) -> bool {
        matches!(self, DType::Complex64 | DType::Complex128)
    }

    /// Decode a tag written by `self as u8`
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(DType::F32),
            1 => Some(DType::F64),
            2 => Some(DType::Complex64),
            3 => Some(DType::Complex128),
            _ => None,
        }
    }

    /// Short name, as used in BLAS routine prefixes
    pub const fn short_name(self) -> &'static str {
        match self {
            DType::F32 => "s",
            DType::F64 => "d",
            DType::Complex64 => "c",
            DType::Complex128 => "z",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::Complex64 => "complex64",
            DType::Complex128 => "complex128",
        };
        f.write_str(name)
    }
}
