//! Scalar trait mapping Rust element types to [`DType`]

use super::{Complex64, Complex128, DType};
use bytemuck::{Pod, Zeroable};
use std::fmt::Debug;
use std::ops::{Add, AddAssign, Div, Mul, MulAssign, Neg, Sub, SubAssign};

/// Trait for types that can be elements of a tile
///
/// # Bounds
/// - `Pod + Zeroable` - tiles are packed into messages and device buffers as raw bytes
/// - field arithmetic with `Output = Self`
///
/// Real types implement `conj` as the identity, so Hermitian code paths can be
/// written once for real and complex matrices.
pub trait Scalar:
    Copy
    + Send
    + Sync
    + Pod
    + Zeroable
    + Debug
    + PartialEq
    + 'static
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
    + MulAssign
{
    /// Underlying real type (`Self` for real scalars)
    type Real: Scalar + PartialOrd;

    /// Runtime tag for this type
    const DTYPE: DType;

    /// Complex conjugate (identity for real types)
    fn conj(self) -> Self;

    /// Magnitude as f64
    fn abs(self) -> f64;

    /// Real part
    fn real(self) -> Self::Real;

    /// Lift a real value
    fn from_real(re: Self::Real) -> Self;

    /// Convert from f64; complex types get a zero imaginary part
    fn from_f64(v: f64) -> Self;

    /// Real part widened to f64
    fn re_f64(self) -> f64;

    /// Principal square root
    fn sqrt(self) -> Self;

    /// Additive identity
    #[inline]
    fn zero() -> Self {
        Self::zeroed()
    }

    /// Multiplicative identity
    #[inline]
    fn one() -> Self {
        Self::from_f64(1.0)
    }

    /// Whether this type carries an imaginary part
    #[inline]
    fn is_complex() -> bool {
        Self::DTYPE.is_complex()
    }
}

macro_rules! impl_real_scalar {
    ($t:ty, $dtype:expr) => {
        impl Scalar for $t {
            type Real = $t;
            const DTYPE: DType = $dtype;

            #[inline]
            fn conj(self) -> Self {
                self
            }

            #[inline]
            fn abs(self) -> f64 {
                <$t>::abs(self) as f64
            }

            #[inline]
            fn real(self) -> Self::Real {
                self
            }

            #[inline]
            fn from_real(re: Self::Real) -> Self {
                re
            }

            #[inline]
            fn from_f64(v: f64) -> Self {
                v as $t
            }

            #[inline]
            fn re_f64(self) -> f64 {
                self as f64
            }

            #[inline]
            fn sqrt(self) -> Self {
                <$t>::sqrt(self)
            }
        }
    };
}

impl_real_scalar!(f32, DType::F32);
impl_real_scalar!(f64, DType::F64);

macro_rules! impl_complex_scalar {
    ($t:ty, $real:ty, $dtype:expr) => {
        impl Scalar for $t {
            type Real = $real;
            const DTYPE: DType = $dtype;

            #[inline]
            fn conj(self) -> Self {
                <$t>::conj(self)
            }

            #[inline]
            fn abs(self) -> f64 {
                self.magnitude() as f64
            }

            #[inline]
            fn real(self) -> Self::Real {
                self.re
            }

            #[inline]
            fn from_real(re: Self::Real) -> Self {
                <$t>::new(re, 0.0)
            }

            #[inline]
            fn from_f64(v: f64) -> Self {
                <$t>::new(v as $real, 0.0)
            }

            #[inline]
            fn re_f64(self) -> f64 {
                self.re as f64
            }

            #[inline]
            fn sqrt(self) -> Self {
                <$t>::sqrt(self)
            }
        }
    };
}

impl_complex_scalar!(Complex64, f32, DType::Complex64);
impl_complex_scalar!(Complex128, f64, DType::Complex128);
