//! Complex scalar types for Hermitian tile kernels and pivoting
//!
//! `Complex64` and `Complex128` are `#[repr(C)]` interleaved pairs (re, im),
//! the layout LAPACK and accelerator libraries expect, so tiles of complex
//! elements can be packed into messages and device buffers with `bytemuck`.
//!
//! # Examples
//!
//! ```
//! use tessel::dtype::Complex128;
//!
//! let z = Complex128::new(3.0, 4.0);
//! assert_eq!(z.magnitude(), 5.0);
//! assert_eq!(z.conj(), Complex128::new(3.0, -4.0));
//! ```

use bytemuck::{Pod, Zeroable};
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, MulAssign, Neg, Sub, SubAssign};

/// Implements one complex type over the given float type.
macro_rules! impl_complex {
    ($name:ident, $float:ty, $doc_bits:literal, $doc_float:literal) => {
        #[doc = concat!(
            $doc_bits,
            "-bit complex number with ",
            $doc_float,
            " real and imaginary parts"
        )]
        #[repr(C)]
        #[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
        pub struct $name {
            /// Real part
            pub re: $float,
            /// Imaginary part
            pub im: $float,
        }

        impl $name {
            /// Zero complex number
            pub const ZERO: Self = Self { re: 0.0, im: 0.0 };

            /// One (real unit)
            pub const ONE: Self = Self { re: 1.0, im: 0.0 };

            /// Imaginary unit i
            pub const I: Self = Self { re: 0.0, im: 1.0 };

            /// Create a new complex number
            #[inline]
            pub const fn new(re: $float, im: $float) -> Self {
                Self { re, im }
            }

            /// Magnitude: |z| = sqrt(re² + im²)
            #[inline]
            pub fn magnitude(self) -> $float {
                self.re.hypot(self.im)
            }

            /// Squared magnitude: |z|² = re² + im²
            #[inline]
            pub fn magnitude_squared(self) -> $float {
                self.re * self.re + self.im * self.im
            }

            /// Complex conjugate: conj(a + bi) = a - bi
            #[inline]
            pub fn conj(self) -> Self {
                Self {
                    re: self.re,
                    im: -self.im,
                }
            }

            /// Square root on the principal branch
            #[inline]
            pub fn sqrt(self) -> Self {
                let mag = self.magnitude();
                if mag == 0.0 {
                    Self::ZERO
                } else {
                    let re = ((mag + self.re) / 2.0).sqrt();
                    let im = ((mag - self.re) / 2.0).sqrt();
                    Self {
                        re,
                        im: if self.im < 0.0 { -im } else { im },
                    }
                }
            }
        }

        impl Add for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: Self) -> Self {
                Self {
                    re: self.re + rhs.re,
                    im: self.im + rhs.im,
                }
            }
        }

        impl Sub for $name {
            type Output = Self;

            #[inline]
            fn sub(self, rhs: Self) -> Self {
                Self {
                    re: self.re - rhs.re,
                    im: self.im - rhs.im,
                }
            }
        }

        impl Mul for $name {
            type Output = Self;

            /// (a+bi)(c+di) = (ac-bd) + (ad+bc)i
            #[inline]
            fn mul(self, rhs: Self) -> Self {
                Self {
                    re: self.re * rhs.re - self.im * rhs.im,
                    im: self.re * rhs.im + self.im * rhs.re,
                }
            }
        }

        impl Div for $name {
            type Output = Self;

            /// (a+bi)/(c+di) = (a+bi)*conj(c+di)/|c+di|²
            #[inline]
            fn div(self, rhs: Self) -> Self {
                let denom = rhs.magnitude_squared();
                Self {
                    re: (self.re * rhs.re + self.im * rhs.im) / denom,
                    im: (self.im * rhs.re - self.re * rhs.im) / denom,
                }
            }
        }

        impl Neg for $name {
            type Output = Self;

            #[inline]
            fn neg(self) -> Self {
                Self {
                    re: -self.re,
                    im: -self.im,
                }
            }
        }

        impl AddAssign for $name {
            #[inline]
            fn add_assign(&mut self, rhs: Self) {
                *self = *self + rhs;
            }
        }

        impl SubAssign for $name {
            #[inline]
            fn sub_assign(&mut self, rhs: Self) {
                *self = *self - rhs;
            }
        }

        impl MulAssign for $name {
            #[inline]
            fn mul_assign(&mut self, rhs: Self) {
                *self = *self * rhs;
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.im >= 0.0 {
                    write!(f, "{}+{}i", self.re, self.im)
                } else {
                    write!(f, "{}{}i", self.re, self.im)
                }
            }
        }

        impl From<$float> for $name {
            #[inline]
            fn from(re: $float) -> Self {
                Self { re, im: 0.0 }
            }
        }

        impl From<($float, $float)> for $name {
            #[inline]
            fn from((re, im): ($float, $float)) -> Self {
                Self { re, im }
            }
        }
    };
}

impl_complex!(Complex64, f32, "64", "f32");
impl_complex!(Complex128, f64, "128", "f64");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complex_arithmetic() {
        let a = Complex128::new(1.0, 2.0);
        let b = Complex128::new(3.0, -1.0);
        assert_eq!(a + b, Complex128::new(4.0, 1.0));
        assert_eq!(a - b, Complex128::new(-2.0, 3.0));
        assert_eq!(a * b, Complex128::new(5.0, 5.0));
        let q = (a * b) / b;
        assert!((q.re - a.re).abs() < 1e-12 && (q.im - a.im).abs() < 1e-12);
    }

    #[test]
    fn test_complex_sqrt_branch() {
        let z = Complex128::new(-4.0, 0.0).sqrt();
        assert!((z.re).abs() < 1e-12);
        assert!((z.im - 2.0).abs() < 1e-12);

        let w = Complex64::new(3.0, -4.0);
        let r = w.sqrt();
        let back = r * r;
        assert!((back.re - 3.0).abs() < 1e-5 && (back.im + 4.0).abs() < 1e-5);
    }

    #[test]
    fn test_complex_pod_layout() {
        let v = [Complex64::new(1.0, 2.0), Complex64::new(3.0, 4.0)];
        let floats: &[f32] = bytemuck::cast_slice(&v);
        assert_eq!(floats, &[1.0, 2.0, 3.0, 4.0]);
    }
}
