//! Naive host reference kernels on tiles
//!
//! These stand in for BLAS/LAPACK: loops over [`Tile::at`]/[`Tile::set`], so
//! every kernel honors the tile's layout and op. Triangular kernels read the
//! triangle from [`Tile::uplo_logical`].

use super::{Side, Tile, Uplo};
use crate::dtype::Scalar;
use crate::error::{Error, Result};

/// C = alpha * A * B + beta * C
pub fn gemm<T: Scalar>(alpha: T, a: &Tile<T>, b: &Tile<T>, beta: T, c: &Tile<T>) -> Result<()> {
    let (m, n, k) = (c.mb(), c.nb(), a.nb());
    if a.mb() != m || b.mb() != k || b.nb() != n {
        return Err(Error::shape_mismatch((m, n), (a.mb(), b.nb())));
    }
    for j in 0..n {
        for i in 0..m {
            let mut sum = T::zero();
            for l in 0..k {
                sum += a.at(i, l) * b.at(l, j);
            }
            c.set(i, j, alpha * sum + beta * c.at(i, j));
        }
    }
    Ok(())
}

/// C = alpha * A * A^H + beta * C, touching only C's stored triangle
pub fn herk<T: Scalar>(alpha: T::Real, a: &Tile<T>, beta: T::Real, c: &Tile<T>) -> Result<()> {
    let (n, k) = (c.mb(), a.nb());
    if c.nb() != n || a.mb() != n {
        return Err(Error::shape_mismatch((n, n), (a.mb(), c.nb())));
    }
    let (alpha, beta) = (T::from_real(alpha), T::from_real(beta));
    let uplo = c.uplo_logical();
    for j in 0..n {
        let rows = match uplo {
            Uplo::Lower => j..n,
            Uplo::Upper => 0..j + 1,
            Uplo::General => 0..n,
        };
        for i in rows {
            let mut sum = T::zero();
            for l in 0..k {
                sum += a.at(i, l) * a.at(j, l).conj();
            }
            let mut value = alpha * sum + beta * c.at(i, j);
            if i == j {
                value = T::from_real(value.real());
            }
            c.set(i, j, value);
        }
    }
    Ok(())
}

/// Solve op(A) X = alpha B (left) or X op(A) = alpha B (right), overwriting B
///
/// `a` is triangular with non-unit diagonal; its triangle comes from
/// `a.uplo_logical()`.
pub fn trsm<T: Scalar>(side: Side, alpha: T, a: &Tile<T>, b: &Tile<T>) -> Result<()> {
    let (m, n) = (b.mb(), b.nb());
    let order = if side == Side::Left { m } else { n };
    if a.mb() != order || a.nb() != order {
        return Err(Error::shape_mismatch((order, order), (a.mb(), a.nb())));
    }
    let lower = match a.uplo_logical() {
        Uplo::Lower => true,
        Uplo::Upper => false,
        Uplo::General => {
            return Err(Error::invalid_argument("a", "trsm needs a triangular tile"));
        }
    };
    for j in 0..n {
        for i in 0..m {
            b.set(i, j, alpha * b.at(i, j));
        }
    }
    match side {
        Side::Left => {
            for j in 0..n {
                let rows: Box<dyn Iterator<Item = usize>> =
                    if lower { Box::new(0..m) } else { Box::new((0..m).rev()) };
                for i in rows {
                    let mut sum = b.at(i, j);
                    let others = if lower { 0..i } else { i + 1..m };
                    for l in others {
                        sum -= a.at(i, l) * b.at(l, j);
                    }
                    b.set(i, j, sum / a.at(i, i));
                }
            }
        }
        Side::Right => {
            let cols: Box<dyn Iterator<Item = usize>> =
                if lower { Box::new((0..n).rev()) } else { Box::new(0..n) };
            for j in cols {
                let others = if lower { j + 1..n } else { 0..j };
                for i in 0..m {
                    let mut sum = b.at(i, j);
                    for l in others.clone() {
                        sum -= b.at(i, l) * a.at(l, j);
                    }
                    b.set(i, j, sum / a.at(j, j));
                }
            }
        }
    }
    Ok(())
}

/// Cholesky factorization of a Hermitian tile, in place
///
/// The logical lower triangle is overwritten with L where A = L L^H. An upper
/// tile is factored as U^H U by working on its conjugate transpose.
pub fn potrf<T: Scalar>(a: &Tile<T>) -> Result<()> {
    let a = match a.uplo_logical() {
        Uplo::Upper => a.conj_transpose(),
        _ => *a,
    };
    let n = a.mb();
    if a.nb() != n {
        return Err(Error::shape_mismatch((n, n), (a.mb(), a.nb())));
    }
    for j in 0..n {
        let mut d = a.at(j, j).re_f64();
        for k in 0..j {
            d -= a.at(j, k).abs().powi(2);
        }
        if d <= 0.0 || d.is_nan() {
            return Err(Error::invalid_argument(
                "a",
                format!("not positive definite at diagonal {}", j),
            ));
        }
        let ljj = d.sqrt();
        a.set(j, j, T::from_f64(ljj));
        for i in j + 1..n {
            let mut sum = a.at(i, j);
            for k in 0..j {
                sum -= a.at(i, k) * a.at(j, k).conj();
            }
            a.set(i, j, sum / T::from_f64(ljj));
        }
    }
    Ok(())
}

/// Set the off-diagonal part to `offdiag` and the diagonal to `diag`
///
/// Only the logical triangle is touched for a trapezoidal tile.
pub fn set<T: Scalar>(offdiag: T, diag: T, a: &Tile<T>) {
    let uplo = a.uplo_logical();
    for j in 0..a.nb() {
        for i in 0..a.mb() {
            let inside = match uplo {
                Uplo::Lower => i >= j,
                Uplo::Upper => i <= j,
                Uplo::General => true,
            };
            if inside {
                a.set(i, j, if i == j { diag } else { offdiag });
            }
        }
    }
}

/// Multiply every element by `numer / denom`
pub fn scale<T: Scalar>(numer: T::Real, denom: T::Real, a: &Tile<T>) {
    let factor = T::from_real(numer) / T::from_real(denom);
    for j in 0..a.nb() {
        for i in 0..a.mb() {
            a.set(i, j, a.at(i, j) * factor);
        }
    }
}

/// Element-wise sum: B += A
pub fn add<T: Scalar>(a: &Tile<T>, b: &Tile<T>) -> Result<()> {
    if (a.mb(), a.nb()) != (b.mb(), b.nb()) {
        return Err(Error::shape_mismatch((b.mb(), b.nb()), (a.mb(), a.nb())));
    }
    for j in 0..a.nb() {
        for i in 0..a.mb() {
            b.set(i, j, b.at(i, j) + a.at(i, j));
        }
    }
    Ok(())
}
