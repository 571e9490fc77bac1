//! Tile steps of a tiled QR factorization
//!
//! A panel is factored in two stages. Each rank first runs Householder QR
//! on its own tiles of the panel stacked together, leaving an upper triangle
//! in its first tile. The triangles are then combined up the [`ttqrt`] tree.
//! Reflectors follow the LAPACK convention H = I - tau [1; v] [1; v]^H, and
//! Q^H is applied as H_1^H first.
//!
//! The scalars of a rank's local reflectors live in row 0 of its first tile
//! of the `local` factor matrix; those of a tree combine live in row 0 of the
//! lower partner's tile of the `reduce` factor matrix.

use super::{for_each_tile, ttmqr, ttqrt, Target};
use crate::dtype::Scalar;
use crate::error::{Error, Result};
use crate::matrix::Matrix;
use crate::runtime::Runtime;
use crate::tile::{LayoutConvert, Location, Op, Side, Tile};

/// Tiles of one block column stacked into a dense column-major buffer
struct Stacked<T> {
    data: Vec<T>,
    rows: usize,
    cols: usize,
}

impl<T: Scalar> Stacked<T> {
    fn gather(tiles: &[Tile<T>]) -> Self {
        let rows = tiles.iter().map(|t| t.mb()).sum();
        let cols = tiles.first().map_or(0, |t| t.nb());
        let mut data = vec![T::zero(); rows * cols];
        let mut r0 = 0;
        for t in tiles {
            for j in 0..cols {
                for i in 0..t.mb() {
                    data[r0 + i + j * rows] = t.at(i, j);
                }
            }
            r0 += t.mb();
        }
        Self { data, rows, cols }
    }

    fn scatter(&self, tiles: &[Tile<T>]) {
        let mut r0 = 0;
        for t in tiles {
            for j in 0..self.cols {
                for i in 0..t.mb() {
                    t.set(i, j, self.data[r0 + i + j * self.rows]);
                }
            }
            r0 += t.mb();
        }
    }

    /// Rows `from..` of column `j`
    fn column(&self, j: usize, from: usize) -> &[T] {
        &self.data[j * self.rows + from..(j + 1) * self.rows]
    }
}

/// Reflector with H^H [alpha; x] = [beta; 0]
///
/// Overwrites `x` with v and returns (beta, tau). beta is real; tau is zero
/// when x is zero and alpha real.
fn larfg<T: Scalar>(alpha: T, x: &mut [T]) -> (T, T) {
    let xnorm2: f64 = x.iter().map(|v| v.abs().powi(2)).sum();
    if xnorm2 == 0.0 && alpha.conj() == alpha {
        return (alpha, T::zero());
    }
    let norm = (alpha.abs().powi(2) + xnorm2).sqrt();
    let beta = T::from_f64(if alpha.re_f64() >= 0.0 { -norm } else { norm });
    let tau = (beta - alpha) / beta;
    let scale = T::one() / (alpha - beta);
    for v in x.iter_mut() {
        *v *= scale;
    }
    (beta, tau)
}

/// y = H^H y for y = [y0; ys] and H = I - tau [1; v] [1; v]^H
fn reflect<T: Scalar>(tau: T, v: &[T], y: &mut [T]) {
    let Some((y0, ys)) = y.split_first_mut() else {
        return;
    };
    let mut w = *y0;
    for (vi, yi) in v.iter().zip(ys.iter()) {
        w += vi.conj() * *yi;
    }
    let s = tau.conj() * w;
    *y0 -= s;
    for (vi, yi) in v.iter().zip(ys.iter_mut()) {
        *yi -= *vi * s;
    }
}

/// Householder QR in place; returns one tau per reflector
fn householder_qr<T: Scalar>(a: &mut Stacked<T>) -> Vec<T> {
    let (rows, cols) = (a.rows, a.cols);
    let count = rows.min(cols);
    let mut taus = Vec::with_capacity(count);
    for j in 0..count {
        let (left, right) = a.data.split_at_mut((j + 1) * rows);
        let col = &mut left[j * rows + j..];
        let Some((alpha, x)) = col.split_first_mut() else {
            break;
        };
        let (beta, tau) = larfg(*alpha, x);
        *alpha = beta;
        let v = &*x;
        for jj in 0..cols - j - 1 {
            reflect(tau, v, &mut right[jj * rows + j..(jj + 1) * rows]);
        }
        taus.push(tau);
    }
    taus
}

/// Apply the reflectors stored below the diagonal of `v` to `c`, first to last
fn apply_reflectors<T: Scalar>(v: &Stacked<T>, tau: impl Fn(usize) -> T, c: &mut Stacked<T>) {
    let rows = c.rows;
    for j in 0..v.rows.min(v.cols) {
        let (tau, vj) = (tau(j), v.column(j, j + 1));
        for cc in 0..c.cols {
            reflect(tau, vj, &mut c.data[cc * rows + j..(cc + 1) * rows]);
        }
    }
}

/// QR of [R1; R2], with R1 the upper triangle of `top` and R2 the upper
/// trapezoid in the first rows of `bottom`
///
/// R replaces R1; the reflectors replace R2 and their scalars go to row 0 of
/// `tau`. Rows below the trapezoid of `bottom` are left alone.
fn tt_factor<T: Scalar>(top: &Tile<T>, bottom: &Tile<T>, tau: &Tile<T>) -> Result<()> {
    let n = bottom.nb();
    if top.mb() < n || top.nb() != n || tau.nb() != n {
        return Err(Error::shape_mismatch((n, n), (top.mb(), top.nb())));
    }
    let p = bottom.mb().min(n);
    for j in 0..n {
        let mut v: Vec<T> = (0..(j + 1).min(p)).map(|i| bottom.at(i, j)).collect();
        let (beta, t) = larfg(top.at(j, j), &mut v);
        top.set(j, j, beta);
        for (i, &vi) in v.iter().enumerate() {
            bottom.set(i, j, vi);
        }
        tau.set(0, j, t);
        for jj in j + 1..n {
            let mut w = top.at(j, jj);
            for (i, &vi) in v.iter().enumerate() {
                w += vi.conj() * bottom.at(i, jj);
            }
            let s = t.conj() * w;
            top.set(j, jj, top.at(j, jj) - s);
            for (i, &vi) in v.iter().enumerate() {
                bottom.set(i, jj, bottom.at(i, jj) - vi * s);
            }
        }
    }
    Ok(())
}

/// Apply the reflectors of [`tt_factor`] to the tile pair [C1; C2]
fn tt_apply<T: Scalar>(v: &Tile<T>, tau: &Tile<T>, c1: &Tile<T>, c2: &Tile<T>) -> Result<()> {
    let n = v.nb();
    if c1.mb() < n || c1.nb() != c2.nb() {
        return Err(Error::shape_mismatch((n, c2.nb()), (c1.mb(), c1.nb())));
    }
    let p = v.mb().min(n);
    for j in 0..n {
        let l = (j + 1).min(p);
        let tau = tau.at(0, j).conj();
        for cc in 0..c1.nb() {
            let mut w = c1.at(j, cc);
            for i in 0..l {
                w += v.at(i, j).conj() * c2.at(i, cc);
            }
            let s = tau * w;
            c1.set(j, cc, c1.at(j, cc) - s);
            for i in 0..l {
                c2.set(i, cc, c2.at(i, cc) - v.at(i, j) * s);
            }
        }
    }
    Ok(())
}

fn single_column<T: Scalar, R: Runtime>(name: &'static str, a: &Matrix<T, R>) -> Result<()> {
    if a.nt() != 1 {
        return Err(Error::invalid_argument(name, "expected a single tile column"));
    }
    Ok(())
}

/// Householder QR of this rank's tiles of panel `a`, stacked top to bottom
///
/// The reflector scalars go to row 0 of `t` at this rank's first panel row.
pub fn geqrf_panel<T: Scalar, R: Runtime>(a: &Matrix<T, R>, t: &Matrix<T, R>) -> Result<()> {
    single_column("a", a)?;
    let rows: Vec<usize> = (0..a.mt()).filter(|&i| a.tile_is_local(i, 0)).collect();
    let Some(&first) = rows.first() else {
        return Ok(());
    };
    let tiles = rows
        .iter()
        .map(|&i| a.tile_get_for_writing(i, 0, Location::Host, LayoutConvert::ColMajor))
        .collect::<Result<Vec<_>>>()?;
    let mut panel = Stacked::gather(&tiles);
    let taus = householder_qr(&mut panel);
    panel.scatter(&tiles);

    let t = t.tile_get_for_writing(first, 0, Location::Host, LayoutConvert::ColMajor)?;
    for j in 0..t.nb() {
        t.set(0, j, taus.get(j).copied().unwrap_or_else(T::zero));
    }
    Ok(())
}

/// Combine the per-rank triangles of panel `a` into the first rank's tile
///
/// Call after [`geqrf_panel`] on every rank of the panel.
pub fn ttqrt_panel<T: Scalar, R: Runtime>(
    a: &Matrix<T, R>,
    t: &Matrix<T, R>,
    tag: i32,
) -> Result<()> {
    ttqrt(a, t, tag, |_, _, top, bottom, tau| tt_factor(top, bottom, tau))
}

/// C = Q_r^H C with the local reflectors of panel `a`, for every local tile column of `c`
///
/// `c` has the panel's tile rows. In a block-cyclic layout a rank's tiles in
/// one column of `c` are exactly the rows of one panel rank, so each column
/// is one stacked apply.
pub fn unmqr_trailing<T: Scalar, R: Runtime>(
    target: Target,
    a: &Matrix<T, R>,
    t: &Matrix<T, R>,
    c: &Matrix<T, R>,
) -> Result<()> {
    single_column("a", a)?;
    if c.mt() != a.mt() {
        return Err(Error::shape_mismatch((a.mt(), c.nt()), (c.mt(), c.nt())));
    }
    let columns: Vec<(usize, usize)> = (0..c.nt())
        .filter(|&j| (0..c.mt()).any(|i| c.tile_is_local(i, j)))
        .map(|j| (0, j))
        .collect();
    for_each_tile(target, &columns, |_, j| {
        let rows: Vec<usize> = (0..c.mt()).filter(|&i| c.tile_is_local(i, j)).collect();
        let Some(&first) = rows.first() else {
            return Ok(());
        };
        let v = rows
            .iter()
            .map(|&i| a.tile_get_for_reading(i, 0, Location::Host, LayoutConvert::ColMajor))
            .collect::<Result<Vec<_>>>()?;
        let tau = t.tile_get_for_reading(first, 0, Location::Host, LayoutConvert::ColMajor)?;
        let tiles = rows
            .iter()
            .map(|&i| c.tile_get_for_writing(i, j, Location::Host, LayoutConvert::ColMajor))
            .collect::<Result<Vec<_>>>()?;
        let mut stacked = Stacked::gather(&tiles);
        apply_reflectors(&Stacked::gather(&v), |jj| tau.at(0, jj), &mut stacked);
        stacked.scatter(&tiles);
        Ok(())
    })
}

/// C = Q_tree^H C with the reflectors [`ttqrt_panel`] left in panel `a`
pub fn ttmqr_trailing<T: Scalar, R: Runtime>(
    a: &Matrix<T, R>,
    t: &Matrix<T, R>,
    c: &Matrix<T, R>,
    tag: i32,
) -> Result<()> {
    ttmqr(Side::Left, Op::ConjTrans, a, c, tag, |row, c1, c2| {
        let v = a.tile_get_for_reading(row, 0, Location::Host, LayoutConvert::ColMajor)?;
        let tau = t.tile_get_for_reading(row, 0, Location::Host, LayoutConvert::ColMajor)?;
        tt_apply(&v, &tau, c1, c2)
    })
}
