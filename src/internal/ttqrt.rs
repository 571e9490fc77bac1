//! Triangle-triangle reduction trees over the ranks of a panel
//!
//! After each rank factors its own rows of a tall panel, the triangles left
//! on the ranks are combined pairwise up a binary tree. Ranks are ordered by
//! the first tile row they own in the panel; at the level with stride `s`,
//! the rank at position `k + s` (k a multiple of `2s`) pairs with the rank
//! at `k`. Applying the resulting orthogonal factor to other matrices walks
//! the same tree, from the root down or from the leaves up.

use crate::dtype::Scalar;
use crate::error::{Error, Result};
use crate::matrix::Matrix;
use crate::runtime::Runtime;
use crate::tile::{Layout, LayoutConvert, Location, Op, Side, Tile};
use std::collections::BTreeMap;
use tracing::debug;

/// First tile row of column 0 owned by each rank, ascending by row
fn rank_first_rows<T: Scalar, R: Runtime>(a: &Matrix<T, R>) -> Vec<(usize, usize)> {
    let mut first: BTreeMap<usize, usize> = BTreeMap::new();
    for i in 0..a.mt() {
        first.entry(a.tile_rank(i, 0)).or_insert(i);
    }
    let mut out: Vec<(usize, usize)> = first.into_iter().collect();
    out.sort_by_key(|&(_, row)| row);
    out
}

/// ceil(log2(n)); 0 for n <= 1
fn levels(n: usize) -> u32 {
    if n <= 1 { 0 } else { usize::BITS - (n - 1).leading_zeros() }
}

/// Combine each rank's top triangle of panel `a` into the first rank's
///
/// `a` must be a single tile column, and `t` a matrix of the same shape and
/// distribution whose local tiles exist. At each tree level the lower
/// partner sends its tile to the upper partner, which calls
/// `combine(top_row, bottom_row, top, bottom, t_bottom)` on host tiles, with
/// `t_bottom` a scratch copy of `t(bottom_row, 0)`. The upper partner then
/// sends the bottom tile and `t_bottom` back to the lower partner. Every rank
/// owning a tile of `a` must call this.
pub fn ttqrt<T, R, F>(a: &Matrix<T, R>, t: &Matrix<T, R>, tag: i32, combine: F) -> Result<()>
where
    T: Scalar,
    R: Runtime,
    F: Fn(usize, usize, &Tile<T>, &Tile<T>, &Tile<T>) -> Result<()>,
{
    if a.nt() != 1 {
        return Err(Error::invalid_argument("a", "ttqrt needs a single tile column"));
    }
    if (t.mt(), t.nt()) != (a.mt(), 1) {
        return Err(Error::shape_mismatch((a.mt(), 1), (t.mt(), t.nt())));
    }
    let layout = Layout::ColMajor;
    let ranks = rank_first_rows(a);
    let nranks = ranks.len();
    let mut step = 1;
    for level in 0..levels(nranks) {
        for index in (0..nranks).step_by(step) {
            let i = ranks[index].1;
            if !a.tile_is_local(i, 0) {
                continue;
            }
            if index % (2 * step) == 0 {
                if index + step < nranks {
                    let i_src = ranks[index + step].1;
                    let src = a.tile_rank(i_src, 0);
                    a.tile_recv(i_src, 0, src, layout, tag)?;
                    let (host, col_major) = (Location::Host, LayoutConvert::ColMajor);
                    let top = a.tile_get_for_writing(i, 0, host, col_major)?;
                    let bottom = a.tile_get_for_writing(i_src, 0, host, col_major)?;
                    let t_bottom = t.tile_insert_workspace(i_src, 0, host, layout)?;
                    t.tile_modified(i_src, 0, host, true)?;
                    combine(i, i_src, &top, &bottom, &t_bottom)?;
                    a.tile_send(i_src, 0, src, tag)?;
                    t.tile_send(i_src, 0, src, tag)?;
                    a.tile_tick(i_src, 0);
                    t.tile_tick(i_src, 0);
                    debug!(level, top = i, bottom = i_src, "ttqrt combine");
                }
            } else {
                let i_dst = ranks[index - step].1;
                let dst = a.tile_rank(i_dst, 0);
                a.tile_get_for_writing(i, 0, Location::Host, LayoutConvert::ColMajor)?;
                a.tile_send(i, 0, dst, tag)?;
                a.tile_recv(i, 0, dst, layout, tag)?;
                t.tile_recv(i, 0, dst, layout, tag)?;
            }
        }
        step *= 2;
    }
    Ok(())
}

/// Apply the tree built by [`ttqrt`] on panel `a` to `c`
///
/// With `Side::Left` the tree runs over tile rows of `c` (`c.mt() ==
/// a.mt()`); with `Side::Right`, over tile columns. Q is applied root first
/// (descending) when `side` is Left and `op` is NoTrans, or side is Right
/// and `op` is not NoTrans; otherwise leaves first. At each level, for every
/// tile `k` along the other dimension, the upper partner sends its tile
/// `C1` to the lower partner, which calls `combine(row, c1, c2)` with `row`
/// its panel row and `c2` its own tile, then returns `C1`.
pub fn ttmqr<T, R, F>(
    side: Side,
    op: Op,
    a: &Matrix<T, R>,
    c: &Matrix<T, R>,
    tag: i32,
    combine: F,
) -> Result<()>
where
    T: Scalar,
    R: Runtime,
    F: Fn(usize, &Tile<T>, &Tile<T>) -> Result<()>,
{
    if a.nt() != 1 {
        return Err(Error::invalid_argument("a", "ttmqr needs a single tile column"));
    }
    let along = if side == Side::Left { c.mt() } else { c.nt() };
    if along != a.mt() {
        return Err(Error::shape_mismatch((a.mt(), 1), (along, 1)));
    }
    let layout = Layout::ColMajor;
    let ranks = rank_first_rows(a);
    let nranks = ranks.len();
    let nlevels = levels(nranks);
    let descend = (side == Side::Left) == (op == Op::NoTrans);
    let mut step = if descend && nlevels > 0 { 1 << (nlevels - 1) } else { 1 };
    let k_end = if side == Side::Left { c.nt() } else { c.mt() };
    let at = |row: usize, k: usize| if side == Side::Left { (row, k) } else { (k, row) };

    for level in 0..nlevels {
        // send C1 down, or receive it from the upper partner
        for index in (0..nranks).step_by(step) {
            let row = ranks[index].1;
            for k in 0..k_end {
                let (i, j) = at(row, k);
                if !c.tile_is_local(i, j) {
                    continue;
                }
                if index % (2 * step) == 0 {
                    if index + step < nranks {
                        let (id, jd) = at(ranks[index + step].1, k);
                        c.tile_get_for_writing(i, j, Location::Host, LayoutConvert::ColMajor)?;
                        c.tile_send(i, j, c.tile_rank(id, jd), tag)?;
                    }
                } else {
                    let (i1, j1) = at(ranks[index - step].1, k);
                    c.tile_recv(i1, j1, c.tile_rank(i1, j1), layout, tag)?;
                }
            }
        }

        // update on the lower partner
        for index in (0..nranks).step_by(step) {
            if index % (2 * step) == 0 {
                continue;
            }
            let row = ranks[index].1;
            for k in 0..k_end {
                let (i, j) = at(row, k);
                if !c.tile_is_local(i, j) {
                    continue;
                }
                let (i1, j1) = at(ranks[index - step].1, k);
                a.tile_get_for_reading(row, 0, Location::Host, LayoutConvert::ColMajor)?;
                let c1 = c.tile_get_for_writing(i1, j1, Location::Host, LayoutConvert::ColMajor)?;
                let c2 = c.tile_get_for_writing(i, j, Location::Host, LayoutConvert::ColMajor)?;
                combine(row, &c1, &c2)?;
                a.tile_tick(row, 0);
            }
        }

        // return C1 to the upper partner
        for index in (0..nranks).step_by(step) {
            let row = ranks[index].1;
            for k in 0..k_end {
                let (i, j) = at(row, k);
                if !c.tile_is_local(i, j) {
                    continue;
                }
                if index % (2 * step) == 0 {
                    if index + step < nranks {
                        let (id, jd) = at(ranks[index + step].1, k);
                        c.tile_recv(i, j, c.tile_rank(id, jd), layout, tag)?;
                    }
                } else {
                    let (i1, j1) = at(ranks[index - step].1, k);
                    c.tile_send(i1, j1, c.tile_rank(i1, j1), tag)?;
                    c.tile_tick(i1, j1);
                }
            }
        }
        debug!(level, step, descend, "ttmqr level");
        step = if descend { step / 2 } else { step * 2 };
    }
    Ok(())
}
